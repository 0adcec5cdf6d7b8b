//! Notes, temperaments, and cents math
//!
//! The tuning target is derived from three things: a MIDI note index, a
//! temperament (per-degree cent offsets from equal temperament, rooted at
//! C), and the concert pitch of A4. Partials multiply the fundamental.

use serde::{Deserialize, Serialize};

/// Note names (sharps)
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Standard concert pitch for A4 in Hz
pub const CONCERT_A4: f64 = 440.0;

/// MIDI index of A4
pub const MIDI_A4: i32 = 69;

// ═══════════════════════════════════════════════════════════════════════════
// CENTS MATH
// ═══════════════════════════════════════════════════════════════════════════

/// Frequency ratio for a cent offset
#[inline]
pub fn ratio_from_cents(cents: f64) -> f64 {
    2.0_f64.powf(cents / 1200.0)
}

/// Signed cent distance from `reference` to `freq`
#[inline]
pub fn cents_between(reference: f64, freq: f64) -> f64 {
    1200.0 * (freq / reference).log2()
}

// ═══════════════════════════════════════════════════════════════════════════
// NOTE
// ═══════════════════════════════════════════════════════════════════════════

/// A named pitch on the chromatic scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    /// MIDI note index (69 = A4)
    pub midi: i32,
}

impl Note {
    /// Create from a MIDI note index
    pub const fn from_midi(midi: i32) -> Self {
        Self { midi }
    }

    /// Parse a simple name such as "A4", "C#3", or "Bb2"
    pub fn from_name(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        let letter = chars.next()?.to_ascii_uppercase();
        let degree: i32 = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };

        let rest: String = chars.collect();
        let (accidental, octave_str) = match rest.chars().next() {
            Some('#') => (1, &rest[1..]),
            Some('b') => (-1, &rest[1..]),
            _ => (0, rest.as_str()),
        };

        let octave: i32 = octave_str.parse().ok()?;
        let midi = (octave + 1) * 12 + degree + accidental;
        (0..=127).contains(&midi).then_some(Self { midi })
    }

    /// Scale degree relative to C (0..12)
    #[inline]
    pub fn degree(&self) -> usize {
        self.midi.rem_euclid(12) as usize
    }

    /// Octave number (A4 -> 4)
    #[inline]
    pub fn octave(&self) -> i32 {
        self.midi.div_euclid(12) - 1
    }

    /// Display name such as "A4"
    pub fn name(&self) -> String {
        format!("{}{}", NOTE_NAMES[self.degree()], self.octave())
    }

    /// Equal-tempered frequency under the given concert pitch
    pub fn equal_frequency(&self, concert_pitch: f64) -> f64 {
        concert_pitch * 2.0_f64.powf((self.midi - MIDI_A4) as f64 / 12.0)
    }

    /// Frequency under a temperament and concert pitch
    pub fn frequency(&self, temperament: Temperament, concert_pitch: f64) -> f64 {
        self.equal_frequency(concert_pitch) * ratio_from_cents(temperament.offset_cents(self.degree()))
    }

    /// Nearest note to a frequency under a temperament and concert pitch,
    /// together with the signed error in cents
    pub fn nearest(freq: f64, temperament: Temperament, concert_pitch: f64) -> Option<(Self, f64)> {
        if freq <= 0.0 {
            return None;
        }

        // Equal-tempered guess, then search the neighborhood since
        // temperament offsets can move the boundary by up to ~28 cents.
        let guess = (12.0 * (freq / concert_pitch).log2()).round() as i32 + MIDI_A4;

        let mut best: Option<(Self, f64)> = None;
        for midi in (guess - 2)..=(guess + 2) {
            if !(0..=127).contains(&midi) {
                continue;
            }
            let note = Self::from_midi(midi);
            let err = cents_between(note.frequency(temperament, concert_pitch), freq);
            if best.is_none_or(|(_, e)| err.abs() < e.abs()) {
                best = Some((note, err));
            }
        }
        best
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TEMPERAMENTS
// ═══════════════════════════════════════════════════════════════════════════

/// Historic temperament, expressed as cent offsets from equal temperament
/// for the twelve degrees starting at C
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Temperament {
    /// Twelve-tone equal temperament
    #[default]
    Equal,
    /// Pythagorean (pure fifths)
    Pythagorean,
    /// Quarter-comma meantone
    QuarterCommaMeantone,
    /// Werckmeister III well temperament
    WerckmeisterIII,
    /// Kirnberger III well temperament
    KirnbergerIII,
}

impl Temperament {
    /// Cent offsets from equal temperament, degrees C..B
    pub fn offsets(&self) -> &'static [f64; 12] {
        match self {
            Temperament::Equal => &[0.0; 12],
            Temperament::Pythagorean => &[
                0.0, 13.7, 3.9, -5.9, 7.8, -2.0, 11.7, 2.0, 15.6, 5.9, -3.9, 9.8,
            ],
            Temperament::QuarterCommaMeantone => &[
                0.0, -24.0, -6.8, 10.3, -13.7, 3.4, -20.5, -3.4, -27.4, -10.3, 6.8, -17.1,
            ],
            Temperament::WerckmeisterIII => &[
                0.0, -9.8, -7.8, -5.9, -9.8, -2.0, -11.7, -3.9, -7.8, -11.7, -3.9, -7.8,
            ],
            Temperament::KirnbergerIII => &[
                0.0, -9.8, -6.8, -5.9, -13.7, -2.0, -11.7, -3.4, -7.8, -10.3, -3.9, -12.7,
            ],
        }
    }

    /// Cent offset for a scale degree (0 = C)
    #[inline]
    pub fn offset_cents(&self, degree: usize) -> f64 {
        self.offsets()[degree % 12]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_note_name_round_trip() {
        for name in ["C0", "A4", "C#3", "G#7", "B8"] {
            let note = Note::from_name(name).unwrap();
            assert_eq!(note.name(), name);
            assert_eq!(Note::from_midi(note.midi), note);
        }
    }

    #[test]
    fn test_flat_names_normalize_to_sharps() {
        let bb = Note::from_name("Bb2").unwrap();
        assert_eq!(bb.name(), "A#2");
    }

    #[test]
    fn test_invalid_names() {
        assert!(Note::from_name("H4").is_none());
        assert!(Note::from_name("A").is_none());
        assert!(Note::from_name("C99").is_none());
    }

    #[test]
    fn test_equal_frequency() {
        let a4 = Note::from_name("A4").unwrap();
        assert_relative_eq!(a4.equal_frequency(440.0), 440.0, epsilon = 1e-9);

        let a3 = Note::from_name("A3").unwrap();
        assert_relative_eq!(a3.equal_frequency(440.0), 220.0, epsilon = 1e-9);

        // Concert pitch scales everything
        assert_relative_eq!(a4.equal_frequency(443.0), 443.0, epsilon = 1e-9);
    }

    #[test]
    fn test_temperament_offsets() {
        // A is the reference degree in all supplied temperaments only for
        // equal; Pythagorean A sits 5.9 cents sharp of equal.
        let a4 = Note::from_name("A4").unwrap();
        let pyth = a4.frequency(Temperament::Pythagorean, 440.0);
        assert!((cents_between(440.0, pyth) - 5.9).abs() < 0.05);

        let equal = a4.frequency(Temperament::Equal, 440.0);
        assert!((equal - 440.0).abs() < 1e-9);
    }

    #[test]
    fn test_nearest_note() {
        let (note, err) = Note::nearest(442.0, Temperament::Equal, 440.0).unwrap();
        assert_eq!(note.name(), "A4");
        assert!((err - cents_between(440.0, 442.0)).abs() < 1e-9);

        let (note, err) = Note::nearest(261.63, Temperament::Equal, 440.0).unwrap();
        assert_eq!(note.name(), "C4");
        assert!(err.abs() < 1.0);
    }

    #[test]
    fn test_cents_math() {
        assert!((ratio_from_cents(1200.0) - 2.0).abs() < 1e-12);
        assert!((cents_between(440.0, 880.0) - 1200.0).abs() < 1e-9);
        assert!((cents_between(440.0, 440.0)).abs() < 1e-12);
    }
}
