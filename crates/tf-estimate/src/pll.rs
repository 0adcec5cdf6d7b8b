//! Complex PLL bank with sequential residual subtraction
//!
//! A single PLL mixes the incoming baseband sample against its local
//! oscillator, turns the mix angle into a phase error, and drives both an
//! immediate phase nudge (damping) and a frequency integrator. Lock
//! quality decays exponentially with the error magnitude.
//!
//! The bank seeds several PLLs around the target pitch, lets each one
//! converge on the current residual, subtracts every accepted tone, and
//! carries accepted peaks across calls with exponential wall-clock decay.

use std::f64::consts::TAU;
use std::time::Instant;

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use tf_core::cents_between;

use crate::TrackedPeak;

/// Single-loop PLL configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PllConfig {
    /// Rate of the complex stream, Hz
    pub sample_rate: f64,
    /// Integral gain: phase error into the frequency estimate
    pub loop_gain: f64,
    /// Proportional gain: phase error into an immediate phase correction;
    /// without it the integrator loop rings forever
    pub phase_gain: f64,
    /// EWMA coefficient of the amplitude tracker
    pub amplitude_alpha: f64,
}

impl PllConfig {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            loop_gain: 0.1,
            phase_gain: 0.5,
            amplitude_alpha: 0.05,
        }
    }
}

/// Phase-locked loop over complex samples
#[derive(Debug, Clone)]
pub struct Pll {
    config: PllConfig,
    /// Instantaneous phase, wrapped to (-pi, pi]
    phase: f64,
    /// Frequency estimate, Hz (relative to the stream)
    frequency_hz: f64,
    /// EWMA amplitude estimate
    amplitude: f64,
    /// `exp(-10 |phase error|)` of the latest sample
    lock_quality: f64,
}

impl Pll {
    pub fn new(config: PllConfig, initial_hz: f64) -> Self {
        Self {
            config,
            phase: 0.0,
            frequency_hz: initial_hz,
            amplitude: 0.0,
            lock_quality: 0.0,
        }
    }

    /// Advance by one complex sample
    #[inline]
    pub fn step(&mut self, input: Complex<f64>) {
        let lo = Complex::from_polar(1.0, self.phase);
        // Angle of the input relative to the local oscillator.
        let error = (input * lo.conj()).arg();

        self.frequency_hz += self.config.loop_gain * error * self.config.sample_rate / TAU;
        self.phase += TAU * self.frequency_hz / self.config.sample_rate
            + self.config.phase_gain * error;
        self.phase = self.phase.sin().atan2(self.phase.cos());

        self.amplitude += self.config.amplitude_alpha * (input.norm() - self.amplitude);
        self.lock_quality = (-10.0 * error.abs()).exp();
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn lock_quality(&self) -> f64 {
        self.lock_quality
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BANK
// ═══════════════════════════════════════════════════════════════════════════

/// Bank configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PllBankConfig {
    /// Number of PLLs seeded per pass
    pub peaks: usize,
    /// Seed spacing around the target, cents
    pub spacing_cents: f64,
    /// Samples given to each PLL before judging lock, seconds
    pub convergence_seconds: f64,
    /// Lock quality a PLL must reach to be accepted
    pub lock_threshold: f64,
    /// Peaks closer than this to an accepted one are duplicates, cents
    pub duplicate_cents: f64,
    /// Accepted peaks matching a persisted one this closely reinforce it,
    /// cents
    pub merge_cents: f64,
    /// e-folding time of persisted peaks, seconds
    pub decay_seconds: f64,
    /// A lock is only accepted when its amplitude clears this fraction of
    /// the window RMS; keeps silence and subtraction ghosts out
    pub min_amplitude_ratio: f64,
    /// Loop parameters shared by every PLL
    pub pll: PllConfig,
}

impl PllBankConfig {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            peaks: 5,
            spacing_cents: 5.0,
            convergence_seconds: 0.25,
            lock_threshold: 0.8,
            duplicate_cents: 0.005,
            merge_cents: 2.0,
            decay_seconds: 2.0,
            min_amplitude_ratio: 0.2,
            pll: PllConfig::new(sample_rate),
        }
    }
}

/// A peak surviving across passes
#[derive(Debug, Clone, Copy)]
struct PersistentPeak {
    frequency_hz: f64,
    amplitude: f64,
    strength: f64,
}

/// Sequential-subtraction PLL bank with persistence
pub struct PllBank {
    config: PllBankConfig,
    persistent: Vec<PersistentPeak>,
    last_pass: Option<Instant>,
    residual: Vec<Complex<f64>>,
}

impl PllBank {
    pub fn new(config: PllBankConfig) -> Self {
        Self {
            config,
            persistent: Vec::new(),
            last_pass: None,
            residual: Vec::new(),
        }
    }

    /// Run one pass over a baseband window
    ///
    /// `center_hz` is the heterodyne centre of the stream, `target_hz`
    /// the absolute pitch the seeds cluster around. Returned peaks are
    /// absolute Hz, strongest persistence first.
    pub fn track(
        &mut self,
        samples: &[Complex<f64>],
        center_hz: f64,
        target_hz: f64,
        now: Instant,
    ) -> Vec<TrackedPeak> {
        self.decay(now);

        let fs = self.config.pll.sample_rate;
        let convergence = ((self.config.convergence_seconds * fs) as usize).max(16);
        if samples.len() < convergence {
            return self.report();
        }

        self.residual.clear();
        self.residual.extend_from_slice(samples);

        let rms = (samples.iter().map(|c| c.norm_sqr()).sum::<f64>() / samples.len() as f64)
            .sqrt();
        let amplitude_gate = (self.config.min_amplitude_ratio * rms).max(1e-3);

        let count = self.config.peaks.max(1);
        let centre_seed = (count as f64 - 1.0) / 2.0;
        let mut accepted: Vec<(f64, f64, f64)> = Vec::new();

        for p in 0..count {
            let offset_cents = (p as f64 - centre_seed) * self.config.spacing_cents;
            let seed_abs = target_hz * 2.0_f64.powf(offset_cents / 1200.0);
            let mut pll = Pll::new(self.config.pll, seed_abs - center_hz);

            for &sample in &self.residual[..convergence] {
                pll.step(sample);
            }

            if pll.lock_quality() < self.config.lock_threshold
                || pll.amplitude() < amplitude_gate
            {
                continue;
            }

            let absolute = center_hz + pll.frequency_hz();
            let duplicate = accepted
                .iter()
                .any(|&(f, _, _)| cents_between(f, absolute).abs() < self.config.duplicate_cents);
            if duplicate {
                continue;
            }

            self.subtract_tone(&pll, convergence);
            accepted.push((absolute, pll.amplitude(), pll.phase()));
        }

        for (frequency_hz, amplitude, _) in accepted {
            self.reinforce(frequency_hz, amplitude);
        }
        self.last_pass = Some(now);
        self.report()
    }

    /// Remove the converged tone from the whole residual
    fn subtract_tone(&mut self, pll: &Pll, convergence: usize) {
        let fs = self.config.pll.sample_rate;
        let omega = TAU * pll.frequency_hz() / fs;
        // Back out the start phase from where the loop ended up.
        let start_phase = pll.phase() - omega * convergence as f64;
        let amplitude = pll.amplitude();

        for (n, sample) in self.residual.iter_mut().enumerate() {
            *sample -= Complex::from_polar(amplitude, start_phase + omega * n as f64);
        }
    }

    fn reinforce(&mut self, frequency_hz: f64, amplitude: f64) {
        if let Some(peak) = self.persistent.iter_mut().find(|peak| {
            cents_between(peak.frequency_hz, frequency_hz).abs() < self.config.merge_cents
        }) {
            peak.frequency_hz = frequency_hz;
            peak.amplitude = amplitude;
            peak.strength = 1.0;
        } else {
            self.persistent.push(PersistentPeak {
                frequency_hz,
                amplitude,
                strength: 1.0,
            });
        }
    }

    fn decay(&mut self, now: Instant) {
        if let Some(last) = self.last_pass {
            let dt = now.saturating_duration_since(last).as_secs_f64();
            let factor = (-dt / self.config.decay_seconds).exp();
            for peak in &mut self.persistent {
                peak.strength *= factor;
            }
            self.persistent.retain(|peak| peak.strength > 0.05);
        }
    }

    fn report(&self) -> Vec<TrackedPeak> {
        let mut peaks = self.persistent.clone();
        peaks.sort_by(|a, b| {
            (b.strength * b.amplitude).total_cmp(&(a.strength * a.amplitude))
        });
        peaks
            .into_iter()
            .map(|peak| TrackedPeak {
                frequency_hz: peak.frequency_hz,
                amplitude: peak.amplitude,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn baseband_tone(offset_hz: f64, amp: f64, fs: f64, len: usize) -> Vec<Complex<f64>> {
        (0..len)
            .map(|n| Complex::from_polar(amp, TAU * offset_hz * n as f64 / fs))
            .collect()
    }

    #[test]
    fn test_pll_locks_onto_tone() {
        let fs = 250.0;
        let mut pll = Pll::new(PllConfig::new(fs), 0.0);

        for y in baseband_tone(1.5, 0.6, fs, 250) {
            pll.step(y);
        }

        assert!((pll.frequency_hz() - 1.5).abs() < 0.1, "freq {}", pll.frequency_hz());
        assert!((pll.amplitude() - 0.6).abs() < 0.05);
        assert!(pll.lock_quality() > 0.8, "lock {}", pll.lock_quality());
    }

    #[test]
    fn test_pll_phase_stays_wrapped() {
        let fs = 250.0;
        let mut pll = Pll::new(PllConfig::new(fs), 40.0);
        for y in baseband_tone(40.0, 0.5, fs, 1000) {
            pll.step(y);
            assert!(pll.phase() > -std::f64::consts::PI);
            assert!(pll.phase() <= std::f64::consts::PI);
        }
    }

    #[test]
    fn test_bank_finds_single_tone() {
        let fs = 250.0;
        let mut bank = PllBank::new(PllBankConfig::new(fs));

        // 440.5 Hz seen from a 440 Hz centre.
        let samples = baseband_tone(0.5, 0.5, fs, 250);
        let peaks = bank.track(&samples, 440.0, 440.0, Instant::now());

        assert!(!peaks.is_empty());
        assert!(
            (peaks[0].frequency_hz - 440.5).abs() < 0.2,
            "freq {}",
            peaks[0].frequency_hz
        );
    }

    #[test]
    fn test_bank_reports_dominant_of_two_tones() {
        let fs = 250.0;
        let config = PllBankConfig {
            spacing_cents: 4.0,
            ..PllBankConfig::new(fs)
        };
        let mut bank = PllBank::new(config);

        // 439 and 441 Hz around a 440 centre, 3:1 amplitude. The beat
        // between them wobbles any single loop, so only the dominant
        // tone's neighborhood is asserted.
        let len = 500;
        let a = baseband_tone(-1.0, 0.6, fs, len);
        let b = baseband_tone(1.0, 0.2, fs, len);
        let mixed: Vec<Complex<f64>> = a.into_iter().zip(b).map(|(x, y)| x + y).collect();

        let peaks = bank.track(&mixed, 440.0, 440.0, Instant::now());
        assert!(!peaks.is_empty());
        assert!(
            (peaks[0].frequency_hz - 439.0).abs() < 1.5,
            "dominant {}",
            peaks[0].frequency_hz
        );
        // Every reported peak stays inside the two-tone neighborhood.
        for peak in &peaks {
            assert!(peak.frequency_hz > 437.0 && peak.frequency_hz < 443.0);
        }
    }

    #[test]
    fn test_persistence_decays_over_wall_clock() {
        let fs = 250.0;
        let mut bank = PllBank::new(PllBankConfig::new(fs));
        let start = Instant::now();

        let samples = baseband_tone(0.5, 0.5, fs, 250);
        let peaks = bank.track(&samples, 440.0, 440.0, start);
        assert!(!peaks.is_empty());

        // Ten seconds of silence: five decay constants wipe the peak.
        let silence = vec![Complex::new(0.0, 0.0); 250];
        let later = start + Duration::from_secs(10);
        let peaks = bank.track(&silence, 440.0, 440.0, later);
        assert!(peaks.is_empty(), "stale peaks {peaks:?}");
    }

    #[test]
    fn test_duplicate_locks_collapse() {
        let fs = 250.0;
        // Tight seeds all converge onto the same tone.
        let config = PllBankConfig {
            spacing_cents: 0.5,
            ..PllBankConfig::new(fs)
        };
        let mut bank = PllBank::new(config);

        let samples = baseband_tone(0.2, 0.5, fs, 500);
        let peaks = bank.track(&samples, 440.0, 440.0, Instant::now());
        assert_eq!(peaks.len(), 1, "peaks {peaks:?}");
    }
}
