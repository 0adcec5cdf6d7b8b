//! FFT engine and spectra
//!
//! Two analysis paths share one engine of fixed power-of-two size:
//! - real full-spectrum: one-sided magnitudes over `0..fs/2`
//! - complex baseband: full-length magnitudes on an axis centred on the
//!   heterodyne frequency, reordered so frequencies increase
//!
//! Magnitudes are in dB re 1.0 with Hann coherent-gain compensation, so a
//! full-scale sine reads close to 0 dB on the real path.

use std::f64::consts::TAU;
use std::sync::Arc;

use num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::{Fft, FftPlanner};

use tf_core::{TfError, TfResult, linear_to_db};

/// Smallest FFT size the engine accepts
pub const MIN_FFT_SIZE: usize = 2048;

/// Magnitude spectrum with its frequency axis
#[derive(Debug, Clone)]
pub struct Spectrum {
    /// Magnitudes in dB re 1.0
    pub magnitudes_db: Vec<f64>,
    /// Bin centre frequencies in Hz, monotonically increasing
    pub frequencies_hz: Vec<f64>,
    /// True when the axis is centred on a heterodyne frequency
    pub is_baseband: bool,
    /// Rate of the signal this spectrum was taken from
    pub sample_rate: f64,
}

impl Spectrum {
    /// Number of bins
    pub fn len(&self) -> usize {
        self.magnitudes_db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes_db.is_empty()
    }

    /// Index of the strongest bin, if any
    pub fn peak_bin(&self) -> Option<usize> {
        self.magnitudes_db
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }
}

/// Windowed FFT engine with reusable scratch
pub struct FftEngine {
    size: usize,
    window: Option<Vec<f64>>,
    coherent_gain: f64,
    real_fft: Arc<dyn RealToComplex<f64>>,
    complex_fft: Arc<dyn Fft<f64>>,
    real_input: Vec<f64>,
    real_output: Vec<Complex<f64>>,
    complex_buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl FftEngine {
    /// Create an engine of fixed size; `windowed` applies a Hann window
    pub fn new(size: usize, windowed: bool) -> TfResult<Self> {
        if !size.is_power_of_two() || size < MIN_FFT_SIZE {
            return Err(TfError::InvalidFftSize(size));
        }

        let window = windowed.then(|| {
            (0..size)
                .map(|i| 0.5 * (1.0 - (TAU * i as f64 / size as f64).cos()))
                .collect::<Vec<f64>>()
        });
        let coherent_gain = window
            .as_ref()
            .map_or(1.0, |w| w.iter().sum::<f64>() / size as f64);

        let real_fft = RealFftPlanner::<f64>::new().plan_fft_forward(size);
        let complex_fft = FftPlanner::<f64>::new().plan_fft_forward(size);
        let scratch_len = complex_fft.get_inplace_scratch_len();

        Ok(Self {
            size,
            window,
            coherent_gain,
            real_fft,
            complex_fft,
            real_input: vec![0.0; size],
            real_output: vec![Complex::default(); size / 2 + 1],
            complex_buffer: vec![Complex::default(); size],
            scratch: vec![Complex::default(); scratch_len],
        })
    }

    /// Engine FFT size
    pub fn size(&self) -> usize {
        self.size
    }

    /// One-sided magnitude spectrum of real audio
    ///
    /// Uses the last `size` samples; shorter input is zero-padded.
    pub fn real_spectrum(&mut self, samples: &[f32], sample_rate: f64) -> Spectrum {
        self.real_input.fill(0.0);
        let take = samples.len().min(self.size);
        for (dst, &src) in self.real_input.iter_mut().zip(&samples[samples.len() - take..]) {
            *dst = src as f64;
        }
        if let Some(window) = &self.window {
            for (x, w) in self.real_input.iter_mut().zip(window) {
                *x *= w;
            }
        }

        // realfft only fails on length mismatch, which construction rules out.
        let _ = self
            .real_fft
            .process(&mut self.real_input, &mut self.real_output);

        let half = self.size / 2;
        let norm = 1.0 / (self.size as f64 * self.coherent_gain);
        let bin_hz = sample_rate / self.size as f64;

        let mut magnitudes_db = Vec::with_capacity(half + 1);
        let mut frequencies_hz = Vec::with_capacity(half + 1);
        for (i, value) in self.real_output.iter().enumerate() {
            // Interior bins carry both halves of the two-sided spectrum.
            let scale = if i == 0 || i == half { 1.0 } else { 2.0 };
            magnitudes_db.push(linear_to_db(value.norm() * norm * scale));
            frequencies_hz.push(i as f64 * bin_hz);
        }

        Spectrum {
            magnitudes_db,
            frequencies_hz,
            is_baseband: false,
            sample_rate,
        }
    }

    /// Full-length magnitude spectrum of complex baseband samples
    ///
    /// The axis is centred on `center_hz`; negative bins land below the
    /// centre and the output is reordered so frequencies increase.
    pub fn baseband_spectrum(
        &mut self,
        samples: &[Complex<f64>],
        center_hz: f64,
        output_rate: f64,
    ) -> Spectrum {
        self.complex_buffer.fill(Complex::default());
        let take = samples.len().min(self.size);
        self.complex_buffer[..take].copy_from_slice(&samples[samples.len() - take..]);
        if let Some(window) = &self.window {
            for (x, w) in self.complex_buffer.iter_mut().zip(window) {
                *x *= w;
            }
        }

        self.complex_fft
            .process_with_scratch(&mut self.complex_buffer, &mut self.scratch);

        let half = self.size / 2;
        // Zero-padding shrinks the effective window; normalise by the
        // energy actually present so magnitudes stay comparable.
        let effective = match &self.window {
            Some(window) => window[..take].iter().sum::<f64>().max(1.0),
            None => take.max(1) as f64,
        };
        let norm = 1.0 / effective;
        let bin_hz = output_rate / self.size as f64;

        let mut magnitudes_db = Vec::with_capacity(self.size);
        let mut frequencies_hz = Vec::with_capacity(self.size);
        for j in 0..self.size {
            // Negative-frequency half first: source bin N/2..N maps below
            // the centre, 0..N/2 above.
            let i = (j + half) % self.size;
            let offset = if i >= half {
                (i as f64 - self.size as f64) * bin_hz
            } else {
                i as f64 * bin_hz
            };
            magnitudes_db.push(linear_to_db(self.complex_buffer[i].norm() * norm));
            frequencies_hz.push(center_hz + offset);
        }

        Spectrum {
            magnitudes_db,
            frequencies_hz,
            is_baseband: true,
            sample_rate: output_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_rejects_bad_sizes() {
        assert!(FftEngine::new(1000, true).is_err());
        assert!(FftEngine::new(1024, true).is_err());
        assert!(FftEngine::new(2048, true).is_ok());
    }

    #[test]
    fn test_real_spectrum_peak_and_axis() {
        let mut engine = FftEngine::new(4096, true).unwrap();
        let fs = 48_000.0;
        let samples: Vec<f32> = (0..8192)
            .map(|n| (TAU * 440.0 * n as f64 / fs).sin() as f32)
            .collect();

        let spectrum = engine.real_spectrum(&samples, fs);
        assert_eq!(spectrum.len(), 2049);
        assert!(!spectrum.is_baseband);

        let peak = spectrum.peak_bin().unwrap();
        let peak_hz = spectrum.frequencies_hz[peak];
        assert!((peak_hz - 440.0).abs() < fs / 4096.0, "peak at {peak_hz}");

        // Unit sine reads near 0 dB; Hann scalloping costs at most ~1.4 dB.
        assert!(spectrum.magnitudes_db[peak] > -2.0);
        assert!(spectrum.magnitudes_db[peak] < 0.5);

        // Axis is i * fs / N.
        assert_eq!(spectrum.frequencies_hz[0], 0.0);
        assert_abs_diff_eq!(spectrum.frequencies_hz[1], fs / 4096.0, epsilon = 1e-9);
    }

    #[test]
    fn test_real_spectrum_floor_is_finite() {
        let mut engine = FftEngine::new(2048, true).unwrap();
        let spectrum = engine.real_spectrum(&vec![0.0; 2048], 48_000.0);
        assert!(spectrum.magnitudes_db.iter().all(|db| db.is_finite()));
    }

    #[test]
    fn test_baseband_axis_is_monotone_and_centred() {
        let mut engine = FftEngine::new(2048, false).unwrap();
        let samples = vec![Complex::new(0.5, 0.0); 2048];
        let spectrum = engine.baseband_spectrum(&samples, 440.0, 250.0);

        assert_eq!(spectrum.len(), 2048);
        assert!(spectrum.is_baseband);
        for pair in spectrum.frequencies_hz.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        assert!((spectrum.frequencies_hz[0] - (440.0 - 125.0)).abs() < 1e-9);

        // A DC complex exponential peaks at the centre bin.
        let peak = spectrum.peak_bin().unwrap();
        assert!((spectrum.frequencies_hz[peak] - 440.0).abs() <= 250.0 / 2048.0);
        assert!(spectrum.magnitudes_db[peak] > -6.1);
        assert!(spectrum.magnitudes_db[peak] < -5.9);
    }

    #[test]
    fn test_baseband_offset_tone_lands_off_centre() {
        let mut engine = FftEngine::new(2048, true).unwrap();
        let fs_o = 250.0;
        // -3 Hz rotation relative to the centre.
        let samples: Vec<Complex<f64>> = (0..2048)
            .map(|n| Complex::from_polar(0.5, -TAU * 3.0 * n as f64 / fs_o))
            .collect();

        let spectrum = engine.baseband_spectrum(&samples, 440.0, fs_o);
        let peak = spectrum.peak_bin().unwrap();
        assert!((spectrum.frequencies_hz[peak] - 437.0).abs() < 2.0 * fs_o / 2048.0);
    }
}
