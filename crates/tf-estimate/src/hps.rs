//! Harmonic product spectrum fundamental estimator
//!
//! Summing dB magnitudes at integer multiples of each candidate bin is a
//! weighted-product proxy that reinforces the fundamental over its
//! harmonics, which defeats the classic octave error of plain peak
//! picking. The chosen bin must also clear the robust noise floor in the
//! raw spectrum.

use serde::{Deserialize, Serialize};

use tf_dsp::Spectrum;
use tf_dsp::noise_floor::robust_floor_db;

/// HPS configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HpsConfig {
    /// Number of harmonics folded into the product (including the
    /// fundamental)
    pub harmonics: usize,
    /// Lowest fundamental considered, Hz
    pub min_hz: f64,
    /// Highest fundamental considered, Hz
    pub max_hz: f64,
    /// Raw-spectrum SNR a candidate must clear over the noise floor, dB
    pub snr_needed_db: f64,
}

impl Default for HpsConfig {
    fn default() -> Self {
        Self {
            harmonics: 4,
            min_hz: 55.0,
            max_hz: 2000.0,
            snr_needed_db: 30.0,
        }
    }
}

/// A fundamental candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HpsEstimate {
    /// Refined fundamental frequency, Hz
    pub frequency_hz: f64,
    /// Raw-spectrum SNR at the winning bin, dB
    pub snr_db: f64,
}

/// Harmonic product spectrum estimator with reusable accumulator
pub struct HpsEstimator {
    config: HpsConfig,
    hps: Vec<f64>,
}

impl HpsEstimator {
    pub fn new(config: HpsConfig) -> Self {
        Self {
            config,
            hps: Vec::new(),
        }
    }

    /// Estimate the fundamental from a full (non-baseband) spectrum
    ///
    /// Returns `None` when no bin clears the SNR gate; silence is not an
    /// error.
    pub fn estimate(&mut self, spectrum: &Spectrum) -> Option<HpsEstimate> {
        let mags = &spectrum.magnitudes_db;
        let freqs = &spectrum.frequencies_hz;
        let n = mags.len();
        let h = self.config.harmonics.max(2);
        if n < h * 2 {
            return None;
        }

        let floor_db = robust_floor_db(mags);

        // Accumulate harmonics in the dB domain.
        self.hps.clear();
        self.hps.extend_from_slice(mags);
        for harmonic in 2..=h {
            for i in 0..n / harmonic {
                self.hps[i] += mags[harmonic * i];
            }
        }

        let lo = freqs.iter().position(|&f| f >= self.config.min_hz)?;
        let hi = n / h;

        let mut best: Option<usize> = None;
        for i in lo..hi {
            if freqs[i] > self.config.max_hz {
                break;
            }
            if mags[i] - floor_db < self.config.snr_needed_db {
                continue;
            }
            if best.is_none_or(|b| self.hps[i] > self.hps[b]) {
                best = Some(i);
            }
        }
        let peak = best?;

        // Parabolic refinement on the HPS samples around the peak.
        let bin = peak as f64 + self.parabolic_offset(peak);
        let bin_hz = if freqs.len() > 1 { freqs[1] - freqs[0] } else { 0.0 };

        Some(HpsEstimate {
            frequency_hz: bin * bin_hz,
            snr_db: mags[peak] - floor_db,
        })
    }

    fn parabolic_offset(&self, peak: usize) -> f64 {
        if peak == 0 || peak + 1 >= self.hps.len() {
            return 0.0;
        }
        let alpha = self.hps[peak - 1];
        let beta = self.hps[peak];
        let gamma = self.hps[peak + 1];
        let denom = alpha - 2.0 * beta + gamma;
        if denom.abs() < 1e-12 {
            return 0.0;
        }
        let offset = 0.5 * (alpha - gamma) / denom;
        offset.clamp(-0.5, 0.5)
    }
}
