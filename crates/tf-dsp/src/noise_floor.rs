//! Noise-floor estimation
//!
//! Two estimators with different jobs:
//! - [`robust_floor_db`]: cheap global floor for SNR gating, `mean + 2
//!   sigma` of the dB spectrum (~97.5th percentile for near-Gaussian
//!   noise)
//! - [`QuantileFloor`]: per-bin floor for denoising, fitted by iterative
//!   quantile regression with total-variation smoothing so narrow peaks
//!   are excluded while broadband tilt is followed

use serde::{Deserialize, Serialize};

/// Global robust noise floor: `mean + 2 sigma` in dB
pub fn robust_floor_db(magnitudes_db: &[f64]) -> f64 {
    if magnitudes_db.is_empty() {
        return 0.0;
    }
    let n = magnitudes_db.len() as f64;
    let mean = magnitudes_db.iter().sum::<f64>() / n;
    let variance = magnitudes_db
        .iter()
        .map(|&x| (x - mean) * (x - mean))
        .sum::<f64>()
        / n;
    mean + 2.0 * variance.sqrt()
}

/// Configuration of the quantile-regression floor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuantileFloorConfig {
    /// Quantile tracked by the fit (0..1)
    pub quantile: f64,
    /// Smoothing bandwidth in semitones
    pub semitones: f64,
    /// Sub-gradient step size, dB
    pub step_db: f64,
    /// Outer iteration cap
    pub max_iterations: usize,
}

impl Default for QuantileFloorConfig {
    fn default() -> Self {
        Self {
            quantile: 0.25,
            semitones: 2.0,
            step_db: 0.5,
            max_iterations: 10,
        }
    }
}

/// Iterative quantile-regression floor estimator
///
/// Scratch buffers persist across calls; `estimate` allocates nothing
/// once the spectrum length is stable.
pub struct QuantileFloor {
    config: QuantileFloorConfig,
    floor: Vec<f64>,
    scratch: Vec<f64>,
    /// Per-bin half-width of the musical bandwidth, in bins
    half_width: Vec<f64>,
    /// Per-bin total-variation weight
    tv_weight: Vec<f64>,
}

impl QuantileFloor {
    pub fn new(config: QuantileFloorConfig) -> Self {
        Self {
            config,
            floor: Vec::new(),
            scratch: Vec::new(),
            half_width: Vec::new(),
            tv_weight: Vec::new(),
        }
    }

    /// Fit the floor under `magnitudes_db` on the given frequency axis
    ///
    /// `frequencies_hz` must be uniform and as long as the spectrum.
    pub fn estimate(&mut self, magnitudes_db: &[f64], frequencies_hz: &[f64]) -> &[f64] {
        let n = magnitudes_db.len();
        if n < 3 {
            self.floor.clear();
            self.floor.extend_from_slice(magnitudes_db);
            return &self.floor;
        }

        self.prepare_axis(frequencies_hz);

        // Moving minimum over the musical bandwidth seeds the fit below
        // every narrow peak.
        self.floor.clear();
        for i in 0..n {
            let w = self.half_width[i].ceil() as usize;
            let lo = i.saturating_sub(w);
            let hi = (i + w + 1).min(n);
            let min = magnitudes_db[lo..hi]
                .iter()
                .copied()
                .fold(f64::INFINITY, f64::min);
            self.floor.push(min);
        }

        let q = self.config.quantile;
        let step = self.config.step_db;

        for _ in 0..self.config.max_iterations {
            let mut max_change = 0.0_f64;

            // Sub-gradient step on the quantile loss.
            for i in 0..n {
                let residual = magnitudes_db[i] - self.floor[i];
                let gradient = if residual > 0.0 { q } else { q - 1.0 };
                let delta = step * gradient;
                self.floor[i] += delta;
                max_change = max_change.max(delta.abs());
            }

            // Short total-variation pass; high frequencies smooth less in
            // bin space (their musical bandwidth spans more bins already).
            for _ in 0..3 {
                self.scratch.clear();
                self.scratch.extend_from_slice(&self.floor);
                for i in 1..n - 1 {
                    let lap = self.scratch[i - 1] - 2.0 * self.scratch[i] + self.scratch[i + 1];
                    let delta = 0.25 / self.tv_weight[i] * lap;
                    self.floor[i] += delta;
                    max_change = max_change.max(delta.abs());
                }
            }

            // The floor never exceeds the data.
            for (f, &d) in self.floor.iter_mut().zip(magnitudes_db) {
                if *f > d {
                    *f = d;
                }
            }

            if max_change < 1e-4 {
                break;
            }
        }

        self.gaussian_smooth(n);
        &self.floor
    }

    fn prepare_axis(&mut self, frequencies_hz: &[f64]) {
        let n = frequencies_hz.len();
        let step_hz = if n > 1 {
            (frequencies_hz[n - 1] - frequencies_hz[0]) / (n - 1) as f64
        } else {
            1.0
        };
        let s = self.config.semitones / 12.0;
        let spread = 2.0_f64.powf(s) - 2.0_f64.powf(-s);

        self.half_width.clear();
        self.tv_weight.clear();
        for &f in frequencies_hz {
            let f = f.max(20.0);
            self.half_width
                .push((f * spread / 2.0 / step_hz.max(1e-9)).max(1.0));
            self.tv_weight.push(f.log10() - 20.0_f64.log10() + 1.0);
        }
    }

    /// Musical-bandwidth Gaussian finish: sigma follows the per-bin
    /// half-width so the floor is smooth on a log-frequency axis.
    fn gaussian_smooth(&mut self, n: usize) {
        self.scratch.clear();
        self.scratch.extend_from_slice(&self.floor);

        for i in 0..n {
            let sigma = self.half_width[i];
            let radius = (2.0 * sigma).ceil() as usize;
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(n);

            let mut acc = 0.0;
            let mut total = 0.0;
            for j in lo..hi {
                let z = (j as f64 - i as f64) / sigma;
                let w = (-0.5 * z * z).exp();
                acc += w * self.scratch[j];
                total += w;
            }
            self.floor[i] = acc / total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(n: usize, sample_rate: f64) -> Vec<f64> {
        let step = sample_rate / 2.0 / (n - 1) as f64;
        (0..n).map(|i| i as f64 * step).collect()
    }

    #[test]
    fn test_robust_floor_on_flat_noise() {
        let data = vec![-60.0; 512];
        assert!((robust_floor_db(&data) + 60.0).abs() < 1e-9);
        assert_eq!(robust_floor_db(&[]), 0.0);
    }

    #[test]
    fn test_robust_floor_sits_above_mean() {
        // Alternate two levels: mean -55, sigma 5 -> floor -45.
        let data: Vec<f64> = (0..512)
            .map(|i| if i % 2 == 0 { -60.0 } else { -50.0 })
            .collect();
        assert!((robust_floor_db(&data) + 45.0).abs() < 1e-6);
    }

    #[test]
    fn test_quantile_floor_never_exceeds_flat_data() {
        let n = 1025;
        let data = vec![-70.0; n];
        let freqs = axis(n, 48_000.0);

        let mut estimator = QuantileFloor::new(QuantileFloorConfig::default());
        let floor = estimator.estimate(&data, &freqs);
        for &f in floor {
            assert!(f <= -70.0 + 1e-6);
            assert!(f > -80.0);
        }
    }

    #[test]
    fn test_quantile_floor_ignores_narrow_peak() {
        let n = 1025;
        let freqs = axis(n, 48_000.0);
        let mut data = vec![-70.0; n];
        // A strong narrow peak in the middle of the band.
        for (offset, boost) in [(0usize, 50.0), (1, 35.0), (2, 15.0)] {
            data[512 + offset] += boost;
            if offset > 0 {
                data[512 - offset] += boost;
            }
        }

        let mut estimator = QuantileFloor::new(QuantileFloorConfig::default());
        let floor = estimator.estimate(&data, &freqs);

        // The floor under the peak stays close to the surrounding noise.
        assert!(floor[512] < -55.0, "floor under peak {}", floor[512]);
        // And the peak clears the floor by a wide margin.
        assert!(data[512] - floor[512] > 35.0);
    }

    #[test]
    fn test_quantile_floor_follows_broadband_tilt() {
        let n = 1025;
        let freqs = axis(n, 48_000.0);
        // Gentle 20 dB downward tilt across the band.
        let data: Vec<f64> = (0..n)
            .map(|i| -60.0 - 20.0 * i as f64 / n as f64)
            .collect();

        let mut estimator = QuantileFloor::new(QuantileFloorConfig::default());
        let floor = estimator.estimate(&data, &freqs);

        // The fitted floor tracks the tilt at both ends.
        assert!((floor[100] - data[100]).abs() < 5.0);
        assert!((floor[900] - data[900]).abs() < 5.0);
        assert!(floor[100] > floor[900]);
    }
}
