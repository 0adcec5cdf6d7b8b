//! Subspace frequency estimation (MUSIC / harmonic MUSIC)
//!
//! A snapshot matrix of overlapping signal segments yields a sample
//! covariance whose smallest eigenvectors span the noise subspace. Tones
//! appear where the steering vector is orthogonal to that subspace, so
//! the pseudospectrum `L(M-L) / ||Un^H A||_F^2` peaks sharply at source
//! frequencies. The harmonic extension stacks steering vectors for the
//! first L partials so a harmonic source reinforces its own fundamental.
//!
//! Grid evaluation is embarrassingly parallel and runs through rayon;
//! coarse grid peaks are refined by ternary search on the continuous
//! pseudospectrum.

use std::f64::consts::{PI, TAU};

use nalgebra::DMatrix;
use num_complex::Complex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::TrackedPeak;

/// MUSIC configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MusicConfig {
    /// Snapshot length M (rows of the snapshot matrix)
    pub snapshot_rows: usize,
    /// Number of snapshots N (columns)
    pub snapshots: usize,
    /// Expected source count K
    pub sources: usize,
    /// Harmonics per source in the steering stack (1 = plain MUSIC)
    pub harmonics: usize,
    /// Coarse evaluation grid resolution
    pub grid_points: usize,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            snapshot_rows: 16,
            snapshots: 128,
            sources: 2,
            harmonics: 1,
            grid_points: 200,
        }
    }
}

/// MUSIC estimator with cached noise subspace
pub struct MusicEstimator {
    config: MusicConfig,
    snapshot: DMatrix<Complex<f64>>,
    /// Noise subspace, invalidated by every snapshot refresh
    noise_subspace: Option<DMatrix<Complex<f64>>>,
}

impl MusicEstimator {
    pub fn new(config: MusicConfig) -> Self {
        let m = config.snapshot_rows.max(2);
        Self {
            config: MusicConfig {
                snapshot_rows: m,
                ..config
            },
            snapshot: DMatrix::zeros(m, config.snapshots.max(1)),
            noise_subspace: None,
        }
    }

    /// Signal-subspace dimension K' = sources x harmonics, capped so at
    /// least one noise dimension remains
    fn signal_dim(&self) -> usize {
        (self.config.sources * self.config.harmonics.max(1))
            .clamp(1, self.config.snapshot_rows - 1)
    }

    /// Rebuild the snapshot matrix and noise subspace from the latest
    /// window; returns false when too few samples exist
    pub fn refresh(&mut self, samples: &[Complex<f64>]) -> bool {
        let m = self.config.snapshot_rows;
        let n = self.config.snapshots.max(1);
        if samples.len() < m + n - 1 {
            return false;
        }

        // Stride chosen so n overlapping snapshots cover the window.
        let stride = if n > 1 {
            ((samples.len() - m) / (n - 1)).max(1)
        } else {
            1
        };

        for j in 0..n {
            let start = j * stride;
            for i in 0..m {
                self.snapshot[(i, j)] = samples[start + i];
            }
        }

        // Sample covariance and Hermitian eigendecomposition.
        let covariance = (&self.snapshot * self.snapshot.adjoint()) / Complex::from(n as f64);
        let eigen = covariance.symmetric_eigen();

        let mut order: Vec<usize> = (0..m).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

        let noise_dim = m - self.signal_dim();
        let mut subspace = DMatrix::zeros(m, noise_dim);
        for (col, &idx) in order.iter().take(noise_dim).enumerate() {
            subspace.set_column(col, &eigen.eigenvectors.column(idx));
        }
        self.noise_subspace = Some(subspace);
        true
    }

    /// Pseudospectrum value at a normalized frequency (radians/sample)
    pub fn pseudospectrum(&self, omega: f64) -> f64 {
        let Some(subspace) = &self.noise_subspace else {
            return 0.0;
        };
        let m = self.config.snapshot_rows;
        let l = self.config.harmonics.max(1);

        // Frobenius norm of Un^H A, harmonic columns past Nyquist zeroed.
        let mut denominator = 0.0;
        for harmonic in 1..=l {
            let w = omega * harmonic as f64;
            if w > PI {
                continue;
            }
            for col in subspace.column_iter() {
                let mut dot = Complex::new(0.0, 0.0);
                for (row, &u) in col.iter().enumerate() {
                    // u^H a with a_m = exp(-j w m)
                    dot += u.conj() * Complex::from_polar(1.0, -w * row as f64);
                }
                denominator += dot.norm_sqr();
            }
        }

        (l * (m - l)) as f64 / denominator.max(1e-12)
    }

    /// Top-K peaks over a log-spaced grid between the viewport bounds
    ///
    /// Frequencies are absolute Hz for the stream the snapshot was taken
    /// from. Peak amplitudes are pseudospectrum values normalized to the
    /// strongest peak.
    pub fn estimate(&self, min_hz: f64, max_hz: f64, sample_rate: f64) -> Vec<TrackedPeak> {
        if self.noise_subspace.is_none() {
            return Vec::new();
        }

        let lo = min_hz.max(1.0);
        let hi = max_hz.min(0.999 * sample_rate / 2.0);
        if lo >= hi {
            return Vec::new();
        }

        let points = self.config.grid_points.max(16);
        let ratio = hi / lo;
        let grid: Vec<f64> = (0..points)
            .map(|i| lo * ratio.powf(i as f64 / (points - 1) as f64))
            .collect();

        let values: Vec<f64> = grid
            .par_iter()
            .map(|&f| self.pseudospectrum(TAU * f / sample_rate))
            .collect();

        // Local maxima, strongest first.
        let mut peaks: Vec<(usize, f64)> = (1..points - 1)
            .filter(|&i| values[i] > values[i - 1] && values[i] >= values[i + 1])
            .map(|i| (i, values[i]))
            .collect();
        peaks.sort_by(|a, b| b.1.total_cmp(&a.1));
        peaks.truncate(self.config.sources.max(1));

        let best = peaks.first().map(|&(_, v)| v).unwrap_or(1.0);
        peaks
            .into_iter()
            .map(|(i, v)| TrackedPeak {
                frequency_hz: self.refine_peak(grid[i - 1], grid[i + 1], sample_rate),
                amplitude: v / best,
            })
            .collect()
    }

    /// Ternary search for the pseudospectrum maximum inside a bracket
    fn refine_peak(&self, mut lo: f64, mut hi: f64, sample_rate: f64) -> f64 {
        for _ in 0..60 {
            let third = (hi - lo) / 3.0;
            let a = lo + third;
            let b = hi - third;
            if self.pseudospectrum(TAU * a / sample_rate)
                < self.pseudospectrum(TAU * b / sample_rate)
            {
                lo = a;
            } else {
                hi = b;
            }
        }
        (lo + hi) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tone(f1: f64, f2: f64, sample_rate: f64, len: usize) -> Vec<Complex<f64>> {
        (0..len)
            .map(|n| {
                let t = n as f64 / sample_rate;
                Complex::from_polar(0.5, TAU * f1 * t) + Complex::from_polar(0.5, TAU * f2 * t)
            })
            .collect()
    }

    #[test]
    fn test_refresh_needs_enough_samples() {
        let mut music = MusicEstimator::new(MusicConfig::default());
        assert!(!music.refresh(&vec![Complex::new(0.0, 0.0); 10]));
        assert!(music.estimate(100.0, 1000.0, 4000.0).is_empty());
        assert!(music.refresh(&vec![Complex::new(0.0, 0.0); 1024]));
    }

    #[test]
    fn test_resolves_two_tones() {
        // The 440 + 660 Hz scenario: fs 4000, M 16, N 128.
        let mut music = MusicEstimator::new(MusicConfig::default());
        let samples = two_tone(440.0, 660.0, 4000.0, 1024);
        assert!(music.refresh(&samples));

        let mut peaks = music.estimate(200.0, 1500.0, 4000.0);
        assert_eq!(peaks.len(), 2);
        peaks.sort_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));

        assert!(
            (peaks[0].frequency_hz - 440.0).abs() < 1.0,
            "low peak {}",
            peaks[0].frequency_hz
        );
        assert!(
            (peaks[1].frequency_hz - 660.0).abs() < 1.0,
            "high peak {}",
            peaks[1].frequency_hz
        );
    }

    #[test]
    fn test_close_tones_still_separate() {
        let config = MusicConfig {
            snapshot_rows: 32,
            grid_points: 400,
            ..Default::default()
        };
        let mut music = MusicEstimator::new(config);
        // 40 Hz apart at fs 4000.
        let samples = two_tone(500.0, 540.0, 4000.0, 2048);
        assert!(music.refresh(&samples));

        let mut peaks = music.estimate(300.0, 900.0, 4000.0);
        assert_eq!(peaks.len(), 2);
        peaks.sort_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));
        assert!((peaks[0].frequency_hz - 500.0).abs() < 2.0);
        assert!((peaks[1].frequency_hz - 540.0).abs() < 2.0);
    }

    #[test]
    fn test_harmonic_music_finds_fundamental() {
        let config = MusicConfig {
            sources: 1,
            harmonics: 3,
            grid_points: 300,
            ..Default::default()
        };
        let mut music = MusicEstimator::new(config);

        // Harmonic stack on 200 Hz.
        let fs = 4000.0;
        let samples: Vec<Complex<f64>> = (0..2048)
            .map(|n| {
                let t = n as f64 / fs;
                Complex::from_polar(0.5, TAU * 200.0 * t)
                    + Complex::from_polar(0.3, TAU * 400.0 * t)
                    + Complex::from_polar(0.2, TAU * 600.0 * t)
            })
            .collect();
        assert!(music.refresh(&samples));

        let peaks = music.estimate(100.0, 1000.0, fs);
        assert!(!peaks.is_empty());
        assert!(
            (peaks[0].frequency_hz - 200.0).abs() < 2.0,
            "fundamental {}",
            peaks[0].frequency_hz
        );
    }

    #[test]
    fn test_noise_subspace_invalidated_on_refresh() {
        let mut music = MusicEstimator::new(MusicConfig::default());
        let fs = 4000.0;

        let samples = two_tone(440.0, 660.0, fs, 1024);
        music.refresh(&samples);
        let before = music.pseudospectrum(TAU * 440.0 / fs);

        // New content moves the subspace; the old value must not persist.
        let moved = two_tone(480.0, 700.0, fs, 1024);
        music.refresh(&moved);
        let after = music.pseudospectrum(TAU * 440.0 / fs);
        assert!(before > after, "before {before}, after {after}");
    }
}
