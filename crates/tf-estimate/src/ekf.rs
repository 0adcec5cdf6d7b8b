//! Extended Kalman filter for M complex tones
//!
//! State is 3M entries, a `(phase, frequency Hz, amplitude)` triple per
//! tone. The measurement is one complex baseband sample
//! `y = sum_m A_m * exp(j phi_m)` observed in two real channels. Frequency
//! is unobserved directly; it is learned through the phase-frequency
//! covariance the transition model builds up, exactly like a PLL with an
//! optimal loop filter.
//!
//! Numerical discipline per update:
//! - Joseph-form covariance updates (measurement and pseudo-measurement)
//! - amplitude sign and phase wrap constraints
//! - covariance symmetrisation plus diagonal jitter
//! - singular innovation covariance absorbed (update skipped, counted)
//!
//! All matrices are allocated once and reused; nothing allocates in
//! `update`.

use std::f64::consts::{PI, TAU};

use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Likelihood reported when the innovation covariance is singular
const SINGULAR_LIKELIHOOD: f64 = 1e-100;

/// Clamp on the log-likelihood exponent before `exp`
const LOG_LIKELIHOOD_CLAMP: f64 = 10_000.0;

/// EKF noise and constraint configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EkfConfig {
    /// Rate of the complex stream this filter consumes, Hz
    pub sample_rate: f64,
    /// Number of tracked tones M
    pub tones: usize,
    /// Phase process-noise variance per second, rad^2/s
    pub process_noise_phase: f64,
    /// Frequency process-noise variance per second, Hz^2/s
    pub process_noise_freq: f64,
    /// Amplitude process-noise variance per second, 1/s
    pub process_noise_amp: f64,
    /// Measurement-noise variance per real channel
    pub measurement_noise: f64,
    /// Soft minimum separation between adjacent tones, Hz
    pub min_separation_hz: f64,
    /// Pseudo-measurement noise variance R'
    pub separation_noise: f64,
    /// Covariance diagonal floor
    pub jitter: f64,
}

impl EkfConfig {
    /// Agile tracking: wide frequency and amplitude process noise, able
    /// to follow sweeps of tens of Hz per second at the cost of jitter
    pub fn fast(sample_rate: f64, tones: usize) -> Self {
        Self {
            sample_rate,
            tones,
            process_noise_phase: 1e-4,
            process_noise_freq: 5.0,
            process_noise_amp: 1e-2,
            measurement_noise: 1e-3,
            min_separation_hz: 1.0,
            separation_noise: 1e-6,
            jitter: 1e-12,
        }
    }

    /// Settled tracking: narrow process noise for a sustained tone,
    /// steady-state frequency jitter in the few-hundredths-of-a-Hz range
    pub fn slow(sample_rate: f64, tones: usize) -> Self {
        Self {
            process_noise_freq: 0.01,
            process_noise_amp: 1e-4,
            ..Self::fast(sample_rate, tones)
        }
    }
}

/// One tone as reported by the filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneEstimate {
    /// Frequency in Hz, relative to the stream the filter consumes
    pub frequency_hz: f64,
    /// Linear amplitude, non-negative
    pub amplitude: f64,
    /// Phase in (-pi, pi]
    pub phase: f64,
}

/// Extended Kalman filter over M complex tones
pub struct ToneEkf {
    config: EkfConfig,
    dt: f64,
    /// State: (phase, freq, amp) per tone
    x: DVector<f64>,
    /// Covariance, 3M x 3M
    p: DMatrix<f64>,
    /// Transition matrix and its transpose (constant)
    f_mat: DMatrix<f64>,
    f_t: DMatrix<f64>,
    /// Process noise diagonal
    q_diag: DVector<f64>,
    // Workspaces, allocated once
    fp: DMatrix<f64>,
    h: DMatrix<f64>,
    h_t: DMatrix<f64>,
    pht: DMatrix<f64>,
    s: DMatrix<f64>,
    s_inv: DMatrix<f64>,
    k: DMatrix<f64>,
    k_t: DMatrix<f64>,
    ikh: DMatrix<f64>,
    ikh_t: DMatrix<f64>,
    t1: DMatrix<f64>,
    nu: DVector<f64>,
    gain_col: DVector<f64>,
    hp_row: DVector<f64>,
    samples_processed: u64,
    singular_skips: u64,
}

impl ToneEkf {
    /// Create a filter with tones spaced evenly around 0 Hz
    pub fn new(config: EkfConfig) -> Self {
        let m = config.tones.max(1);
        let centre = (m as f64 - 1.0) / 2.0;
        let freqs: Vec<f64> = (0..m)
            .map(|k| (k as f64 - centre) * config.min_separation_hz)
            .collect();
        Self::with_initial_frequencies(config, &freqs)
    }

    /// Create a filter seeded at the given frequencies
    ///
    /// Frequencies closer than the minimum separation are pushed apart
    /// symmetrically before the filter starts.
    pub fn with_initial_frequencies(config: EkfConfig, initial_hz: &[f64]) -> Self {
        let m = config.tones.max(1);
        let n = 3 * m;
        let dt = 1.0 / config.sample_rate;

        let mut freqs: Vec<f64> = initial_hz.iter().copied().take(m).collect();
        freqs.resize(m, 0.0);
        freqs.sort_by(f64::total_cmp);
        for i in 1..m {
            let gap = freqs[i] - freqs[i - 1];
            if gap < config.min_separation_hz {
                let push = (config.min_separation_hz - gap) / 2.0;
                freqs[i - 1] -= push;
                freqs[i] += push;
            }
        }

        let mut x = DVector::zeros(n);
        let mut p = DMatrix::zeros(n, n);
        let mut f_mat = DMatrix::identity(n, n);
        let mut q_diag = DVector::zeros(n);
        for t in 0..m {
            x[3 * t + 1] = freqs[t];
            x[3 * t + 2] = 0.5;

            p[(3 * t, 3 * t)] = 0.5;
            p[(3 * t + 1, 3 * t + 1)] = 4.0;
            p[(3 * t + 2, 3 * t + 2)] = 0.25;

            f_mat[(3 * t, 3 * t + 1)] = TAU * dt;

            q_diag[3 * t] = config.process_noise_phase * dt;
            q_diag[3 * t + 1] = config.process_noise_freq * dt;
            q_diag[3 * t + 2] = config.process_noise_amp * dt;
        }
        let f_t = f_mat.transpose();

        Self {
            config,
            dt,
            x,
            p,
            f_mat,
            f_t,
            q_diag,
            fp: DMatrix::zeros(n, n),
            h: DMatrix::zeros(2, n),
            h_t: DMatrix::zeros(n, 2),
            pht: DMatrix::zeros(n, 2),
            s: DMatrix::zeros(2, 2),
            s_inv: DMatrix::zeros(2, 2),
            k: DMatrix::zeros(n, 2),
            k_t: DMatrix::zeros(2, n),
            ikh: DMatrix::zeros(n, n),
            ikh_t: DMatrix::zeros(n, n),
            t1: DMatrix::zeros(n, n),
            nu: DVector::zeros(2),
            gain_col: DVector::zeros(n),
            hp_row: DVector::zeros(n),
            samples_processed: 0,
            singular_skips: 0,
        }
    }

    /// Filter configuration
    pub fn config(&self) -> &EkfConfig {
        &self.config
    }

    /// Samples consumed so far
    pub fn samples_processed(&self) -> u64 {
        self.samples_processed
    }

    /// Updates skipped because the innovation covariance was singular
    pub fn singular_skips(&self) -> u64 {
        self.singular_skips
    }

    /// Raw state vector (phase, freq, amp per tone)
    pub fn state(&self) -> &DVector<f64> {
        &self.x
    }

    /// Covariance matrix
    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.p
    }

    /// Replace state and covariance (IMM mixing, mode hand-off)
    pub fn set_state(&mut self, x: DVector<f64>, p: DMatrix<f64>) {
        debug_assert_eq!(x.len(), self.x.len());
        self.x = x;
        self.p = p;
    }

    /// Process one complex sample; returns the measurement likelihood
    pub fn update(&mut self, measurement: Complex<f64>) -> f64 {
        let m = self.config.tones.max(1);
        let r = self.config.measurement_noise;

        // Predict.
        for t in 0..m {
            self.x[3 * t] += TAU * self.x[3 * t + 1] * self.dt;
        }
        self.fp.gemm(1.0, &self.f_mat, &self.p, 0.0);
        self.p.gemm(1.0, &self.fp, &self.f_t, 0.0);
        for i in 0..self.q_diag.len() {
            self.p[(i, i)] += self.q_diag[i];
        }

        // Predicted measurement and Jacobian.
        let mut prediction = Complex::new(0.0, 0.0);
        for t in 0..m {
            let (sin, cos) = self.x[3 * t].sin_cos();
            let amp = self.x[3 * t + 2];
            prediction += Complex::new(amp * cos, amp * sin);

            self.h[(0, 3 * t)] = -amp * sin;
            self.h[(0, 3 * t + 1)] = 0.0;
            self.h[(0, 3 * t + 2)] = cos;
            self.h[(1, 3 * t)] = amp * cos;
            self.h[(1, 3 * t + 1)] = 0.0;
            self.h[(1, 3 * t + 2)] = sin;
        }
        self.h.transpose_to(&mut self.h_t);

        self.nu[0] = measurement.re - prediction.re;
        self.nu[1] = measurement.im - prediction.im;

        // S = H P H^T + R
        self.pht.gemm(1.0, &self.p, &self.h_t, 0.0);
        self.s.gemm(1.0, &self.h, &self.pht, 0.0);
        self.s[(0, 0)] += r;
        self.s[(1, 1)] += r;

        let det = self.s[(0, 0)] * self.s[(1, 1)] - self.s[(0, 1)] * self.s[(1, 0)];
        let likelihood = if det <= 0.0 {
            // Singular innovation covariance: absorb locally, skip the
            // gain computation, keep the prediction.
            self.singular_skips += 1;
            if self.singular_skips == 1 {
                log::warn!("ekf: singular innovation covariance, update skipped");
            }
            SINGULAR_LIKELIHOOD
        } else {
            self.s_inv[(0, 0)] = self.s[(1, 1)] / det;
            self.s_inv[(1, 1)] = self.s[(0, 0)] / det;
            self.s_inv[(0, 1)] = -self.s[(0, 1)] / det;
            self.s_inv[(1, 0)] = -self.s[(1, 0)] / det;

            // K = P H^T S^-1
            self.k.gemm(1.0, &self.pht, &self.s_inv, 0.0);

            // x += K nu
            for i in 0..self.x.len() {
                self.x[i] += self.k[(i, 0)] * self.nu[0] + self.k[(i, 1)] * self.nu[1];
            }

            // Joseph form: P = (I - K H) P (I - K H)^T + K R K^T
            self.ikh.fill_with_identity();
            self.ikh.gemm(-1.0, &self.k, &self.h, 1.0);
            self.ikh.transpose_to(&mut self.ikh_t);
            self.t1.gemm(1.0, &self.ikh, &self.p, 0.0);
            self.p.gemm(1.0, &self.t1, &self.ikh_t, 0.0);
            self.k.transpose_to(&mut self.k_t);
            self.p.gemm(r, &self.k, &self.k_t, 1.0);

            let quad = self.nu[0] * (self.s_inv[(0, 0)] * self.nu[0] + self.s_inv[(0, 1)] * self.nu[1])
                + self.nu[1] * (self.s_inv[(1, 0)] * self.nu[0] + self.s_inv[(1, 1)] * self.nu[1]);
            let exponent = (-0.5 * quad).clamp(-LOG_LIKELIHOOD_CLAMP, LOG_LIKELIHOOD_CLAMP);
            exponent.exp()
        };

        self.apply_separation_constraints();
        self.enforce_tone_constraints();
        self.covariance_hygiene();
        self.samples_processed += 1;

        likelihood
    }

    /// Soft pairwise pseudo-measurement keeping adjacent tones apart
    fn apply_separation_constraints(&mut self) {
        let m = self.config.tones.max(1);
        let min_sep = self.config.min_separation_hz;
        let r_prime = self.config.separation_noise;

        for i in 0..m.saturating_sub(1) {
            let lo = 3 * i + 1;
            let hi = 3 * (i + 1) + 1;
            let gap = self.x[hi] - self.x[lo];
            if gap >= min_sep {
                continue;
            }

            // h' x = f_hi - f_lo observed as min_sep with tiny noise.
            // P h'^T is the column difference.
            for row in 0..self.x.len() {
                self.gain_col[row] = self.p[(row, hi)] - self.p[(row, lo)];
            }
            let s = self.gain_col[hi] - self.gain_col[lo] + r_prime;
            if s <= 0.0 {
                self.singular_skips += 1;
                continue;
            }

            // hp = h' P (row vector), equals gain_col before scaling since
            // P is symmetric.
            self.hp_row.copy_from(&self.gain_col);
            self.gain_col /= s;

            let innovation = min_sep - gap;
            for row in 0..self.x.len() {
                self.x[row] += self.gain_col[row] * innovation;
            }

            // Joseph expansion with scalar s:
            // P' = P - k hp - hp^T k^T + k s k^T
            self.p.ger(-1.0, &self.gain_col, &self.hp_row, 1.0);
            self.p.ger(-1.0, &self.hp_row, &self.gain_col, 1.0);
            self.p.ger(s, &self.gain_col, &self.gain_col, 1.0);
        }
    }

    /// Amplitudes non-negative, phases wrapped to (-pi, pi]
    fn enforce_tone_constraints(&mut self) {
        let m = self.config.tones.max(1);
        for t in 0..m {
            if self.x[3 * t + 2] < 0.0 {
                self.x[3 * t + 2] = -self.x[3 * t + 2];
                self.x[3 * t] += PI;
            }
            let phase = self.x[3 * t];
            self.x[3 * t] = phase.sin().atan2(phase.cos());
        }
    }

    /// Symmetrise and floor the covariance diagonal
    fn covariance_hygiene(&mut self) {
        let n = self.x.len();
        let jitter = self.config.jitter;
        for i in 0..n {
            for j in (i + 1)..n {
                let mean = 0.5 * (self.p[(i, j)] + self.p[(j, i)]);
                self.p[(i, j)] = mean;
                self.p[(j, i)] = mean;
            }
            let diag = self.p[(i, i)] + jitter;
            self.p[(i, i)] = diag.max(jitter);
        }
    }

    /// Tones sorted by frequency
    pub fn tones(&self) -> Vec<ToneEstimate> {
        let m = self.config.tones.max(1);
        let mut tones: Vec<ToneEstimate> = (0..m)
            .map(|t| ToneEstimate {
                frequency_hz: self.x[3 * t + 1],
                amplitude: self.x[3 * t + 2],
                phase: self.x[3 * t],
            })
            .collect();
        tones.sort_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));
        tones
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn complex_tone(freq: f64, amp: f64, sample_rate: f64, len: usize) -> Vec<Complex<f64>> {
        (0..len)
            .map(|n| Complex::from_polar(amp, TAU * freq * n as f64 / sample_rate))
            .collect()
    }

    #[test]
    fn test_single_tone_convergence() {
        let fs = 250.0;
        let mut ekf = ToneEkf::new(EkfConfig::slow(fs, 1));

        // 3 Hz offset from the filter's 0 Hz seed.
        for y in complex_tone(3.0, 0.8, fs, 500) {
            ekf.update(y);
        }

        let tones = ekf.tones();
        assert_eq!(tones.len(), 1);
        assert!(
            (tones[0].frequency_hz - 3.0).abs() < 0.05,
            "frequency {}",
            tones[0].frequency_hz
        );
        assert!((tones[0].amplitude - 0.8).abs() < 0.1);
    }

    #[test]
    fn test_covariance_stays_symmetric_with_floored_diagonal() {
        let fs = 250.0;
        let mut ekf = ToneEkf::new(EkfConfig::fast(fs, 2));
        let jitter = ekf.config().jitter;

        for y in complex_tone(5.0, 0.5, fs, 200) {
            ekf.update(y);

            let p = ekf.covariance();
            for i in 0..p.nrows() {
                assert!(p[(i, i)] >= jitter);
                for j in 0..p.ncols() {
                    assert!(
                        (p[(i, j)] - p[(j, i)]).abs() < 1e-10,
                        "asymmetry at ({i},{j})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_initial_frequencies_pushed_apart() {
        let fs = 250.0;
        let config = EkfConfig::fast(fs, 2);
        let ekf = ToneEkf::with_initial_frequencies(config, &[0.0, 0.3]);

        let tones = ekf.tones();
        let gap = tones[1].frequency_hz - tones[0].frequency_hz;
        assert!(gap >= config.min_separation_hz - 1e-9, "gap {gap}");
        // Shared error split symmetrically around the original midpoint.
        let mid = (tones[0].frequency_hz + tones[1].frequency_hz) / 2.0;
        assert_abs_diff_eq!(mid, 0.15, epsilon = 1e-9);
    }

    #[test]
    fn test_separation_survives_updates() {
        let fs = 250.0;
        let config = EkfConfig::fast(fs, 2);
        let mut ekf = ToneEkf::with_initial_frequencies(config, &[-0.2, 0.2]);

        // A single tone at 0 Hz pulls both estimates toward collision.
        for y in complex_tone(0.0, 0.5, fs, 300) {
            ekf.update(y);
            let tones = ekf.tones();
            let gap = tones[1].frequency_hz - tones[0].frequency_hz;
            assert!(
                gap >= config.min_separation_hz - 0.01,
                "gap {gap} after {} samples",
                ekf.samples_processed()
            );
        }
    }

    #[test]
    fn test_two_tone_resolution() {
        let fs = 250.0;
        let config = EkfConfig::slow(fs, 2);
        let mut ekf = ToneEkf::with_initial_frequencies(config, &[-1.2, 1.2]);

        // Two equal tones at -1 and +1 Hz (the 440/442 scenario seen from
        // a 441 Hz baseband centre).
        let len = 500;
        let a = complex_tone(-1.0, 0.5, fs, len);
        let b = complex_tone(1.0, 0.5, fs, len);
        for (y1, y2) in a.into_iter().zip(b) {
            ekf.update(y1 + y2);
        }

        let tones = ekf.tones();
        assert!(
            (tones[0].frequency_hz + 1.0).abs() < 0.2,
            "low tone {}",
            tones[0].frequency_hz
        );
        assert!(
            (tones[1].frequency_hz - 1.0).abs() < 0.2,
            "high tone {}",
            tones[1].frequency_hz
        );
        let gap = tones[1].frequency_hz - tones[0].frequency_hz;
        assert!(gap >= 2.0 - 0.2 - 0.2, "gap {gap}");
    }

    #[test]
    fn test_constraints_hold_every_step() {
        let fs = 250.0;
        let mut ekf = ToneEkf::new(EkfConfig::fast(fs, 2));

        for y in complex_tone(2.0, 0.7, fs, 200) {
            ekf.update(y);
            for tone in ekf.tones() {
                assert!(tone.amplitude >= 0.0);
                assert!(tone.phase > -PI && tone.phase <= PI);
            }
        }
    }

    #[test]
    fn test_likelihood_is_positive_and_bounded() {
        let fs = 250.0;
        let mut ekf = ToneEkf::new(EkfConfig::fast(fs, 1));
        for y in complex_tone(1.0, 0.5, fs, 100) {
            let likelihood = ekf.update(y);
            assert!(likelihood > 0.0);
            assert!(likelihood.is_finite());
        }
    }
}
