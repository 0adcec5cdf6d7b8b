//! Interacting-multiple-model and dual-mode EKF variants
//!
//! Two filters with different process-noise temperaments run on the same
//! measurement stream:
//! - [`ToneImmFilter`] blends them with the standard IMM mixing step and
//!   per-sample mode probabilities
//! - [`DualModeFilter`] keeps them independent and switches the reported
//!   output with a hysteretic rule on innovation rate (cents/sec) and
//!   frequency divergence

use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use tf_core::cents_between;

use crate::ekf::{EkfConfig, ToneEkf, ToneEstimate};

/// Mode-probability floor keeping a starved mode revivable
const MODE_FLOOR: f64 = 1e-12;

/// IMM configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImmConfig {
    /// Mode transition matrix, rows sum to 1: `transition[i][j]` is the
    /// probability of moving from mode i to mode j per sample
    pub transition: [[f64; 2]; 2],
    /// Initial probability of the fast mode
    pub initial_fast: f64,
}

impl Default for ImmConfig {
    fn default() -> Self {
        // Per-sample transition probabilities; dwell times are hundreds of
        // samples so the modes keep distinct identities between mixes.
        Self {
            transition: [[0.99, 0.01], [0.01, 0.99]],
            initial_fast: 0.5,
        }
    }
}

/// Interacting-multiple-model filter over a fast/slow EKF pair
pub struct ToneImmFilter {
    fast: ToneEkf,
    slow: ToneEkf,
    config: ImmConfig,
    /// Mode probabilities (fast, slow); non-negative, sum 1
    mu: [f64; 2],
    // Mixing scratch
    mixed_x: [DVector<f64>; 2],
    mixed_p: [DMatrix<f64>; 2],
    diff: DVector<f64>,
}

impl ToneImmFilter {
    /// Build from a fast/slow configuration pair (same tone count)
    pub fn new(fast_config: EkfConfig, slow_config: EkfConfig, config: ImmConfig) -> Self {
        debug_assert_eq!(fast_config.tones, slow_config.tones);
        let fast = ToneEkf::new(fast_config);
        let slow = ToneEkf::new(slow_config);
        let n = fast.state().len();

        Self {
            fast,
            slow,
            config,
            mu: [
                config.initial_fast.clamp(0.0, 1.0),
                1.0 - config.initial_fast.clamp(0.0, 1.0),
            ],
            mixed_x: [DVector::zeros(n), DVector::zeros(n)],
            mixed_p: [DMatrix::zeros(n, n), DMatrix::zeros(n, n)],
            diff: DVector::zeros(n),
        }
    }

    /// Seed both filters at the given frequencies
    pub fn with_initial_frequencies(
        fast_config: EkfConfig,
        slow_config: EkfConfig,
        config: ImmConfig,
        initial_hz: &[f64],
    ) -> Self {
        let mut filter = Self::new(fast_config, slow_config, config);
        filter.fast = ToneEkf::with_initial_frequencies(fast_config, initial_hz);
        filter.slow = ToneEkf::with_initial_frequencies(slow_config, initial_hz);
        filter
    }

    /// Mode probabilities (fast, slow)
    pub fn mode_probabilities(&self) -> (f64, f64) {
        (self.mu[0], self.mu[1])
    }

    /// Process one complex sample
    pub fn update(&mut self, measurement: Complex<f64>) {
        let pi = &self.config.transition;

        // 1. Mixing: predicted mode probabilities and mixing weights.
        let c = [
            pi[0][0] * self.mu[0] + pi[1][0] * self.mu[1],
            pi[0][1] * self.mu[0] + pi[1][1] * self.mu[1],
        ];

        {
            let states = [self.fast.state(), self.slow.state()];
            let covariances = [self.fast.covariance(), self.slow.covariance()];

            for j in 0..2 {
                let w = [
                    pi[0][j] * self.mu[0] / c[j].max(MODE_FLOOR),
                    pi[1][j] * self.mu[1] / c[j].max(MODE_FLOOR),
                ];

                // Mixture mean.
                self.mixed_x[j].fill(0.0);
                for i in 0..2 {
                    self.mixed_x[j].axpy(w[i], states[i], 1.0);
                }

                // Mixture covariance: each filter's P plus the spread of
                // its mean around the mixed mean.
                self.mixed_p[j].fill(0.0);
                for i in 0..2 {
                    self.mixed_p[j].zip_apply(covariances[i], |entry, value| {
                        *entry += w[i] * value;
                    });
                    self.diff.copy_from(states[i]);
                    self.diff -= &self.mixed_x[j];
                    self.mixed_p[j].ger(w[i], &self.diff, &self.diff, 1.0);
                }

                // Phase entries of a convex combination can leave the
                // principal branch; rewrap.
                let tones = self.mixed_x[j].len() / 3;
                for t in 0..tones {
                    let phase = self.mixed_x[j][3 * t];
                    self.mixed_x[j][3 * t] = phase.sin().atan2(phase.cos());
                }
            }
        }

        self.fast
            .set_state(self.mixed_x[0].clone(), self.mixed_p[0].clone());
        self.slow
            .set_state(self.mixed_x[1].clone(), self.mixed_p[1].clone());

        // 2. Parallel update; 3. likelihoods.
        let lambda = [
            self.fast.update(measurement),
            self.slow.update(measurement),
        ];

        // 4. Mode probability update.
        let unnormalized = [lambda[0] * c[0], lambda[1] * c[1]];
        let total = unnormalized[0] + unnormalized[1];
        if total > 0.0 && total.is_finite() {
            self.mu = [unnormalized[0] / total, unnormalized[1] / total];
        } else {
            // Both likelihoods underflowed: fall back to the predicted
            // mode probabilities.
            let total_c = c[0] + c[1];
            self.mu = [c[0] / total_c, c[1] / total_c];
        }
        self.mu[0] = self.mu[0].max(MODE_FLOOR);
        self.mu[1] = self.mu[1].max(MODE_FLOOR);
        let sum = self.mu[0] + self.mu[1];
        self.mu[0] /= sum;
        self.mu[1] /= sum;
    }

    /// Probability-weighted mixture estimate, sorted by frequency
    pub fn tones(&self) -> Vec<ToneEstimate> {
        let fast_state = self.fast.state();
        let slow_state = self.slow.state();
        let tones = fast_state.len() / 3;

        let mut result: Vec<ToneEstimate> = (0..tones)
            .map(|t| {
                let frequency_hz =
                    self.mu[0] * fast_state[3 * t + 1] + self.mu[1] * slow_state[3 * t + 1];
                let amplitude =
                    self.mu[0] * fast_state[3 * t + 2] + self.mu[1] * slow_state[3 * t + 2];
                // Circular mean for the phase entries.
                let sin = self.mu[0] * fast_state[3 * t].sin() + self.mu[1] * slow_state[3 * t].sin();
                let cos = self.mu[0] * fast_state[3 * t].cos() + self.mu[1] * slow_state[3 * t].cos();
                ToneEstimate {
                    frequency_hz,
                    amplitude,
                    phase: sin.atan2(cos),
                }
            })
            .collect();
        result.sort_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));
        result
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DUAL-MODE FILTER
// ═══════════════════════════════════════════════════════════════════════════

/// Which filter's output is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    Fast,
    Slow,
}

/// Dual-mode switching configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DualModeConfig {
    /// Absolute frequency the cents rate is measured against, Hz
    pub reference_hz: f64,
    /// Innovation rate above which the fast filter is reported, cents/sec
    pub fast_rate_threshold: f64,
    /// Innovation rate below which the slow filter takes over, cents/sec
    pub slow_rate_threshold: f64,
    /// Fast/slow frequency divergence that forces fast mode, cents
    pub divergence_threshold: f64,
    /// EWMA coefficient for the rate and divergence trackers
    pub smoothing_alpha: f64,
    /// Samples a condition must hold before a switch
    pub hold_samples: u32,
}

impl Default for DualModeConfig {
    fn default() -> Self {
        Self {
            reference_hz: 440.0,
            fast_rate_threshold: 5.0,
            slow_rate_threshold: 1.0,
            divergence_threshold: 20.0,
            smoothing_alpha: 0.02,
            hold_samples: 50,
        }
    }
}

/// Fast/slow EKF pair with hysteretic output gating
pub struct DualModeFilter {
    fast: ToneEkf,
    slow: ToneEkf,
    config: DualModeConfig,
    mode: TrackingMode,
    /// Signed EWMA so settled jitter cancels instead of accumulating
    rate_cents_per_sec: f64,
    divergence_cents: f64,
    last_slow_hz: Option<f64>,
    hold: u32,
}

impl DualModeFilter {
    pub fn new(fast_config: EkfConfig, slow_config: EkfConfig, config: DualModeConfig) -> Self {
        Self {
            fast: ToneEkf::new(fast_config),
            slow: ToneEkf::new(slow_config),
            config,
            mode: TrackingMode::Fast,
            rate_cents_per_sec: 0.0,
            divergence_cents: 0.0,
            last_slow_hz: None,
            hold: 0,
        }
    }

    /// Seed both filters at the given frequencies
    pub fn with_initial_frequencies(
        fast_config: EkfConfig,
        slow_config: EkfConfig,
        config: DualModeConfig,
        initial_hz: &[f64],
    ) -> Self {
        let mut filter = Self::new(fast_config, slow_config, config);
        filter.fast = ToneEkf::with_initial_frequencies(fast_config, initial_hz);
        filter.slow = ToneEkf::with_initial_frequencies(slow_config, initial_hz);
        filter
    }

    /// Currently reported mode
    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    /// Smoothed innovation rate, cents/sec (signed)
    pub fn rate_cents_per_sec(&self) -> f64 {
        self.rate_cents_per_sec
    }

    /// Process one complex sample
    pub fn update(&mut self, measurement: Complex<f64>) {
        self.fast.update(measurement);
        self.slow.update(measurement);

        let sample_rate = self.fast.config().sample_rate;
        let reference = self.config.reference_hz;
        let alpha = self.config.smoothing_alpha;

        let fast_hz = self.fast.state()[1];
        let slow_hz = self.slow.state()[1];

        // Rate from the settled filter's motion: signed, so white jitter
        // averages toward zero while a sweep accumulates.
        if let Some(last) = self.last_slow_hz {
            let rate = cents_between(reference + last, reference + slow_hz) * sample_rate;
            self.rate_cents_per_sec += alpha * (rate - self.rate_cents_per_sec);
        }
        self.last_slow_hz = Some(slow_hz);

        let divergence = cents_between(reference + slow_hz, reference + fast_hz).abs();
        self.divergence_cents += alpha * (divergence - self.divergence_cents);

        match self.mode {
            TrackingMode::Slow => {
                // Leave immediately when the tone starts moving.
                if self.rate_cents_per_sec.abs() > self.config.fast_rate_threshold
                    || self.divergence_cents > self.config.divergence_threshold
                {
                    self.mode = TrackingMode::Fast;
                    self.hold = 0;
                }
            }
            TrackingMode::Fast => {
                // Settle into slow only after the rate stays low.
                if self.rate_cents_per_sec.abs() < self.config.slow_rate_threshold {
                    self.hold += 1;
                    if self.hold >= self.config.hold_samples {
                        self.enter_slow();
                    }
                } else {
                    self.hold = 0;
                }
            }
        }
    }

    /// Hand the fast solution to the slow filter and narrow its trust by
    /// the process-noise sigma ratio
    fn enter_slow(&mut self) {
        let ratio = (self.slow.config().process_noise_freq
            / self.fast.config().process_noise_freq)
            .sqrt();
        let x = self.fast.state().clone();
        let p = self.fast.covariance() * ratio;
        self.slow.set_state(x, p);
        self.mode = TrackingMode::Slow;
        self.hold = 0;
    }

    /// Tones of the filter currently gated through
    pub fn tones(&self) -> Vec<ToneEstimate> {
        match self.mode {
            TrackingMode::Fast => self.fast.tones(),
            TrackingMode::Slow => self.slow.tones(),
        }
    }
}
