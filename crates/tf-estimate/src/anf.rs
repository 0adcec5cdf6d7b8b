//! Adaptive notch frequency tracker
//!
//! A constrained second-order IIR notch whose centre frequency descends
//! the output-energy gradient: when the notch sits on the tone, the
//! residual energy is minimal. The notch depth doubles as an amplitude
//! estimate, and a short history of frequency readings rates convergence.
//!
//! Numerator `1 - 2cos(w)z^-1 + z^-2`, denominator
//! `1 - 2r cos(w)z^-1 + r^2 z^-2`, with `r = 1 - pi*BW/fs`.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::TrackedPeak;

/// Frequency readings kept for the convergence rating
const HISTORY_LEN: usize = 10;

/// EWMA coefficient for the residual-energy tracker
const ENERGY_ALPHA: f64 = 0.01;

/// EWMA weight on the previous smoothed frequency
const OMEGA_SMOOTHING: f64 = 0.9;

/// Adaptive notch configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnfConfig {
    /// Sample rate of the stream the tracker runs on, Hz
    pub sample_rate: f64,
    /// Notch bandwidth, Hz
    pub bandwidth_hz: f64,
    /// Gradient-descent step size on the notch frequency
    ///
    /// The historical sources disagreed on this value by four orders of
    /// magnitude; it is a named knob so integration can tune it.
    pub adaptation_rate: f64,
    /// Clamp applied to the raw energy gradient
    pub gradient_clamp: f64,
    /// Residual energy below which adaptation is gated off
    pub energy_threshold: f64,
}

impl Default for AnfConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            bandwidth_hz: 10.0,
            adaptation_rate: 1e-3,
            gradient_clamp: 0.05,
            energy_threshold: 1e-6,
        }
    }
}

/// One tracker's published estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnfEstimate {
    /// Smoothed notch frequency, Hz
    pub frequency_hz: f64,
    /// EWMA residual energy at the notch output
    pub residual_energy: f64,
    /// Notch bandwidth, Hz
    pub bandwidth_hz: f64,
    /// Amplitude derived from notch depth: `sqrt(max(0, 1 - 2e))`
    pub amplitude: f64,
    /// Convergence rating in (0, 1]; 1 means the frequency history is flat
    pub convergence: f64,
}

/// Single adaptive notch tracker
#[derive(Debug, Clone)]
pub struct AnfTracker {
    config: AnfConfig,
    /// Notch frequency, radians/sample
    omega: f64,
    /// Smoothed notch frequency used for reporting
    omega_smooth: f64,
    /// Pole radius
    r: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
    /// EWMA of output energy
    energy: f64,
    /// Recent per-block frequency readings, Hz
    history: Vec<f64>,
}

impl AnfTracker {
    /// Create a tracker seeded at `seed_hz`
    pub fn new(config: AnfConfig, seed_hz: f64) -> Self {
        let omega = (2.0 * PI * seed_hz / config.sample_rate).clamp(0.01, 0.99 * PI);
        Self {
            config,
            omega,
            omega_smooth: omega,
            r: 1.0 - PI * config.bandwidth_hz / config.sample_rate,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
            energy: 0.0,
            history: Vec::with_capacity(HISTORY_LEN),
        }
    }

    /// Clear delay lines, energy, and history; the seed frequency stays
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
        self.energy = 0.0;
        self.history.clear();
        self.omega_smooth = self.omega;
    }

    /// Process one sample, adapting the notch frequency
    #[inline]
    pub fn step(&mut self, x: f64) -> f64 {
        let cos_w = self.omega.cos();
        let y = x - 2.0 * cos_w * self.x1 + self.x2 + 2.0 * self.r * cos_w * self.y1
            - self.r * self.r * self.y2;

        self.energy += ENERGY_ALPHA * (y * y - self.energy);

        if self.energy > self.config.energy_threshold {
            let dy_dw = 2.0 * self.omega.sin() * (self.x1 + self.r * self.y1);
            let gradient = (2.0 * y * dy_dw)
                .clamp(-self.config.gradient_clamp, self.config.gradient_clamp);
            let energy_norm = self.energy / (self.energy + 0.1);
            self.omega -= self.config.adaptation_rate * gradient * (1.0 + 4.0 * energy_norm);
            self.omega = self.omega.clamp(0.01, 0.99 * PI);
        }

        self.omega_smooth =
            OMEGA_SMOOTHING * self.omega_smooth + (1.0 - OMEGA_SMOOTHING) * self.omega;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    /// Run a block and record one history entry
    pub fn process_block(&mut self, samples: &[f32]) {
        for &x in samples {
            self.step(x as f64);
        }
        if self.history.len() == HISTORY_LEN {
            self.history.remove(0);
        }
        self.history.push(self.frequency_hz());
    }

    /// Smoothed frequency estimate, Hz
    #[inline]
    pub fn frequency_hz(&self) -> f64 {
        self.omega_smooth * self.config.sample_rate / (2.0 * PI)
    }

    /// Current published estimate
    pub fn estimate(&self) -> AnfEstimate {
        AnfEstimate {
            frequency_hz: self.frequency_hz(),
            residual_energy: self.energy,
            bandwidth_hz: self.config.bandwidth_hz,
            amplitude: (1.0 - 2.0 * self.energy).max(0.0).sqrt(),
            convergence: self.convergence(),
        }
    }

    /// Rating from the standard deviation of the recent history: flat
    /// history rates 1, a wandering notch decays toward 0
    fn convergence(&self) -> f64 {
        if self.history.len() < 2 {
            return 0.0;
        }
        let n = self.history.len() as f64;
        let mean = self.history.iter().sum::<f64>() / n;
        let variance = self
            .history
            .iter()
            .map(|&f| (f - mean) * (f - mean))
            .sum::<f64>()
            / n;
        1.0 / (1.0 + variance.sqrt())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CASCADE
// ═══════════════════════════════════════════════════════════════════════════

/// Bank of trackers seeded across a frequency window
///
/// Every sample of each call runs through every tracker; results are
/// sorted by amplitude and near-duplicates collapse. The caller feeds the
/// latest ~100 ms of raw audio per call.
pub struct NotchCascade {
    trackers: Vec<AnfTracker>,
    config: AnfConfig,
    /// Estimates closer than this collapse into one
    duplicate_hz: f64,
}

impl NotchCascade {
    /// Seed `count` trackers across `spread_cents` around `target_hz`
    pub fn new(config: AnfConfig, target_hz: f64, count: usize, spread_cents: f64) -> Self {
        let count = count.max(1);
        let trackers = (0..count)
            .map(|k| {
                let position = if count == 1 {
                    0.0
                } else {
                    k as f64 / (count - 1) as f64 - 0.5
                };
                let seed = target_hz * 2.0_f64.powf(position * spread_cents / 1200.0);
                AnfTracker::new(config, seed)
            })
            .collect();

        Self {
            trackers,
            config,
            duplicate_hz: 0.1,
        }
    }

    /// Re-seed all trackers around a new target
    pub fn reseed(&mut self, target_hz: f64, spread_cents: f64) {
        let count = self.trackers.len();
        *self = Self::new(self.config, target_hz, count, spread_cents);
    }

    /// Run a block through every tracker and collect deduplicated peaks
    pub fn process(&mut self, samples: &[f32]) -> Vec<TrackedPeak> {
        for tracker in &mut self.trackers {
            tracker.process_block(samples);
        }

        let mut estimates: Vec<AnfEstimate> =
            self.trackers.iter().map(|t| t.estimate()).collect();
        estimates.sort_by(|a, b| b.amplitude.total_cmp(&a.amplitude));

        let mut peaks: Vec<TrackedPeak> = Vec::with_capacity(estimates.len());
        for est in estimates {
            let duplicate = peaks
                .iter()
                .any(|p| (p.frequency_hz - est.frequency_hz).abs() < self.duplicate_hz);
            if !duplicate {
                peaks.push(TrackedPeak {
                    frequency_hz: est.frequency_hz,
                    amplitude: est.amplitude,
                });
            }
        }
        peaks
    }
}
