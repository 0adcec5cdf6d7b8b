//! tf-estimate: Frequency estimator stack for TuneForge
//!
//! Independent, swappable estimators fed by either the raw audio stream
//! or the complex baseband stream:
//!
//! - `hps` - harmonic product spectrum peak picker (raw spectrum)
//! - `anf` - adaptive notch filter, single tracker and cascade (raw)
//! - `ekf` - extended Kalman filter for M complex tones (baseband)
//! - `imm` - interacting-multiple-model and dual-mode EKF variants
//! - `music` - subspace (MUSIC) estimator with harmonic extension
//! - `pll` - complex PLL bank with sequential residual subtraction
//!
//! Estimators never raise from their streaming paths: absent results are
//! sentinels (`None`, empty lists), numerical failures are absorbed and
//! counted.

pub mod anf;
pub mod ekf;
pub mod hps;
pub mod imm;
pub mod music;
pub mod pll;

pub use anf::{AnfConfig, AnfEstimate, AnfTracker, NotchCascade};
pub use ekf::{EkfConfig, ToneEkf, ToneEstimate};
pub use hps::{HpsConfig, HpsEstimate, HpsEstimator};
pub use imm::{DualModeFilter, ImmConfig, ToneImmFilter};
pub use music::{MusicConfig, MusicEstimator};
pub use pll::{Pll, PllBank, PllBankConfig, PllConfig};

/// A frequency estimate published in a study frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPeak {
    /// Estimated frequency in Hz
    pub frequency_hz: f64,
    /// Linear amplitude estimate
    pub amplitude: f64,
}
