//! tf-dsp: Signal-path DSP for TuneForge
//!
//! The stages between raw PCM and the estimator stack:
//! - `biquad` - TDF-II biquads and Butterworth cascade design
//! - `preprocessor` - heterodyne to baseband, anti-alias low-pass, decimate
//! - `fft` - windowed real/complex FFT producing dB spectra
//! - `binmap` - spectrum-to-display mapping (log or linear, smoothed)
//! - `noise_floor` - robust and quantile-regression floor estimators
//!
//! Everything here is streaming and allocation-free after construction;
//! scratch buffers are owned by the component and reused across calls.

pub mod binmap;
pub mod biquad;
pub mod fft;
pub mod noise_floor;
pub mod preprocessor;

pub use binmap::BinMap;
pub use biquad::{Biquad, BiquadCascade, BiquadCoeffs, butterworth_lowpass};
pub use fft::{FftEngine, Spectrum};
pub use noise_floor::{QuantileFloor, robust_floor_db};
pub use preprocessor::{Preprocessor, PreprocessorConfig};

/// Trait for stateful stream processors
pub trait Processor {
    /// Clear all internal state
    fn reset(&mut self);
}
