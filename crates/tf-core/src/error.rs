//! Error types for TuneForge

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum TfError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f64),

    #[error("FFT size must be a power of two >= 2048, got {0}")]
    InvalidFftSize(usize),

    #[error("Frequency out of range: {0} Hz")]
    FrequencyOutOfRange(f64),

    #[error("Invalid note name: {0}")]
    InvalidNoteName(String),

    #[error("No capture source available")]
    NoCaptureSource,

    #[error("Engine already running")]
    AlreadyRunning,

    #[error("Engine error: {0}")]
    Engine(String),
}

/// Result type alias
pub type TfResult<T> = Result<T, TfError>;
