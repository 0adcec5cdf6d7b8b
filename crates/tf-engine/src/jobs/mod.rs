//! Built-in convergence jobs

mod auto_tune;
mod concert_pitch;

pub use auto_tune::{AutoTuneJob, AutoTuneResult};
pub use concert_pitch::AutoConcertPitchJob;

/// Default wall-clock timeout shared by the built-in jobs
pub const JOB_TIMEOUT_SECS: u64 = 10;

/// Confidence a job must reach before accepting its estimate
pub const CONFIDENCE_NEEDED: f64 = 0.75;

/// EWMA weight on the previous confidence value
pub const CONFIDENCE_ALPHA: f64 = 0.85;
