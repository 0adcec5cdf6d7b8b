//! The published analysis product

use tf_dsp::Spectrum;
use tf_estimate::TrackedPeak;
use tf_estimate::hps::HpsEstimate;

/// One analysis tick's worth of results
///
/// Published latest-wins to the UI mailbox and pushed to every registered
/// job in order. `frame_number` is strictly increasing in publication
/// order.
#[derive(Debug, Clone)]
pub struct StudyFrame {
    /// Strictly increasing publication counter
    pub frame_number: u64,
    /// Display spectrum after bin mapping, dB
    pub display_db: Vec<f64>,
    /// Display bin centre frequencies, Hz
    pub display_hz: Vec<f64>,
    /// Baseband spectrum when the preprocessor is running
    pub baseband: Option<Spectrum>,
    /// Peaks from the selected estimator, absolute Hz
    pub tracked_peaks: Vec<TrackedPeak>,
    /// Centroid-refined peak inside the target window, absolute Hz
    pub primary_peak_hz: Option<f64>,
    /// Signed error of the primary peak against the target, cents
    pub cents_error: Option<f64>,
    /// HPS fundamental candidate from the full spectrum
    pub hps: Option<HpsEstimate>,
    /// Robust noise floor of the full spectrum, dB
    pub noise_floor_db: f64,
    /// Per-bin quantile-regression floor under the full spectrum, dB
    pub noise_floor_shape_db: Vec<f64>,
    /// Heterodyne centre of the baseband stream, Hz (0 when inactive)
    pub center_hz: f64,
    /// Baseband sample rate, Hz (when the preprocessor is running)
    pub baseband_rate: Option<f64>,
    /// Capture sample rate, Hz
    pub sample_rate: f64,
}
