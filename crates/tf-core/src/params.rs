//! Observable tuning parameter store
//!
//! Replaces observable-object bindings with a typed snapshot struct: the
//! control thread mutates through [`ParamStore::update`], the analysis
//! thread rereads [`ParamStore::snapshot`] at the top of each tick and
//! compares revisions. Change notification is a coalesced wakeup hint,
//! never a data channel.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::note::{Note, Temperament};

/// Display zoom modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZoomState {
    /// Whole spectrum up to Nyquist, log axis
    #[default]
    FullSpectrum,
    /// Three octaves centred on the target, log axis
    ThreeOctaves,
    /// Narrow linear window around the target fundamental
    TargetFundamental,
}

/// Which estimator feeds the tracked peaks of a study frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EstimatorKind {
    /// Extended Kalman filter on the baseband stream
    #[default]
    Ekf,
    /// Interacting-multiple-model EKF pair
    Imm,
    /// Adaptive notch cascade on the raw stream
    NotchCascade,
    /// Subspace (harmonic MUSIC) estimator
    Music,
    /// PLL bank with residual subtraction
    PllBank,
}

/// Tuning parameters (one coherent snapshot)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningParams {
    /// Capture sample rate in Hz
    pub audio_sample_rate: f64,
    /// Concert pitch of A4 in Hz
    pub concert_pitch: f64,
    /// Target note as MIDI index
    pub target_note: i32,
    /// Target partial (1 = fundamental)
    pub target_partial: u32,
    /// Temperament applied to the target note
    pub temperament: Temperament,
    /// Half-width of the analysis window around the target, in cents
    pub target_bandwidth_cents: f64,
    /// Number of display bins produced by the bin mapper
    pub display_bin_count: usize,
    /// FFT size (power of two, >= 2048)
    pub fft_size: usize,
    /// Capture ring capacity in samples
    pub circular_buffer_size: usize,
    /// Display zoom mode
    pub zoom_state: ZoomState,
    /// Display floor in dB
    pub min_db: f64,
    /// Display ceiling in dB
    pub max_db: f64,
    /// EWMA coefficient for display smoothing (0 disables)
    pub animation_smoothing: f64,
    /// Estimator that supplies tracked peaks
    pub estimator: EstimatorKind,
    /// SNR a spectral peak must clear over the noise floor, in dB
    pub snr_threshold_db: f64,
    /// Quantile tracked by the denoising floor estimator
    pub noise_floor_quantile: f64,
    /// Bandwidth of noise-floor smoothing, in semitones
    pub noise_floor_semitones: f64,
}

impl Default for TuningParams {
    fn default() -> Self {
        Self {
            audio_sample_rate: 48_000.0,
            concert_pitch: 440.0,
            target_note: 69,
            target_partial: 1,
            temperament: Temperament::Equal,
            target_bandwidth_cents: 100.0,
            display_bin_count: 512,
            fft_size: 4096,
            circular_buffer_size: 1 << 18,
            zoom_state: ZoomState::FullSpectrum,
            min_db: -120.0,
            max_db: 0.0,
            animation_smoothing: 0.5,
            estimator: EstimatorKind::Ekf,
            snr_threshold_db: 30.0,
            noise_floor_quantile: 0.25,
            noise_floor_semitones: 2.0,
        }
    }
}

impl TuningParams {
    /// Target frequency: temperament + partial + concert pitch
    pub fn target_frequency(&self) -> f64 {
        Note::from_midi(self.target_note).frequency(self.temperament, self.concert_pitch)
            * self.target_partial as f64
    }

    /// Display viewport in Hz for the current zoom state
    pub fn viewport(&self) -> (f64, f64) {
        let nyquist = self.audio_sample_rate / 2.0;
        match self.zoom_state {
            ZoomState::FullSpectrum => (20.0, nyquist),
            ZoomState::ThreeOctaves => {
                let target = self.target_frequency();
                let span = 2.0_f64.powf(1.5);
                ((target / span).max(20.0), (target * span).min(nyquist))
            }
            ZoomState::TargetFundamental => {
                let target = self.target_frequency();
                let ratio = 2.0_f64.powf(self.target_bandwidth_cents / 1200.0);
                ((target / ratio).max(1.0), (target * ratio).min(nyquist))
            }
        }
    }

    /// Whether the display axis is logarithmic for the current zoom state
    pub fn use_log_scale(&self) -> bool {
        !matches!(self.zoom_state, ZoomState::TargetFundamental)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PARAMETER STORE
// ═══════════════════════════════════════════════════════════════════════════

/// Observable parameter store
///
/// Explicitly constructed and passed to each component; there is no
/// process-wide default instance.
pub struct ParamStore {
    params: RwLock<TuningParams>,
    revision: AtomicU64,
    subscribers: Mutex<Vec<Sender<u64>>>,
}

impl ParamStore {
    /// Create a store with the given initial parameters
    pub fn new(params: TuningParams) -> Self {
        Self {
            params: RwLock::new(params),
            revision: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Read a coherent snapshot
    pub fn snapshot(&self) -> TuningParams {
        self.params.read().clone()
    }

    /// Current revision; bumped on every update
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Mutate the parameters and notify subscribers
    ///
    /// Notification is a bounded wakeup hint: a full channel means a
    /// notification is already pending, which is exactly the coalescing
    /// the analysis thread wants.
    pub fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut TuningParams),
    {
        {
            let mut guard = self.params.write();
            mutate(&mut guard);
        }
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(revision) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Subscribe to change notifications (coalesced, capacity 1)
    pub fn subscribe(&self) -> Receiver<u64> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.subscribers.lock().push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_frequency_applies_partial_and_pitch() {
        let mut params = TuningParams::default();
        assert!((params.target_frequency() - 440.0).abs() < 1e-9);

        params.target_partial = 2;
        assert!((params.target_frequency() - 880.0).abs() < 1e-9);

        params.target_partial = 1;
        params.concert_pitch = 442.0;
        assert!((params.target_frequency() - 442.0).abs() < 1e-9);
    }

    #[test]
    fn test_viewport_modes() {
        let mut params = TuningParams::default();

        let (lo, hi) = params.viewport();
        assert_eq!(lo, 20.0);
        assert_eq!(hi, 24_000.0);
        assert!(params.use_log_scale());

        params.zoom_state = ZoomState::TargetFundamental;
        params.target_bandwidth_cents = 100.0;
        let (lo, hi) = params.viewport();
        assert!(lo < 440.0 && 440.0 < hi);
        // One semitone either side
        assert!((hi / lo - 2.0_f64.powf(2.0 / 12.0)).abs() < 1e-6);
        assert!(!params.use_log_scale());
    }

    #[test]
    fn test_store_snapshot_and_revision() {
        let store = ParamStore::new(TuningParams::default());
        assert_eq!(store.revision(), 0);

        store.update(|p| p.target_note = 60);
        assert_eq!(store.revision(), 1);
        assert_eq!(store.snapshot().target_note, 60);
    }

    #[test]
    fn test_store_notification_coalesces() {
        let store = ParamStore::new(TuningParams::default());
        let rx = store.subscribe();

        store.update(|p| p.target_note = 60);
        store.update(|p| p.target_note = 61);
        store.update(|p| p.target_note = 62);

        // Multiple updates coalesce into one pending notification.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(store.snapshot().target_note, 62);
    }

    #[test]
    fn test_params_serde_round_trip() {
        let params = TuningParams::default();
        let json = serde_json::to_string(&params).unwrap();
        let back: TuningParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back.target_note, params.target_note);
        assert_eq!(back.fft_size, params.fft_size);
    }
}
