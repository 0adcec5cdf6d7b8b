//! PCM capture push interface
//!
//! The capture layer (microphone session, file player, test driver) owns
//! the real-time thread and pushes mono PCM frames into the engine through
//! [`PcmFrameSource::on_frame`]. [`CaptureSink`] is the engine-side
//! implementation: a thin wait-free bridge onto the raw [`SampleRing`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ring::SampleRing;

/// Push interface between a PCM capture and the engine
///
/// Guarantees expected from the caller: mono samples, monotonically
/// increasing frame indices, one producer thread.
pub trait PcmFrameSource: Send + Sync {
    /// Deliver one capture buffer
    fn on_frame(&self, samples: &[f32], frame_index: u64);

    /// Capture sample rate in Hz
    fn sample_rate(&self) -> f64;
}

/// Ring-backed capture sink
///
/// The only action the capture thread performs on the engine. `on_frame`
/// is wait-free: one ring write plus a relaxed gap check.
pub struct CaptureSink {
    ring: Arc<SampleRing<f32>>,
    sample_rate: f64,
    last_frame_index: AtomicU64,
    dropped_frames: AtomicU64,
}

impl CaptureSink {
    /// Create a sink writing into `ring`
    pub fn new(ring: Arc<SampleRing<f32>>, sample_rate: f64) -> Self {
        Self {
            ring,
            sample_rate,
            last_frame_index: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// The ring this sink feeds
    pub fn ring(&self) -> &Arc<SampleRing<f32>> {
        &self.ring
    }

    /// Count of capture frame-index gaps observed so far
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

impl PcmFrameSource for CaptureSink {
    fn on_frame(&self, samples: &[f32], frame_index: u64) {
        let last = self.last_frame_index.swap(frame_index, Ordering::Relaxed);
        if frame_index > last + 1 && last != 0 {
            self.dropped_frames
                .fetch_add(frame_index - last - 1, Ordering::Relaxed);
        }
        self.ring.write(samples);
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}
