//! Auto-tune: resolve the sounding note
//!
//! Watches the HPS fundamental across frames until it stabilises, then
//! names the nearest note under the active temperament and concert
//! pitch. A very strong spectral peak short-circuits the stabilisation
//! wait.

use crossbeam_channel::{Receiver, Sender};

use tf_core::{Note, cents_between};

use crate::frame::StudyFrame;
use crate::job::{JobContext, JobStatus, StudyJob};

use super::{CONFIDENCE_ALPHA, CONFIDENCE_NEEDED};

/// Cents window for both frame-to-frame stability and note matching
const STABILITY_CENTS: f64 = 45.0;

/// Raw-spectrum SNR that accepts a fundamental immediately, dB
const IMMEDIATE_SNR_DB: f64 = 30.0;

/// A resolved note
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoTuneResult {
    /// The nearest note to the stable fundamental
    pub note: Note,
    /// Signed error of the fundamental against that note, cents
    pub cents_error: f64,
    /// The stable fundamental itself, Hz
    pub frequency_hz: f64,
}

/// Job resolving a stable HPS fundamental to a note
pub struct AutoTuneJob {
    tx: Option<Sender<Option<AutoTuneResult>>>,
    confidence: f64,
    previous_hz: Option<f64>,
    result: Option<AutoTuneResult>,
}

impl AutoTuneJob {
    /// Create the job and its one-shot result receiver
    pub fn create() -> (Self, Receiver<Option<AutoTuneResult>>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (
            Self {
                tx: Some(tx),
                confidence: 0.0,
                previous_hz: None,
                result: None,
            },
            rx,
        )
    }

    fn resolve(&self, frequency_hz: f64, ctx: &JobContext) -> Option<AutoTuneResult> {
        let (note, cents_error) = Note::nearest(
            frequency_hz,
            ctx.params.temperament,
            ctx.params.concert_pitch,
        )?;
        (cents_error.abs() <= STABILITY_CENTS).then_some(AutoTuneResult {
            note,
            cents_error,
            frequency_hz,
        })
    }
}

impl StudyJob for AutoTuneJob {
    fn ingest(&mut self, frame: &StudyFrame, ctx: &JobContext) -> JobStatus {
        let Some(estimate) = frame.hps else {
            // Nothing sounding: decay confidence, keep waiting.
            self.confidence *= CONFIDENCE_ALPHA;
            return JobStatus::Continue;
        };

        // A very clean peak needs no stabilisation.
        if estimate.snr_db >= IMMEDIATE_SNR_DB
            && let Some(result) = self.resolve(estimate.frequency_hz, ctx)
        {
            self.result = Some(result);
            return JobStatus::Finished;
        }

        let stable = self
            .previous_hz
            .is_some_and(|prev| cents_between(prev, estimate.frequency_hz).abs() <= STABILITY_CENTS);
        self.previous_hz = Some(estimate.frequency_hz);

        self.confidence = CONFIDENCE_ALPHA * self.confidence
            + (1.0 - CONFIDENCE_ALPHA) * if stable { 1.0 } else { 0.0 };

        if stable && self.confidence >= CONFIDENCE_NEEDED
            && let Some(result) = self.resolve(estimate.frequency_hz, ctx)
        {
            self.result = Some(result);
            return JobStatus::Finished;
        }
        JobStatus::Continue
    }

    fn finish(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(self.result);
        }
    }
}
