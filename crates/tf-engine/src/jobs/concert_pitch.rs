//! Auto concert pitch: infer A4 from a sustained reference tone
//!
//! Assumes the player is sounding the configured target note. Once the
//! estimator's frequency holds inside a narrow stability window long
//! enough, the ratio between the averaged observation and the nominal
//! target rescales the concert pitch.

use crossbeam_channel::{Receiver, Sender};

use tf_core::cents_between;

use crate::frame::StudyFrame;
use crate::job::{JobContext, JobStatus, StudyJob};

use super::{CONFIDENCE_ALPHA, CONFIDENCE_NEEDED};

/// Stability window around the running reference, cents
const STABILITY_CENTS: f64 = 10.5;

/// Job deriving a new concert pitch from stable observations
pub struct AutoConcertPitchJob {
    tx: Option<Sender<Option<f64>>>,
    confidence: f64,
    reference_hz: Option<f64>,
    sum_hz: f64,
    count: u32,
    result: Option<f64>,
}

impl AutoConcertPitchJob {
    /// Create the job and its one-shot result receiver
    pub fn create() -> (Self, Receiver<Option<f64>>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (
            Self {
                tx: Some(tx),
                confidence: 0.0,
                reference_hz: None,
                sum_hz: 0.0,
                count: 0,
                result: None,
            },
            rx,
        )
    }
}

impl StudyJob for AutoConcertPitchJob {
    fn ingest(&mut self, frame: &StudyFrame, ctx: &JobContext) -> JobStatus {
        // This job needs the baseband chain and a tracked estimate.
        let estimate = frame.tracked_peaks.first();
        let (true, Some(peak)) = (ctx.preprocessor_active, estimate) else {
            self.confidence *= CONFIDENCE_ALPHA;
            return JobStatus::Continue;
        };

        let observed = peak.frequency_hz;
        let stable = self
            .reference_hz
            .is_some_and(|reference| cents_between(reference, observed).abs() <= STABILITY_CENTS);

        if stable {
            self.sum_hz += observed;
            self.count += 1;
            self.confidence = CONFIDENCE_ALPHA * self.confidence + (1.0 - CONFIDENCE_ALPHA);
        } else {
            // New reference; start accumulating from scratch.
            self.reference_hz = Some(observed);
            self.sum_hz = observed;
            self.count = 1;
            self.confidence *= CONFIDENCE_ALPHA;
        }

        if self.confidence >= CONFIDENCE_NEEDED && self.count > 0 {
            let average = self.sum_hz / self.count as f64;
            let target = ctx.params.target_frequency();
            if target > 0.0 {
                self.result = Some(ctx.params.concert_pitch * average / target);
                return JobStatus::Finished;
            }
        }
        JobStatus::Continue
    }

    fn finish(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(self.result);
        }
    }
}
