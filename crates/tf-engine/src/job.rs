//! Frame-consuming jobs
//!
//! A job ingests published frames until it converges, runs out of its
//! frame budget, or passes its deadline. Finished jobs are drained off
//! the analysis thread to a completion channel where `finish` delivers
//! the typed result over a one-shot channel. Cancellation simply drops
//! the job: its sender closes and the receiver observes no value.
//!
//! Jobs are isolated: the registry hands each one the frame and context
//! by reference and never lets one job's state touch another.

use std::collections::BTreeMap;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use tf_core::TuningParams;

use crate::frame::StudyFrame;

/// Job identifier unique within one engine
pub type JobId = u64;

/// What a job wants after ingesting a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Keep feeding frames
    Continue,
    /// Converged; drain to the completion thread
    Finished,
}

/// Per-dispatch context handed to every job
pub struct JobContext<'a> {
    /// Parameter snapshot the frame was produced under
    pub params: &'a TuningParams,
    /// Wall clock of the dispatch
    pub now: Instant,
    /// Frames this job missed because its last ingest outlasted a tick
    pub dropped_frames: u64,
    /// Whether the baseband preprocessor is currently running
    pub preprocessor_active: bool,
}

/// A unit of convergence work driven by published frames
pub trait StudyJob: Send {
    /// Consume one frame; return `Finished` once converged
    fn ingest(&mut self, frame: &StudyFrame, ctx: &JobContext) -> JobStatus;

    /// Deliver the result (or "no result") over the job's channel.
    /// Called exactly once, on the completion thread, for jobs that
    /// finish or time out; never called for cancelled jobs.
    fn finish(&mut self);
}

/// One-shot receiver for a job's typed result
///
/// A closed channel without a value means the job was cancelled.
pub struct JobHandle<T> {
    id: JobId,
    receiver: Receiver<T>,
}

impl<T> JobHandle<T> {
    pub fn new(id: JobId, receiver: Receiver<T>) -> Self {
        Self { id, receiver }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Non-blocking poll
    pub fn try_result(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Block until the result arrives or the channel closes
    pub fn wait(&self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// Block with a timeout
    pub fn wait_timeout(&self, timeout: std::time::Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

struct RegisteredJob {
    job: Box<dyn StudyJob>,
    remaining_frames: u32,
    deadline: Instant,
    last_frame: Option<u64>,
}

/// Ordered job registry owned by the analysis thread
pub struct JobRegistry {
    jobs: BTreeMap<JobId, RegisteredJob>,
    completion_tx: Sender<Box<dyn StudyJob>>,
}

impl JobRegistry {
    /// Finished jobs are sent to `completion_tx`, where a dedicated
    /// thread calls `finish`
    pub fn new(completion_tx: Sender<Box<dyn StudyJob>>) -> Self {
        Self {
            jobs: BTreeMap::new(),
            completion_tx,
        }
    }

    /// Register a job under a caller-assigned id
    pub fn insert(
        &mut self,
        id: JobId,
        job: Box<dyn StudyJob>,
        frame_budget: u32,
        deadline: Instant,
    ) {
        self.jobs.insert(
            id,
            RegisteredJob {
                job,
                remaining_frames: frame_budget,
                deadline,
                last_frame: None,
            },
        );
    }

    /// Remove a job; its result channel closes without a value
    pub fn cancel(&mut self, id: JobId) -> bool {
        self.jobs.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Feed one frame to every job in id order; drain the finished
    pub fn dispatch(&mut self, frame: &StudyFrame, params: &TuningParams, now: Instant,
        preprocessor_active: bool)
    {
        let mut done = Vec::new();

        for (&id, entry) in self.jobs.iter_mut() {
            let dropped = match entry.last_frame {
                Some(last) => frame.frame_number.saturating_sub(last + 1),
                None => 0,
            };
            entry.last_frame = Some(frame.frame_number);

            let ctx = JobContext {
                params,
                now,
                dropped_frames: dropped,
                preprocessor_active,
            };

            let status = entry.job.ingest(frame, &ctx);
            entry.remaining_frames = entry.remaining_frames.saturating_sub(1);

            if status == JobStatus::Finished
                || entry.remaining_frames == 0
                || now >= entry.deadline
            {
                done.push(id);
            }
        }

        for id in done {
            if let Some(entry) = self.jobs.remove(&id)
                && self.completion_tx.send(entry.job).is_err()
            {
                log::warn!("job {id}: completion channel closed, result dropped");
            }
        }
    }
}
