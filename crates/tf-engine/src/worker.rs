//! Worker thread lifecycle
//!
//! `Study::start` spawns the analysis thread (tick loop at the update
//! rate) and a completion thread (delivers finished job results), then
//! returns a `StudyHandle`. The handle is the entire control surface:
//! job enqueue/cancel, the frame mailbox, the parameter store, and the
//! capture sink the audio callback drives.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use tf_audio::{CaptureSink, FrameMailbox};
use tf_core::{ParamStore, TfError, TfResult};

use crate::frame::StudyFrame;
use crate::job::{JobHandle, JobId, JobRegistry, StudyJob};
use crate::jobs::{AutoConcertPitchJob, AutoTuneJob, AutoTuneResult, JOB_TIMEOUT_SECS};
use crate::orchestrator::{Study, StudyConfig};

enum ControlMsg {
    Enqueue {
        id: JobId,
        job: Box<dyn StudyJob>,
        frame_budget: u32,
        deadline: Instant,
    },
    Cancel(JobId),
    Stop,
}

/// Running engine handle
///
/// Dropping the handle stops the engine.
pub struct StudyHandle {
    control_tx: Sender<ControlMsg>,
    mailbox: Arc<FrameMailbox<StudyFrame>>,
    params: Arc<ParamStore>,
    sink: Arc<CaptureSink>,
    next_job_id: AtomicU64,
    analysis_thread: Option<JoinHandle<()>>,
    completion_thread: Option<JoinHandle<()>>,
    analysis_rate_hz: f64,
}

impl Study {
    /// Spawn the analysis and completion threads
    ///
    /// The one-shot failure path: unusable initial parameters (sample
    /// rate, FFT size). Once this returns, the engine only ever degrades
    /// gracefully.
    pub fn start(params: Arc<ParamStore>, config: StudyConfig) -> TfResult<StudyHandle> {
        let snapshot = params.snapshot();
        if snapshot.audio_sample_rate <= 0.0 {
            return Err(TfError::NoCaptureSource);
        }

        let (completion_tx, completion_rx) = crossbeam_channel::unbounded::<Box<dyn StudyJob>>();
        let (control_tx, control_rx) = crossbeam_channel::unbounded();

        let mut study = Study::new(
            Arc::clone(&params),
            config,
            JobRegistry::new(completion_tx),
        )?;

        let mailbox = Arc::clone(study.mailbox());
        let sink = Arc::new(CaptureSink::new(
            Arc::clone(study.raw_ring()),
            snapshot.audio_sample_rate,
        ));

        let completion_thread = std::thread::Builder::new()
            .name("tf-completion".into())
            .spawn(move || {
                for mut job in completion_rx {
                    job.finish();
                }
            })
            .map_err(|e| TfError::Engine(e.to_string()))?;

        let analysis_thread = std::thread::Builder::new()
            .name("tf-analysis".into())
            .spawn(move || run_loop(&mut study, &control_rx))
            .map_err(|e| TfError::Engine(e.to_string()))?;

        Ok(StudyHandle {
            control_tx,
            mailbox,
            params,
            sink,
            next_job_id: AtomicU64::new(1),
            analysis_thread: Some(analysis_thread),
            completion_thread: Some(completion_thread),
            analysis_rate_hz: config.analysis_rate_hz,
        })
    }
}

/// The analysis loop: coalesce control, tick, sleep out the period
fn run_loop(study: &mut Study, control_rx: &Receiver<ControlMsg>) {
    let period = study.update_period();

    loop {
        let started = Instant::now();

        for msg in control_rx.try_iter() {
            match msg {
                ControlMsg::Enqueue {
                    id,
                    job,
                    frame_budget,
                    deadline,
                } => study.registry_mut().insert(id, job, frame_budget, deadline),
                ControlMsg::Cancel(id) => {
                    study.registry_mut().cancel(id);
                }
                ControlMsg::Stop => return,
            }
        }

        study.tick(started);

        let elapsed = started.elapsed();
        if elapsed < period {
            std::thread::sleep(period - elapsed);
        }
    }
}

impl StudyHandle {
    /// Latest-wins frame mailbox for the UI
    pub fn mailbox(&self) -> &Arc<FrameMailbox<StudyFrame>> {
        &self.mailbox
    }

    /// The shared parameter store
    pub fn params(&self) -> &Arc<ParamStore> {
        &self.params
    }

    /// The sink the capture layer pushes PCM frames into
    pub fn capture_sink(&self) -> Arc<CaptureSink> {
        Arc::clone(&self.sink)
    }

    /// Register a job with a frame budget and wall-clock timeout
    pub fn enqueue(
        &self,
        job: Box<dyn StudyJob>,
        frame_budget: u32,
        timeout: Duration,
    ) -> JobId {
        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.control_tx.send(ControlMsg::Enqueue {
            id,
            job,
            frame_budget,
            deadline: Instant::now() + timeout,
        });
        id
    }

    /// Remove a job; its result channel closes with no value
    pub fn cancel(&self, id: JobId) {
        let _ = self.control_tx.send(ControlMsg::Cancel(id));
    }

    /// Resolve the sounding note (10 s timeout)
    pub fn auto_tune(&self) -> JobHandle<Option<AutoTuneResult>> {
        let (job, rx) = AutoTuneJob::create();
        let id = self.enqueue(
            Box::new(job),
            self.default_frame_budget(),
            Duration::from_secs(JOB_TIMEOUT_SECS),
        );
        JobHandle::new(id, rx)
    }

    /// Derive a new concert pitch from the sounding target (10 s timeout)
    pub fn auto_concert_pitch(&self) -> JobHandle<Option<f64>> {
        let (job, rx) = AutoConcertPitchJob::create();
        let id = self.enqueue(
            Box::new(job),
            self.default_frame_budget(),
            Duration::from_secs(JOB_TIMEOUT_SECS),
        );
        JobHandle::new(id, rx)
    }

    fn default_frame_budget(&self) -> u32 {
        (self.analysis_rate_hz * JOB_TIMEOUT_SECS as f64).ceil() as u32
    }

    /// Stop the engine and join both threads
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.control_tx.send(ControlMsg::Stop);
        if let Some(thread) = self.analysis_thread.take() {
            let _ = thread.join();
        }
        // The registry (and its completion sender) died with the
        // analysis thread; the completion loop drains and exits.
        if let Some(thread) = self.completion_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StudyHandle {
    fn drop(&mut self) {
        if self.analysis_thread.is_some() {
            self.shutdown();
        }
    }
}
