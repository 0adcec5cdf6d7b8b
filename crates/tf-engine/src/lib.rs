//! tf-engine: Study orchestration for TuneForge
//!
//! The analysis worker that turns a PCM capture stream into published
//! study frames and converged job results:
//!
//! - `frame` - the `StudyFrame` analysis product
//! - `orchestrator` - the dual-rate tick: preprocessing, FFTs, display
//!   mapping, estimator dispatch, frame publication
//! - `job` - frame-consuming jobs with budgets, deadlines, and one-shot
//!   typed result channels
//! - `jobs` - the built-in auto-tune and auto-concert-pitch jobs
//! - `worker` - thread lifecycle: `Study::start` spawns the analysis and
//!   completion threads and hands back a `StudyHandle`
//!
//! Threading model: the capture thread only ever touches the raw sample
//! ring; every estimator and scratch buffer is confined to the analysis
//! thread; frames leave through a latest-wins mailbox; control messages
//! are coalesced at the top of each tick.

pub mod frame;
pub mod job;
pub mod jobs;
pub mod orchestrator;
pub mod worker;

pub use frame::StudyFrame;
pub use job::{JobContext, JobHandle, JobId, JobRegistry, JobStatus, StudyJob};
pub use jobs::{AutoConcertPitchJob, AutoTuneJob, AutoTuneResult};
pub use orchestrator::{Study, StudyConfig};
pub use worker::StudyHandle;
