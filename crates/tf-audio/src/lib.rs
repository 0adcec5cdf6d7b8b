//! tf-audio: Lock-free audio transport for TuneForge
//!
//! Provides the shared mutables between the capture, analysis, and UI
//! threads:
//! - `SampleRing` - single-producer multi-consumer ring with bookmarks
//! - `CaptureSink` / `PcmFrameSource` - the push interface the capture
//!   layer drives
//! - `FrameMailbox` - latest-wins single-slot hop to the UI
//!
//! CRITICAL: the capture thread must never block. `SampleRing::write` is
//! wait-free and allocation-free.

mod mailbox;
mod ring;
mod source;

pub use mailbox::FrameMailbox;
pub use ring::{Bookmark, ReadRequest, ReadView, SampleRing};
pub use source::{CaptureSink, PcmFrameSource};
