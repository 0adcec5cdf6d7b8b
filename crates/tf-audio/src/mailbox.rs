//! Latest-wins single-slot mailbox
//!
//! The publish hop from the analysis thread to the UI: publishing replaces
//! whatever is in the slot, consumers poll at their own rate. The critical
//! section is a single slot swap so the analysis thread never waits on a
//! slow reader.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Single-slot latest-wins mailbox
pub struct FrameMailbox<T> {
    slot: Mutex<Option<T>>,
    published: AtomicU64,
}

impl<T> FrameMailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            published: AtomicU64::new(0),
        }
    }

    /// Replace the slot contents; the previous unread value is dropped
    pub fn publish(&self, value: T) {
        *self.slot.lock() = Some(value);
        self.published.fetch_add(1, Ordering::Release);
    }

    /// Take the latest value, if any was published since the last take
    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// Total values ever published
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }
}

impl<T: Clone> FrameMailbox<T> {
    /// Clone the latest value without consuming it
    pub fn peek(&self) -> Option<T> {
        self.slot.lock().clone()
    }
}

impl<T> Default for FrameMailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
