//! Single-producer multi-consumer sample ring with bookmarks
//!
//! Unlike a pop-style SPSC queue, readers never consume: each reader keeps
//! its own [`Bookmark`] (an absolute sample position) and copies the span
//! between its bookmark and the write head. A reader that falls more than
//! `capacity` behind has lagged; it receives the oldest still-buffered
//! span and a bookmark resynchronised to the tail.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

// ═══════════════════════════════════════════════════════════════════════════
// BOOKMARK
// ═══════════════════════════════════════════════════════════════════════════

/// Absolute sample position owned by one consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Bookmark(pub u64);

impl Bookmark {
    /// Position before any sample was written
    pub const START: Self = Self(0);
}

/// Shape of a read against the ring
#[derive(Debug, Clone, Copy)]
pub enum ReadRequest {
    /// The most recent n samples
    Latest(usize),
    /// Everything written after the bookmark
    Since(Bookmark),
    /// Everything still buffered
    All,
}

/// Result of a read: a contiguous copy plus the resume bookmark
#[derive(Debug, Clone)]
pub struct ReadView<T> {
    /// Samples in write order
    pub samples: Vec<T>,
    /// Bookmark positioned after the last returned sample
    pub bookmark: Bookmark,
    /// True when part of the requested span had already been overwritten
    pub lagged: bool,
}

impl<T> ReadView<T> {
    fn empty(bookmark: Bookmark) -> Self {
        Self {
            samples: Vec::new(),
            bookmark,
            lagged: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SAMPLE RING
// ═══════════════════════════════════════════════════════════════════════════

/// Lock-free single-producer multi-consumer sample ring
///
/// The producer is wait-free and never allocates. Readers copy; a slow
/// reader costs nothing to the producer and only ever harms itself (lag).
/// Capacity is rounded up to a power of two.
///
/// Two counters order the slot traffic: `write_index` reserves the span
/// before slot stores begin, `total_written` publishes it afterwards.
/// Readers load `total_written` first, copy, then check `write_index` to
/// discard any prefix the producer may have reused mid-copy.
#[repr(align(64))]
pub struct SampleRing<T> {
    /// Element storage; slots are overwritten in place by the producer
    buffer: Box<[UnsafeCell<T>]>,
    /// Capacity mask for cheap modulo
    mask: u64,
    /// Reserved head: advanced before slot stores begin
    write_index: AtomicU64,
    /// Published head: total samples ever written, strictly monotonic
    total_written: AtomicU64,
}

// SAFETY: readers only copy `T: Copy` values out of slots; a racing
// overwrite can produce a stale value, never an invalid one, and spans
// that overlap a reservation are discarded after the copy.
unsafe impl<T: Copy + Send> Send for SampleRing<T> {}
unsafe impl<T: Copy + Send> Sync for SampleRing<T> {}

impl<T: Copy + Default> SampleRing<T> {
    /// Create a ring with at least `min_capacity` slots
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.max(2).next_power_of_two();
        let buffer: Box<[UnsafeCell<T>]> = (0..capacity)
            .map(|_| UnsafeCell::new(T::default()))
            .collect();

        Self {
            buffer,
            mask: capacity as u64 - 1,
            write_index: AtomicU64::new(0),
            total_written: AtomicU64::new(0),
        }
    }

    /// Ring capacity in samples
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Total samples ever written
    #[inline]
    pub fn total_written(&self) -> u64 {
        self.total_written.load(Ordering::Acquire)
    }

    /// Whether at least n samples have ever been written
    #[inline]
    pub fn has(&self, n: usize) -> bool {
        self.total_written() >= n as u64
    }

    /// Append samples; producer thread only. Returns the new total.
    ///
    /// Wait-free and allocation-free: one relaxed reservation store, plain
    /// slot stores, one release publication store.
    pub fn write(&self, samples: &[T]) -> u64 {
        let start = self.total_written.load(Ordering::Relaxed);
        let total = start + samples.len() as u64;

        self.write_index.store(total, Ordering::Relaxed);

        for (i, &sample) in samples.iter().enumerate() {
            let idx = ((start + i as u64) & self.mask) as usize;
            // SAFETY: single producer; readers revalidate copied spans
            // against `write_index` and drop anything we may have reused.
            unsafe { *self.buffer[idx].get() = sample };
        }

        self.total_written.store(total, Ordering::Release);
        total
    }

    /// Copy samples out of the ring per `request`
    ///
    /// Never fails: an over-sized or lagged request is satisfied with the
    /// span that still exists. The returned bookmark always equals the
    /// write head observed by this read.
    pub fn read(&self, request: ReadRequest) -> ReadView<T> {
        let total = self.total_written.load(Ordering::Acquire);
        if total == 0 {
            return ReadView::empty(Bookmark(0));
        }

        let capacity = self.buffer.len() as u64;
        let oldest = total.saturating_sub(capacity);

        let (start, was_lagged) = match request {
            ReadRequest::Latest(n) => (total.saturating_sub(n as u64).max(oldest), false),
            ReadRequest::All => (oldest, false),
            ReadRequest::Since(bookmark) => {
                if bookmark.0 < oldest {
                    (oldest, true)
                } else {
                    (bookmark.0.min(total), false)
                }
            }
        };

        let mut samples = Vec::with_capacity((total - start) as usize);
        for pos in start..total {
            let idx = (pos & self.mask) as usize;
            // SAFETY: value copies only; torn spans are discarded below.
            samples.push(unsafe { *self.buffer[idx].get() });
        }

        // Revalidate against the reservation head: any copied position the
        // producer has since reserved over is untrustworthy.
        let reserved = self.write_index.load(Ordering::Acquire);
        let safe_from = reserved.saturating_sub(capacity);
        let mut lagged = was_lagged;
        if safe_from > start {
            let drop = (safe_from - start).min(samples.len() as u64) as usize;
            samples.drain(..drop);
            lagged = true;
        }

        ReadView {
            samples,
            bookmark: Bookmark(total),
            lagged,
        }
    }
}
