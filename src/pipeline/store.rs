//! Single-slot, latest-wins frame store

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;

use crate::capture::RasterFrame;

/// Holds the newest frame of one stream.
///
/// Writes replace the slot atomically; there is no queue and no backpressure
/// on the producer. Readers get their own `RasterFrame` value and may miss
/// frames written between two reads. Clones share the same slot.
#[derive(Clone)]
pub struct FrameStore {
    inner: Arc<Inner>,
}

struct Inner {
    name: &'static str,
    slot: ArcSwapOption<RasterFrame>,
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicU64,
    frames_read: AtomicU64,
}

impl FrameStore {
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                slot: ArcSwapOption::empty(),
                stats: CachePadded::new(Stats::default()),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Replace the stored frame. Returns the sequence number it was stored under.
    ///
    /// Sequence numbers follow the slot, so they only ever increase even
    /// with several writers racing.
    pub fn write(&self, frame: RasterFrame) -> u64 {
        let mut sequence = 0;
        self.inner.slot.rcu(|current| {
            sequence = current.as_ref().map_or(0, |stored| stored.sequence()) + 1;
            Some(Arc::new(frame.clone().with_sequence(sequence)))
        });
        self.inner.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        sequence
    }

    /// Copy of the newest frame, or `None` if nothing was ever written.
    pub fn read_snapshot(&self) -> Option<RasterFrame> {
        let frame = self.inner.slot.load_full()?;
        self.inner.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(RasterFrame::clone(&frame))
    }

    /// Like [`read_snapshot`](Self::read_snapshot), but treats frames older
    /// than `max_age` as absent.
    pub fn read_fresh(&self, max_age: Duration) -> Option<RasterFrame> {
        self.read_snapshot()
            .filter(|frame| frame.timestamp.elapsed() <= max_age)
    }

    /// (frames written, snapshots handed out)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.inner.stats.frames_written.load(Ordering::Relaxed),
            self.inner.stats.frames_read.load(Ordering::Relaxed),
        )
    }
}

impl std::fmt::Debug for FrameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (written, read) = self.stats();
        f.debug_struct("FrameStore")
            .field("name", &self.inner.name)
            .field("written", &written)
            .field("read", &read)
            .finish()
    }
}
