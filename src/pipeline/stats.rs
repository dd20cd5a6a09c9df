//! Sliding-window frame rate and bandwidth

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use serde::Serialize;

/// Point-in-time view of the publish rate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StatsSnapshot {
    pub frames_per_second: u32,
    pub average_bandwidth_kbps: f64,
}

/// Arrival timestamps pruned by age, byte sizes pruned by count.
///
/// Shared by every publish loop; the windows prune themselves so the state
/// never needs resetting.
pub struct StatsAggregator {
    window: Duration,
    inner: Mutex<Windows>,
}

struct Windows {
    arrivals: VecDeque<Instant>,
    sizes: HeapRb<usize>,
}

impl Windows {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.arrivals.front() {
            if now.saturating_duration_since(oldest) < window {
                break;
            }
            self.arrivals.pop_front();
        }
    }
}

impl StatsAggregator {
    pub fn new(window: Duration, byte_samples: usize) -> Self {
        Self {
            window,
            inner: Mutex::new(Windows {
                arrivals: VecDeque::new(),
                sizes: HeapRb::new(byte_samples.max(1)),
            }),
        }
    }

    // Every update leaves the windows consistent, so poisoning is recovered
    fn lock(&self) -> MutexGuard<'_, Windows> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_arrival(&self, now: Instant) {
        let mut windows = self.lock();
        windows.arrivals.push_back(now);
        windows.prune(now, self.window);
    }

    pub fn record_bytes(&self, n: usize) {
        self.lock().sizes.push_overwrite(n);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> StatsSnapshot {
        let mut windows = self.lock();
        windows.prune(now, self.window);

        // One sample is not a rate
        let frames = windows.arrivals.len();
        let frames_per_second = if frames > 1 { frames as u32 } else { 0 };

        let samples = windows.sizes.occupied_len();
        let average_bandwidth_kbps = if samples == 0 {
            0.0
        } else {
            let total: usize = windows.sizes.iter().sum();
            total as f64 / samples as f64 / 1024.0
        };

        StatsSnapshot {
            frames_per_second,
            average_bandwidth_kbps,
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 30)
    }
}
