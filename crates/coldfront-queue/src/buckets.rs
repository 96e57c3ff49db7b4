//! Sliding-window request-rate buckets.
//!
//! Each bucket covers `granularity` of wall time; the window average is
//! the total recorded over the most recent `window`, divided by the
//! window length in seconds. Stale buckets are evicted on record.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Windowed request counter for one host.
#[derive(Debug)]
pub struct RequestBuckets {
    window: Duration,
    granularity: Duration,
    /// Buckets in slot order: (slot index, total recorded in that slot).
    slots: VecDeque<(u64, f64)>,
    epoch: Instant,
}

impl RequestBuckets {
    pub fn new(window: Duration, granularity: Duration) -> Self {
        let granularity = granularity.max(Duration::from_millis(1));
        Self {
            window: window.max(granularity),
            granularity,
            slots: VecDeque::new(),
            epoch: Instant::now(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn granularity(&self) -> Duration {
        self.granularity
    }

    /// Record `delta` arrivals at `now`.
    pub fn record(&mut self, now: Instant, delta: usize) {
        let slot = self.slot_of(now);
        self.evict_before(slot);
        match self.slots.back_mut() {
            Some((idx, total)) if *idx == slot => *total += delta as f64,
            _ => self.slots.push_back((slot, delta as f64)),
        }
    }

    /// Average arrivals per second over the window ending at `now`.
    pub fn window_average(&self, now: Instant) -> f64 {
        let slot = self.slot_of(now);
        let span = self.span();
        let total: f64 = self
            .slots
            .iter()
            .filter(|(idx, _)| idx + span > slot)
            .map(|(_, total)| total)
            .sum();
        total / self.window.as_secs_f64()
    }

    fn slot_of(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.epoch);
        (elapsed.as_nanos() / self.granularity.as_nanos()) as u64
    }

    /// Number of slots the window spans.
    fn span(&self) -> u64 {
        (self.window.as_nanos() / self.granularity.as_nanos()).max(1) as u64
    }

    fn evict_before(&mut self, slot: u64) {
        let span = self.span();
        while let Some((idx, _)) = self.slots.front() {
            if idx + span <= slot {
                self.slots.pop_front();
            } else {
                break;
            }
        }
    }
}
