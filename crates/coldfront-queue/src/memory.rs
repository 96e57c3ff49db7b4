//! In-memory counter with cooldown-aware decrement.
//!
//! A single reader/writer lock guards the concurrency table, the rate
//! buckets, and the postponement table together, so increments and
//! decrements for one host are globally serialized and `current()` is a
//! consistent point-in-time read.
//!
//! The cooldown rule: when enabled, a decrement that would take a
//! bucket to zero does not apply. Instead the current level is frozen
//! and stamped with a due time; the enforcer loop later zeroes the
//! bucket if its level is still exactly the frozen value. Any traffic
//! in between changes the level and voids the postponement.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use coldfront_routing::HostKey;

use crate::buckets::RequestBuckets;
use crate::counter::{Counter, Counts};

/// A decrement held back by the cooldown rule.
#[derive(Debug, Clone, Copy)]
struct Postponement {
    /// When the enforcer may apply the zero.
    due: Instant,
    /// The concurrency level at the time of the deferred decrement.
    frozen: usize,
}

#[derive(Default)]
struct Tables {
    concurrency: HashMap<HostKey, usize>,
    rates: HashMap<HostKey, RequestBuckets>,
    postponed: HashMap<HostKey, Postponement>,
}

/// The in-memory [`Counter`] implementation.
pub struct InMemoryCounter {
    tables: RwLock<Tables>,
    cooldown: Duration,
    cooldown_enabled: bool,
    rate_window: Duration,
    rate_granularity: Duration,
}

impl InMemoryCounter {
    pub fn new(cooldown: Duration, cooldown_enabled: bool) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            cooldown,
            cooldown_enabled,
            rate_window: Duration::from_secs(60),
            rate_granularity: Duration::from_secs(1),
        }
    }

    /// Override the rate-tracking window (metrics surface only).
    pub fn with_rate_window(mut self, window: Duration, granularity: Duration) -> Self {
        self.rate_window = window;
        self.rate_granularity = granularity;
        self
    }

    /// Apply every postponement that is due at `now`.
    ///
    /// Holds the write lock for one scan over the postponement table.
    /// An entry whose concurrency still equals the frozen level is set
    /// to zero; an entry whose level changed in the meantime is
    /// discarded without touching the counter.
    pub fn enforce_postponed(&self, now: Instant) {
        let mut tables = self.tables.write().expect("queue lock");
        let due: Vec<HostKey> = tables
            .postponed
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in due {
            let Some(postponement) = tables.postponed.remove(&key) else {
                continue;
            };
            match tables.concurrency.get_mut(&key) {
                Some(level) if *level == postponement.frozen => {
                    *level = 0;
                    info!(%key, frozen = postponement.frozen, "postponed decrement applied");
                }
                _ => {
                    debug!(%key, "postponement discarded, queue level changed");
                }
            }
        }
    }

    /// Run the cooldown enforcer until shutdown.
    pub async fn run_enforcer(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = interval.as_millis() as u64, "cooldown enforcer started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.enforce_postponed(Instant::now());
                }
                _ = shutdown.changed() => {
                    info!("cooldown enforcer shutting down");
                    break;
                }
            }
        }
    }
}

impl Counter for InMemoryCounter {
    fn ensure(&self, key: &HostKey) {
        let mut tables = self.tables.write().expect("queue lock");
        tables.concurrency.entry(key.clone()).or_insert(0);
        if !tables.rates.contains_key(key) {
            tables.rates.insert(
                key.clone(),
                RequestBuckets::new(self.rate_window, self.rate_granularity),
            );
        }
    }

    fn remove(&self, key: &HostKey) -> bool {
        let mut tables = self.tables.write().expect("queue lock");
        let existed = tables.concurrency.remove(key).is_some();
        tables.rates.remove(key);
        tables.postponed.remove(key);
        existed
    }

    fn increment(&self, key: &HostKey, delta: usize) {
        let now = Instant::now();
        let mut tables = self.tables.write().expect("queue lock");
        let Some(level) = tables.concurrency.get_mut(key) else {
            warn!(%key, delta, "increment for untracked host dropped");
            return;
        };
        *level += delta;
        let level = *level;
        if let Some(buckets) = tables.rates.get_mut(key) {
            buckets.record(now, delta);
        }
        debug!(%key, level, "queue incremented");
    }

    fn decrement(&self, key: &HostKey, delta: usize) {
        let now = Instant::now();
        let mut tables = self.tables.write().expect("queue lock");
        let Some(current) = tables.concurrency.get(key).copied() else {
            warn!(%key, delta, "decrement for untracked host dropped");
            return;
        };

        if self.cooldown_enabled && current > 0 && delta >= current {
            tables.postponed.insert(
                key.clone(),
                Postponement {
                    due: now + self.cooldown,
                    frozen: current,
                },
            );
            debug!(%key, level = current, "decrement to zero postponed");
            return;
        }

        if delta > current {
            warn!(%key, current, delta, "decrement past zero clamped");
        }
        let level = current.saturating_sub(delta);
        tables.concurrency.insert(key.clone(), level);
        debug!(%key, level, "queue decremented");
    }

    fn count(&self, key: &HostKey) -> usize {
        let tables = self.tables.read().expect("queue lock");
        tables.concurrency.get(key).copied().unwrap_or(0)
    }

    fn current(&self) -> Counts {
        let tables = self.tables.read().expect("queue lock");
        Counts {
            counts: tables
                .concurrency
                .iter()
                .map(|(key, level)| (key.clone(), *level))
                .collect(),
        }
    }

    fn cooldown_enabled(&self) -> bool {
        self.cooldown_enabled
    }

    fn cooldown(&self) -> Duration {
        self.cooldown
    }

    fn rates(&self) -> BTreeMap<HostKey, f64> {
        let now = Instant::now();
        let tables = self.tables.read().expect("queue lock");
        tables
            .rates
            .iter()
            .map(|(key, buckets)| (key.clone(), buckets.window_average(now)))
            .collect()
    }
}
