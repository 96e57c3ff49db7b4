//! Recording counter for tests of code that takes the [`Counter`]
//! contract.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use coldfront_routing::HostKey;

use crate::counter::{Counter, Counts};

/// A [`Counter`] that applies every mutation immediately and signals it
/// on a channel, so a test can await "the pipeline touched the counter"
/// instead of polling for it. The full sequence of signed deltas is
/// also kept for post-hoc assertions that each request produced exactly
/// one increment and one decrement.
pub struct FakeCounter {
    counts: Mutex<HashMap<HostKey, usize>>,
    events: Mutex<Vec<(HostKey, i64)>>,
    resized_tx: mpsc::UnboundedSender<(HostKey, i64)>,
    resized_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(HostKey, i64)>>,
    cooldown: Duration,
    cooldown_enabled: bool,
}

impl FakeCounter {
    pub fn new() -> Self {
        let (resized_tx, resized_rx) = mpsc::unbounded_channel();
        Self {
            counts: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            resized_tx,
            resized_rx: tokio::sync::Mutex::new(resized_rx),
            cooldown: Duration::ZERO,
            cooldown_enabled: false,
        }
    }

    /// Report the given cooldown settings through the contract without
    /// changing the fake's immediate-apply behavior.
    pub fn with_cooldown(mut self, cooldown: Duration, enabled: bool) -> Self {
        self.cooldown = cooldown;
        self.cooldown_enabled = enabled;
        self
    }

    /// Await the next mutation: the key and the signed delta applied to
    /// it. Blocks until one lands, so wrap it in a timeout when none is
    /// expected.
    pub async fn resized(&self) -> (HostKey, i64) {
        self.resized_rx
            .lock()
            .await
            .recv()
            .await
            .expect("fake resize channel closed")
    }

    /// Every increment (+delta) and decrement (−delta) seen, in order.
    pub fn events(&self) -> Vec<(HostKey, i64)> {
        self.events.lock().expect("fake lock").clone()
    }

    fn record(&self, key: &HostKey, delta: i64) {
        self.events
            .lock()
            .expect("fake lock")
            .push((key.clone(), delta));
        let _ = self.resized_tx.send((key.clone(), delta));
    }
}

impl Default for FakeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Counter for FakeCounter {
    fn ensure(&self, key: &HostKey) {
        let mut counts = self.counts.lock().expect("fake lock");
        counts.entry(key.clone()).or_insert(0);
    }

    fn remove(&self, key: &HostKey) -> bool {
        let mut counts = self.counts.lock().expect("fake lock");
        counts.remove(key).is_some()
    }

    fn increment(&self, key: &HostKey, delta: usize) {
        let mut counts = self.counts.lock().expect("fake lock");
        *counts.entry(key.clone()).or_insert(0) += delta;
        drop(counts);
        self.record(key, delta as i64);
    }

    fn decrement(&self, key: &HostKey, delta: usize) {
        let mut counts = self.counts.lock().expect("fake lock");
        let level = counts.entry(key.clone()).or_insert(0);
        *level = level.saturating_sub(delta);
        drop(counts);
        self.record(key, -(delta as i64));
    }

    fn count(&self, key: &HostKey) -> usize {
        let counts = self.counts.lock().expect("fake lock");
        counts.get(key).copied().unwrap_or(0)
    }

    fn current(&self) -> Counts {
        let counts = self.counts.lock().expect("fake lock");
        Counts {
            counts: counts.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    fn cooldown_enabled(&self) -> bool {
        self.cooldown_enabled
    }

    fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
