//! The queue-accounting capability contract.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use coldfront_routing::HostKey;

/// Point-in-time snapshot of every queue bucket, as served to the
/// autoscaler. Values are individually consistent but not mutually so.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub counts: BTreeMap<HostKey, usize>,
}

impl Counts {
    /// Concurrency for a key; unknown keys read as zero.
    pub fn get(&self, key: &HostKey) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }
}

/// A per-host concurrency counter.
///
/// All operations are concurrency-safe and complete without blocking on
/// I/O. Reads are point-in-time; increments and decrements on a single
/// key are serialized. Writes against a key that was never `ensure`d
/// are dropped with a logged warning rather than failing the request
/// that issued them.
pub trait Counter: Send + Sync {
    /// Idempotently create a zero-valued bucket for the key.
    fn ensure(&self, key: &HostKey);

    /// Delete the bucket. Returns whether it existed.
    fn remove(&self, key: &HostKey) -> bool;

    /// Add `delta` in-flight requests to the key's bucket.
    fn increment(&self, key: &HostKey, delta: usize);

    /// Remove `delta` in-flight requests from the key's bucket, subject
    /// to the cooldown rule: when cooldown is enabled and the decrement
    /// would take the bucket to zero, the level is frozen instead and
    /// the enforcer applies the zero once the cooldown elapses.
    fn decrement(&self, key: &HostKey, delta: usize);

    /// Current concurrency for one key; zero for unknown keys.
    fn count(&self, key: &HostKey) -> usize;

    /// Snapshot of all buckets.
    fn current(&self) -> Counts;

    /// Whether the 1→0 cooldown rule is active.
    fn cooldown_enabled(&self) -> bool;

    /// The cooldown window applied to postponed decrements.
    fn cooldown(&self) -> Duration;

    /// Sliding-window request rates per key, for the metrics surface.
    /// Implementations without rate tracking report nothing.
    fn rates(&self) -> BTreeMap<HostKey, f64> {
        BTreeMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_to_the_admin_shape() {
        let mut counts = Counts::default();
        counts.counts.insert(HostKey::new("ns", "svc"), 3);

        let json = serde_json::to_string(&counts).unwrap();
        assert_eq!(json, r#"{"counts":{"ns/svc":3}}"#);
    }

    #[test]
    fn unknown_keys_read_as_zero() {
        let counts = Counts::default();
        assert_eq!(counts.get(&HostKey::new("ns", "svc")), 0);
    }
}
