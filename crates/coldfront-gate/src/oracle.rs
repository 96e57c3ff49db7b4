//! Readiness oracle contract and the in-process replica cache.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use coldfront_routing::HostKey;

/// Failures reading workload readiness.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("workload {0} is not tracked")]
    Untracked(HostKey),

    #[error("readiness stream for {0} closed")]
    Closed(HostKey),
}

/// Reports ready-replica counts per workload.
///
/// The oracle owns its subscription registry; callers hold only
/// per-request receivers, which release their subscription on drop.
pub trait ReadinessOracle: Send + Sync {
    /// Current ready-replica count for the workload.
    fn ready_replicas(&self, key: &HostKey) -> Result<u32, OracleError>;

    /// Subscribe to readiness changes for the workload.
    fn subscribe(&self, key: &HostKey) -> watch::Receiver<u32>;
}

/// In-memory replica counts, updated by an external watcher and fanned
/// out to waiting requests over watch channels.
///
/// A workload first seen by a read is tracked lazily at zero replicas,
/// so a request can start waiting before the first observation lands.
pub struct ReplicaCache {
    workloads: RwLock<HashMap<HostKey, watch::Sender<u32>>>,
}

impl ReplicaCache {
    pub fn new() -> Self {
        Self {
            workloads: RwLock::new(HashMap::new()),
        }
    }

    /// Record an observation for the workload, waking any waiters.
    pub fn set(&self, key: &HostKey, ready_replicas: u32) {
        let mut workloads = self.workloads.write().expect("replica lock");
        match workloads.get(key) {
            Some(sender) => {
                sender.send_replace(ready_replicas);
            }
            None => {
                let (sender, _) = watch::channel(ready_replicas);
                workloads.insert(key.clone(), sender);
            }
        }
        debug!(%key, ready_replicas, "replica count observed");
    }

    /// Stop tracking the workload. In-flight waiters see their stream
    /// close. Returns whether it was tracked.
    pub fn forget(&self, key: &HostKey) -> bool {
        let mut workloads = self.workloads.write().expect("replica lock");
        workloads.remove(key).is_some()
    }

    /// All tracked workloads.
    pub fn tracked(&self) -> Vec<HostKey> {
        let workloads = self.workloads.read().expect("replica lock");
        workloads.keys().cloned().collect()
    }

    fn sender_for(&self, key: &HostKey) -> watch::Sender<u32> {
        {
            let workloads = self.workloads.read().expect("replica lock");
            if let Some(sender) = workloads.get(key) {
                return sender.clone();
            }
        }
        let mut workloads = self.workloads.write().expect("replica lock");
        workloads
            .entry(key.clone())
            .or_insert_with(|| watch::channel(0).0)
            .clone()
    }
}

impl Default for ReplicaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessOracle for ReplicaCache {
    fn ready_replicas(&self, key: &HostKey) -> Result<u32, OracleError> {
        Ok(*self.sender_for(key).borrow())
    }

    fn subscribe(&self, key: &HostKey) -> watch::Receiver<u32> {
        self.sender_for(key).subscribe()
    }
}
