//! The per-request admission wait.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use coldfront_routing::HostKey;

use crate::oracle::{OracleError, ReadinessOracle};

/// Why an admission wait gave up.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out waiting for a ready replica of {0}")]
    Timeout(HostKey),

    #[error("readiness oracle failed: {0}")]
    Unavailable(#[from] OracleError),
}

/// Holds each request until its target workload has a ready replica.
pub struct AdmissionGate {
    oracle: Arc<dyn ReadinessOracle>,
    recheck_interval: Duration,
}

impl AdmissionGate {
    pub fn new(oracle: Arc<dyn ReadinessOracle>) -> Self {
        Self {
            oracle,
            recheck_interval: Duration::from_millis(250),
        }
    }

    /// Cadence of the direct oracle re-check that backs up the change
    /// subscription while waiting.
    pub fn with_recheck_interval(mut self, interval: Duration) -> Self {
        self.recheck_interval = interval;
        self
    }

    /// Wait until the workload has at least one ready replica.
    ///
    /// Returns whether the request cold-started: `false` when the
    /// target was already ready on entry, `true` when the gate had to
    /// wait. Gives up with [`WaitError::Timeout`] once `deadline`
    /// elapses. Dropping the returned future releases the readiness
    /// subscription.
    pub async fn wait_ready(&self, key: &HostKey, deadline: Duration) -> Result<bool, WaitError> {
        if self.oracle.ready_replicas(key)? >= 1 {
            return Ok(false);
        }

        debug!(%key, deadline_ms = deadline.as_millis() as u64, "target cold, waiting for readiness");
        let mut rx = self.oracle.subscribe(key);
        // The count may have flipped between the read and the subscribe.
        if *rx.borrow_and_update() >= 1 {
            return Ok(true);
        }

        let wait = async {
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return Err(WaitError::Unavailable(OracleError::Closed(key.clone())));
                        }
                        if *rx.borrow_and_update() >= 1 {
                            return Ok(());
                        }
                    }
                    _ = tokio::time::sleep(self.recheck_interval) => {
                        // Guards against a watcher that mutates state
                        // without signalling the subscription.
                        if self.oracle.ready_replicas(key)? >= 1 {
                            return Ok(());
                        }
                    }
                }
            }
        };

        match tokio::time::timeout(deadline, wait).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(WaitError::Timeout(key.clone())),
        }
    }
}
