//! coldfront-gate — cold-start admission for proxied requests.
//!
//! Forwarding a request to a workload with zero ready replicas would
//! only bounce off a dead endpoint, so the gate suspends each request
//! until its target reports at least one ready replica or a deadline
//! fires. Readiness comes from a [`ReadinessOracle`]; the in-process
//! [`ReplicaCache`] implementation is fed by whatever watches the
//! cluster.
//!
//! # Components
//!
//! - **`oracle`** — the readiness contract and the watch-channel cache
//! - **`gate`** — the per-request wait with deadline and re-check

pub mod gate;
pub mod oracle;

pub use gate::{AdmissionGate, WaitError};
pub use oracle::{OracleError, ReadinessOracle, ReplicaCache};

pub use coldfront_routing::HostKey;
