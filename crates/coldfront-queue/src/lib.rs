//! coldfront-queue — per-host request queue accounting.
//!
//! Tracks how many requests are in flight per [`HostKey`] and exposes a
//! point-in-time snapshot to the external autoscaler. The counter is
//! the autoscaler's only input signal, so a configurable cooldown can
//! suppress the 1→0 transition long enough to keep a lightly-used
//! workload from flapping to zero replicas.
//!
//! # Components
//!
//! - **`counter`** — the capability contract plus the [`Counts`] snapshot
//! - **`memory`** — the in-memory implementation and its cooldown enforcer
//! - **`buckets`** — sliding-window request-rate tracking
//! - **`fakes`** — a recording counter for tests of code that takes the
//!   contract

pub mod buckets;
pub mod counter;
pub mod fakes;
pub mod memory;

pub use buckets::RequestBuckets;
pub use counter::{Counter, Counts};
pub use fakes::FakeCounter;
pub use memory::InMemoryCounter;

pub use coldfront_routing::HostKey;
