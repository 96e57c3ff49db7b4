//! coldfront-routing — virtual-host routing for the interceptor.
//!
//! Maps the `Host` header of an inbound request to the workload that
//! should receive it. The route table is the shared vocabulary of the
//! interceptor: every other subsystem keys its state on the [`HostKey`]
//! derived here.
//!
//! # Components
//!
//! - **`key`** — canonical per-workload queue-bucket identifier
//! - **`table`** — routing records, host rewrite policy, and per-request
//!   route resolution

pub mod key;
pub mod table;

pub use key::HostKey;
pub use table::{HostRewrite, Route, RouteDefaults, RouteTable, RoutingError, RoutingRecord};
