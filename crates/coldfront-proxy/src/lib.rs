//! coldfront-proxy — the interceptor's forwarding data plane.
//!
//! Every inbound request runs one pipeline: bind a route, wait for the
//! target to have a ready replica, account it in the queue, forward it
//! upstream, and release the accounting once the response has fully
//! streamed. The forwarder retries exactly one class of upstream
//! failure — a 503 whose body says the connection was reset before
//! headers — because that is what a cold-started backend looks like
//! from behind an ingress, and clients should not see it as an error.
//!
//! # Components
//!
//! - **`body`** — bounded inspect-then-forward body buffering
//! - **`upstream`** — the single-host reverse proxy with sentinel retry
//! - **`pipeline`** — the per-request composition of all stages

pub mod body;
pub mod pipeline;
pub mod upstream;

pub use pipeline::{COLD_START_HEADER, Interceptor};
pub use upstream::{
    ForwarderConfig, ProxyBody, ReverseForwarder, UPSTREAM_RESET_PREFIX, text_response,
};
