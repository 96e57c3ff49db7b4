//! coldfront-admin — the interceptor's control surface.
//!
//! Serves the queue snapshot the external autoscaler polls, plus the
//! integration endpoints the control plane uses to feed the process:
//! routing records and readiness observations.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/queue` | Per-host concurrency snapshot (autoscaler input) |
//! | GET | `/routes` | List routing records |
//! | POST | `/routes` | Upsert a routing record (creates its queue bucket) |
//! | DELETE | `/routes/{host}` | Remove a record and its queue bucket |
//! | POST | `/workloads` | Ingest a readiness observation |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness |

pub mod handlers;
pub mod metrics;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use coldfront_gate::ReplicaCache;
use coldfront_queue::Counter;
use coldfront_routing::RouteTable;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub counter: Arc<dyn Counter>,
    pub routes: RouteTable,
    pub replicas: Arc<ReplicaCache>,
}

/// Build the admin router.
pub fn build_router(state: AdminState) -> Router {
    Router::new()
        .route("/queue", get(handlers::queue_counts))
        .route("/routes", get(handlers::list_routes).post(handlers::upsert_route))
        .route("/routes/{host}", axum::routing::delete(handlers::remove_route))
        .route("/workloads", post(handlers::observe_workload))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}
