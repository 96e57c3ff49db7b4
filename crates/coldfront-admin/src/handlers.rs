//! Admin route handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::info;

use coldfront_queue::{Counter, Counts};
use coldfront_routing::{HostKey, RoutingRecord};

use crate::AdminState;

/// GET /queue — the snapshot the autoscaler scrapes.
pub async fn queue_counts(State(state): State<AdminState>) -> Json<Counts> {
    Json(state.counter.current())
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "OK"
}

/// GET /routes
pub async fn list_routes(State(state): State<AdminState>) -> Json<Vec<RoutingRecord>> {
    Json(state.routes.list())
}

/// POST /routes
///
/// Upserting a record also creates its queue bucket, so the counter is
/// ready before the first request arrives.
pub async fn upsert_route(
    State(state): State<AdminState>,
    Json(record): Json<RoutingRecord>,
) -> impl IntoResponse {
    let key = record.host_key();
    state.counter.ensure(&key);
    let replaced = state.routes.upsert(record);
    info!(%key, replaced = replaced.is_some(), "route upserted via admin");
    if replaced.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    }
}

/// DELETE /routes/{host}
///
/// Removing the owning route is the only thing that destroys a queue
/// bucket; waiters on the workload see their readiness stream close.
pub async fn remove_route(
    State(state): State<AdminState>,
    Path(host): Path<String>,
) -> StatusCode {
    match state.routes.remove(&host) {
        Some(record) => {
            let key = record.host_key();
            state.counter.remove(&key);
            state.replicas.forget(&key);
            info!(%key, host = %host, "route removed via admin");
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

/// A readiness observation from whatever watches the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessObservation {
    pub namespace: String,
    pub service: String,
    pub ready_replicas: u32,
}

/// POST /workloads
pub async fn observe_workload(
    State(state): State<AdminState>,
    Json(observation): Json<ReadinessObservation>,
) -> StatusCode {
    let key = HostKey::new(&observation.namespace, &observation.service);
    state.replicas.set(&key, observation.ready_replicas);
    StatusCode::NO_CONTENT
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<AdminState>) -> impl IntoResponse {
    let body = crate::metrics::render_prometheus(&state.counter.current(), &state.counter.rates());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
