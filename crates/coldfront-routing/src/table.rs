//! Route table — resolves inbound `Host` headers to target workloads.
//!
//! The table maps exact hostnames to routing records. Resolution strips
//! any `:port` from the header (the port is preserved for forwarding),
//! looks the bare host up, and on a miss applies the configured rewrite
//! policy before retrying.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::key::HostKey;

/// Suffix Kubernetes appends to in-cluster service hostnames.
const CLUSTER_SUFFIX: &str = ".svc.cluster.local";

/// A routing record, as fed to the interceptor by the control plane.
///
/// `deadline` and `cold_start_retry_budget` are optional per-route
/// overrides of the process-wide defaults; `deadline` uses the usual
/// duration syntax (`"500ms"`, `"30s"`, `"2m"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRecord {
    /// Hostname this record matches, without port.
    pub host: String,
    pub namespace: String,
    pub service: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cold_start_retry_budget: Option<u32>,
}

impl RoutingRecord {
    /// Queue-bucket key for this record's target.
    pub fn host_key(&self) -> HostKey {
        HostKey::new(&self.namespace, &self.service)
    }
}

/// The route resolved for a single request. Immutable once bound.
#[derive(Debug, Clone)]
pub struct Route {
    pub host_key: HostKey,
    pub namespace: String,
    pub service: String,
    pub port: u16,
    /// How long the admission gate may hold this request.
    pub deadline: Duration,
    /// Sentinel-503 retry budget for this request.
    pub retry_budget: u32,
    /// Explicit port from the inbound `Host` header, if any.
    pub request_port: Option<u16>,
}

impl Route {
    /// Authority of the upstream URL. An explicit port on the inbound
    /// `Host` wins over the route's configured port.
    ///
    /// A route with an empty namespace targets `service:port` verbatim,
    /// for workloads outside the cluster DNS convention.
    pub fn upstream_authority(&self) -> String {
        let port = self.request_port.unwrap_or(self.port);
        if self.namespace.is_empty() {
            format!("{}:{}", self.service, port)
        } else {
            format!("{}.{}:{}", self.service, self.namespace, port)
        }
    }
}

/// Process-wide fallbacks for the per-route overrides.
#[derive(Debug, Clone, Copy)]
pub struct RouteDefaults {
    pub deadline: Duration,
    pub retry_budget: u32,
}

impl Default for RouteDefaults {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(20),
            retry_budget: 3,
        }
    }
}

/// Host-to-record rewrite policy applied when the exact lookup misses.
#[derive(Debug, Clone, Default)]
pub struct HostRewrite {
    /// Strip a trailing `.svc.cluster.local` and retry.
    pub strip_cluster_suffix: bool,
    /// Qualify a bare service name (no dots) with this namespace.
    pub default_namespace: Option<String>,
}

/// Routing failures, surfaced to the client as 4xx.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("request has no usable Host header")]
    MissingHost,

    #[error("no route configured for host {0:?}")]
    NoRoute(String),
}

/// Concurrency-safe table of routing records.
///
/// Cloning is cheap and shares the underlying table.
#[derive(Clone)]
pub struct RouteTable {
    records: Arc<RwLock<HashMap<String, RoutingRecord>>>,
    rewrite: HostRewrite,
    defaults: RouteDefaults,
}

impl RouteTable {
    pub fn new(rewrite: HostRewrite, defaults: RouteDefaults) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            rewrite,
            defaults,
        }
    }

    /// Insert or replace the record for its host. Returns the previous
    /// record if one existed.
    pub fn upsert(&self, record: RoutingRecord) -> Option<RoutingRecord> {
        let mut records = self.records.write().expect("route lock");
        debug!(host = %record.host, target = %record.host_key(), "route upserted");
        records.insert(record.host.clone(), record)
    }

    /// Remove the record for a host. Returns the removed record.
    pub fn remove(&self, host: &str) -> Option<RoutingRecord> {
        let mut records = self.records.write().expect("route lock");
        records.remove(host)
    }

    /// All records, in no particular order.
    pub fn list(&self) -> Vec<RoutingRecord> {
        let records = self.records.read().expect("route lock");
        records.values().cloned().collect()
    }

    /// Resolve an inbound `Host` header to a route.
    ///
    /// The port, if present, is stripped for lookup and carried on the
    /// returned route so the forwarder can target `service.namespace:port`.
    pub fn bind(&self, host_header: &str) -> Result<Route, RoutingError> {
        if host_header.is_empty() {
            return Err(RoutingError::MissingHost);
        }
        let (host, request_port) = split_host_port(host_header);
        if host.is_empty() {
            return Err(RoutingError::MissingHost);
        }

        let records = self.records.read().expect("route lock");
        let record = records
            .get(host)
            .or_else(|| {
                let rewritten = self.rewrite_host(host)?;
                records.get(&rewritten)
            })
            .ok_or_else(|| RoutingError::NoRoute(host.to_string()))?;

        Ok(Route {
            host_key: record.host_key(),
            namespace: record.namespace.clone(),
            service: record.service.clone(),
            port: record.port,
            deadline: record
                .deadline
                .as_deref()
                .and_then(parse_duration)
                .unwrap_or(self.defaults.deadline),
            retry_budget: record
                .cold_start_retry_budget
                .unwrap_or(self.defaults.retry_budget),
            request_port,
        })
    }

    /// Apply the rewrite policy, returning a new lookup key if it
    /// produced one.
    fn rewrite_host(&self, host: &str) -> Option<String> {
        if self.rewrite.strip_cluster_suffix {
            if let Some(stripped) = host.strip_suffix(CLUSTER_SUFFIX) {
                return Some(stripped.to_string());
            }
        }
        if !host.contains('.') {
            if let Some(ns) = &self.rewrite.default_namespace {
                return Some(format!("{host}.{ns}"));
            }
        }
        None
    }
}

/// Split `host[:port]`, keeping the host when the port doesn't parse.
fn split_host_port(host_header: &str) -> (&str, Option<u16>) {
    match host_header.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host, Some(port)),
            Err(_) => (host_header, None),
        },
        None => (host_header, None),
    }
}

/// Parse a duration string like "500ms", "20s", "2m".
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
