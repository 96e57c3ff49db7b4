//! Environment configuration for the interceptor process.
//!
//! Every setting is an environment variable first and a CLI flag
//! second, so the container spec stays the single source of truth.
//! Durations use the usual `500ms` / `20s` / `5m` syntax.

use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "coldfrontd", about = "HTTP interceptor for scale-to-zero workloads")]
pub struct Serving {
    /// Namespace this interceptor runs in; bare service hostnames are
    /// qualified with it during route lookup.
    #[arg(long, env = "KEDA_HTTP_CURRENT_NAMESPACE")]
    pub current_namespace: String,

    /// Public proxy port.
    #[arg(long, env = "KEDA_HTTP_PROXY_PORT")]
    pub proxy_port: u16,

    /// Admin port the external autoscaler scrapes.
    #[arg(long, env = "KEDA_HTTP_ADMIN_PORT")]
    pub admin_port: u16,

    /// Cadence of the direct readiness re-check while a request waits.
    #[arg(
        long,
        env = "KEDA_HTTP_DEPLOYMENT_CACHE_POLLING_INTERVAL_MS",
        default_value_t = 250
    )]
    pub deployment_cache_polling_interval_ms: u64,

    /// How long the queue holds its last request before reporting zero.
    #[arg(long, env = "KEDA_HTTP_REQUEST_QUEUE_COOLDOWN", default_value = "20s")]
    pub request_queue_cooldown: String,

    /// Cadence of the cooldown enforcer scan.
    #[arg(
        long,
        env = "KEDA_HTTP_REQUEST_QUEUE_COOLDOWN_ENFORCER_INTERVAL",
        default_value = "5s"
    )]
    pub request_queue_cooldown_enforcer_interval: String,

    /// Enable the 1→0 cooldown rule.
    #[arg(
        long,
        env = "KEDA_HTTP_ENABLE_REQUEST_QUEUE_COOLDOWN",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub enable_request_queue_cooldown: bool,

    /// Upstream connection dial timeout.
    #[arg(long, env = "KEDA_HTTP_CONNECT_TIMEOUT", default_value = "500ms")]
    pub connect_timeout: String,

    /// How long upstream response headers may take to arrive.
    #[arg(long, env = "KEDA_RESPONSE_HEADER_TIMEOUT", default_value = "500ms")]
    pub response_header_timeout: String,

    /// Default admission-gate wait deadline, unless a route overrides it.
    #[arg(long, env = "KEDA_CONDITION_WAIT_TIMEOUT", default_value = "20s")]
    pub condition_wait_timeout: String,

    /// Speak HTTP/2 to upstreams instead of HTTP/1.1.
    #[arg(
        long,
        env = "KEDA_HTTP_FORCE_HTTP2",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub force_http2: bool,

    /// Idle upstream connection cap, per host.
    #[arg(long, env = "KEDA_HTTP_MAX_IDLE_CONNS", default_value_t = 100)]
    pub max_idle_conns: usize,

    /// Idle upstream connection TTL.
    #[arg(long, env = "KEDA_HTTP_IDLE_CONN_TIMEOUT", default_value = "90s")]
    pub idle_conn_timeout: String,

    /// Default sentinel-503 retry budget, unless a route overrides it.
    #[arg(long, env = "KEDA_HTTP_SVC_UNAVAILABLE_RETRY_COUNT", default_value_t = 3)]
    pub service_unavailable_retry_count: u32,

    /// Backoff unit for sentinel-503 retries; attempt k sleeps 2·(k+1)
    /// of this.
    #[arg(long, env = "KEDA_HTTP_RETRY_BACKOFF_UNIT", default_value = "1s")]
    pub retry_backoff_unit: String,
}

impl Serving {
    pub fn cooldown(&self) -> anyhow::Result<Duration> {
        duration_setting("KEDA_HTTP_REQUEST_QUEUE_COOLDOWN", &self.request_queue_cooldown)
    }

    pub fn enforcer_interval(&self) -> anyhow::Result<Duration> {
        duration_setting(
            "KEDA_HTTP_REQUEST_QUEUE_COOLDOWN_ENFORCER_INTERVAL",
            &self.request_queue_cooldown_enforcer_interval,
        )
    }

    pub fn connect_timeout(&self) -> anyhow::Result<Duration> {
        duration_setting("KEDA_HTTP_CONNECT_TIMEOUT", &self.connect_timeout)
    }

    pub fn response_header_timeout(&self) -> anyhow::Result<Duration> {
        duration_setting("KEDA_RESPONSE_HEADER_TIMEOUT", &self.response_header_timeout)
    }

    pub fn condition_wait_timeout(&self) -> anyhow::Result<Duration> {
        duration_setting("KEDA_CONDITION_WAIT_TIMEOUT", &self.condition_wait_timeout)
    }

    pub fn idle_conn_timeout(&self) -> anyhow::Result<Duration> {
        duration_setting("KEDA_HTTP_IDLE_CONN_TIMEOUT", &self.idle_conn_timeout)
    }

    pub fn retry_backoff_unit(&self) -> anyhow::Result<Duration> {
        duration_setting("KEDA_HTTP_RETRY_BACKOFF_UNIT", &self.retry_backoff_unit)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.deployment_cache_polling_interval_ms)
    }
}

fn duration_setting(name: &str, value: &str) -> anyhow::Result<Duration> {
    parse_duration(value).ok_or_else(|| anyhow::anyhow!("invalid {name}: {value:?}"))
}

/// Parse a duration string like "500ms", "20s", "5m".
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
