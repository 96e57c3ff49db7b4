//! coldfrontd — the interceptor daemon.
//!
//! Binds two listeners: the public proxy port, where every request runs
//! the bind → admit → account → forward pipeline, and the admin port,
//! where the autoscaler scrapes queue counts and the control plane
//! feeds routes and readiness observations.
//!
//! # Usage
//!
//! ```text
//! KEDA_HTTP_CURRENT_NAMESPACE=keda \
//! KEDA_HTTP_PROXY_PORT=8080 \
//! KEDA_HTTP_ADMIN_PORT=9090 coldfrontd
//! ```

mod config;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

use coldfront_admin::AdminState;
use coldfront_gate::{AdmissionGate, ReplicaCache};
use coldfront_proxy::{ForwarderConfig, Interceptor, ReverseForwarder};
use coldfront_queue::{Counter, InMemoryCounter};
use coldfront_routing::{HostRewrite, RouteDefaults, RouteTable};

use config::Serving;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,coldfrontd=debug".parse().unwrap()),
        )
        .init();

    let config = Serving::parse();
    run(config).await
}

async fn run(config: Serving) -> anyhow::Result<()> {
    info!(namespace = %config.current_namespace, "interceptor starting");

    // ── Shared state ───────────────────────────────────────────

    let counter = Arc::new(InMemoryCounter::new(
        config.cooldown()?,
        config.enable_request_queue_cooldown,
    ));
    let replicas = Arc::new(ReplicaCache::new());
    let routes = RouteTable::new(
        HostRewrite {
            strip_cluster_suffix: true,
            default_namespace: Some(config.current_namespace.clone()),
        },
        RouteDefaults {
            deadline: config.condition_wait_timeout()?,
            retry_budget: config.service_unavailable_retry_count,
        },
    );

    // ── Request pipeline ───────────────────────────────────────

    let gate = AdmissionGate::new(replicas.clone()).with_recheck_interval(config.polling_interval());
    let forwarder = ReverseForwarder::new(ForwarderConfig {
        connect_timeout: config.connect_timeout()?,
        response_header_timeout: config.response_header_timeout()?,
        idle_conn_timeout: config.idle_conn_timeout()?,
        max_idle_conns_per_host: config.max_idle_conns,
        force_http2: config.force_http2,
        retry_backoff_unit: config.retry_backoff_unit()?,
    });
    let interceptor = Arc::new(Interceptor::new(
        routes.clone(),
        counter.clone() as Arc<dyn Counter>,
        gate,
        forwarder,
    ));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let enforcer_handle = if config.enable_request_queue_cooldown {
        let counter = counter.clone();
        let interval = config.enforcer_interval()?;
        let enforcer_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            counter.run_enforcer(interval, enforcer_shutdown).await;
        }))
    } else {
        None
    };

    // ── Admin server ───────────────────────────────────────────

    let admin_router = coldfront_admin::build_router(AdminState {
        counter: counter.clone(),
        routes: routes.clone(),
        replicas: replicas.clone(),
    });
    let admin_addr = SocketAddr::from(([0, 0, 0, 0], config.admin_port));
    let admin_listener = TcpListener::bind(admin_addr)
        .await
        .context("failed to bind admin port")?;
    info!(%admin_addr, "admin server listening");

    let mut admin_shutdown = shutdown_rx.clone();
    let admin_handle = tokio::spawn(async move {
        axum::serve(admin_listener, admin_router)
            .with_graceful_shutdown(async move {
                let _ = admin_shutdown.changed().await;
            })
            .await
    });

    // ── Proxy server ───────────────────────────────────────────

    let proxy_addr = SocketAddr::from(([0, 0, 0, 0], config.proxy_port));
    let proxy_listener = TcpListener::bind(proxy_addr)
        .await
        .context("failed to bind proxy port")?;
    info!(%proxy_addr, "proxy server listening");

    let proxy_handle = tokio::spawn(serve_proxy(
        proxy_listener,
        interceptor,
        shutdown_rx.clone(),
    ));

    // ── Graceful shutdown on Ctrl-C ────────────────────────────

    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = proxy_handle.await;
    let _ = admin_handle.await;
    if let Some(handle) = enforcer_handle {
        let _ = handle.await;
    }

    info!("interceptor stopped");
    Ok(())
}

/// Accept loop for the proxy port. Each connection gets its own task;
/// HTTP/1.1 and HTTP/2 are negotiated per connection.
async fn serve_proxy(
    listener: TcpListener,
    interceptor: Arc<Interceptor>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("accept failed")?;
                let interceptor = interceptor.clone();

                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let svc = service_fn(move |req| {
                        let interceptor = interceptor.clone();
                        async move {
                            Ok::<_, Infallible>(interceptor.handle(req, peer).await)
                        }
                    });

                    if let Err(e) = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, svc)
                        .await
                    {
                        debug!(%peer, error = %e, "connection error");
                    }
                });
            }
            _ = shutdown.changed() => {
                info!("proxy server shutting down");
                break;
            }
        }
    }

    Ok(())
}
