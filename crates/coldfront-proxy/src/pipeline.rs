//! The per-request pipeline: bind → admit → account → forward.
//!
//! Accounting is the load-bearing invariant here: once a request has
//! been counted in, exactly one decrement (or one cooldown
//! postponement) must follow no matter how the request ends. The
//! decrement rides an RAII guard attached to the response body, so it
//! fires when the response finishes streaming, when an error path
//! returns early, and when the client disconnects and the future is
//! dropped.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::header::HeaderValue;
use http::{Request, Response, StatusCode};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use tracing::{debug, error, info};

use coldfront_gate::AdmissionGate;
use coldfront_queue::Counter;
use coldfront_routing::{HostKey, RouteTable, RoutingError};

use crate::upstream::{ProxyBody, ReverseForwarder, text_response};

/// Response header reporting whether the request had to wait for its
/// target to scale from zero.
pub const COLD_START_HEADER: &str = "x-keda-http-cold-start";

/// The composed request pipeline. One per process, shared across
/// connections.
pub struct Interceptor {
    routes: RouteTable,
    counter: Arc<dyn Counter>,
    gate: AdmissionGate,
    forwarder: ReverseForwarder,
}

impl Interceptor {
    pub fn new(
        routes: RouteTable,
        counter: Arc<dyn Counter>,
        gate: AdmissionGate,
        forwarder: ReverseForwarder,
    ) -> Self {
        Self {
            routes,
            counter,
            gate,
            forwarder,
        }
    }

    /// Handle one inbound request end to end.
    pub async fn handle<B>(&self, req: Request<B>, peer: SocketAddr) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes>,
        B::Error: std::fmt::Display,
    {
        let host = host_of(&req);
        let route = match self.routes.bind(&host) {
            Ok(route) => route,
            Err(e @ RoutingError::MissingHost) => {
                info!(error = %e, "not forwarding request");
                return text_response(
                    StatusCode::BAD_REQUEST,
                    "Host not found, not forwarding request",
                );
            }
            Err(e @ RoutingError::NoRoute(_)) => {
                info!(error = %e, "not forwarding request");
                return text_response(StatusCode::NOT_FOUND, e.to_string());
            }
        };
        debug!(host = %host, target = %route.host_key, "request bound");

        let cold_start = match self.gate.wait_ready(&route.host_key, route.deadline).await {
            Ok(cold_start) => cold_start,
            Err(e) => {
                error!(target = %route.host_key, error = %e, "admission failed, not forwarding request");
                return text_response(StatusCode::BAD_GATEWAY, format!("error on backend ({e})"));
            }
        };

        self.counter.ensure(&route.host_key);
        self.counter.increment(&route.host_key, 1);
        let guard = InflightGuard {
            counter: self.counter.clone(),
            key: route.host_key.clone(),
        };

        // Buffer the inbound body so the forwarder's retry path can
        // replay it; a client that fails mid-upload is counted out by
        // the guard on the early return.
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                error!(target = %route.host_key, error = %e, "reading request body failed");
                return text_response(StatusCode::BAD_REQUEST, "could not read request body");
            }
        };

        let mut response = self
            .forwarder
            .forward(parts, body, &route, Some(peer.ip()))
            .await;

        let flag = if cold_start {
            HeaderValue::from_static("true")
        } else {
            HeaderValue::from_static("false")
        };
        response.headers_mut().insert(COLD_START_HEADER, flag);

        response.map(|inner| {
            CountedBody {
                inner,
                _guard: guard,
            }
            .boxed()
        })
    }
}

/// Host the request was addressed to: the `Host` header for HTTP/1.1,
/// the URI authority for HTTP/2.
fn host_of<B>(req: &Request<B>) -> String {
    if let Some(value) = req.headers().get(http::header::HOST) {
        if let Ok(host) = value.to_str() {
            return host.to_string();
        }
    }
    req.uri()
        .authority()
        .map(|authority| authority.to_string())
        .unwrap_or_default()
}

/// Counts a request out of the queue when dropped.
struct InflightGuard {
    counter: Arc<dyn Counter>,
    key: HostKey,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.counter.decrement(&self.key, 1);
    }
}

/// Response body wrapper that keeps the in-flight guard alive until the
/// body has been fully streamed (or abandoned).
struct CountedBody {
    inner: ProxyBody,
    _guard: InflightGuard,
}

impl Body for CountedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, hyper::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use http_body_util::Full;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;

    use coldfront_gate::ReplicaCache;
    use coldfront_queue::FakeCounter;
    use coldfront_routing::{HostRewrite, RouteDefaults, RoutingRecord};

    use crate::upstream::{ForwarderConfig, UPSTREAM_RESET_PREFIX};

    const PEER: &str = "10.1.1.1:55555";

    /// Upstream that answers 200 with a fixed body after an optional
    /// delay.
    async fn spawn_upstream(body: &'static str, delay: Duration) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let svc = service_fn(move |_req| async move {
                        tokio::time::sleep(delay).await;
                        Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from_static(
                            body.as_bytes(),
                        ))))
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await;
                });
            }
        });

        addr
    }

    struct Fixture {
        interceptor: Interceptor,
        counter: Arc<FakeCounter>,
        replicas: Arc<ReplicaCache>,
        key: HostKey,
    }

    fn fixture(upstream: SocketAddr, deadline: &str) -> Fixture {
        let routes = RouteTable::new(HostRewrite::default(), RouteDefaults::default());
        routes.upsert(RoutingRecord {
            host: "svc-a".to_string(),
            namespace: String::new(),
            service: upstream.ip().to_string(),
            port: upstream.port(),
            deadline: Some(deadline.to_string()),
            cold_start_retry_budget: Some(0),
        });
        let key = HostKey::new("", &upstream.ip().to_string());

        let counter = Arc::new(FakeCounter::new());
        let replicas = Arc::new(ReplicaCache::new());
        let gate = AdmissionGate::new(replicas.clone())
            .with_recheck_interval(Duration::from_millis(25));
        let forwarder = ReverseForwarder::new(ForwarderConfig {
            response_header_timeout: Duration::from_secs(2),
            ..ForwarderConfig::default()
        });

        Fixture {
            interceptor: Interceptor::new(routes, counter.clone(), gate, forwarder),
            counter,
            replicas,
            key,
        }
    }

    fn request(host: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .uri("/x")
            .header("host", host)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn drain(response: Response<ProxyBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn warm_forward_counts_in_and_out() {
        let upstream = spawn_upstream("warm hello", Duration::ZERO).await;
        let f = fixture(upstream, "1s");
        f.replicas.set(&f.key, 1);

        let response = f
            .interceptor
            .handle(request("svc-a"), PEER.parse().unwrap())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(COLD_START_HEADER).unwrap(),
            "false"
        );
        assert_eq!(drain(response).await, "warm hello");

        // Exactly one increment and one decrement for the key.
        assert_eq!(f.counter.events(), vec![(f.key.clone(), 1), (f.key.clone(), -1)]);
        assert_eq!(f.counter.count(&f.key), 0);
    }

    #[tokio::test]
    async fn cold_start_waits_and_reports_it() {
        let upstream = spawn_upstream("cold hello", Duration::ZERO).await;
        let f = fixture(upstream, "5s");
        f.replicas.set(&f.key, 0);

        let waker = {
            let replicas = f.replicas.clone();
            let key = f.key.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(120)).await;
                replicas.set(&key, 1);
            })
        };

        let started = Instant::now();
        let response = f
            .interceptor
            .handle(request("svc-a"), PEER.parse().unwrap())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(COLD_START_HEADER).unwrap(), "true");
        assert!(started.elapsed() >= Duration::from_millis(100));
        waker.await.unwrap();
    }

    #[tokio::test]
    async fn admission_timeout_is_502_and_never_counted() {
        let upstream = spawn_upstream("unreachable", Duration::ZERO).await;
        let f = fixture(upstream, "100ms");
        f.replicas.set(&f.key, 0);

        let response = f
            .interceptor
            .handle(request("svc-a"), PEER.parse().unwrap())
            .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(drain(response).await.contains("error on backend"));
        assert!(f.counter.events().is_empty());
    }

    #[tokio::test]
    async fn unknown_host_is_404() {
        let upstream = spawn_upstream("whatever", Duration::ZERO).await;
        let f = fixture(upstream, "1s");

        let response = f
            .interceptor
            .handle(request("not-routed"), PEER.parse().unwrap())
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(f.counter.events().is_empty());
    }

    #[tokio::test]
    async fn missing_host_is_400() {
        let upstream = spawn_upstream("whatever", Duration::ZERO).await;
        let f = fixture(upstream, "1s");

        let req = Request::builder()
            .uri("/x")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = f.interceptor.handle(req, PEER.parse().unwrap()).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn decrement_waits_for_the_body_to_finish_streaming() {
        let upstream = spawn_upstream("slow body", Duration::from_millis(150)).await;
        let f = fixture(upstream, "1s");
        f.replicas.set(&f.key, 1);

        let handled = f
            .interceptor
            .handle(request("svc-a"), PEER.parse().unwrap());
        let in_flight = {
            let counter = f.counter.clone();
            let key = f.key.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(75)).await;
                counter.count(&key)
            })
        };

        let response = handled.await;
        assert_eq!(drain(response).await, "slow body");

        // While the upstream was stalling, the request was counted in.
        assert_eq!(in_flight.await.unwrap(), 1);
        assert_eq!(f.counter.count(&f.key), 0);
    }

    #[tokio::test]
    async fn concurrent_requests_accumulate_in_the_queue() {
        let upstream = spawn_upstream("ok", Duration::from_millis(100)).await;
        let f = fixture(upstream, "1s");
        f.replicas.set(&f.key, 1);

        let interceptor = Arc::new(f.interceptor);
        let observed_peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let interceptor = interceptor.clone();
            handles.push(tokio::spawn(async move {
                let response = interceptor
                    .handle(request("svc-a"), PEER.parse().unwrap())
                    .await;
                drain(response).await
            }));
        }

        let peak_probe = {
            let counter = f.counter.clone();
            let key = f.key.clone();
            let observed_peak = observed_peak.clone();
            tokio::spawn(async move {
                for _ in 0..10 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    observed_peak.fetch_max(counter.count(&key), Ordering::SeqCst);
                }
            })
        };

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "ok");
        }
        peak_probe.await.unwrap();

        assert!(observed_peak.load(Ordering::SeqCst) >= 2);
        assert_eq!(f.counter.count(&f.key), 0);
    }
}
