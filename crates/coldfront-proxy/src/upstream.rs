//! Single-host reverse proxy with bounded retry on upstream resets.
//!
//! The forwarder owns one pooled HTTP client for the process. Requests
//! are rewritten to `http://{service}.{namespace}[:port]` and streamed
//! back unchanged, with one exception: a 503 whose body starts with the
//! reset-before-headers prefix is retried with backoff on the same
//! client, because it signals a backend that was still coming up when
//! the connection landed. Everything else — including transport
//! failures — is terminal.

use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, HOST};
use http::uri::Uri;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tracing::{error, warn};

use coldfront_routing::Route;

use crate::body::peek_body;

/// Body prefix an ingress emits when the backend connection was reset
/// before response headers arrived — the signature of a cold start.
pub const UPSTREAM_RESET_PREFIX: &[u8] =
    b"upstream connect error or disconnect/reset before headers";

/// Bound on the 503-body read used for the reset-prefix check.
const PEEK_LIMIT: usize = 64 * 1024;

/// Hop-by-hop headers that must not be forwarded upstream. In
/// particular `Transfer-Encoding` has to go: the upstream request body
/// is sent fully buffered with fixed-length framing, so forwarding the
/// inbound framing header would misdescribe the bytes on the wire.
const HOP_BY_HOP: [HeaderName; 9] = [
    http::header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    http::header::PROXY_AUTHENTICATE,
    http::header::PROXY_AUTHORIZATION,
    http::header::TE,
    http::header::TRAILER,
    http::header::TRANSFER_ENCODING,
    http::header::UPGRADE,
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Response body type the proxy hands back to the server loop.
pub type ProxyBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// A plain-text response with the given status.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
    let mut response = Response::new(
        Full::new(body.into())
            .map_err(|never| match never {})
            .boxed(),
    );
    *response.status_mut() = status;
    response
}

/// Upstream failures. All of them surface to the client as `502`.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("upstream response headers timed out")]
    HeaderTimeout,

    #[error("invalid upstream url: {0}")]
    Url(#[from] http::Error),
}

/// Process-wide transport settings for the forwarder.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Upstream connection dial timeout.
    pub connect_timeout: Duration,
    /// How long upstream response headers may take to arrive.
    pub response_header_timeout: Duration,
    /// Idle pooled connection TTL.
    pub idle_conn_timeout: Duration,
    /// Idle pooled connection cap, per upstream host.
    pub max_idle_conns_per_host: usize,
    /// Speak HTTP/2 to upstreams instead of HTTP/1.1.
    pub force_http2: bool,
    /// Retry attempt `k` (0-indexed) sleeps `2·(k+1)` of this unit.
    pub retry_backoff_unit: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            response_header_timeout: Duration::from_millis(500),
            idle_conn_timeout: Duration::from_secs(90),
            max_idle_conns_per_host: 100,
            force_http2: false,
            retry_backoff_unit: Duration::from_secs(1),
        }
    }
}

/// The single-upstream reverse proxy stage.
///
/// Construct once per process; the pooled client inside is cheap to
/// share and thread-safe.
pub struct ReverseForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    config: ForwarderConfig,
}

impl ReverseForwarder {
    pub fn new(config: ForwarderConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.connect_timeout));
        connector.set_nodelay(true);

        let mut builder = Client::builder(TokioExecutor::new());
        builder
            .pool_idle_timeout(config.idle_conn_timeout)
            .pool_max_idle_per_host(config.max_idle_conns_per_host);
        if config.force_http2 {
            builder.http2_only(true);
        }

        Self {
            client: builder.build(connector),
            config,
        }
    }

    /// Forward one request to the route's upstream and return the
    /// response to stream back. The inbound body must already be
    /// buffered so the retry path can replay it.
    pub async fn forward(
        &self,
        parts: http::request::Parts,
        body: Bytes,
        route: &Route,
        client_ip: Option<IpAddr>,
    ) -> Response<ProxyBody> {
        let template = match upstream_request(&parts, body, route, client_ip) {
            Ok(template) => template,
            Err(e) => {
                error!(target = %route.host_key, error = %e, "building upstream request failed");
                return text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("error on backend ({e})"),
                );
            }
        };

        let mut response = match self.send(clone_request(&template)).await {
            Ok(response) => response,
            Err(e) => return self.bad_gateway(route, e),
        };

        let mut attempt: u32 = 0;
        loop {
            if response.status() != StatusCode::SERVICE_UNAVAILABLE {
                return response.map(BodyExt::boxed);
            }

            let (response_parts, response_body) = response.into_parts();
            let (prefix, replay) = match peek_body(response_body, PEEK_LIMIT).await {
                Ok(peeked) => peeked,
                Err(e) => {
                    error!(target = %route.host_key, error = %e, "reading upstream 503 body failed");
                    return text_response(
                        StatusCode::BAD_GATEWAY,
                        format!("error on backend ({e})"),
                    );
                }
            };

            let is_reset = prefix.starts_with(UPSTREAM_RESET_PREFIX);
            if !is_reset || attempt >= route.retry_budget {
                if is_reset {
                    warn!(
                        target = %route.host_key,
                        attempts = attempt,
                        "retry budget exhausted, returning last response"
                    );
                }
                return Response::from_parts(response_parts, replay.boxed());
            }

            let backoff = self.config.retry_backoff_unit * (2 * (attempt + 1));
            warn!(
                target = %route.host_key,
                attempt = attempt + 1,
                backoff_ms = backoff.as_millis() as u64,
                "upstream reset before headers, retrying"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;

            response = match self.send(clone_request(&template)).await {
                Ok(response) => response,
                Err(e) => return self.bad_gateway(route, e),
            };
        }
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<Response<Incoming>, ForwardError> {
        match tokio::time::timeout(
            self.config.response_header_timeout,
            self.client.request(request),
        )
        .await
        {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ForwardError::Transport(e)),
            Err(_) => Err(ForwardError::HeaderTimeout),
        }
    }

    fn bad_gateway(&self, route: &Route, e: ForwardError) -> Response<ProxyBody> {
        error!(target = %route.host_key, error = %e, "forwarding failed");
        text_response(StatusCode::BAD_GATEWAY, format!("error on backend ({e})"))
    }
}

/// Build the rewritten upstream request: scheme, host, and port from the
/// route; path and query from the inbound request; the client-supplied
/// `X-Forwarded-For` replaced by one the proxy vouches for.
fn upstream_request(
    parts: &http::request::Parts,
    body: Bytes,
    route: &Route,
    client_ip: Option<IpAddr>,
) -> Result<Request<Full<Bytes>>, ForwardError> {
    let authority = route.upstream_authority();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = Uri::builder()
        .scheme("http")
        .authority(authority.as_str())
        .path_and_query(path_and_query)
        .build()?;

    let mut request = Request::new(Full::new(body));
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = uri;
    *request.headers_mut() = parts.headers.clone();

    let headers = request.headers_mut();
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(X_FORWARDED_FOR);
    if let Some(ip) = client_ip {
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_str(&ip.to_string()).map_err(http::Error::from)?,
        );
    }
    headers.insert(
        HOST,
        HeaderValue::from_str(&authority).map_err(http::Error::from)?,
    );

    Ok(request)
}

/// Requests are not `Clone`; rebuild one from the buffered template so
/// every retry replays the identical request.
fn clone_request(template: &Request<Full<Bytes>>) -> Request<Full<Bytes>> {
    let mut request = Request::new(template.body().clone());
    *request.method_mut() = template.method().clone();
    *request.uri_mut() = template.uri().clone();
    *request.headers_mut() = template.headers().clone();
    request
}
