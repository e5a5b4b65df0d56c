//! Upstream forwarding
//!
//! Only requests that passed the auth gate get here. The route table picks
//! the upstream; hop-by-hop headers are stripped in both directions, the
//! method and body are preserved, and the upstream response is streamed back
//! verbatim (including upstream error statuses). Forwarding is never retried.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderValue, Request, StatusCode, header};
use axum::response::Response;
use tracing::{debug, error, instrument};

use crate::metrics;
use crate::pages;
use crate::routes::RouteTable;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Largest request body buffered for forwarding
const MAX_REQUEST_BODY: usize = 10 * 1024 * 1024;

/// Hands an authorized request to whatever serves it.
///
/// The gate depends only on this trait, so tests can observe forwarding
/// without a real upstream.
pub trait Forward: Send + Sync {
    fn forward(
        &self,
        request: Request<Body>,
        request_id: String,
    ) -> Pin<Box<dyn Future<Output = Response> + Send + '_>>;
}

/// Forwards to the upstream selected by the route table
#[derive(Clone)]
pub struct UpstreamForwarder {
    client: reqwest::Client,
    routes: Arc<RouteTable>,
    timeout: Duration,
}

impl UpstreamForwarder {
    pub fn new(client: reqwest::Client, routes: Arc<RouteTable>, timeout: Duration) -> Self {
        Self {
            client,
            routes,
            timeout,
        }
    }

    #[instrument(skip_all, fields(request_id = %request_id))]
    async fn proxy_request(&self, request: Request<Body>, request_id: String) -> Response {
        let started = Instant::now();
        let method = request.method().clone();
        let uri = request.uri().clone();
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

        let Some(route) = self.routes.lookup(uri.path()) else {
            debug!(path = uri.path(), "no upstream route");
            return pages::error_page(
                StatusCode::NOT_FOUND,
                "Not Found",
                "No upstream is configured for this path",
            );
        };
        let upstream_url = route.upstream_url(path_and_query);

        // Collect request headers, stripping hop-by-hop and the inbound Host
        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in request.headers() {
            if !is_hop_by_hop(name.as_str()) && name != header::HOST {
                headers.append(name.clone(), value.clone());
            }
        }
        if let Some(host) = request.headers().get(header::HOST) {
            headers.insert("x-forwarded-host", host.clone());
        }

        let body_bytes = match axum::body::to_bytes(request.into_body(), MAX_REQUEST_BODY).await {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "failed to read request body");
                return pages::error_page(
                    StatusCode::BAD_REQUEST,
                    "Bad Request",
                    "The request body could not be read",
                );
            }
        };

        // Only the wait for response headers is bounded; the body then
        // streams for as long as the upstream keeps sending.
        let send = self
            .client
            .request(method.clone(), &upstream_url)
            .headers(headers)
            .body(body_bytes)
            .send();
        let result = tokio::time::timeout(self.timeout, send).await;

        let response = match result {
            Ok(Ok(upstream_response)) => {
                let status = upstream_response.status();
                let mut response = Response::builder().status(status);
                for (name, value) in upstream_response.headers() {
                    if !is_hop_by_hop(name.as_str()) {
                        response = response.header(name, value);
                    }
                }
                response
                    .body(Body::from_stream(upstream_response.bytes_stream()))
                    .unwrap_or_else(|e| {
                        error!(error = %e, "failed to build upstream response");
                        pages::error_page(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Internal Error",
                            "The upstream response could not be relayed",
                        )
                    })
            }
            Ok(Err(e)) => {
                metrics::record_upstream_error("connection");
                error!(error = %e, upstream = %route.target(), "upstream request failed");
                pages::error_page(
                    StatusCode::BAD_GATEWAY,
                    "Bad Gateway",
                    "The upstream service is unavailable",
                )
            }
            Err(_) => {
                metrics::record_upstream_error("timeout");
                error!(upstream = %route.target(), timeout = ?self.timeout, "upstream timeout");
                pages::error_page(
                    StatusCode::GATEWAY_TIMEOUT,
                    "Gateway Timeout",
                    &format!("The upstream did not respond within {:?}", self.timeout),
                )
            }
        };

        // Duration covers the time to response headers, not the streamed body
        metrics::record_request(
            response.status().as_u16(),
            method.as_str(),
            started.elapsed().as_secs_f64(),
        );
        response
    }
}

impl Forward for UpstreamForwarder {
    fn forward(
        &self,
        request: Request<Body>,
        request_id: String,
    ) -> Pin<Box<dyn Future<Output = Response> + Send + '_>> {
        Box::pin(self.proxy_request(request, request_id))
    }
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Replace any client-supplied value of `name` with `value`, or drop it.
pub fn overwrite_header(headers: &mut axum::http::HeaderMap, name: &'static str, value: Option<&str>) {
    headers.remove(name);
    if let Some(value) = value.and_then(|v| HeaderValue::from_str(v).ok()) {
        headers.insert(name, value);
    }
}
