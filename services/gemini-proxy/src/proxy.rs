//! HTTP proxy logic
//!
//! Receives inbound requests, strips hop-by-hop headers, acquires an API key
//! from the pool, injects it as `x-goog-api-key`, and forwards to the Gemini
//! upstream. Quota-class upstream responses quarantine the key and fail over
//! to the next one; everything else is returned to the client verbatim.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use common::mask;
use keypool::{ErrorClass, KeyPool, classify_status};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, instrument, warn};

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

/// Header carrying the API key on Gemini requests
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    pub upstream_url: String,
    pub timeout: Duration,
    pub pool: Arc<KeyPool>,
}

/// JSON error response: {"error":{"type":"proxy_error","message":"...","request_id":"req_..."}}
fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "proxy_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// 503 response for a fully quarantined (or empty) pool, carrying a masked
/// pool snapshot so operators can see the state from the error alone.
fn exhausted_response(request_id: &str, status: keypool::PoolStatus) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "pool_exhausted",
            "message": "no API key currently available",
            "request_id": request_id,
            "pool": status,
        }
    });
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Proxy an inbound request to upstream with key injection and failover.
///
/// Failover strategy: a quota-class response (per `keypool::quota`) reports
/// the key as failed and retries with the next key, for at most pool-size
/// attempts. Timeouts and transport errors do not quarantine a key — they say
/// nothing about the key itself.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    // Build the upstream URL by appending the request path and query. Gemini
    // accepts the API key as a `key` query parameter too, so that parameter
    // is dropped for the same reason the header is stripped below.
    let upstream_url = if let Some(pq) = uri.path_and_query() {
        let base = state.upstream_url.trim_end_matches('/');
        match pq.query().and_then(strip_key_param) {
            Some(query) => format!("{base}{}?{query}", pq.path()),
            None => format!("{base}{}", pq.path()),
        }
    } else {
        state.upstream_url.clone()
    };

    // Collect request headers, stripping hop-by-hop and any client-supplied
    // API key — the pool decides which key each attempt uses.
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in request.headers() {
        if !is_hop_by_hop(name.as_str()) && !name.as_str().eq_ignore_ascii_case(API_KEY_HEADER) {
            headers.insert(name.clone(), value.clone());
        }
    }

    // Read the request body
    let body_bytes = match axum::body::to_bytes(request.into_body(), 10 * 1024 * 1024).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {e}"),
                &request_id,
            );
        }
    };

    // Failover loop: one attempt per key at most
    let max_attempts = state.pool.status().total.max(1);

    for attempt in 0..max_attempts {
        let Some(key) = state.pool.acquire() else {
            break;
        };

        let key_value = match HeaderValue::from_str(&key) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = %mask(&key), error = %e, "key is not a valid header value, skipping attempt");
                continue;
            }
        };
        headers.insert(API_KEY_HEADER, key_value);

        let req = state
            .client
            .request(method.clone(), &upstream_url)
            .headers(headers.clone())
            .timeout(state.timeout)
            .body(body_bytes.clone());

        match req.send().await {
            Ok(upstream_response) => {
                let status = upstream_response.status();
                let resp_headers = upstream_response.headers().clone();

                let resp_body = match upstream_response.bytes().await {
                    Ok(b) => b,
                    Err(e) => {
                        error!(error = %e, "failed to read upstream response body");
                        return error_response(
                            StatusCode::BAD_GATEWAY,
                            &format!("upstream response read error: {e}"),
                            &request_id,
                        );
                    }
                };

                let class =
                    classify_status(status.as_u16(), &String::from_utf8_lossy(&resp_body));
                if class == ErrorClass::QuotaExceeded {
                    warn!(
                        key = %mask(&key),
                        status = status.as_u16(),
                        attempt,
                        "quota-class upstream response, failing over to next key"
                    );
                    crate::metrics::record_key_failure();
                    state.pool.report_failure(&key);
                    continue;
                }

                // Pass the upstream response through verbatim, minus hop-by-hop
                let mut response = Response::builder().status(status);
                for (name, value) in &resp_headers {
                    if !is_hop_by_hop(name.as_str()) {
                        response = response.header(name, value);
                    }
                }
                return response
                    .body(axum::body::Body::from(resp_body))
                    .unwrap_or_else(|e| {
                        error_response(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            &format!("response build error: {e}"),
                            &request_id,
                        )
                    });
            }
            Err(e) if e.is_timeout() => {
                error!(error = %e, key = %mask(&key), "upstream timeout");
                return error_response(
                    StatusCode::GATEWAY_TIMEOUT,
                    &format!("upstream timeout after {}s", state.timeout.as_secs()),
                    &request_id,
                );
            }
            Err(e) => {
                error!(error = %e, "upstream request failed");
                return error_response(
                    StatusCode::BAD_GATEWAY,
                    &format!("upstream error: {e}"),
                    &request_id,
                );
            }
        }
    }

    // Every key quarantined (or none configured)
    warn!("key pool exhausted, rejecting request");
    crate::metrics::record_pool_exhausted();
    exhausted_response(&request_id, state.pool.status())
}

/// Drop any `key` query parameter from a query string; remaining parameters
/// keep their order. Returns `None` when nothing is left to forward.
fn strip_key_param(query: &str) -> Option<String> {
    if query.is_empty() {
        return None;
    }
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| pair.split('=').next().unwrap_or(pair) != "key")
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join("&"))
    }
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
