//! Forwarding of admitted requests to the configured upstream service.
//!
//! A deliberately thin proxy: one base URL, path and query kept, hop-by-hop
//! headers dropped in both directions. No routing, retries or load balancing.
//! Request bodies are buffered (bounded); response bodies are streamed.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, Uri};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::metrics;

/// Maximum request body size forwarded upstream (10MB).
pub const MAX_FORWARD_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Connection-scoped headers that must not be forwarded (RFC 9110 §7.6.1).
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Drop hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in named.iter().map(String::as_str).chain(HOP_BY_HOP_HEADERS) {
        headers.remove(name);
    }
}

/// HTTP client for the upstream service.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base_url: String,
}

impl Upstream {
    /// Create a forwarder for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConfigError` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::ConfigError(format!("Failed to build upstream client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upstream URL for an inbound URI.
    pub fn target_url(&self, uri: &Uri) -> String {
        let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
        format!("{}{}", self.base_url, path_and_query)
    }

    /// Forward a request and stream back the response.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::PayloadTooLarge` if the body exceeds
    /// [`MAX_FORWARD_BODY_BYTES`], `GatewayError::Upstream` if the body cannot
    /// be read or the upstream cannot be reached.
    pub async fn forward(&self, req: Request<Body>) -> GatewayResult<Response<Body>> {
        let (parts, body) = req.into_parts();
        let url = self.target_url(&parts.uri);

        let body = match Limited::new(body, MAX_FORWARD_BODY_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                return Err(GatewayError::PayloadTooLarge {
                    limit: MAX_FORWARD_BODY_BYTES,
                });
            }
            Err(e) => {
                return Err(GatewayError::Upstream(format!("Failed to read request body: {e}")));
            }
        };

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove("content-length");

        debug!(method = %parts.method, url = %url, "Forwarding request upstream");

        let upstream_response = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                metrics::record_upstream_error();
                warn!(url = %url, error = %e, "Upstream request failed");
                GatewayError::Upstream(e.to_string())
            })?;

        let status = upstream_response.status();
        let mut response_headers = upstream_response.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_target_url_keeps_path_and_query() {
        let upstream = Upstream::new("http://backend:3000/", Duration::from_secs(1)).unwrap();
        let uri: Uri = "/api/orders?page=2".parse().unwrap();
        assert_eq!(upstream.target_url(&uri), "http://backend:3000/api/orders?page=2");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive, x-private"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-user-id", HeaderValue::from_static("u-1"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-user-id").unwrap(), "u-1");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_error() {
        let upstream = Upstream::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let result = upstream
            .forward(Request::builder().uri("/x").body(Body::empty()).unwrap())
            .await;
        assert!(matches!(result, Err(GatewayError::Upstream(_))));
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_before_forwarding() {
        let upstream = Upstream::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let body = vec![b'a'; MAX_FORWARD_BODY_BYTES + 1];
        let result = upstream
            .forward(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, GatewayError::PayloadTooLarge { .. }));
        assert_eq!(err.status(), axum::http::StatusCode::PAYLOAD_TOO_LARGE);
    }
}
