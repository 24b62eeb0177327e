//! Per-request client context shared by every filter stage.
//!
//! The context is built once per request by the filter chain and handed to
//! each stage by reference. Stages never see the request itself, which keeps
//! them pure functions of the context.
//!
//! # Client IP Resolution
//!
//! Checks in order (first non-empty value wins):
//! 1. `X-Forwarded-For` header (first IP in a comma-separated list)
//! 2. `X-Real-IP` header
//! 3. Transport peer address (axum `ConnectInfo<SocketAddr>` extension)
//! 4. Falls back to [`UNKNOWN_IP`]
//!
//! # Security Warning: IP Spoofing Risk
//!
//! Forwarded headers are client-controlled unless an edge proxy overwrites
//! them. Deploy behind a reverse proxy that sets (not appends to)
//! `X-Forwarded-For`/`X-Real-IP`, otherwise clients can rotate spoofed IPs to
//! dodge per-IP rate limits or match an excluded IP on purpose.

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Method, Request, header};
use url::form_urlencoded;

/// Fallback IP value when no client IP can be determined.
///
/// All such requests share one rate-limit key.
pub const UNKNOWN_IP: &str = "unknown";

/// Header carrying rate-limit exemption API keys.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Query parameter carrying rate-limit exemption API keys.
pub const API_KEY_QUERY: &str = "api_key";

/// Header carrying the request correlation ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Where the client IP was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpSource {
    ForwardedFor,
    RealIp,
    Peer,
    Unknown,
}

/// Everything the admission stages need to know about one request.
#[derive(Debug, Clone)]
pub struct ClientContext {
    /// Resolved client IP (see module docs for precedence)
    pub client_ip: String,
    /// Which source produced `client_ip`
    pub ip_source: IpSource,
    /// HTTP method
    pub method: Method,
    /// Request path without query string
    pub path: String,
    /// Raw query string, if any
    pub query: Option<String>,
    /// API key candidates: every `X-API-KEY` header value, in order
    pub api_key_headers: Vec<String>,
    /// First `api_key` query parameter value, percent-decoded
    pub api_key_query: Option<String>,
    /// Raw `Authorization` header value
    pub authorization: Option<String>,
    /// `User-Agent` header value (logging only)
    pub user_agent: Option<String>,
    /// Inbound `X-Request-Id`, if the client or an edge proxy sent one
    pub request_id: Option<String>,
}

impl ClientContext {
    /// Build the context from an inbound request.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self::from_parts(req.method(), req.uri().path(), req.uri().query(), req.headers(), peer)
    }

    /// Build the context from individual request parts.
    pub fn from_parts(
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> Self {
        let (client_ip, ip_source) = resolve_client_ip(headers, peer);

        let api_key_headers = headers
            .get_all(API_KEY_HEADER)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();

        Self {
            client_ip: client_ip.into_owned(),
            ip_source,
            method: method.clone(),
            path: path.to_string(),
            query: query.map(str::to_string),
            api_key_headers,
            api_key_query: query.and_then(|q| query_param(q, API_KEY_QUERY)),
            authorization: header_str(headers, header::AUTHORIZATION.as_str()).map(str::to_string),
            user_agent: header_str(headers, header::USER_AGENT.as_str()).map(str::to_string),
            request_id: header_str(headers, REQUEST_ID_HEADER).map(str::to_string),
        }
    }

    /// Path plus query string, for logging.
    pub fn uri(&self) -> Cow<'_, str> {
        match &self.query {
            Some(query) => Cow::Owned(format!("{}?{}", self.path, query)),
            None => Cow::Borrowed(&self.path),
        }
    }
}

/// Non-empty UTF-8 header value.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// Resolve the client IP from forwarded headers, then the peer address.
///
/// Returns borrowed `"unknown"` when nothing is available.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) -> (Cow<'static, str>, IpSource) {
    if let Some(forwarded) = header_str(headers, "x-forwarded-for")
        && let Some(first_ip) = forwarded.split(',').next()
    {
        return (Cow::Owned(first_ip.trim().to_string()), IpSource::ForwardedFor);
    }

    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        return (Cow::Owned(real_ip.trim().to_string()), IpSource::RealIp);
    }

    match peer {
        Some(addr) => (Cow::Owned(addr.ip().to_string()), IpSource::Peer),
        None => (Cow::Borrowed(UNKNOWN_IP), IpSource::Unknown),
    }
}

/// First value of a query parameter, decoded as `application/x-www-form-urlencoded`.
fn query_param(query: &str, name: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
