//! First stage: request logging and correlation IDs.
//!
//! Never denies. Propagates an inbound `X-Request-Id` or generates a UUIDv4
//! one, and forwards it so the upstream service can log the same ID.

use axum::http::{HeaderMap, HeaderValue};
use tracing::info;
use uuid::Uuid;

use super::{FilterFuture, GatewayFilter, Verdict, order};
use crate::context::{ClientContext, REQUEST_ID_HEADER};

#[derive(Debug, Clone, Default)]
pub struct RequestLoggingFilter;

impl RequestLoggingFilter {
    pub fn new() -> Self {
        Self
    }
}

/// Inbound request ID if it is a usable header value, else a fresh UUID.
fn request_id_for(ctx: &ClientContext) -> HeaderValue {
    ctx.request_id
        .as_deref()
        .and_then(|id| HeaderValue::from_str(id).ok())
        .unwrap_or_else(|| {
            HeaderValue::from_str(&Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
        })
}

impl GatewayFilter for RequestLoggingFilter {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn order(&self) -> i32 {
        order::LOGGING
    }

    fn apply<'a>(&'a self, ctx: &'a ClientContext) -> FilterFuture<'a> {
        let request_id = request_id_for(ctx);

        info!(
            method = %ctx.method,
            uri = %ctx.uri(),
            client_ip = %ctx.client_ip,
            user_agent = ctx.user_agent.as_deref().unwrap_or("-"),
            request_id = request_id.to_str().unwrap_or(""),
            "Incoming request"
        );

        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, request_id);
        Box::pin(std::future::ready(Verdict::Forward(headers)))
    }
}
