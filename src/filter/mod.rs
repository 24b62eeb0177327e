//! Ordered admission pipeline.
//!
//! # Architecture
//!
//! ```text
//! Request → strip X-User-* → ClientContext
//!              │
//!              ▼
//!   logging (i32::MIN) → rate limit (-2) → auth (-1) → inner service
//!        │                    │               │
//!   X-Request-Id         429 Deny        401 Deny / X-User-* headers
//! ```
//!
//! Stages run strictly by ascending [`GatewayFilter::order`]; equal orders
//! keep registration order. The first [`Verdict::Deny`] ends the request:
//! later stages and the inner service are never called. Stages see only the
//! [`ClientContext`] and can only add headers, which the chain applies to the
//! request before forwarding it.
//!
//! [`FilterChainLayer`] wraps any tower service with the chain, so the same
//! pipeline can sit in front of the built-in upstream proxy or any other
//! axum router.

pub mod auth;
pub mod logging;
pub mod rate_limit;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, info};

use crate::context::{ClientContext, REQUEST_ID_HEADER};
use crate::error::GatewayError;
use crate::metrics;

pub use auth::{IDENTITY_HEADERS, JwtAuthFilter};
pub use logging::RequestLoggingFilter;
pub use rate_limit::RateLimitFilter;

/// Stage precedence values. Lower runs earlier.
pub mod order {
    pub const LOGGING: i32 = i32::MIN;
    pub const RATE_LIMIT: i32 = -2;
    pub const AUTH: i32 = -1;
}

/// Boxed future returned by [`GatewayFilter::apply`].
pub type FilterFuture<'a> = Pin<Box<dyn Future<Output = Verdict> + Send + 'a>>;

/// Decision of one stage.
#[derive(Debug)]
pub enum Verdict {
    /// Continue, adding these headers to the forwarded request
    Forward(HeaderMap),
    /// Stop and answer with this error
    Deny(GatewayError),
}

impl Verdict {
    /// Forward without adding headers.
    pub fn forward() -> Self {
        Verdict::Forward(HeaderMap::new())
    }

    pub fn is_forward(&self) -> bool {
        matches!(self, Verdict::Forward(_))
    }
}

/// One admission stage.
pub trait GatewayFilter: Send + Sync {
    /// Stage name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Precedence; lower runs earlier.
    fn order(&self) -> i32;

    fn apply<'a>(&'a self, ctx: &'a ClientContext) -> FilterFuture<'a>;
}

/// Result of running the whole chain.
#[derive(Debug)]
pub enum ChainOutcome {
    Forward {
        /// Headers added by every stage, in stage order
        added: HeaderMap,
    },
    Deny {
        /// Name of the denying stage
        stage: &'static str,
        error: GatewayError,
        /// Headers added by the stages before the denial
        added: HeaderMap,
    },
}

/// Stages sorted by precedence.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn GatewayFilter>>,
}

impl FilterChain {
    pub fn new(mut filters: Vec<Arc<dyn GatewayFilter>>) -> Self {
        // sort_by_key is stable
        filters.sort_by_key(|f| f.order());
        Self { filters }
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every stage in order, stopping at the first denial.
    pub async fn run(&self, ctx: &ClientContext) -> ChainOutcome {
        let mut added = HeaderMap::new();

        for filter in &self.filters {
            match filter.apply(ctx).await {
                Verdict::Forward(headers) => added.extend(headers),
                Verdict::Deny(error) => {
                    debug!(
                        stage = filter.name(),
                        status = error.status().as_u16(),
                        "Filter chain short-circuited"
                    );
                    return ChainOutcome::Deny {
                        stage: filter.name(),
                        error,
                        added,
                    };
                }
            }
        }

        ChainOutcome::Forward { added }
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Tower layer running a [`FilterChain`] in front of the wrapped service.
#[derive(Clone, Debug)]
pub struct FilterChainLayer {
    chain: Arc<FilterChain>,
}

impl FilterChainLayer {
    pub fn new(chain: FilterChain) -> Self {
        Self {
            chain: Arc::new(chain),
        }
    }
}

impl<S> Layer<S> for FilterChainLayer {
    type Service = FilterChainService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FilterChainService {
            inner,
            chain: self.chain.clone(),
        }
    }
}

/// Filter chain service wrapper.
#[derive(Clone)]
pub struct FilterChainService<S> {
    inner: S,
    chain: Arc<FilterChain>,
}

impl<S> Service<Request<Body>> for FilterChainService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let chain = self.chain.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let start = Instant::now();

            // Identity headers are only ever set by the auth stage
            strip_identity_headers(req.headers_mut());
            let ctx = ClientContext::from_request(&req);

            let (mut response, added) = match chain.run(&ctx).await {
                ChainOutcome::Forward { added } => {
                    req.headers_mut().extend(added.clone());
                    (inner.call(req).await?, added)
                }
                ChainOutcome::Deny {
                    stage,
                    error,
                    added,
                } => {
                    metrics::record_denial(stage, error.status().as_u16());
                    (error.into_response(), added)
                }
            };

            if let Some(request_id) = added.get(REQUEST_ID_HEADER) {
                response
                    .headers_mut()
                    .insert(REQUEST_ID_HEADER, request_id.clone());
            }

            let elapsed = start.elapsed();
            let status = response.status().as_u16();
            info!(
                method = %ctx.method,
                uri = %ctx.uri(),
                client_ip = %ctx.client_ip,
                status,
                elapsed_ms = elapsed.as_millis() as u64,
                request_id = added
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v: &HeaderValue| v.to_str().ok())
                    .unwrap_or(""),
                "Request completed"
            );
            metrics::record_request_duration(ctx.method.as_str(), status, elapsed.as_secs_f64());

            Ok(response)
        })
    }
}

/// Remove client-supplied identity headers.
pub fn strip_identity_headers(headers: &mut HeaderMap) {
    for name in IDENTITY_HEADERS {
        headers.remove(name);
    }
}
