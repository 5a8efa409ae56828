//! Access logging and request metrics.

use std::time::Instant;

use crate::container::Container;
use crate::http::RequestContext;
use crate::observability::metrics;
use crate::pipeline::{Middleware, MiddlewareResult, Next};

/// Logs one event per request after the inner chain finished, failures
/// included.
#[derive(Debug, Clone, Default)]
pub struct AccessLog;

impl Middleware for AccessLog {
    fn invoke(&self, scope: &Container, ctx: &mut RequestContext, next: Next<'_>) -> MiddlewareResult {
        let started = Instant::now();
        let result = next.run(scope, ctx);

        let mut status = ctx.response.status();
        if let Some(floor) = result.as_ref().err().and_then(|e| e.status_floor()) {
            status = status.max(floor);
        }
        let method = ctx.request.method().as_str().to_owned();

        tracing::info!(
            request_id = %ctx.request.request_id(),
            method = %method,
            path = %ctx.request.path(),
            status = status.as_u16(),
            remote_ip = %ctx.request.remote_ip(),
            device = ctx.request.device().as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        metrics::record_request(&method, status.as_u16(), started);

        result
    }

    fn name(&self) -> &str {
        "access_log"
    }
}
