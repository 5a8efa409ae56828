//! Error translation.
//!
//! Turns failures from the inner chain into JSON error bodies, then hands the
//! failure on so the dispatcher still reports it. Error statuses set by inner
//! stages without a body get a body of the same shape. The dispatcher's own
//! 404 for a request nothing handled is decided after the chain unwinds and
//! stays empty.

use axum::http::StatusCode;
use serde::Serialize;

use crate::container::Container;
use crate::http::RequestContext;
use crate::pipeline::{ErrorKind, Middleware, MiddlewareResult, Next, PipelineError};

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ErrorTranslation {
    expose_errors: bool,
}

impl ErrorTranslation {
    pub fn new(expose_errors: bool) -> Self {
        Self { expose_errors }
    }

    fn translate(&self, ctx: &mut RequestContext, err: &PipelineError) -> Result<(), serde_json::Error> {
        let floor = err.status_floor().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        ctx.response.raise_status(floor);
        ctx.response.clear_body();

        let status = ctx.response.status();
        let message = match err.kind() {
            ErrorKind::ArgumentBinding => err.to_string(),
            _ if self.expose_errors => err.to_string(),
            _ => reason(status).to_string(),
        };
        ctx.response.write_json(&ErrorBody {
            error: err.label(),
            message,
        })?;
        ctx.response.mark_error_body();
        Ok(())
    }
}

impl Middleware for ErrorTranslation {
    fn invoke(&self, scope: &Container, ctx: &mut RequestContext, next: Next<'_>) -> MiddlewareResult {
        match next.run(scope, ctx) {
            Ok(()) => {
                let status = ctx.response.status();
                if (status.is_client_error() || status.is_server_error()) && ctx.response.body().is_empty() {
                    ctx.response.write_json(&ErrorBody {
                        error: "http",
                        message: reason(status).to_string(),
                    })?;
                }
                Ok(())
            }
            Err(PipelineError::End) => Err(PipelineError::End),
            Err(err) => {
                if let Err(render) = self.translate(ctx, &err) {
                    tracing::warn!(
                        request_id = %ctx.request.request_id(),
                        error = %render,
                        "Failed to render error body"
                    );
                }
                Err(err)
            }
        }
    }

    fn name(&self) -> &str {
        "error_translation"
    }
}

fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Error")
}
