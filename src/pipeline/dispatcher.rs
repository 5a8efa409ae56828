//! Per-request dispatch.
//!
//! # Data Flow
//! ```text
//! (RawRequest, RawResponse)
//!     → request scope = root.create_container()          [Created]
//!     → scope ← RawRequest, RawResponse, Items
//!     → ctx = scope.get_interface::<dyn ContextFactory>().create(scope)
//!     → default headers (Server, X-Request-Id)
//!     → on_begin → on_handler → middleware chain        [Dispatching]
//!     → on_end | on_error
//!     → Outgoing flushed once through RawResponse
//!       [Completed | ShortCircuited | Faulted]
//!     → scope.dispose()                                  [Disposed]
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use axum::http::{header, HeaderValue, StatusCode};

use crate::container::{Container, ContainerError};
use crate::http::context::{ContextFactory, DefaultContextFactory, Items, RequestContext};
use crate::http::request::X_REQUEST_ID;
use crate::http::transport::{Outgoing, RawRequest, RawResponse};
use crate::pipeline::error::{ErrorKind, PipelineError};
use crate::pipeline::middleware::{MiddlewareResult, Pipeline};

/// Final state of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The chain ran to its end.
    Completed,
    /// A stage stopped the chain, by not continuing or with `End`.
    ShortCircuited,
    /// A stage failed.
    Faulted,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Completed => "completed",
            DispatchOutcome::ShortCircuited => "short_circuited",
            DispatchOutcome::Faulted => "faulted",
        }
    }
}

/// Extension points around the middleware chain.
///
/// `on_begin` and `on_handler` run before the chain and may fail it like a
/// middleware. `on_end` runs after a chain that did not fail; `on_error`
/// receives unhandled failures after the status has been raised.
pub trait DispatchHooks: Send + Sync {
    fn on_begin(&self, _scope: &Container, _ctx: &mut RequestContext) -> MiddlewareResult {
        Ok(())
    }

    fn on_handler(&self, _scope: &Container, _ctx: &mut RequestContext) -> MiddlewareResult {
        Ok(())
    }

    fn on_end(&self, _scope: &Container, _ctx: &mut RequestContext) {}

    fn on_error(&self, _scope: &Container, ctx: &mut RequestContext, error: &PipelineError) {
        tracing::error!(
            request_id = %ctx.request.request_id(),
            method = %ctx.request.method(),
            path = %ctx.request.path(),
            error = %error,
            "Unhandled pipeline error"
        );
    }
}

/// Hooks that only log unhandled errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl DispatchHooks for LoggingHooks {}

/// Dispatcher settings fixed at startup.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// `Server` header value; `None` suppresses it.
    pub server_header: Option<String>,
    /// Whether `Server` and `X-Request-Id` are added at all.
    pub default_headers: bool,
    /// Whether unhandled error bodies carry the error text.
    pub expose_errors: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            server_header: Some(concat!("scoped-server/", env!("CARGO_PKG_VERSION")).to_string()),
            default_headers: true,
            expose_errors: false,
        }
    }
}

/// Disposes the request scope when dropped, including during unwinding.
struct ScopeGuard(Arc<Container>);

impl std::ops::Deref for ScopeGuard {
    type Target = Container;

    fn deref(&self) -> &Container {
        &self.0
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

/// Runs the pipeline for one request inside its own container scope.
pub struct Dispatcher {
    root: Arc<Container>,
    pipeline: Pipeline,
    hooks: Arc<dyn DispatchHooks>,
    settings: DispatchSettings,
}

impl Dispatcher {
    /// Create a dispatcher. Registers [`DefaultContextFactory`] on the root
    /// unless a context factory is already bound.
    pub fn new(
        root: Arc<Container>,
        pipeline: Pipeline,
        hooks: Arc<dyn DispatchHooks>,
        settings: DispatchSettings,
    ) -> Result<Self, ContainerError> {
        if !root.has_interface::<dyn ContextFactory>(None) {
            root.register_as::<dyn ContextFactory, DefaultContextFactory>(None)?;
        }
        Ok(Self {
            root,
            pipeline,
            hooks,
            settings,
        })
    }

    pub fn root(&self) -> &Arc<Container> {
        &self.root
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Dispatch one request. Exactly one [`Outgoing`] is flushed through
    /// `response` and the request scope is disposed exactly once.
    pub fn dispatch(&self, request: RawRequest, response: RawResponse) -> DispatchOutcome {
        let started = Instant::now();
        let scope = ScopeGuard(self.root.create_container());
        let response = Arc::new(response);

        let mut ctx = match self.prepare(&scope, request, &response) {
            Ok(ctx) => ctx,
            Err(err) => {
                tracing::error!(error = %err, "Failed to build request context");
                let message = if self.settings.expose_errors {
                    format!("Internal Server Error: {err}")
                } else {
                    "Internal Server Error".to_string()
                };
                response.flush(Outgoing::bare(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &message,
                    DispatchOutcome::Faulted,
                ));
                return DispatchOutcome::Faulted;
            }
        };

        if self.settings.default_headers {
            self.apply_default_headers(&mut ctx);
        }

        let outcome = self.run(&scope, &mut ctx);

        if outcome == DispatchOutcome::Completed && !ctx.response.is_touched() {
            ctx.response.set_status(StatusCode::NOT_FOUND);
        }

        tracing::debug!(
            request_id = %ctx.request.request_id(),
            status = ctx.response.status().as_u16(),
            outcome = outcome.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request dispatched"
        );

        if !response.flush(ctx.response.into_outgoing(outcome)) {
            tracing::debug!("Transport stopped waiting for the response");
        }
        outcome
    }

    fn prepare(
        &self,
        scope: &Container,
        request: RawRequest,
        response: &Arc<RawResponse>,
    ) -> Result<RequestContext, ContainerError> {
        scope.register_instance(request, None)?;
        scope.register_shared(Arc::clone(response), None)?;
        scope.register_instance(Items::new(), None)?;
        let factory = scope.get_interface::<dyn ContextFactory>(None)?;
        factory.create(scope)
    }

    fn apply_default_headers(&self, ctx: &mut RequestContext) {
        if let Some(server) = &self.settings.server_header {
            if let Ok(value) = HeaderValue::try_from(server.as_str()) {
                ctx.response.set_default_header(header::SERVER, value);
            }
        }
        if let Ok(value) = HeaderValue::try_from(ctx.request.request_id()) {
            ctx.response
                .set_default_header(header::HeaderName::from_static(X_REQUEST_ID), value);
        }
    }

    fn run(&self, scope: &Container, ctx: &mut RequestContext) -> DispatchOutcome {
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.hooks.on_begin(scope, ctx)?;
            self.hooks.on_handler(scope, ctx)?;
            let (result, reached_end) = self.pipeline.run(scope, ctx);
            result.map(|()| reached_end)
        }))
        .unwrap_or_else(|payload| Err(PipelineError::from_panic(payload)));

        match result {
            Ok(reached_end) => {
                self.hooks.on_end(scope, ctx);
                if reached_end {
                    DispatchOutcome::Completed
                } else {
                    DispatchOutcome::ShortCircuited
                }
            }
            Err(err) => self.fail(scope, ctx, err),
        }
    }

    fn fail(&self, scope: &Container, ctx: &mut RequestContext, err: PipelineError) -> DispatchOutcome {
        match err.kind() {
            ErrorKind::End => {
                self.hooks.on_end(scope, ctx);
                DispatchOutcome::ShortCircuited
            }
            ErrorKind::ArgumentBinding => {
                ctx.response.raise_status(StatusCode::BAD_REQUEST);
                if ctx.response.body().is_empty() {
                    let _ = ctx.response.write_json(&serde_json::json!({
                        "error": err.label(),
                        "message": err.to_string(),
                    }));
                }
                tracing::debug!(
                    request_id = %ctx.request.request_id(),
                    error = %err,
                    "Argument binding failed"
                );
                DispatchOutcome::Faulted
            }
            ErrorKind::Unhandled => {
                ctx.response.raise_status(StatusCode::INTERNAL_SERVER_ERROR);
                if !ctx.response.has_error_body() {
                    ctx.response.clear_body();
                    if self.settings.expose_errors {
                        ctx.response.write_str(&format!("Internal Server Error: {err}"));
                    } else {
                        ctx.response.write_str("Internal Server Error");
                    }
                    ctx.response.set_content_type("text/plain; charset=utf-8");
                }
                self.hooks.on_error(scope, ctx, &err);
                DispatchOutcome::Faulted
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pipeline", &self.pipeline)
            .field("settings", &self.settings)
            .finish()
    }
}
