//! Middleware trait, continuation and the ordered pipeline.

use std::cell::Cell;
use std::sync::Arc;

use crate::container::Container;
use crate::http::RequestContext;
use crate::pipeline::error::PipelineError;

pub type MiddlewareResult = Result<(), PipelineError>;

/// A pipeline stage.
///
/// Call `next.run(scope, ctx)` to continue; return without calling it to
/// short-circuit. Code after the call runs on the way out.
pub trait Middleware: Send + Sync {
    fn invoke(&self, scope: &Container, ctx: &mut RequestContext, next: Next<'_>) -> MiddlewareResult;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Continuation into the rest of the chain. Consumed by `run`, so a stage
/// can continue at most once.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    index: usize,
    reached_end: &'a Cell<bool>,
}

impl<'a> Next<'a> {
    pub fn run(self, scope: &Container, ctx: &mut RequestContext) -> MiddlewareResult {
        match self.chain.get(self.index) {
            Some(middleware) => {
                let next = Next {
                    chain: self.chain,
                    index: self.index + 1,
                    reached_end: self.reached_end,
                };
                middleware.invoke(scope, ctx, next)
            }
            None => {
                self.reached_end.set(true);
                Ok(())
            }
        }
    }

    /// Stages left after this continuation.
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.index)
    }
}

/// Adapter for closure stages, see [`Pipeline::use_fn`].
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&Container, &mut RequestContext, Next<'_>) -> MiddlewareResult + Send + Sync,
{
    fn invoke(&self, scope: &Container, ctx: &mut RequestContext, next: Next<'_>) -> MiddlewareResult {
        (self.f)(scope, ctx, next)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered list of stages; runs in registration order.
#[derive(Default, Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.use_shared(Arc::new(middleware))
    }

    pub fn use_shared(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        tracing::debug!(middleware = middleware.name(), position = self.stages.len(), "Middleware registered");
        self.stages.push(middleware);
        self
    }

    pub fn use_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Container, &mut RequestContext, Next<'_>) -> MiddlewareResult + Send + Sync + 'static,
    {
        self.use_middleware(FnMiddleware { name: name.into(), f })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[Arc<dyn Middleware>] {
        &self.stages
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|m| m.name()).collect()
    }

    /// Run the whole chain. The flag reports whether the chain ran past its
    /// last stage.
    pub fn run(&self, scope: &Container, ctx: &mut RequestContext) -> (MiddlewareResult, bool) {
        let reached_end = Cell::new(false);
        let next = Next {
            chain: &self.stages,
            index: 0,
            reached_end: &reached_end,
        };
        let result = next.run(scope, ctx);
        (result, reached_end.get())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
