//! Middleware pipeline subsystem.
//!
//! # Responsibilities
//! - Keep middleware in registration order
//! - Give each request its own container scope and context
//! - Map `End`, argument errors and failures onto exactly one response
//! - Dispose the request scope exactly once
//!
//! # Design Decisions
//! - The chain is synchronous; `next` is an ordinary call, so logic before and
//!   after it runs in the same stack frame
//! - Halting is a `PipelineError::End` value, never unwinding
//! - Panics inside the chain are caught at the dispatcher and treated as
//!   unhandled errors

pub mod dispatcher;
pub mod error;
pub mod middleware;

pub use dispatcher::{DispatchHooks, DispatchOutcome, DispatchSettings, Dispatcher, LoggingHooks};
pub use error::{ErrorKind, PipelineError};
pub use middleware::{FnMiddleware, Middleware, MiddlewareResult, Next, Pipeline};
