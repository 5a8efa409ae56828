//! Scoped application server library.
//!
//! A dependency-injection container with per-request scopes, a synchronous
//! middleware pipeline, and an axum transport that serves static files, API
//! controllers and WebSocket sessions through it.

pub mod config;
pub mod container;
pub mod http;
pub mod lifecycle;
pub mod middleware;
pub mod net;
pub mod observability;
pub mod pipeline;

pub use config::schema::ServerConfig;
pub use container::{Container, ContainerError, Injectable, Param, TypeDescriptor};
pub use http::{HttpServer, ServerBuilder};
pub use lifecycle::Shutdown;
pub use pipeline::{Middleware, MiddlewareResult, Next, PipelineError};
