//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum transport: read body, detect upgrade)
//!     → transport.rs (RawRequest / RawResponse handed to the dispatcher)
//!     → context.rs (RequestContext built from the request scope)
//!         → request.rs (method, path, query, cookies, JSON, device class)
//!         → response.rs (status, headers, body, file windows, cookies)
//!     → pipeline (middleware chain)
//!     → Outgoing flushed back through the RawResponse
//!     → websocket.rs (sessions for accepted upgrades)
//! ```
//!
//! # Design Decisions
//! - The pipeline is synchronous; the transport runs it on the blocking pool
//! - Request views borrow the shared raw request instead of copying the body
//! - File bodies are described as windows and streamed in chunks by the
//!   transport, never buffered whole

pub mod context;
pub mod cookie;
pub mod request;
pub mod response;
pub mod server;
pub mod transport;
pub mod websocket;

pub use context::{ContextFactory, DefaultContextFactory, Items, RequestContext};
pub use cookie::{Cookie, SameSite};
pub use request::{DeviceClass, ParamSource, ParamValue, Request, X_REQUEST_ID};
pub use response::{FileWindow, Response, ResponseBody};
pub use server::{HttpServer, ServerBuilder};
pub use transport::{Outgoing, RawRequest, RawResponse};
