//! Logging and metrics.
//!
//! # Data Flow
//! ```text
//! init_logging(config.observability)
//!     → tracing-subscriber registry (EnvFilter + text or JSON fmt layer)
//!
//! AccessLog / http::server
//!     → metrics::record_request, request_started / request_finished
//!     → metrics::session_opened / session_closed
//!     → Prometheus exporter (when metrics_enabled)
//! ```
//!
//! Every per-request event carries the `request_id` field.

pub mod logging;
pub mod metrics;
