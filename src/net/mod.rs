//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (accepted by the axum transport)
//!     → connection.rs (admission against max_connections, id, tracking)
//!     → Hand off to the dispatcher
//!
//! Activity States:
//!     Admitted → Dispatching → Finished
//!     Upgraded → Session open → Closed
//! ```
//!
//! # Design Decisions
//! - Over-limit requests are refused with 503 instead of queueing
//! - Every request and session is tracked for graceful shutdown

pub mod connection;

pub use connection::{ActivityGuard, ActivityId, ActivityKind, ActivityTracker};
