//! Process lifecycle: signal handling and graceful shutdown.
//!
//! # Data Flow
//! ```text
//! SIGTERM / ctrl-c
//!     → signals::spawn_signal_listener → Shutdown::trigger
//!     → HttpServer::run stops accepting
//!     → in-flight requests and sessions drain (bounded by shutdown_timeout_secs)
//!     → root container disposed
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_listener, wait_for_signal};
