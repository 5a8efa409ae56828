//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// HTTP behavior shared by every request.
    pub http: HttpConfig,

    /// Dependency-injection container settings.
    pub container: ContainerConfig,

    /// Static file mount.
    pub static_files: StaticFilesConfig,

    /// Cross-origin policy.
    pub cors: CorsConfig,

    /// API dispatch mount.
    pub api: ApiConfig,

    /// WebSocket session settings.
    pub websocket: WebSocketConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// HTTP behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// `Server` header value; empty suppresses the header.
    pub server_header: String,

    /// Add `Server` and `X-Request-Id` to every response.
    pub default_headers: bool,

    /// Include error details in 5xx bodies.
    pub expose_errors: bool,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,

    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_proxy_headers: bool,

    /// Grace period for in-flight requests and sessions on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            server_header: concat!("scoped-server/", env!("CARGO_PKG_VERSION")).to_string(),
            default_headers: true,
            expose_errors: false,
            max_body_size: 10 * 1024 * 1024,
            request_timeout_secs: 30,
            trust_proxy_headers: false,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Container settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Resolution depth after which a cycle is reported.
    pub max_depth: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            max_depth: crate::container::DEFAULT_MAX_DEPTH,
        }
    }
}

/// Static file mount.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    pub enabled: bool,

    /// Directory served.
    pub root: PathBuf,

    /// URL prefix the directory is mounted under.
    pub prefix: String,

    /// File served for directory requests; empty disables.
    pub index_file: String,

    /// Streaming chunk size in bytes.
    pub chunk_size: usize,

    /// Extra extension → content-type entries (override the built-ins).
    pub mime_types: HashMap<String, String>,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root: PathBuf::from("public"),
            prefix: "/".to_string(),
            index_file: "index.html".to_string(),
            chunk_size: crate::http::response::DEFAULT_CHUNK_SIZE,
            mime_types: HashMap::new(),
        }
    }
}

/// Cross-origin policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,

    /// Allowed origins; `"*"` allows any.
    pub allowed_origins: Vec<String>,

    pub allowed_methods: Vec<String>,

    /// Allowed request headers; empty echoes the preflight's request.
    pub allowed_headers: Vec<String>,

    pub exposed_headers: Vec<String>,

    pub allow_credentials: bool,

    /// Preflight cache lifetime in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: Vec::new(),
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: 600,
        }
    }
}

/// API dispatch mount.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,

    /// URL prefix for `{prefix}/{controller}/{action}`.
    pub prefix: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "/api".to_string(),
        }
    }
}

/// WebSocket session settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Frames buffered per direction between socket and session.
    pub max_frame_queue: usize,

    /// Largest accepted message in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_queue: 64,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset (e.g., "info", "scoped_server=debug").
    pub log_level: String,

    /// "text" or "json".
    pub log_format: String,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Exporter listen address.
    pub metrics_address: String,

    /// Log one event per request.
    pub access_log: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
            access_log: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:3000"

            [static_files]
            enabled = true
            root = "www"

            [static_files.mime_types]
            dat = "application/x-data"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:3000");
        assert_eq!(config.listener.max_connections, 10_000);
        assert!(config.static_files.enabled);
        assert_eq!(config.static_files.root, PathBuf::from("www"));
        assert_eq!(config.static_files.chunk_size, 64 * 1024);
        assert_eq!(config.static_files.mime_types["dat"], "application/x-data");
        assert_eq!(config.container.max_depth, 64);
        assert!(config.http.default_headers);
        assert_eq!(config.api.prefix, "/api");
    }
}
