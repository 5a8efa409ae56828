//! Boundary types exchanged with the transport.
//!
//! The transport produces one [`RawRequest`] per connection and a
//! [`RawResponse`] write handle. The dispatcher answers through that handle
//! exactly once with an [`Outgoing`] message.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::http::response::ResponseBody;
use crate::http::websocket::PendingSession;
use crate::pipeline::DispatchOutcome;

/// Everything the transport knows about one inbound request.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub remote_addr: SocketAddr,
}

impl RawRequest {
    /// A bodiless request from an unspecified peer; handy for embedding and tests.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = value.parse() {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = addr;
        self
    }
}

/// The finished response handed back to the transport.
pub struct Outgoing {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    /// Accepted WebSocket session waiting for the transport to upgrade.
    pub upgrade: Option<PendingSession>,
    pub outcome: DispatchOutcome,
}

impl Outgoing {
    /// Minimal response used when no context could be built.
    pub fn bare(status: StatusCode, message: &str, outcome: DispatchOutcome) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self {
            status,
            headers,
            body: ResponseBody::Bytes(message.as_bytes().to_vec()),
            upgrade: None,
            outcome,
        }
    }

    /// Header value as text, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl std::fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outgoing")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("upgrade", &self.upgrade.is_some())
            .field("outcome", &self.outcome)
            .finish()
    }
}

/// Write handle for one response. Accepts exactly one flush.
pub struct RawResponse {
    sink: Mutex<Option<oneshot::Sender<Outgoing>>>,
}

impl RawResponse {
    /// Create a handle and the receiver the transport awaits.
    pub fn channel() -> (Self, oneshot::Receiver<Outgoing>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sink: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Deliver the response. Returns `false` if it was already flushed or the
    /// transport stopped waiting.
    pub fn flush(&self, outgoing: Outgoing) -> bool {
        match self.sink.lock().take() {
            Some(tx) => tx.send(outgoing).is_ok(),
            None => false,
        }
    }

    pub fn is_flushed(&self) -> bool {
        self.sink.lock().is_none()
    }
}

impl std::fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawResponse")
            .field("flushed", &self.is_flushed())
            .finish()
    }
}
