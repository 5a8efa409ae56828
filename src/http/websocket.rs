//! WebSocket sessions.
//!
//! # Responsibilities
//! - Negotiate the sub-protocol through the handler's `on_check`
//! - Run one receive loop per session on a dedicated blocking task
//! - Pair every `on_opened` with exactly one `on_closed`
//! - Turn sends on a closed session into no-ops
//!
//! # Data Flow
//! ```text
//! client frames → transport reader task → mpsc → Channel::receive
//!     → on_message / on_binary
//! session.send_* → Channel::send → mpsc → transport writer task → client
//! ```
//!
//! # Design Decisions
//! - Handlers see a blocking [`Channel`]; the async socket stays in the transport
//! - Ping/pong is answered by the transport and never reaches handlers
//! - Handler panics end the session like a transport error

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::http::request::Request;
use crate::observability::metrics;

/// One WebSocket message as seen by handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The peer or the transport went away.
    #[error("channel closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Bidirectional, blocking message channel owned by one session.
pub trait Channel: Send + Sync {
    /// Block until the next frame arrives.
    fn receive(&self) -> Result<Frame, ChannelError>;

    fn send(&self, frame: Frame) -> Result<(), ChannelError>;

    /// Release the outbound side. Further sends fail with `Closed`.
    fn close(&self);
}

/// Result of a handler's sub-protocol check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// Open the session, optionally speaking the given sub-protocol.
    Accept(Option<String>),
    /// Refuse the upgrade; no session is created.
    Reject,
}

/// Application callbacks for one WebSocket endpoint.
pub trait WebSocketHandler: Send + Sync {
    /// Decide whether to accept; `offered` lists the client's sub-protocols.
    /// Accepts with the first offered protocol by default.
    fn on_check(&self, _request: &Request, offered: &[&str]) -> Negotiation {
        Negotiation::Accept(offered.first().map(|p| p.to_string()))
    }

    fn on_opened(&self, _session: &Arc<WebSocketSession>) {}

    fn on_message(&self, _session: &Arc<WebSocketSession>, _text: &str) {}

    fn on_binary(&self, _session: &Arc<WebSocketSession>, _data: &[u8]) {}

    fn on_closed(&self, _session: &Arc<WebSocketSession>) {}
}

/// An open WebSocket connection.
pub struct WebSocketSession {
    id: Uuid,
    path: String,
    remote_addr: SocketAddr,
    protocol: Option<String>,
    channel: Box<dyn Channel>,
    open: AtomicBool,
}

impl WebSocketSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Negotiated sub-protocol.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ChannelError> {
        self.send(Frame::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<(), ChannelError> {
        self.send(Frame::Binary(data.into()))
    }

    /// Serialize `value` as JSON and send it as a text frame.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), ChannelError> {
        let text = serde_json::to_string(value)?;
        self.send(Frame::Text(text))
    }

    /// Send a close frame and release the channel. No-op when already closed.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.channel.send(Frame::Close);
            self.channel.close();
        }
    }

    fn send(&self, frame: Frame) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Ok(());
        }
        match self.channel.send(frame) {
            Ok(()) => Ok(()),
            Err(ChannelError::Closed) => {
                self.open.store(false, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                self.open.store(false, Ordering::Release);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for WebSocketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSession")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("remote_addr", &self.remote_addr)
            .field("protocol", &self.protocol)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Why a session loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer sent a close frame.
    PeerClosed,
    /// The channel ended without a close frame.
    Disconnected,
    /// The server closed the session.
    ServerClosed,
    TransportError(String),
    HandlerPanic(String),
}

/// An accepted upgrade waiting for the transport's channel.
pub struct PendingSession {
    handler: Arc<dyn WebSocketHandler>,
    path: String,
    remote_addr: SocketAddr,
    protocol: Option<String>,
}

impl PendingSession {
    pub fn new(
        handler: Arc<dyn WebSocketHandler>,
        path: impl Into<String>,
        remote_addr: SocketAddr,
        protocol: Option<String>,
    ) -> Self {
        Self {
            handler,
            path: path.into(),
            remote_addr,
            protocol,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Run the session to completion on the current thread.
    ///
    /// `on_opened` is followed by the receive loop; `on_closed` runs exactly
    /// once afterwards, whatever ended the loop.
    pub fn run(self, channel: Box<dyn Channel>) -> SessionEnd {
        let handler = self.handler;
        let session = Arc::new(WebSocketSession {
            id: Uuid::new_v4(),
            path: self.path,
            remote_addr: self.remote_addr,
            protocol: self.protocol,
            channel,
            open: AtomicBool::new(true),
        });

        tracing::info!(
            session_id = %session.id,
            path = %session.path,
            remote_addr = %session.remote_addr,
            protocol = ?session.protocol,
            "WebSocket session opened"
        );
        metrics::session_opened();

        let end = catch_unwind(AssertUnwindSafe(|| {
            handler.on_opened(&session);
            receive_loop(handler.as_ref(), &session)
        }))
        .unwrap_or_else(|payload| SessionEnd::HandlerPanic(panic_message(payload.as_ref())));

        session.open.store(false, Ordering::Release);
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler.on_closed(&session))) {
            tracing::warn!(
                session_id = %session.id,
                panic = %panic_message(payload.as_ref()),
                "on_closed panicked"
            );
        }
        session.channel.close();
        metrics::session_closed();

        tracing::info!(session_id = %session.id, reason = ?end, "WebSocket session closed");
        end
    }
}

impl std::fmt::Debug for PendingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSession")
            .field("path", &self.path)
            .field("remote_addr", &self.remote_addr)
            .field("protocol", &self.protocol)
            .finish()
    }
}

fn receive_loop(handler: &dyn WebSocketHandler, session: &Arc<WebSocketSession>) -> SessionEnd {
    loop {
        if !session.is_open() {
            return SessionEnd::ServerClosed;
        }
        match session.channel.receive() {
            Ok(Frame::Close) => return SessionEnd::PeerClosed,
            Ok(Frame::Binary(data)) => handler.on_binary(session, &data),
            Ok(Frame::Text(text)) => handler.on_message(session, &text),
            Err(ChannelError::Closed) if !session.is_open() => return SessionEnd::ServerClosed,
            Err(ChannelError::Closed) => return SessionEnd::Disconnected,
            Err(e) => {
                tracing::debug!(session_id = %session.id, error = %e, "WebSocket receive failed");
                return SessionEnd::TransportError(e.to_string());
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// [`Channel`] backed by tokio mpsc queues; the transport owns the other ends.
pub struct MpscChannel {
    inbound: Mutex<mpsc::Receiver<Frame>>,
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
}

/// Transport-side ends of an [`MpscChannel`].
pub struct ChannelPeer {
    /// Frames read from the socket go here.
    pub inbound: mpsc::Sender<Frame>,
    /// Frames to write to the socket come from here.
    pub outbound: mpsc::Receiver<Frame>,
}

impl MpscChannel {
    pub fn pair(capacity: usize) -> (Self, ChannelPeer) {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                inbound: Mutex::new(inbound_rx),
                outbound: Mutex::new(Some(outbound_tx)),
            },
            ChannelPeer {
                inbound: inbound_tx,
                outbound: outbound_rx,
            },
        )
    }
}

impl Channel for MpscChannel {
    fn receive(&self) -> Result<Frame, ChannelError> {
        self.inbound.lock().blocking_recv().ok_or(ChannelError::Closed)
    }

    fn send(&self, frame: Frame) -> Result<(), ChannelError> {
        let sender = self.outbound.lock().clone().ok_or(ChannelError::Closed)?;
        sender.blocking_send(frame).map_err(|_| ChannelError::Closed)
    }

    fn close(&self) {
        self.outbound.lock().take();
    }
}
