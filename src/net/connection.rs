//! In-flight work tracking.
//!
//! # Responsibilities
//! - Enforce `max_connections` on concurrently dispatching requests
//! - Count open WebSocket sessions
//! - Tag each tracked request and session with an id carried in trace events
//! - Let shutdown wait until everything in flight has finished

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

/// Global atomic counter for activity IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static ACTIVITY_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a tracked request or session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivityId(u64);

impl ActivityId {
    pub fn new() -> Self {
        Self(ACTIVITY_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ActivityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActivityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "act-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Request,
    Session,
}

/// Tracks in-flight requests and sessions for backpressure and graceful
/// shutdown.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    request_limit: Arc<Semaphore>,
    max_requests: usize,
    sessions: Arc<AtomicU64>,
    /// Total in flight; watched by `wait_idle`.
    active: Arc<watch::Sender<u64>>,
}

impl ActivityTracker {
    pub fn new(max_requests: usize) -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            request_limit: Arc::new(Semaphore::new(max_requests)),
            max_requests,
            sessions: Arc::new(AtomicU64::new(0)),
            active: Arc::new(tx),
        }
    }

    /// Admit a request, or `None` when `max_requests` are already in flight.
    pub fn try_track_request(&self) -> Option<ActivityGuard> {
        let permit = Arc::clone(&self.request_limit).try_acquire_owned().ok()?;
        Some(self.guard(ActivityKind::Request, Some(permit)))
    }

    /// Record an open session; sessions are not limited.
    pub fn track_session(&self) -> ActivityGuard {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        self.guard(ActivityKind::Session, None)
    }

    fn guard(&self, kind: ActivityKind, permit: Option<OwnedSemaphorePermit>) -> ActivityGuard {
        self.active.send_modify(|n| *n += 1);
        let id = ActivityId::new();
        tracing::trace!(activity_id = %id, kind = ?kind, "Activity started");
        ActivityGuard {
            id,
            kind,
            active: Arc::clone(&self.active),
            sessions: Arc::clone(&self.sessions),
            _permit: permit,
        }
    }

    pub fn active_requests(&self) -> usize {
        self.max_requests - self.request_limit.available_permits()
    }

    pub fn active_sessions(&self) -> u64 {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Wait until nothing is in flight. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.active.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

/// Guard that tracks one request's or session's lifetime.
/// Decrements the counts when dropped.
#[derive(Debug)]
pub struct ActivityGuard {
    id: ActivityId,
    kind: ActivityKind,
    active: Arc<watch::Sender<u64>>,
    sessions: Arc<AtomicU64>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl ActivityGuard {
    pub fn id(&self) -> ActivityId {
        self.id
    }

    pub fn kind(&self) -> ActivityKind {
        self.kind
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        if self.kind == ActivityKind::Session {
            self.sessions.fetch_sub(1, Ordering::SeqCst);
        }
        self.active.send_modify(|n| *n = n.saturating_sub(1));
        tracing::trace!(activity_id = %self.id, kind = ?self.kind, "Activity finished");
    }
}
