//! WebSocket upgrade routing.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::StatusCode;

use crate::container::Container;
use crate::http::websocket::{Negotiation, PendingSession, WebSocketHandler};
use crate::http::RequestContext;
use crate::pipeline::{Middleware, MiddlewareResult, Next};

/// Accepts upgrade requests for registered paths and stages the session for
/// the transport. Other requests continue down the chain.
#[derive(Default, Clone)]
pub struct WebSocketUpgrade {
    routes: HashMap<String, Arc<dyn WebSocketHandler>>,
}

impl WebSocketUpgrade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, path: &str, handler: Arc<dyn WebSocketHandler>) -> Self {
        self.add_route(path, handler);
        self
    }

    pub fn add_route(&mut self, path: &str, handler: Arc<dyn WebSocketHandler>) {
        self.routes.insert(path.to_string(), handler);
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Middleware for WebSocketUpgrade {
    fn invoke(&self, scope: &Container, ctx: &mut RequestContext, next: Next<'_>) -> MiddlewareResult {
        if !ctx.request.is_websocket_upgrade() {
            return next.run(scope, ctx);
        }
        let Some(handler) = self.routes.get(ctx.request.path()) else {
            return next.run(scope, ctx);
        };

        let offered = ctx.request.websocket_protocols();
        match handler.on_check(&ctx.request, &offered) {
            Negotiation::Reject => {
                tracing::info!(
                    path = %ctx.request.path(),
                    remote_addr = %ctx.request.remote_addr(),
                    "WebSocket upgrade rejected"
                );
                ctx.response.set_status(StatusCode::FORBIDDEN);
            }
            Negotiation::Accept(protocol) => {
                let session = PendingSession::new(
                    Arc::clone(handler),
                    ctx.request.path(),
                    ctx.request.remote_addr(),
                    protocol,
                );
                ctx.response.accept_upgrade(session);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "websocket_upgrade"
    }
}

impl std::fmt::Debug for WebSocketUpgrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketUpgrade")
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}
