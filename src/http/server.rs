//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Wire the root container from the loaded configuration
//! - Assemble the middleware pipeline in its fixed order
//! - Create the Axum router with a single fallback handler
//! - Hand each request to the dispatcher on the blocking pool
//! - Bridge accepted WebSocket upgrades to their sessions
//! - Serve with graceful shutdown and drain in-flight work

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade as UpgradeRequest},
        ws::rejection::WebSocketUpgradeRejection,
        ConnectInfo, Request, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{ServerConfig, WebSocketConfig};
use crate::container::{Container, ContainerError, Implements, Injectable};
use crate::http::context::ContextFactory;
use crate::http::response::ResponseBody;
use crate::http::transport::{Outgoing, RawRequest, RawResponse};
use crate::http::websocket::{ChannelPeer, Frame, MpscChannel, PendingSession, WebSocketHandler};
use crate::http::RequestContext;
use crate::middleware::{
    AccessLog, ApiCall, ApiController, ApiDispatch, ApiResult, Cors, ErrorTranslation, StaticFiles,
    WebSocketUpgrade,
};
use crate::net::{ActivityGuard, ActivityTracker};
use crate::observability::metrics;
use crate::pipeline::{
    DispatchHooks, DispatchSettings, Dispatcher, LoggingHooks, Middleware, MiddlewareResult, Next,
    Pipeline,
};

/// Collects routes, middlewares and hooks before the server is built.
pub struct ServerBuilder {
    config: ServerConfig,
    root: Arc<Container>,
    middlewares: Pipeline,
    websockets: WebSocketUpgrade,
    api: ApiDispatch,
    hooks: Arc<dyn DispatchHooks>,
}

impl ServerBuilder {
    /// Start from a configuration. The root container is created with the
    /// configured depth limit.
    pub fn new(config: ServerConfig) -> Self {
        let root = Container::with_max_depth(config.container.max_depth);
        let api = ApiDispatch::new(&config.api.prefix);
        Self {
            config,
            root,
            middlewares: Pipeline::new(),
            websockets: WebSocketUpgrade::new(),
            api,
            hooks: Arc::new(LoggingHooks),
        }
    }

    /// The root container, for application registrations.
    pub fn container(&self) -> &Arc<Container> {
        &self.root
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Append a middleware after the built-in stages.
    pub fn use_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.use_middleware(middleware);
        self
    }

    /// Append a closure middleware after the built-in stages.
    pub fn use_fn<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&Container, &mut RequestContext, Next<'_>) -> MiddlewareResult + Send + Sync + 'static,
    {
        self.middlewares.use_fn(name, f);
        self
    }

    /// Route WebSocket upgrades on `path` to `handler`.
    pub fn websocket(mut self, path: &str, handler: impl WebSocketHandler + 'static) -> Self {
        self.websockets.add_route(path, Arc::new(handler));
        self
    }

    pub fn controller<C: ApiController>(mut self) -> Self {
        self.api.add_controller::<C>();
        self
    }

    pub fn endpoint<F>(mut self, name: &str, endpoint: F) -> Self
    where
        F: Fn(&mut ApiCall<'_>) -> ApiResult + Send + Sync + 'static,
    {
        self.api.add_endpoint(name, endpoint);
        self
    }

    pub fn hooks(mut self, hooks: impl DispatchHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Replace how request contexts are built.
    pub fn context_factory<F>(self) -> Result<Self, ContainerError>
    where
        F: Injectable + Implements<dyn ContextFactory>,
    {
        self.root.register_as::<dyn ContextFactory, F>(None)?;
        Ok(self)
    }

    /// Register the configuration sections, assemble the pipeline and create
    /// the dispatcher.
    pub fn build(self) -> Result<HttpServer, ContainerError> {
        let ServerBuilder {
            config,
            root,
            middlewares,
            websockets,
            api,
            hooks,
        } = self;

        root.register_instance(config.clone(), None)?;
        root.register_instance(config.http.clone(), None)?;
        root.register_instance(config.static_files.clone(), None)?;
        root.register_instance(config.cors.clone(), None)?;
        root.register_instance(config.api.clone(), None)?;
        root.register_instance(config.websocket.clone(), None)?;

        let pipeline = assemble_pipeline(&config, middlewares, websockets, api);
        tracing::info!(stages = ?pipeline.names(), "Pipeline assembled");

        let server_header = Some(config.http.server_header.clone()).filter(|h| !h.is_empty());
        let settings = DispatchSettings {
            server_header,
            default_headers: config.http.default_headers,
            expose_errors: config.http.expose_errors,
        };
        let dispatcher = Dispatcher::new(root, pipeline, hooks, settings)?;
        let tracker = ActivityTracker::new(config.listener.max_connections);

        Ok(HttpServer {
            dispatcher: Arc::new(dispatcher),
            tracker: Arc::new(tracker),
            config,
        })
    }
}

/// Built-in stages first, in their fixed order, then user middlewares.
fn assemble_pipeline(
    config: &ServerConfig,
    middlewares: Pipeline,
    websockets: WebSocketUpgrade,
    api: ApiDispatch,
) -> Pipeline {
    let mut pipeline = Pipeline::new();
    if config.observability.access_log {
        pipeline.use_middleware(AccessLog);
    }
    pipeline.use_middleware(ErrorTranslation::new(config.http.expose_errors));
    if config.cors.enabled {
        pipeline.use_middleware(Cors::from_config(&config.cors));
    }
    if !websockets.is_empty() {
        pipeline.use_middleware(websockets);
    }
    if config.static_files.enabled {
        pipeline.use_middleware(StaticFiles::from_config(&config.static_files));
    }
    if config.api.enabled && !api.is_empty() {
        pipeline.use_middleware(api);
    }
    for (index, stage) in middlewares.stages().iter().enumerate() {
        tracing::trace!(index, middleware = stage.name(), "Appending user middleware");
        pipeline.use_shared(Arc::clone(stage));
    }
    pipeline
}

/// Application state injected into the fallback handler.
#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    tracker: Arc<ActivityTracker>,
    max_body_size: usize,
    websocket: WebSocketConfig,
}

/// HTTP front end over the dispatcher.
pub struct HttpServer {
    dispatcher: Arc<Dispatcher>,
    tracker: Arc<ActivityTracker>,
    config: ServerConfig,
}

impl HttpServer {
    /// Start building a server from `config`.
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn tracker(&self) -> &Arc<ActivityTracker> {
        &self.tracker
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: Arc::clone(&self.dispatcher),
            tracker: Arc::clone(&self.tracker),
            max_body_size: self.config.http.max_body_size,
            websocket: self.config.websocket.clone(),
        };
        Router::new()
            .fallback(dispatch_handler)
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(self.config.http.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.http.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server on `listener` until `shutdown` resolves, then drain
    /// requests and sessions and dispose the root container.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        let grace = Duration::from_secs(self.config.http.shutdown_timeout_secs);
        if !self.tracker.wait_idle(grace).await {
            tracing::warn!(
                active_requests = self.tracker.active_requests(),
                active_sessions = self.tracker.active_sessions(),
                "Shutdown timeout reached with activity still running"
            );
        }
        self.dispatcher.root().dispose();

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// The only handler: every request goes through the dispatcher.
async fn dispatch_handler(
    State(state): State<AppState>,
    upgrade: Result<UpgradeRequest, WebSocketUpgradeRejection>,
    request: Request,
) -> HttpResponse {
    let Some(guard) = state.tracker.try_track_request() else {
        tracing::warn!(
            active_requests = state.tracker.active_requests(),
            "Request limit reached; refusing"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Server busy").into_response();
    };

    metrics::request_started();
    let response = dispatch_request(&state, upgrade, request).await;
    metrics::request_finished();
    drop(guard);
    response
}

async fn dispatch_request(
    state: &AppState,
    upgrade: Result<UpgradeRequest, WebSocketUpgradeRejection>,
    request: Request,
) -> HttpResponse {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let raw = RawRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
        remote_addr,
    };
    let (sink, outgoing) = RawResponse::channel();
    let dispatcher = Arc::clone(&state.dispatcher);
    tokio::task::spawn_blocking(move || dispatcher.dispatch(raw, sink));

    let mut outgoing = match outgoing.await {
        Ok(outgoing) => outgoing,
        Err(_) => {
            tracing::error!("Dispatcher finished without a response");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    match outgoing.upgrade.take() {
        Some(pending) => upgrade_response(state, upgrade, pending, outgoing),
        None => into_http_response(outgoing),
    }
}

fn into_http_response(outgoing: Outgoing) -> HttpResponse {
    let body = match outgoing.body {
        ResponseBody::Empty => Body::empty(),
        ResponseBody::Bytes(bytes) => Body::from(bytes),
        ResponseBody::File(window) => Body::from_stream(window.into_stream()),
    };
    let mut response = HttpResponse::new(body);
    *response.status_mut() = outgoing.status;
    *response.headers_mut() = outgoing.headers;
    response
}

fn upgrade_response(
    state: &AppState,
    upgrade: Result<UpgradeRequest, WebSocketUpgradeRejection>,
    pending: PendingSession,
    outgoing: Outgoing,
) -> HttpResponse {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::debug!(path = %pending.path(), error = %rejection, "Upgrade accepted but not possible");
            return rejection.into_response();
        }
    };

    let mut upgrade = upgrade.max_message_size(state.websocket.max_message_size);
    if let Some(protocol) = pending.protocol() {
        upgrade = upgrade.protocols([protocol.to_owned()]);
    }

    let queue = state.websocket.max_frame_queue;
    let session_guard = state.tracker.track_session();
    let mut response = upgrade
        .on_failed_upgrade(|e| tracing::debug!(error = %e, "WebSocket handshake failed"))
        .on_upgrade(move |socket| bridge(socket, pending, queue, session_guard));

    for (name, value) in outgoing.headers.iter() {
        if !response.headers().contains_key(name) {
            response.headers_mut().append(name.clone(), value.clone());
        }
    }
    response
}

/// Pump frames between the socket and a session running on the blocking pool.
async fn bridge(socket: WebSocket, pending: PendingSession, queue: usize, guard: ActivityGuard) {
    let activity_id = guard.id();
    let (mut sink, mut stream) = socket.split();
    let (channel, peer) = MpscChannel::pair(queue);
    let ChannelPeer {
        inbound,
        mut outbound,
    } = peer;

    let reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            let frame = match message {
                Ok(Message::Text(text)) => Frame::Text(text.as_str().to_owned()),
                Ok(Message::Binary(data)) => Frame::Binary(data.to_vec()),
                Ok(Message::Close(_)) => Frame::Close,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Err(e) => {
                    tracing::debug!(activity_id = %activity_id, error = %e, "WebSocket read failed");
                    break;
                }
            };
            let closing = matches!(frame, Frame::Close);
            if inbound.send(frame).await.is_err() || closing {
                break;
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let message = match frame {
                Frame::Text(text) => Message::Text(text.into()),
                Frame::Binary(data) => Message::Binary(data.into()),
                Frame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    match tokio::task::spawn_blocking(move || pending.run(Box::new(channel))).await {
        Ok(end) => tracing::debug!(activity_id = %guard.id(), reason = ?end, "WebSocket bridge finished"),
        Err(e) => tracing::error!(activity_id = %guard.id(), error = %e, "WebSocket session task failed"),
    }
    reader.abort();
    let _ = writer.await;
    drop(guard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;

    #[test]
    fn built_in_stages_precede_user_middlewares() {
        let mut config = ServerConfig::default();
        config.cors.enabled = true;
        config.static_files.enabled = true;

        let server = ServerBuilder::new(config)
            .websocket("/ws", Echo)
            .endpoint("ping", |_call: &mut ApiCall<'_>| Ok(serde_json::json!("pong")))
            .use_fn("user", |scope: &Container, ctx: &mut RequestContext, next: Next<'_>| {
                next.run(scope, ctx)
            })
            .build()
            .unwrap();

        assert_eq!(
            server.dispatcher().pipeline().names(),
            vec![
                "access_log",
                "error_translation",
                "cors",
                "websocket_upgrade",
                "static_files",
                "api",
                "user",
            ]
        );
    }

    #[test]
    fn build_registers_config_sections() {
        let mut config = ServerConfig::default();
        config.http.expose_errors = true;
        let server = ServerBuilder::new(config).build().unwrap();
        let root = server.dispatcher().root();
        assert!(root.get::<HttpConfig>().unwrap().expose_errors);
        assert!(root.has::<WebSocketConfig>(None));
        assert!(root.has_interface::<dyn ContextFactory>(None));
    }

    #[test]
    fn bytes_body_becomes_http_response() {
        let outgoing = Outgoing::bare(
            StatusCode::IM_A_TEAPOT,
            "short and stout",
            crate::pipeline::DispatchOutcome::ShortCircuited,
        );
        let response = into_http_response(outgoing);
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(
            response.headers()["content-type"],
            "text/plain; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn router_dispatches_without_a_socket() {
        use tower::ServiceExt;

        let server = ServerBuilder::new(ServerConfig::default())
            .endpoint("ping", |_call: &mut ApiCall<'_>| Ok(serde_json::json!("pong")))
            .build()
            .unwrap();
        let request = axum::http::Request::builder()
            .uri("/api/ping")
            .body(Body::empty())
            .unwrap();

        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"\"pong\"");
    }

    #[tokio::test]
    async fn requests_over_the_limit_are_refused() {
        use tower::ServiceExt;

        let mut config = ServerConfig::default();
        config.listener.max_connections = 0;
        let server = ServerBuilder::new(config).build().unwrap();
        let request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    struct Echo;

    impl WebSocketHandler for Echo {}
}
