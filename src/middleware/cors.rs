//! Cross-origin resource sharing.
//!
//! Adds `Access-Control-Allow-*` headers for allowed origins before the rest
//! of the chain runs, and answers preflights itself.

use axum::http::{header, Method, StatusCode};

use crate::config::CorsConfig;
use crate::container::Container;
use crate::http::RequestContext;
use crate::pipeline::{Middleware, MiddlewareResult, Next, PipelineError};

#[derive(Debug, Clone)]
pub struct Cors {
    any_origin: bool,
    origins: Vec<String>,
    methods: String,
    headers: Option<String>,
    exposed: Option<String>,
    credentials: bool,
    max_age_secs: u64,
}

impl Cors {
    pub fn from_config(config: &CorsConfig) -> Self {
        let join = |items: &[String]| Some(items.join(", ")).filter(|s| !s.is_empty());
        Self {
            any_origin: config.allowed_origins.iter().any(|o| o == "*"),
            origins: config
                .allowed_origins
                .iter()
                .map(|o| o.trim_end_matches('/').to_ascii_lowercase())
                .collect(),
            methods: join(&config.allowed_methods).unwrap_or_else(|| "GET, POST".to_string()),
            headers: join(&config.allowed_headers),
            exposed: join(&config.exposed_headers),
            credentials: config.allow_credentials,
            max_age_secs: config.max_age_secs,
        }
    }

    fn allows(&self, origin: &str) -> bool {
        self.any_origin || self.origins.iter().any(|o| o.eq_ignore_ascii_case(origin))
    }
}

impl Middleware for Cors {
    fn invoke(&self, scope: &Container, ctx: &mut RequestContext, next: Next<'_>) -> MiddlewareResult {
        let Some(origin) = ctx.request.header(header::ORIGIN.as_str()).map(str::to_owned) else {
            return next.run(scope, ctx);
        };
        if !self.allows(&origin) {
            tracing::debug!(origin = %origin, "CORS origin not allowed");
            return next.run(scope, ctx);
        }

        let response = &mut ctx.response;
        let allow_origin = if self.any_origin && !self.credentials { "*" } else { origin.as_str() };
        response.set_header(header::ACCESS_CONTROL_ALLOW_ORIGIN.as_str(), allow_origin);
        response.set_header(header::VARY.as_str(), "Origin");
        if self.credentials {
            response.set_header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS.as_str(), "true");
        }
        if let Some(exposed) = &self.exposed {
            response.set_header(header::ACCESS_CONTROL_EXPOSE_HEADERS.as_str(), exposed);
        }

        let preflight = ctx.request.method() == Method::OPTIONS
            && ctx
                .request
                .header(header::ACCESS_CONTROL_REQUEST_METHOD.as_str())
                .is_some();
        if !preflight {
            return next.run(scope, ctx);
        }

        let requested_headers = ctx
            .request
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS.as_str())
            .map(str::to_owned);
        let response = &mut ctx.response;
        response.set_header(header::ACCESS_CONTROL_ALLOW_METHODS.as_str(), &self.methods);
        if let Some(headers) = self.headers.as_deref().or(requested_headers.as_deref()) {
            response.set_header(header::ACCESS_CONTROL_ALLOW_HEADERS.as_str(), headers);
        }
        response.set_header(header::ACCESS_CONTROL_MAX_AGE.as_str(), &self.max_age_secs.to_string());
        response.set_status(StatusCode::OK);
        Err(PipelineError::End)
    }

    fn name(&self) -> &str {
        "cors"
    }
}
