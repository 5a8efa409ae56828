//! API method dispatch.
//!
//! # Data Flow
//! ```text
//! {prefix}/{controller}/{action}
//!     → controller entry (registered at startup)
//!     → scope.new_instance::<C>()           (fresh per request)
//!     → action(&controller, &mut ApiCall)
//!         → call.arg::<T>("name")           (body → query → cookies → headers)
//!     → serde_json::Value written as application/json
//! {prefix}/{endpoint}
//!     → closure endpoint, same binding rules
//! ```
//!
//! Unknown controllers, actions and endpoints continue down the chain.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::container::{Container, Injectable};
use crate::http::{Request, RequestContext, Response};
use crate::pipeline::{Middleware, MiddlewareResult, Next, PipelineError};

pub type ApiResult = Result<Value, PipelineError>;

type ActionFn<C> = Arc<dyn Fn(&C, &mut ApiCall<'_>) -> ApiResult + Send + Sync>;
type EndpointFn = Arc<dyn Fn(&mut ApiCall<'_>) -> ApiResult + Send + Sync>;

/// Arguments and response access for one API call.
pub struct ApiCall<'a> {
    scope: &'a Container,
    request: &'a Request,
    response: &'a mut Response,
}

impl<'a> ApiCall<'a> {
    pub fn scope(&self) -> &Container {
        self.scope
    }

    pub fn request(&self) -> &Request {
        self.request
    }

    pub fn response(&mut self) -> &mut Response {
        &mut *self.response
    }

    /// Bind a required argument by name.
    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> Result<T, PipelineError> {
        self.opt_arg(name)?
            .ok_or_else(|| PipelineError::argument(name, "missing"))
    }

    /// Bind an optional argument by name. Present but unparsable is an error.
    pub fn opt_arg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, PipelineError> {
        match self.request.param(name) {
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|e| PipelineError::argument(name, e)),
            None => Ok(None),
        }
    }

    pub fn arg_or<T: DeserializeOwned>(&self, name: &str, default: T) -> Result<T, PipelineError> {
        Ok(self.opt_arg(name)?.unwrap_or(default))
    }
}

/// The action list of a controller.
pub struct Actions<C> {
    entries: Vec<(String, Option<Method>, ActionFn<C>)>,
}

impl<C> Actions<C> {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Action reachable with any method.
    pub fn any<F>(&mut self, name: &str, action: F) -> &mut Self
    where
        F: Fn(&C, &mut ApiCall<'_>) -> ApiResult + Send + Sync + 'static,
    {
        self.entries.push((name.to_string(), None, Arc::new(action)));
        self
    }

    pub fn get<F>(&mut self, name: &str, action: F) -> &mut Self
    where
        F: Fn(&C, &mut ApiCall<'_>) -> ApiResult + Send + Sync + 'static,
    {
        self.entries.push((name.to_string(), Some(Method::GET), Arc::new(action)));
        self
    }

    pub fn post<F>(&mut self, name: &str, action: F) -> &mut Self
    where
        F: Fn(&C, &mut ApiCall<'_>) -> ApiResult + Send + Sync + 'static,
    {
        self.entries.push((name.to_string(), Some(Method::POST), Arc::new(action)));
        self
    }
}

/// A type whose methods are exposed under `{prefix}/{NAME}/{action}`.
///
/// ```ignore
/// impl ApiController for Users {
///     const NAME: &'static str = "users";
///     fn actions(actions: &mut Actions<Self>) {
///         actions.get("find", |users, call| users.find(call.arg("id")?));
///     }
/// }
/// ```
pub trait ApiController: Injectable {
    const NAME: &'static str;

    fn actions(actions: &mut Actions<Self>);
}

/// Type-erased controller entry.
trait ControllerEntry: Send + Sync {
    /// `None` when the controller has no such action.
    fn call(&self, action: &str, method: &Method, call: &mut ApiCall<'_>) -> Option<ApiResult>;
}

struct Controller<C> {
    actions: Actions<C>,
}

impl<C: ApiController> ControllerEntry for Controller<C> {
    fn call(&self, action: &str, method: &Method, call: &mut ApiCall<'_>) -> Option<ApiResult> {
        let matching: Vec<_> = self
            .actions
            .entries
            .iter()
            .filter(|(name, _, _)| name.eq_ignore_ascii_case(action))
            .collect();
        if matching.is_empty() {
            return None;
        }
        let Some((_, _, handler)) = matching
            .iter()
            .find(|(_, allowed, _)| allowed.as_ref().map_or(true, |m| m == method))
        else {
            let allow: Vec<&str> = matching
                .iter()
                .filter_map(|(_, allowed, _)| allowed.as_ref().map(Method::as_str))
                .collect();
            call.response.set_status(StatusCode::METHOD_NOT_ALLOWED);
            call.response.set_header(header::ALLOW.as_str(), &allow.join(", "));
            return Some(Ok(Value::Null));
        };

        Some(
            call.scope
                .new_instance::<C>()
                .map_err(PipelineError::from)
                .and_then(|controller| handler(&controller, call)),
        )
    }
}

/// Routes API calls to controllers and closure endpoints.
pub struct ApiDispatch {
    prefix: String,
    controllers: HashMap<String, Arc<dyn ControllerEntry>>,
    endpoints: HashMap<String, EndpointFn>,
}

impl ApiDispatch {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            controllers: HashMap::new(),
            endpoints: HashMap::new(),
        }
    }

    pub fn controller<C: ApiController>(mut self) -> Self {
        self.add_controller::<C>();
        self
    }

    pub fn add_controller<C: ApiController>(&mut self) {
        let mut actions = Actions::new();
        C::actions(&mut actions);
        tracing::debug!(controller = C::NAME, actions = actions.entries.len(), "API controller registered");
        self.controllers
            .insert(C::NAME.to_ascii_lowercase(), Arc::new(Controller::<C> { actions }));
    }

    pub fn endpoint<F>(mut self, name: &str, endpoint: F) -> Self
    where
        F: Fn(&mut ApiCall<'_>) -> ApiResult + Send + Sync + 'static,
    {
        self.add_endpoint(name, endpoint);
        self
    }

    pub fn add_endpoint<F>(&mut self, name: &str, endpoint: F)
    where
        F: Fn(&mut ApiCall<'_>) -> ApiResult + Send + Sync + 'static,
    {
        self.endpoints
            .insert(name.trim_matches('/').to_ascii_lowercase(), Arc::new(endpoint));
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty() && self.endpoints.is_empty()
    }

    /// Split `{prefix}/a/b` into its lowercase route segments.
    fn route<'p>(&self, path: &'p str) -> Option<Vec<&'p str>> {
        let rest = path.strip_prefix(&self.prefix)?;
        let rest = rest.strip_prefix('/')?;
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        (!segments.is_empty()).then_some(segments)
    }

    fn write_result(ctx: &mut RequestContext, value: Value) -> MiddlewareResult {
        if ctx.response.body().is_empty() && ctx.response.status() == StatusCode::OK {
            if value.is_null() {
                ctx.response.set_status(StatusCode::NO_CONTENT);
            } else {
                ctx.response.write_json(&value)?;
            }
        } else if !value.is_null() && ctx.response.body().is_empty() {
            ctx.response.write_json(&value)?;
        }
        Ok(())
    }
}

impl Middleware for ApiDispatch {
    fn invoke(&self, scope: &Container, ctx: &mut RequestContext, next: Next<'_>) -> MiddlewareResult {
        let path = ctx.request.path().to_ascii_lowercase();
        let Some(segments) = self.route(&path) else {
            return next.run(scope, ctx);
        };
        let method = ctx.request.method().clone();

        let RequestContext { request, response, .. } = &mut *ctx;
        let mut call = ApiCall {
            scope,
            request,
            response,
        };

        let outcome = match segments.as_slice() {
            [controller, action] => self
                .controllers
                .get(*controller)
                .and_then(|entry| entry.call(action, &method, &mut call)),
            [endpoint] => self
                .endpoints
                .get(*endpoint)
                .map(|endpoint| endpoint(&mut call)),
            _ => None,
        };

        match outcome {
            Some(result) => {
                tracing::debug!(path = %path, method = %method, ok = result.is_ok(), "API call dispatched");
                Self::write_result(ctx, result?)
            }
            None => next.run(scope, ctx),
        }
    }

    fn name(&self) -> &str {
        "api"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::TypeDescriptor;
    use crate::http::RawRequest;

    #[derive(Default)]
    struct Maths;

    impl Injectable for Maths {
        fn describe() -> TypeDescriptor<Self> {
            TypeDescriptor::from_default()
        }
    }

    impl ApiController for Maths {
        const NAME: &'static str = "maths";

        fn actions(actions: &mut Actions<Self>) {
            actions.get("add", |_, call| {
                let a: i64 = call.arg("a")?;
                let b: i64 = call.arg_or("b", 0)?;
                Ok(serde_json::json!({ "sum": a + b }))
            });
        }
    }

    #[test]
    fn routes_strip_prefix() {
        let api = ApiDispatch::new("/api/");
        assert_eq!(api.route("/api/maths/add"), Some(vec!["maths", "add"]));
        assert_eq!(api.route("/api/ping"), Some(vec!["ping"]));
        assert_eq!(api.route("/api"), None);
        assert_eq!(api.route("/apix/maths"), None);
    }

    #[test]
    fn controller_action_binds_arguments() {
        let api = ApiDispatch::new("/api").controller::<Maths>();
        let root = Container::new();
        let raw = Arc::new(RawRequest::new(Method::GET, "/api/maths/add?a=2&b=3".parse().unwrap()));
        let request = Request::from_raw(raw, false);
        let mut response = Response::new();
        let mut call = ApiCall {
            scope: &root,
            request: &request,
            response: &mut response,
        };

        let entry = api.controllers.get("maths").unwrap();
        let value = entry.call("add", &Method::GET, &mut call).unwrap().unwrap();
        assert_eq!(value, serde_json::json!({ "sum": 5 }));

        assert!(entry.call("missing", &Method::GET, &mut call).is_none());
        let _ = entry.call("add", &Method::POST, &mut call).unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
