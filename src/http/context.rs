//! Per-request context: request view, response view and item bag.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::container::{Container, ContainerError, Injectable, Param, TypeDescriptor};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::implements;

/// Free-form per-request storage shared by every middleware of one request.
#[derive(Default)]
pub struct Items {
    entries: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl Items {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.entries.lock().insert(key.into(), Arc::new(value));
    }

    /// The value under `key`, if present and of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.entries.lock().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for Items {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_set().entries(entries.keys()).finish()
    }
}

/// Everything a middleware sees about one request.
#[derive(Debug)]
pub struct RequestContext {
    pub request: Request,
    pub response: Response,
    items: Arc<Items>,
}

impl Injectable for RequestContext {
    fn describe() -> TypeDescriptor<Self> {
        TypeDescriptor::new().constructor(
            vec![
                Param::fresh::<Request>("request"),
                Param::fresh::<Response>("response"),
                Param::of::<Items>("items").default_with(|| Arc::new(Items::new())),
            ],
            |args| {
                Ok(RequestContext {
                    request: args.owned()?,
                    response: args.owned()?,
                    items: args.shared()?,
                })
            },
        )
    }
}

impl RequestContext {
    pub fn new(request: Request, response: Response) -> Self {
        Self {
            request,
            response,
            items: Arc::new(Items::new()),
        }
    }

    pub fn items(&self) -> &Items {
        &self.items
    }
}

/// Builds the request context from a request scope.
///
/// Register a different implementation on the root container to change how
/// requests, responses or contexts are made.
pub trait ContextFactory: Send + Sync {
    fn create(&self, scope: &Container) -> Result<RequestContext, ContainerError>;
}

/// Builds [`RequestContext`] from its descriptor.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultContextFactory;

impl Injectable for DefaultContextFactory {
    fn describe() -> TypeDescriptor<Self> {
        TypeDescriptor::from_default()
    }
}

impl ContextFactory for DefaultContextFactory {
    fn create(&self, scope: &Container) -> Result<RequestContext, ContainerError> {
        scope.new_instance::<RequestContext>()
    }
}

implements!(DefaultContextFactory => dyn ContextFactory);
