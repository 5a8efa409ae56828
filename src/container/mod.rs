//! Dependency-injection container subsystem.
//!
//! # Data Flow
//! ```text
//! startup:
//!     register::<T>() / register_as::<dyn I, T>() / register_instance(v)
//!     → Binding appended to the root registry (same identity replaces)
//!
//! per request:
//!     root.create_container()          (request scope, owned by root)
//!     → scope.get::<T>() / get_interface::<dyn I>()
//!         → local bindings → parent chain → NotRegistered / default
//!         → first use builds from the cached TypeDescriptor (richest ctor,
//!           then properties), depth-bounded
//!     → scope.dispose()                (children first, then bindings)
//! ```
//!
//! # Design Decisions
//! - Parent owns children (`Arc`); a child only holds a `Weak` back-reference
//!   used for upward lookup
//! - Singletons are cached per binding; first construction is serialized per
//!   binding, never globally
//! - Cycles are caught by a depth counter, not graph colouring
//! - Descriptor metadata lives in one cache owned by the root and shared with
//!   every scope

pub mod binding;
pub mod descriptor;
pub mod error;
mod resolve;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

pub use binding::{Implements, TypeKey};
pub use descriptor::{Arguments, DescriptorCache, Injectable, Param, TypeDescriptor};
pub use error::ContainerError;

use binding::Binding;

/// Depth limit used when none is configured.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// A DI registry plus resolution logic; either a root or a child scope.
pub struct Container {
    bindings: RwLock<Vec<Arc<Binding>>>,
    parent: Weak<Container>,
    children: Mutex<Vec<Arc<Container>>>,
    descriptors: Arc<DescriptorCache>,
    max_depth: usize,
    disposed: AtomicBool,
}

impl Container {
    /// Create a root container with the default depth limit.
    pub fn new() -> Arc<Self> {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    /// Create a root container with a custom depth limit.
    pub fn with_max_depth(max_depth: usize) -> Arc<Self> {
        Arc::new(Self {
            bindings: RwLock::new(Vec::new()),
            parent: Weak::new(),
            children: Mutex::new(Vec::new()),
            descriptors: Arc::new(DescriptorCache::new()),
            max_depth,
            disposed: AtomicBool::new(false),
        })
    }

    /// Create a child scope tracked in this container's children.
    pub fn create_container(self: &Arc<Self>) -> Arc<Container> {
        let child = Arc::new(Self {
            bindings: RwLock::new(Vec::new()),
            parent: Arc::downgrade(self),
            children: Mutex::new(Vec::new()),
            descriptors: Arc::clone(&self.descriptors),
            max_depth: self.max_depth,
            disposed: AtomicBool::new(false),
        });
        self.children.lock().push(Arc::clone(&child));
        child
    }

    // --- Registration ---

    /// Register concrete `T`, built from its descriptor on first `get`.
    pub fn register<T: Injectable>(&self) -> Result<(), ContainerError> {
        self.ensure_constructible::<T>()?;
        self.insert(Binding::constructed::<T>(None))
    }

    /// Register concrete `T` under a name.
    pub fn register_named<T: Injectable>(&self, name: impl Into<String>) -> Result<(), ContainerError> {
        self.ensure_constructible::<T>()?;
        self.insert(Binding::constructed::<T>(Some(name.into())))
    }

    /// Register `T` as an implementation of interface `I`.
    pub fn register_as<I, T>(&self, name: Option<&str>) -> Result<(), ContainerError>
    where
        I: ?Sized + 'static,
        T: Injectable + Implements<I>,
    {
        self.ensure_constructible::<T>()?;
        self.insert(Binding::constructed_as::<I, T>(name.map(str::to_owned)))
    }

    /// Register a pre-built value, returned verbatim by every future `get`.
    pub fn register_instance<T: Send + Sync + 'static>(
        &self,
        value: T,
        name: Option<&str>,
    ) -> Result<Arc<T>, ContainerError> {
        let value = Arc::new(value);
        self.insert(Binding::instance(Arc::clone(&value), name.map(str::to_owned)))?;
        Ok(value)
    }

    /// Register an already shared value.
    pub fn register_shared<T: Send + Sync + 'static>(
        &self,
        value: Arc<T>,
        name: Option<&str>,
    ) -> Result<(), ContainerError> {
        self.insert(Binding::instance(value, name.map(str::to_owned)))
    }

    /// Register a pre-built value as an implementation of interface `I`.
    pub fn register_instance_as<I, T>(&self, value: T, name: Option<&str>) -> Result<Arc<T>, ContainerError>
    where
        I: ?Sized + 'static,
        T: Implements<I>,
    {
        let value = Arc::new(value);
        self.insert(Binding::instance_as::<I, T>(Arc::clone(&value), name.map(str::to_owned)))?;
        Ok(value)
    }

    fn ensure_constructible<T: Injectable>(&self) -> Result<(), ContainerError> {
        if self.descriptors.descriptor::<T>().constructor_count() == 0 {
            return Err(ContainerError::NotConstructible {
                type_name: std::any::type_name::<T>(),
            });
        }
        Ok(())
    }

    fn insert(&self, binding: Binding) -> Result<(), ContainerError> {
        if self.is_disposed() {
            return Err(ContainerError::Disposed);
        }
        tracing::trace!(
            interface = binding.interface.map(|k| k.name),
            concrete = binding.concrete.name,
            name = ?binding.name,
            "Binding registered"
        );
        let mut bindings = self.bindings.write();
        bindings.retain(|existing| !existing.same_slot(&binding));
        bindings.push(Arc::new(binding));
        Ok(())
    }

    // --- Queries ---

    /// Whether a lookup of concrete `T` under `name` would find a binding here
    /// or above.
    ///
    /// Names only pick between several candidates, so this agrees with
    /// [`Container::get_named`]: a lone binding answers to any name.
    pub fn has<T: ?Sized + 'static>(&self, name: Option<&str>) -> bool {
        let key = TypeKey::of::<T>();
        self.any_selected(|b| b.concrete.id == key.id, name)
    }

    /// Whether a lookup of interface `I` under `name` would find a binding,
    /// following the same selection as [`Container::get_interface`].
    pub fn has_interface<I: ?Sized + 'static>(&self, name: Option<&str>) -> bool {
        let key = TypeKey::of::<I>();
        self.any_selected(|b| b.interface.map(|k| k.id) == Some(key.id), name)
    }

    fn any_selected(&self, pred: impl Fn(&Binding) -> bool + Copy, name: Option<&str>) -> bool {
        if self.select(pred, name).is_some() {
            return true;
        }
        match self.parent() {
            Some(parent) => parent.any_selected(pred, name),
            None => false,
        }
    }

    /// Pick the binding for a lookup: the only candidate, else the most recent
    /// one registered under `name`, else the most recent candidate.
    fn select(&self, pred: impl Fn(&Binding) -> bool, name: Option<&str>) -> Option<Arc<Binding>> {
        let bindings = self.bindings.read();
        let candidates: Vec<&Arc<Binding>> = bindings.iter().filter(|b| pred(b)).collect();
        match candidates.as_slice() {
            [] => None,
            [only] => Some(Arc::clone(only)),
            many => name
                .and_then(|n| many.iter().rev().find(|b| b.matches_name(n)))
                .or_else(|| many.last())
                .map(|b| Arc::clone(b)),
        }
    }

    pub fn parent(&self) -> Option<Arc<Container>> {
        self.parent.upgrade()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn descriptors(&self) -> &DescriptorCache {
        &self.descriptors
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    // --- Disposal ---

    /// Dispose children (recursively), then clear local bindings. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            child.dispose();
        }
        let released = std::mem::take(&mut *self.bindings.write());
        drop(released);

        if let Some(parent) = self.parent() {
            parent.detach(self);
        }
    }

    fn detach(&self, child: &Container) {
        self.children
            .lock()
            .retain(|existing| !std::ptr::eq(Arc::as_ptr(existing), child));
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("bindings", &self.binding_count())
            .field("children", &self.child_count())
            .field("has_parent", &self.parent().is_some())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Clock;

    impl Injectable for Clock {
        fn describe() -> TypeDescriptor<Self> {
            TypeDescriptor::from_default()
        }
    }

    struct Abstract;

    impl Injectable for Abstract {
        fn describe() -> TypeDescriptor<Self> {
            TypeDescriptor::new()
        }
    }

    #[test]
    fn registering_without_constructor_fails_fast() {
        let root = Container::new();
        let err = root.register::<Abstract>().unwrap_err();
        assert!(matches!(err, ContainerError::NotConstructible { .. }));
        assert_eq!(root.binding_count(), 0);
    }

    #[test]
    fn re_registration_replaces_same_slot() {
        let root = Container::new();
        root.register::<Clock>().unwrap();
        root.register::<Clock>().unwrap();
        root.register_named::<Clock>("wall").unwrap();
        assert_eq!(root.binding_count(), 2);
    }

    #[test]
    fn disposed_child_detaches_from_parent() {
        let root = Container::new();
        let child = root.create_container();
        let _grandchild = child.create_container();
        assert_eq!(root.child_count(), 1);

        child.dispose();
        assert_eq!(root.child_count(), 0);
        assert_eq!(child.child_count(), 0);
        assert!(child.is_disposed());
    }

    #[test]
    fn registering_into_disposed_container_fails() {
        let root = Container::new();
        root.dispose();
        assert_eq!(root.register::<Clock>(), Err(ContainerError::Disposed));
    }

    #[test]
    fn has_checks_parents() {
        let root = Container::new();
        root.register_named::<Clock>("wall").unwrap();
        let child = root.create_container();
        assert!(child.has::<Clock>(None));
        assert!(child.has::<Clock>(Some("wall")));
        assert!(!child.has::<u32>(None));
    }

    #[test]
    fn has_agrees_with_named_lookup() {
        let root = Container::new();
        root.register_instance(7u32, Some("a")).unwrap();
        assert!(root.has::<u32>(Some("b")));
        assert_eq!(*root.get_named::<u32>("b").unwrap(), 7);

        root.dispose();
        assert!(!root.has::<u32>(Some("b")));
    }
}
