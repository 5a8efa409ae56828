//! Binding records stored in a container's registry.

use std::any::{Any, TypeId};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::ReentrantMutex;

use crate::container::descriptor::{AnyArc, Injectable, Resolved};
use crate::container::error::ContainerError;
use crate::container::Container;

pub(crate) type BuildFn = fn(&Container, usize) -> Result<AnyArc, ContainerError>;
pub(crate) type UpcastFn = fn(AnyArc) -> Result<Resolved, ContainerError>;

/// Identity of a registered type (concrete or interface).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeKey {
    pub id: TypeId,
    pub name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

/// Connects a concrete type to an interface it can be resolved as.
///
/// Usually declared with [`implements!`](crate::implements).
pub trait Implements<I: ?Sized>: Send + Sync + 'static {
    fn upcast(self: Arc<Self>) -> Arc<I>;
}

/// Declare that a concrete type satisfies one or more trait-object interfaces.
///
/// ```ignore
/// implements!(Dog => dyn Animal);
/// ```
#[macro_export]
macro_rules! implements {
    ($ty:ty => $($iface:ty),+ $(,)?) => {
        $(
            impl $crate::container::Implements<$iface> for $ty {
                fn upcast(self: ::std::sync::Arc<Self>) -> ::std::sync::Arc<$iface> {
                    self
                }
            }
        )+
    };
}

/// A single registration: interface, concrete type, optional name and the
/// lazily built (or pre-built) instance.
pub(crate) struct Binding {
    pub interface: Option<TypeKey>,
    pub concrete: TypeKey,
    pub name: Option<String>,
    instance: OnceCell<AnyArc>,
    /// Serializes first construction of this binding only. Re-entrant so a
    /// same-thread cycle reaches the depth limit instead of deadlocking.
    init: ReentrantMutex<()>,
    build: Option<BuildFn>,
    upcast: Option<UpcastFn>,
}

impl Binding {
    /// Binding built on demand from `T`'s descriptor.
    pub fn constructed<T: Injectable>(name: Option<String>) -> Self {
        Self::new(None, TypeKey::of::<T>(), name, None, Some(build_shared::<T>), None)
    }

    /// Interface binding built on demand from `T`'s descriptor.
    pub fn constructed_as<I: ?Sized + 'static, T: Injectable + Implements<I>>(name: Option<String>) -> Self {
        Self::new(
            Some(TypeKey::of::<I>()),
            TypeKey::of::<T>(),
            name,
            None,
            Some(build_shared::<T>),
            Some(upcast::<I, T>),
        )
    }

    /// Binding wrapping a pre-built value.
    pub fn instance<T: Send + Sync + 'static>(value: Arc<T>, name: Option<String>) -> Self {
        Self::new(None, TypeKey::of::<T>(), name, Some(value as AnyArc), None, None)
    }

    /// Interface binding wrapping a pre-built value.
    pub fn instance_as<I: ?Sized + 'static, T: Implements<I>>(value: Arc<T>, name: Option<String>) -> Self {
        Self::new(
            Some(TypeKey::of::<I>()),
            TypeKey::of::<T>(),
            name,
            Some(value as AnyArc),
            None,
            Some(upcast::<I, T>),
        )
    }

    fn new(
        interface: Option<TypeKey>,
        concrete: TypeKey,
        name: Option<String>,
        instance: Option<AnyArc>,
        build: Option<BuildFn>,
        upcast: Option<UpcastFn>,
    ) -> Self {
        let cell = OnceCell::new();
        if let Some(instance) = instance {
            let _ = cell.set(instance);
        }
        Self {
            interface,
            concrete,
            name,
            instance: cell,
            init: ReentrantMutex::new(()),
            build,
            upcast,
        }
    }

    /// Whether a newer registration with the same identity replaces this one.
    pub fn same_slot(&self, other: &Binding) -> bool {
        self.interface.map(|k| k.id) == other.interface.map(|k| k.id)
            && self.concrete.id == other.concrete.id
            && self.name == other.name
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }

    pub fn is_built(&self) -> bool {
        self.instance.get().is_some()
    }

    /// The singleton for this binding, constructing it on first use.
    pub fn instance_in(&self, owner: &Container, depth: usize) -> Result<AnyArc, ContainerError> {
        if let Some(value) = self.instance.get() {
            return Ok(value.clone());
        }
        let build = self.build.ok_or(ContainerError::NotConstructible {
            type_name: self.concrete.name,
        })?;

        let _guard = self.init.lock();
        if let Some(value) = self.instance.get() {
            return Ok(value.clone());
        }
        let built = build(owner, depth)?;
        tracing::trace!(type_name = self.concrete.name, name = ?self.name, "Singleton constructed");
        Ok(self.instance.get_or_init(|| built).clone())
    }

    /// The instance viewed through this binding's interface.
    pub fn interface_view(&self, value: AnyArc) -> Result<Resolved, ContainerError> {
        let upcast = self.upcast.ok_or(ContainerError::TypeMismatch {
            expected: self.interface.map(|k| k.name).unwrap_or(self.concrete.name),
        })?;
        upcast(value)
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("interface", &self.interface.map(|k| k.name))
            .field("concrete", &self.concrete.name)
            .field("name", &self.name)
            .field("built", &self.is_built())
            .finish()
    }
}

fn build_shared<T: Injectable>(owner: &Container, depth: usize) -> Result<AnyArc, ContainerError> {
    owner.construct::<T>(depth).map(|value| Arc::new(value) as AnyArc)
}

fn upcast<I: ?Sized + 'static, T: Implements<I>>(value: AnyArc) -> Result<Resolved, ContainerError> {
    let concrete = value.downcast::<T>().map_err(|_| ContainerError::TypeMismatch {
        expected: std::any::type_name::<T>(),
    })?;
    Ok(Box::new(<T as Implements<I>>::upcast(concrete)) as Box<dyn Any>)
}
