//! Type descriptors: the constructor and property metadata the resolver walks.
//!
//! Rust has no runtime reflection, so a type opts into container construction by
//! implementing [`Injectable`] and describing itself with a [`TypeDescriptor`].
//! Descriptors are built once per type and kept in a [`DescriptorCache`] owned by
//! the root container.

use std::any::{Any, TypeId};
use std::cmp::Reverse;
use std::sync::Arc;

use dashmap::DashMap;

use crate::container::error::ContainerError;
use crate::container::Container;

/// Shared, type-erased service instance.
pub(crate) type AnyArc = Arc<dyn Any + Send + Sync>;

/// A resolved argument before it reaches a constructor: `Arc<T>`, `Arc<dyn I>`
/// or an owned `T`, depending on the parameter kind.
pub(crate) type Resolved = Box<dyn Any>;

type ResolveFn = fn(&Container, Option<&str>, usize) -> Result<Resolved, ContainerError>;
type DefaultFn = Arc<dyn Fn() -> Resolved + Send + Sync>;
type BuildFn<T> = Box<dyn Fn(&mut Arguments) -> Result<T, ContainerError> + Send + Sync>;
type AssignFn<T> = Box<dyn Fn(&mut T, Resolved) -> Result<(), ContainerError> + Send + Sync>;

/// A type the container knows how to construct.
///
/// ```ignore
/// struct Greeter { names: Arc<NameStore>, prefix: String }
///
/// impl Injectable for Greeter {
///     fn describe() -> TypeDescriptor<Self> {
///         TypeDescriptor::new().constructor(
///             vec![Param::of::<NameStore>("names")],
///             |args| Ok(Greeter { names: args.shared()?, prefix: "hi".into() }),
///         )
///     }
/// }
/// ```
pub trait Injectable: Send + Sync + Sized + 'static {
    fn describe() -> TypeDescriptor<Self>;
}

/// One constructor or property parameter.
#[derive(Clone)]
pub struct Param {
    name: &'static str,
    type_name: &'static str,
    inject_name: Option<String>,
    default: Option<DefaultFn>,
    resolve: ResolveFn,
}

impl Param {
    /// A shared dependency, handed to the constructor as `Arc<T>`.
    pub fn of<T: Send + Sync + 'static>(name: &'static str) -> Self {
        Self::with_resolver(name, std::any::type_name::<T>(), resolve_shared::<T>)
    }

    /// A dependency bound through an interface, handed over as `Arc<I>`.
    pub fn interface<I: ?Sized + 'static>(name: &'static str) -> Self {
        Self::with_resolver(name, std::any::type_name::<I>(), resolve_interface::<I>)
    }

    /// A fresh, uncached instance handed over by value.
    pub fn fresh<T: Injectable>(name: &'static str) -> Self {
        Self::with_resolver(name, std::any::type_name::<T>(), resolve_fresh::<T>)
    }

    fn with_resolver(name: &'static str, type_name: &'static str, resolve: ResolveFn) -> Self {
        Self {
            name,
            type_name,
            inject_name: None,
            default: None,
            resolve,
        }
    }

    /// Resolve against the binding registered under `name`.
    ///
    /// A [`Param::fresh`] parameter is built directly rather than looked up,
    /// so naming one makes its resolution fail.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.inject_name = Some(name.into());
        self
    }

    /// Value used when nothing is registered for this parameter's type.
    ///
    /// The closure must produce the same representation the parameter kind
    /// hands to constructors (`Arc<T>` for [`Param::of`], `Arc<I>` for
    /// [`Param::interface`], `T` for [`Param::fresh`]).
    pub fn default_with<V: 'static>(mut self, make: impl Fn() -> V + Send + Sync + 'static) -> Self {
        self.default = Some(Arc::new(move || Box::new(make()) as Resolved));
        self
    }

    /// Shorthand for a cloned default of a shared parameter.
    pub fn or_value<T: Clone + Send + Sync + 'static>(self, value: T) -> Self {
        self.default_with(move || Arc::new(value.clone()))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn inject_name(&self) -> Option<&str> {
        self.inject_name.as_deref()
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Resolve this parameter one level deeper than `depth`.
    pub(crate) fn resolve(&self, container: &Container, depth: usize) -> Result<Resolved, ContainerError> {
        match (self.resolve)(container, self.inject_name.as_deref(), depth + 1) {
            Err(ContainerError::NotRegistered { type_name, .. }) if type_name == self.type_name => {
                match &self.default {
                    Some(default) => Ok(default()),
                    None => Err(ContainerError::NotRegistered {
                        type_name,
                        name: self.inject_name.clone(),
                    }),
                }
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Param")
            .field("name", &self.name)
            .field("type", &self.type_name)
            .field("inject_name", &self.inject_name)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

fn resolve_shared<T: Send + Sync + 'static>(
    container: &Container,
    name: Option<&str>,
    depth: usize,
) -> Result<Resolved, ContainerError> {
    container
        .resolve_concrete::<T>(name, depth)
        .map(|value| Box::new(value) as Resolved)
}

fn resolve_interface<I: ?Sized + 'static>(
    container: &Container,
    name: Option<&str>,
    depth: usize,
) -> Result<Resolved, ContainerError> {
    container
        .resolve_interface::<I>(name, depth)
        .map(|value| Box::new(value) as Resolved)
}

fn resolve_fresh<T: Injectable>(
    container: &Container,
    name: Option<&str>,
    depth: usize,
) -> Result<Resolved, ContainerError> {
    if let Some(name) = name {
        return Err(ContainerError::construction::<T>(format_args!(
            "fresh parameter cannot select the binding named \"{name}\""
        )));
    }
    container
        .construct::<T>(depth)
        .map(|value| Box::new(value) as Resolved)
}

/// Resolved constructor arguments, consumed in declaration order.
pub struct Arguments {
    values: std::vec::IntoIter<Resolved>,
}

impl Arguments {
    pub(crate) fn new(values: Vec<Resolved>) -> Self {
        Self {
            values: values.into_iter(),
        }
    }

    /// Next argument of a [`Param::of`] or [`Param::interface`] parameter.
    pub fn shared<T: ?Sized + 'static>(&mut self) -> Result<Arc<T>, ContainerError> {
        self.take::<Arc<T>>()
    }

    /// Next argument of a [`Param::fresh`] parameter.
    pub fn owned<T: 'static>(&mut self) -> Result<T, ContainerError> {
        self.take::<T>()
    }

    fn take<V: 'static>(&mut self) -> Result<V, ContainerError> {
        let value = self.values.next().ok_or(ContainerError::TypeMismatch {
            expected: std::any::type_name::<V>(),
        })?;
        value
            .downcast::<V>()
            .map(|boxed| *boxed)
            .map_err(|_| ContainerError::TypeMismatch {
                expected: std::any::type_name::<V>(),
            })
    }
}

/// A constructor: its parameter list and the function that consumes them.
pub struct Constructor<T> {
    params: Vec<Param>,
    build: BuildFn<T>,
}

impl<T> Constructor<T> {
    pub fn params(&self) -> &[Param] {
        &self.params
    }
}

/// An injectable property, assigned after construction.
pub struct Property<T> {
    param: Param,
    assign: AssignFn<T>,
}

/// Constructor and property metadata for `T`.
pub struct TypeDescriptor<T> {
    constructors: Vec<Constructor<T>>,
    properties: Vec<Property<T>>,
}

impl<T: 'static> TypeDescriptor<T> {
    pub fn new() -> Self {
        Self {
            constructors: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Declare a constructor. Arguments arrive in `params` order.
    pub fn constructor(
        mut self,
        params: Vec<Param>,
        build: impl Fn(&mut Arguments) -> Result<T, ContainerError> + Send + Sync + 'static,
    ) -> Self {
        self.constructors.push(Constructor {
            params,
            build: Box::new(build),
        });
        self
    }

    /// Declare an injectable property. `V` is the parameter's resolved
    /// representation (`Arc<T>`, `Arc<dyn I>` or an owned value).
    pub fn property<V: 'static>(
        mut self,
        param: Param,
        assign: impl Fn(&mut T, V) + Send + Sync + 'static,
    ) -> Self {
        self.properties.push(Property {
            param,
            assign: Box::new(move |target, value| {
                let value = value
                    .downcast::<V>()
                    .map_err(|_| ContainerError::TypeMismatch {
                        expected: std::any::type_name::<V>(),
                    })?;
                assign(target, *value);
                Ok(())
            }),
        });
        self
    }

    /// The constructor with the most parameters; the first declared wins a tie.
    pub fn richest(&self) -> Option<&Constructor<T>> {
        self.constructors
            .iter()
            .enumerate()
            .max_by_key(|(index, ctor)| (ctor.params.len(), Reverse(*index)))
            .map(|(_, ctor)| ctor)
    }

    pub fn constructor_count(&self) -> usize {
        self.constructors.len()
    }

    pub fn properties(&self) -> impl Iterator<Item = &Param> {
        self.properties.iter().map(|p| &p.param)
    }

    /// Build an instance: richest constructor first, then every property.
    pub(crate) fn instantiate(&self, container: &Container, depth: usize) -> Result<T, ContainerError> {
        let ctor = self.richest().ok_or(ContainerError::NotConstructible {
            type_name: std::any::type_name::<T>(),
        })?;

        let values = ctor
            .params
            .iter()
            .map(|param| param.resolve(container, depth))
            .collect::<Result<Vec<_>, _>>()?;
        let mut instance = (ctor.build)(&mut Arguments::new(values))?;

        for property in &self.properties {
            let value = property.param.resolve(container, depth)?;
            (property.assign)(&mut instance, value)?;
        }
        Ok(instance)
    }
}

impl<T: Default + 'static> TypeDescriptor<T> {
    /// Descriptor with a single parameterless constructor backed by `Default`.
    pub fn from_default() -> Self {
        Self::new().constructor(Vec::new(), |_| Ok(T::default()))
    }
}

impl<T: 'static> Default for TypeDescriptor<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptors computed once per type and shared by every scope of a root.
#[derive(Default)]
pub struct DescriptorCache {
    entries: DashMap<TypeId, AnyArc>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the cached descriptor for `T`, describing it on first use.
    pub fn descriptor<T: Injectable>(&self) -> Arc<TypeDescriptor<T>> {
        let cached = self
            .entries
            .get(&TypeId::of::<T>())
            .map(|entry| entry.value().clone());
        if let Some(Ok(descriptor)) = cached.map(|any| any.downcast::<TypeDescriptor<T>>()) {
            return descriptor;
        }

        let described: AnyArc = Arc::new(T::describe());
        let stored = self
            .entries
            .entry(TypeId::of::<T>())
            .or_insert(described)
            .value()
            .clone();
        match stored.downcast::<TypeDescriptor<T>>() {
            Ok(descriptor) => descriptor,
            // Keys are TypeIds, so the stored value is always a descriptor of T.
            Err(_) => Arc::new(T::describe()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
