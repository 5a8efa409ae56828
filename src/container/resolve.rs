//! Resolution engine: binding lookup across the scope chain and
//! descriptor-driven construction.

use std::any::TypeId;
use std::sync::Arc;

use crate::container::descriptor::Injectable;
use crate::container::error::ContainerError;
use crate::container::Container;

impl Container {
    /// Resolve concrete `T`, constructing and caching it on first use.
    ///
    /// Any binding whose concrete type is `T` qualifies, including ones
    /// registered under an interface.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ContainerError> {
        self.resolve_concrete::<T>(None, 0)
    }

    /// Resolve concrete `T`, preferring the binding registered under `name`.
    pub fn get_named<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ContainerError> {
        self.resolve_concrete::<T>(Some(name), 0)
    }

    /// Resolve concrete `T`, falling back to `default` when nothing is bound.
    pub fn get_or<T: Send + Sync + 'static>(
        &self,
        name: Option<&str>,
        default: T,
    ) -> Result<Arc<T>, ContainerError> {
        match self.resolve_concrete::<T>(name, 0) {
            Err(ContainerError::NotRegistered { type_name, .. })
                if type_name == std::any::type_name::<T>() =>
            {
                Ok(Arc::new(default))
            }
            other => other,
        }
    }

    /// Resolve interface `I`. A single binding wins outright; among several,
    /// `name` picks, otherwise the most recent registration.
    pub fn get_interface<I: ?Sized + 'static>(&self, name: Option<&str>) -> Result<Arc<I>, ContainerError> {
        self.resolve_interface::<I>(name, 0)
    }

    /// Build a fresh `T` that bypasses binding caches. Its dependencies still
    /// resolve through the registry, so shared singletons stay shared.
    pub fn new_instance<T: Injectable>(&self) -> Result<T, ContainerError> {
        self.construct::<T>(0)
    }

    pub(crate) fn resolve_concrete<T: Send + Sync + 'static>(
        &self,
        name: Option<&str>,
        depth: usize,
    ) -> Result<Arc<T>, ContainerError> {
        self.guard_depth::<T>(depth)?;
        let id = TypeId::of::<T>();
        match self.select(|b| b.concrete.id == id, name) {
            Some(binding) => binding
                .instance_in(self, depth)?
                .downcast::<T>()
                .map_err(|_| ContainerError::TypeMismatch {
                    expected: std::any::type_name::<T>(),
                }),
            None => match self.parent() {
                Some(parent) => parent.resolve_concrete::<T>(name, depth),
                None => Err(not_registered::<T>(name)),
            },
        }
    }

    pub(crate) fn resolve_interface<I: ?Sized + 'static>(
        &self,
        name: Option<&str>,
        depth: usize,
    ) -> Result<Arc<I>, ContainerError> {
        self.guard_depth::<I>(depth)?;
        let id = TypeId::of::<I>();
        match self.select(|b| b.interface.map(|k| k.id) == Some(id), name) {
            Some(binding) => {
                let instance = binding.instance_in(self, depth)?;
                binding
                    .interface_view(instance)?
                    .downcast::<Arc<I>>()
                    .map(|view| *view)
                    .map_err(|_| ContainerError::TypeMismatch {
                        expected: std::any::type_name::<I>(),
                    })
            }
            None => match self.parent() {
                Some(parent) => parent.resolve_interface::<I>(name, depth),
                None => Err(not_registered::<I>(name)),
            },
        }
    }

    /// Construct `T` from its cached descriptor in this scope.
    pub(crate) fn construct<T: Injectable>(&self, depth: usize) -> Result<T, ContainerError> {
        self.guard_depth::<T>(depth)?;
        self.descriptors().descriptor::<T>().instantiate(self, depth)
    }

    fn guard_depth<T: ?Sized>(&self, depth: usize) -> Result<(), ContainerError> {
        if self.is_disposed() {
            return Err(ContainerError::Disposed);
        }
        if depth > self.max_depth() {
            tracing::warn!(
                type_name = std::any::type_name::<T>(),
                depth,
                "Resolution depth exceeded; aborting"
            );
            return Err(ContainerError::CircularDependency {
                type_name: std::any::type_name::<T>(),
                depth,
            });
        }
        Ok(())
    }
}

fn not_registered<T: ?Sized>(name: Option<&str>) -> ContainerError {
    ContainerError::NotRegistered {
        type_name: std::any::type_name::<T>(),
        name: name.map(str::to_owned),
    }
}

#[cfg(test)]
mod tests {
    use crate::container::{Container, ContainerError, Injectable, Param, TypeDescriptor};
    use std::sync::Arc;

    struct Port(u16);

    struct Endpoint {
        port: Arc<Port>,
        host: Arc<String>,
    }

    impl Injectable for Endpoint {
        fn describe() -> TypeDescriptor<Self> {
            TypeDescriptor::new().constructor(
                vec![
                    Param::of::<Port>("port"),
                    Param::of::<String>("host").or_value("localhost".to_string()),
                ],
                |args| {
                    Ok(Endpoint {
                        port: args.shared()?,
                        host: args.shared()?,
                    })
                },
            )
        }
    }

    #[test]
    fn parameter_default_fills_missing_binding() {
        let root = Container::new();
        root.register_instance(Port(8080), None).unwrap();
        root.register::<Endpoint>().unwrap();

        let endpoint = root.get::<Endpoint>().unwrap();
        assert_eq!(endpoint.port.0, 8080);
        assert_eq!(endpoint.host.as_str(), "localhost");
    }

    #[test]
    fn missing_dependency_reports_the_dependency() {
        let root = Container::new();
        root.register::<Endpoint>().unwrap();
        let err = root.get::<Endpoint>().err().unwrap();
        assert_eq!(
            err,
            ContainerError::NotRegistered {
                type_name: std::any::type_name::<Port>(),
                name: None,
            }
        );
    }

    #[test]
    fn get_or_uses_default_only_when_unbound() {
        let root = Container::new();
        assert_eq!(root.get_or(None, Port(1)).unwrap().0, 1);
        root.register_instance(Port(2), None).unwrap();
        assert_eq!(root.get_or(None, Port(1)).unwrap().0, 2);
    }

    #[test]
    fn named_concrete_lookup() {
        let root = Container::new();
        root.register_instance(Port(80), Some("http")).unwrap();
        root.register_instance(Port(443), Some("https")).unwrap();
        assert_eq!(root.get_named::<Port>("http").unwrap().0, 80);
        assert_eq!(root.get::<Port>().unwrap().0, 443);
    }
}
