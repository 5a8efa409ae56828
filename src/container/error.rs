//! Container error types.

use thiserror::Error;

/// Errors returned synchronously by registration and resolution calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContainerError {
    /// No binding anywhere in the scope chain and no default supplied.
    #[error("no binding registered for {type_name}{}", name_suffix(.name))]
    NotRegistered {
        type_name: &'static str,
        name: Option<String>,
    },

    /// Resolution depth exceeded the configured limit.
    #[error("circular dependency detected while resolving {type_name} (depth {depth})")]
    CircularDependency { type_name: &'static str, depth: usize },

    /// A type offered for concrete registration describes no constructor.
    #[error("{type_name} declares no constructor and cannot be registered as a concrete type")]
    NotConstructible { type_name: &'static str },

    /// A resolved value did not have the requested representation.
    #[error("resolved value is not a {expected}")]
    TypeMismatch { expected: &'static str },

    /// A constructor reported a failure of its own.
    #[error("failed to construct {type_name}: {message}")]
    Construction {
        type_name: &'static str,
        message: String,
    },

    /// The container was used after `dispose`.
    #[error("container has been disposed")]
    Disposed,
}

impl ContainerError {
    /// Whether the caller can reasonably recover (e.g. by supplying a default).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotRegistered { .. } | Self::CircularDependency { .. })
    }

    /// Build a [`ContainerError::Construction`] from any displayable failure.
    pub fn construction<T>(message: impl std::fmt::Display) -> Self {
        Self::Construction {
            type_name: std::any::type_name::<T>(),
            message: message.to_string(),
        }
    }
}

fn name_suffix(name: &Option<String>) -> String {
    match name {
        Some(name) => format!(" named \"{name}\""),
        None => String::new(),
    }
}
