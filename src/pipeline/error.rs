//! Errors raised by middleware and caught at the dispatcher boundary.

use axum::http::StatusCode;
use thiserror::Error;

use crate::container::ContainerError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Stop the chain and send the response as it stands. Not a failure.
    #[error("pipeline ended")]
    End,

    /// A handler argument could not be bound from the request.
    #[error("invalid argument `{name}`: {reason}")]
    ArgumentBinding { name: String, reason: String },

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("handler panicked: {0}")]
    Panic(String),

    #[error("{0}")]
    Handler(String),
}

/// How the dispatcher treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    End,
    ArgumentBinding,
    Unhandled,
}

impl PipelineError {
    pub fn argument(name: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::ArgumentBinding {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        PipelineError::Handler(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::End => ErrorKind::End,
            PipelineError::ArgumentBinding { .. } => ErrorKind::ArgumentBinding,
            _ => ErrorKind::Unhandled,
        }
    }

    /// Minimum status this error forces on the response.
    pub fn status_floor(&self) -> Option<StatusCode> {
        match self.kind() {
            ErrorKind::End => None,
            ErrorKind::ArgumentBinding => Some(StatusCode::BAD_REQUEST),
            ErrorKind::Unhandled => Some(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Short machine-readable label for logs and error bodies.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineError::End => "end",
            PipelineError::ArgumentBinding { .. } => "bad_request",
            PipelineError::Container(_) => "container",
            PipelineError::Io(_) => "io",
            PipelineError::Serialization(_) => "serialization",
            PipelineError::Panic(_) => "panic",
            PipelineError::Handler(_) => "internal",
        }
    }

    /// Build a [`PipelineError::Panic`] from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        PipelineError::Panic(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_floors() {
        assert_eq!(PipelineError::End.status_floor(), None);
        assert_eq!(
            PipelineError::argument("id", "not a number").status_floor(),
            Some(StatusCode::BAD_REQUEST)
        );
        let from_container: PipelineError = ContainerError::Disposed.into();
        assert_eq!(from_container.kind(), ErrorKind::Unhandled);
        assert_eq!(
            PipelineError::handler("boom").status_floor(),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = PipelineError::from_panic(Box::new("static"));
        assert_eq!(err.to_string(), "handler panicked: static");
        let err = PipelineError::from_panic(Box::new(String::from("owned")));
        assert_eq!(err.to_string(), "handler panicked: owned");
    }
}
