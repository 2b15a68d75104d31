use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy shared by the daemon and its clients.
///
/// Every variant carries a human-readable message so the same value serves a
/// CLI (print it) and a programmatic caller (match on the kind). The enum is
/// serialized as-is into error replies.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ServiceError {
    /// Duplicate monitor name or URL
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// I/O or transaction failure in the persistence layer
    #[error("store error: {0}")]
    Store(String),
    /// Connection between client and daemon lost or unusable
    #[error("transport error: {0}")]
    Transport(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn message(&self) -> &str {
        match self {
            ServiceError::Conflict(message)
            | ServiceError::NotFound(message)
            | ServiceError::InvalidArgument(message)
            | ServiceError::Store(message)
            | ServiceError::Transport(message) => message,
        }
    }

    /// Same kind, message prefixed with the operation context.
    pub fn with_context(self, context: impl AsRef<str>) -> Self {
        let context = context.as_ref();
        match self {
            ServiceError::Conflict(m) => ServiceError::Conflict(format!("{context}: {m}")),
            ServiceError::NotFound(m) => ServiceError::NotFound(format!("{context}: {m}")),
            ServiceError::InvalidArgument(m) => {
                ServiceError::InvalidArgument(format!("{context}: {m}"))
            }
            ServiceError::Store(m) => ServiceError::Store(format!("{context}: {m}")),
            ServiceError::Transport(m) => ServiceError::Transport(format!("{context}: {m}")),
        }
    }
}

impl From<libsql::Error> for ServiceError {
    fn from(err: libsql::Error) -> Self {
        let message = err.to_string();
        // The explicit uniqueness checks run first; this only catches races
        // that slip past them.
        if message.contains("UNIQUE constraint failed") {
            ServiceError::Conflict(message)
        } else {
            ServiceError::Store(message)
        }
    }
}

impl From<deadpool::managed::PoolError<libsql::Error>> for ServiceError {
    fn from(err: deadpool::managed::PoolError<libsql::Error>) -> Self {
        ServiceError::Store(format!("connection pool: {err}"))
    }
}

impl From<deadpool::managed::BuildError> for ServiceError {
    fn from(err: deadpool::managed::BuildError) -> Self {
        ServiceError::Store(format!("connection pool: {err}"))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Transport(format!("malformed message: {err}"))
    }
}

impl From<zmq::Error> for ServiceError {
    fn from(err: zmq::Error) -> Self {
        ServiceError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serializes_kind_and_message() {
        let err = ServiceError::Conflict("monitor name 'api' already exists".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "conflict");
        assert_eq!(json["message"], "monitor name 'api' already exists");

        let back: ServiceError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_with_context_keeps_kind() {
        let err = ServiceError::NotFound("monitor 'db'".to_string())
            .with_context("Failed to pause monitor db");
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(err.message(), "Failed to pause monitor db: monitor 'db'");
    }
}
