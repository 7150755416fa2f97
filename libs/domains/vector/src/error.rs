use std::fmt;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Why a connection could not be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    /// Every slot was busy for the whole acquire timeout.
    PoolExhausted,
    /// Opening a new session to the backend failed.
    BackendUnreachable,
}

impl ConnectionFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionFailure::PoolExhausted => "pool_exhausted",
            ConnectionFailure::BackendUnreachable => "backend_unreachable",
        }
    }
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Connection error ({reason}) for {target}: {message}")]
    Connection {
        reason: ConnectionFailure,
        target: String,
        message: String,
    },

    #[error("Backend error [{code}]: {message}")]
    Backend { code: String, message: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        operation: &'static str,
        attempts: u32,
        last_error: Box<VectorError>,
    },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Vector not found: {0}")]
    VectorNotFound(Uuid),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type VectorResult<T> = Result<T, VectorError>;

impl VectorError {
    pub fn validation(message: impl Into<String>) -> Self {
        VectorError::Validation(message.into())
    }

    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        VectorError::Backend {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn pool_exhausted(target: impl fmt::Display, message: impl Into<String>) -> Self {
        VectorError::Connection {
            reason: ConnectionFailure::PoolExhausted,
            target: target.to_string(),
            message: message.into(),
        }
    }

    pub fn backend_unreachable(target: impl fmt::Display, message: impl Into<String>) -> Self {
        VectorError::Connection {
            reason: ConnectionFailure::BackendUnreachable,
            target: target.to_string(),
            message: message.into(),
        }
    }

    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Validation failures, pool exhaustion and already-exhausted retries are
    /// surfaced to the caller unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            VectorError::Backend { .. } | VectorError::Timeout { .. } | VectorError::Cache(_) => {
                true
            }
            VectorError::Connection { reason, .. } => {
                *reason == ConnectionFailure::BackendUnreachable
            }
            VectorError::Validation(_)
            | VectorError::RetryExhausted { .. }
            | VectorError::CollectionNotFound(_)
            | VectorError::VectorNotFound(_)
            | VectorError::Config(_)
            | VectorError::Internal(_) => false,
        }
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            VectorError::Validation(_) => "validation",
            VectorError::Connection { reason, .. } => reason.as_str(),
            VectorError::Backend { .. } => "backend",
            VectorError::Timeout { .. } => "timeout",
            VectorError::RetryExhausted { .. } => "retry_exhausted",
            VectorError::Cache(_) => "cache",
            VectorError::CollectionNotFound(_) => "collection_not_found",
            VectorError::VectorNotFound(_) => "vector_not_found",
            VectorError::Config(_) => "config",
            VectorError::Internal(_) => "internal",
        }
    }
}

impl From<qdrant_client::QdrantError> for VectorError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        match err {
            qdrant_client::QdrantError::ResponseError { status } => VectorError::Backend {
                code: format!("{:?}", status.code()),
                message: status.message().to_string(),
            },
            other => VectorError::backend("client", other.to_string()),
        }
    }
}

impl From<redis::RedisError> for VectorError {
    fn from(err: redis::RedisError) -> Self {
        VectorError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for VectorError {
    fn from(err: serde_json::Error) -> Self {
        VectorError::Internal(format!("JSON error: {}", err))
    }
}

impl From<core_config::ConfigError> for VectorError {
    fn from(err: core_config::ConfigError) -> Self {
        VectorError::Config(err.to_string())
    }
}
