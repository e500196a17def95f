//! CSI error types.
//!
//! All errors surfaced by CSI services are represented by the [`CsiError`]
//! enum.  Each variant corresponds to exactly one gRPC status code, so the
//! conversion into [`tonic::Status`] is lossless with respect to the code the
//! container orchestrator observes.  Errors returned by a downstream plugin
//! are kept verbatim in [`CsiError::Downstream`].

use thiserror::Error;
use tonic::{Code, Status};

/// Unified error type for CSI operations.
#[derive(Debug, Error)]
pub enum CsiError {
    /// The caller supplied a malformed request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced volume or snapshot does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A resource name was reused with incompatible parameters.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The resource is not in a state required by the operation.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// The resource is in an expected transient state; retry later.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A concurrent request for the same name is already in flight.
    #[error("aborted: {0}")]
    Aborted(String),

    /// A wait budget was exhausted before the resource converged.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Backend placement failed (e.g. no valid host).
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Backend capacity is exhausted (e.g. availability zone).
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Backend credentials were rejected or could not be used.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The RPC is not supported by this plugin.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// The operation was cancelled before it could complete.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// A gRPC / connection-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// A status returned by a downstream CSI plugin, passed through as-is.
    #[error("downstream plugin: {0}")]
    Downstream(Status),
}

impl CsiError {
    /// Build the variant that corresponds to `code`.
    ///
    /// Codes without a dedicated variant collapse into [`CsiError::Internal`].
    pub fn with_code(code: Code, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            Code::InvalidArgument => Self::InvalidArgument(message),
            Code::NotFound => Self::NotFound(message),
            Code::AlreadyExists => Self::AlreadyExists(message),
            Code::FailedPrecondition => Self::FailedPrecondition(message),
            Code::Unavailable => Self::Unavailable(message),
            Code::Aborted => Self::Aborted(message),
            Code::DeadlineExceeded => Self::DeadlineExceeded(message),
            Code::OutOfRange => Self::OutOfRange(message),
            Code::ResourceExhausted => Self::ResourceExhausted(message),
            Code::Unauthenticated => Self::Unauthenticated(message),
            Code::Unimplemented => Self::Unimplemented(message),
            Code::Cancelled => Self::Cancelled(message),
            _ => Self::Internal(message),
        }
    }

    /// The gRPC status code this error is reported with.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::NotFound(_) => Code::NotFound,
            Self::AlreadyExists(_) => Code::AlreadyExists,
            Self::FailedPrecondition(_) => Code::FailedPrecondition,
            Self::Unavailable(_) => Code::Unavailable,
            Self::Aborted(_) => Code::Aborted,
            Self::DeadlineExceeded(_) => Code::DeadlineExceeded,
            Self::OutOfRange(_) => Code::OutOfRange,
            Self::ResourceExhausted(_) => Code::ResourceExhausted,
            Self::Unauthenticated(_) => Code::Unauthenticated,
            Self::Unimplemented(_) => Code::Unimplemented,
            Self::Cancelled(_) => Code::Cancelled,
            Self::Internal(_) => Code::Internal,
            Self::Transport(_) => Code::Unavailable,
            Self::Downstream(status) => status.code(),
        }
    }

    /// The human-readable message without the code prefix.
    pub fn message(&self) -> String {
        match self {
            Self::InvalidArgument(m)
            | Self::NotFound(m)
            | Self::AlreadyExists(m)
            | Self::FailedPrecondition(m)
            | Self::Unavailable(m)
            | Self::Aborted(m)
            | Self::DeadlineExceeded(m)
            | Self::OutOfRange(m)
            | Self::ResourceExhausted(m)
            | Self::Unauthenticated(m)
            | Self::Unimplemented(m)
            | Self::Cancelled(m)
            | Self::Internal(m)
            | Self::Transport(m) => m.clone(),
            Self::Downstream(status) => status.message().to_owned(),
        }
    }

    /// Create a [`CsiError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<CsiError> for Status {
    fn from(err: CsiError) -> Self {
        match err {
            CsiError::Downstream(status) => status,
            other => Status::new(other.code(), other.message()),
        }
    }
}

impl From<Status> for CsiError {
    fn from(status: Status) -> Self {
        Self::Downstream(status)
    }
}
