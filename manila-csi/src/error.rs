//! Classification of backend failures into CSI status codes.
//!
//! Backend errors are classified where they occur; nothing above the
//! lifecycle layer inspects a raw [`ClientError`].  Asynchronous failures
//! (a share or snapshot landing in an error state) are classified through the
//! backend's user messages and the fixed [`ManilaErrorCode`] table.

use std::fmt;

use libcsi::CsiError;
use tonic::Code;
use tracing::warn;

use crate::manila::{ClientError, ManilaClient};

/// Backend error identifiers with a dedicated CSI mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManilaErrorCode {
    /// `002`: no valid host was found for the share.
    NoValidHost,
    /// `003`: the share network is unusable.
    UnexpectedNetwork,
    /// `008`: the availability zone cannot satisfy the request.
    Availability,
    /// Anything else, including a missing message.
    Unknown,
}

impl ManilaErrorCode {
    /// Look up a backend detail identifier.
    pub fn from_detail_id(detail_id: &str) -> Self {
        match detail_id {
            "002" => Self::NoValidHost,
            "003" => Self::UnexpectedNetwork,
            "008" => Self::Availability,
            _ => Self::Unknown,
        }
    }

    /// The CSI status code reported for this backend error.
    pub fn to_code(self) -> Code {
        match self {
            Self::NoValidHost => Code::OutOfRange,
            Self::UnexpectedNetwork => Code::InvalidArgument,
            Self::Availability => Code::ResourceExhausted,
            Self::Unknown => Code::Internal,
        }
    }
}

/// The classified cause of a resource entering an error state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceError {
    pub code: ManilaErrorCode,
    pub message: String,
}

impl ResourceError {
    /// Build the CSI error, prefixing `context` for correlation.
    pub fn into_csi(self, context: impl fmt::Display) -> CsiError {
        CsiError::with_code(self.code.to_code(), format!("{context}: {}", self.message))
    }
}

/// Fetch and classify the backend's most recent error message for
/// `resource_id`.
///
/// A failed or empty lookup degrades to [`ManilaErrorCode::Unknown`]; it never
/// replaces the original failure.
pub async fn last_resource_error(client: &dyn ManilaClient, resource_id: &str) -> ResourceError {
    match client.get_last_error_message(resource_id).await {
        Ok(Some(msg)) => ResourceError {
            code: ManilaErrorCode::from_detail_id(&msg.detail_id),
            message: msg.user_message,
        },
        Ok(None) => ResourceError {
            code: ManilaErrorCode::Unknown,
            message: "no error message recorded by the backend".to_owned(),
        },
        Err(e) => {
            warn!(%resource_id, error = %e, "failed to retrieve backend error message");
            ResourceError {
                code: ManilaErrorCode::Unknown,
                message: format!("failed to retrieve error message: {e}"),
            }
        }
    }
}

/// Classify a synchronous backend error, prefixing `context`.
pub fn classify(err: ClientError, context: impl fmt::Display) -> CsiError {
    match err {
        ClientError::NotFound(_) => CsiError::NotFound(format!("{context}: {err}")),
        ClientError::Request(_) => CsiError::Internal(format!("{context}: {err}")),
    }
}
