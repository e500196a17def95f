//! Shared-filesystem backend interface.
//!
//! The plugin talks to the backend exclusively through [`ManilaClient`]; the
//! REST implementation and authentication live outside this crate and are
//! plugged in through a [`ClientBuilder`], which turns the per-request CSI
//! secrets into an authenticated client.
//!
//! The data model mirrors the backend's JSON representation (field names and
//! status strings), so an implementation can deserialize responses straight
//! into these types.

#[cfg(test)]
pub(crate) mod fake;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use libcsi::CsiError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Observed share status.  Transitions are driven by the backend only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareStatus {
    Creating,
    CreatingFromSnapshot,
    Available,
    Extending,
    Deleting,
    Error,
    ErrorDeleting,
    ExtendingError,
    /// Any status string outside the known set.
    #[serde(other)]
    Unknown,
}

impl ShareStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::CreatingFromSnapshot => "creating_from_snapshot",
            Self::Available => "available",
            Self::Extending => "extending",
            Self::Deleting => "deleting",
            Self::Error => "error",
            Self::ErrorDeleting => "error_deleting",
            Self::ExtendingError => "extending_error",
            Self::Unknown => "unknown",
        }
    }

    /// Return `true` for the backend's failure states.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error | Self::ErrorDeleting | Self::ExtendingError)
    }
}

impl fmt::Display for ShareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed snapshot status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Creating,
    Available,
    Deleting,
    Error,
    ErrorDeleting,
    #[serde(other)]
    Unknown,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Available => "available",
            Self::Deleting => "deleting",
            Self::Error => "error",
            Self::ErrorDeleting => "error_deleting",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error | Self::ErrorDeleting)
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A network file share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub id: String,
    pub name: String,
    pub status: ShareStatus,
    /// Size in whole gibibytes.
    pub size: i64,
    pub share_proto: String,
    #[serde(default)]
    pub share_type_name: String,
    #[serde(default)]
    pub share_network_id: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Source snapshot, for shares created from a snapshot.
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub snapshot_support: bool,
    #[serde(default)]
    pub create_share_from_snapshot_support: bool,
}

/// A point-in-time snapshot of a share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    pub share_id: String,
    pub share_proto: String,
    pub status: SnapshotStatus,
    /// Size in whole gibibytes.
    pub size: i64,
    /// Backend timestamp, e.g. `2019-03-25T13:52:14.000000`.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// How an access rule identifies its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    /// Network address or CIDR.
    Ip,
    /// Keyed credential; the backend generates the key asynchronously.
    Cephx,
    User,
    Cert,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ip => "ip",
            Self::Cephx => "cephx",
            Self::User => "user",
            Self::Cert => "cert",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Rw,
    Ro,
}

/// A backend-managed authorization entry on a share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRight {
    pub id: String,
    pub share_id: String,
    pub access_type: AccessType,
    pub access_to: String,
    pub access_level: AccessLevel,
    #[serde(default)]
    pub access_key: Option<String>,
}

impl AccessRight {
    /// Return `true` if this rule grants exactly `(access_type, access_to, access_level)`.
    pub fn matches(&self, wanted: &GrantAccessOpts) -> bool {
        self.access_type == wanted.access_type
            && self.access_to == wanted.access_to
            && self.access_level == wanted.access_level
    }

    /// The access key, if the backend has populated it.
    pub fn key(&self) -> Option<&str> {
        self.access_key.as_deref().filter(|k| !k.is_empty())
    }
}

/// A network endpoint/path through which a share can be mounted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportLocation {
    #[serde(default)]
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub share_instance_id: String,
    #[serde(default)]
    pub is_admin_only: bool,
    #[serde(default)]
    pub preferred: bool,
}

/// A user-facing message the backend records when an asynchronous action
/// fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub id: String,
    pub resource_id: String,
    /// Backend error identifier, e.g. `"002"`.
    pub detail_id: String,
    pub user_message: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Request options
// ---------------------------------------------------------------------------

/// Parameters for a share create call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateShareOpts {
    pub name: String,
    pub description: String,
    pub share_proto: String,
    /// Size in whole gibibytes.
    pub size: i64,
    pub share_type: String,
    pub share_network_id: Option<String>,
    pub availability_zone: Option<String>,
    pub metadata: HashMap<String, String>,
    pub snapshot_id: Option<String>,
}

/// Parameters for a snapshot create call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateSnapshotOpts {
    pub name: String,
    pub description: String,
    pub share_id: String,
}

/// Parameters for an access grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantAccessOpts {
    pub access_type: AccessType,
    pub access_to: String,
    pub access_level: AccessLevel,
}

// ---------------------------------------------------------------------------
// Client interface
// ---------------------------------------------------------------------------

/// Errors reported by a [`ManilaClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The requested resource does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Any other backend or transport failure.
    #[error("backend request failed: {0}")]
    Request(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Shared-filesystem backend operations consumed by the plugin.
#[async_trait]
pub trait ManilaClient: Send + Sync {
    async fn get_share_by_id(&self, share_id: &str) -> Result<Share, ClientError>;

    async fn get_share_by_name(&self, name: &str) -> Result<Share, ClientError>;

    async fn create_share(&self, opts: &CreateShareOpts) -> Result<Share, ClientError>;

    async fn delete_share(&self, share_id: &str) -> Result<(), ClientError>;

    /// Request an extension to `new_size` GiB.  The share then moves through
    /// `extending` asynchronously.
    async fn extend_share(&self, share_id: &str, new_size: i64) -> Result<(), ClientError>;

    async fn get_export_locations(&self, share_id: &str)
    -> Result<Vec<ExportLocation>, ClientError>;

    async fn get_access_rights(&self, share_id: &str) -> Result<Vec<AccessRight>, ClientError>;

    async fn grant_access(
        &self,
        share_id: &str,
        opts: &GrantAccessOpts,
    ) -> Result<AccessRight, ClientError>;

    async fn get_snapshot_by_id(&self, snapshot_id: &str) -> Result<Snapshot, ClientError>;

    async fn get_snapshot_by_name(&self, name: &str) -> Result<Snapshot, ClientError>;

    async fn create_snapshot(&self, opts: &CreateSnapshotOpts) -> Result<Snapshot, ClientError>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), ClientError>;

    /// The most recent user message recorded for `resource_id`, if any.
    async fn get_last_error_message(
        &self,
        resource_id: &str,
    ) -> Result<Option<UserMessage>, ClientError>;
}

/// Builds an authenticated backend client from CSI request secrets.
#[async_trait]
pub trait ClientBuilder: Send + Sync {
    async fn build(
        &self,
        secrets: &HashMap<String, String>,
    ) -> Result<Arc<dyn ManilaClient>, ClientError>;
}

/// Build a client for one request.  Missing secrets are the caller's fault;
/// a builder failure means the credentials were rejected.
pub async fn client_from_secrets(
    builder: &dyn ClientBuilder,
    secrets: &HashMap<String, String>,
) -> Result<Arc<dyn ManilaClient>, CsiError> {
    if secrets.is_empty() {
        return Err(CsiError::InvalidArgument(
            "backend credentials must be provided in secrets".into(),
        ));
    }
    builder
        .build(secrets)
        .await
        .map_err(|e| CsiError::Unauthenticated(format!("failed to create backend client: {e}")))
}
