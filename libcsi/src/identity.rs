//! CSI Identity surface of a downstream plugin.
//!
//! A forwarding plugin only needs the discovery half of the Identity service:
//! a readiness probe and the plugin name/version, both queried once at
//! startup.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::proto::GetPluginInfoResponse;

/// Identity service: plugin discovery and health probing.
#[async_trait]
pub trait CsiIdentity: Send + Sync {
    /// Readiness probe.  Returns `true` when the plugin reports itself ready
    /// (an absent `ready` field counts as ready).
    async fn probe(&self) -> Result<bool, CsiError>;

    /// Return the plugin name and version.
    async fn get_plugin_info(&self) -> Result<GetPluginInfoResponse, CsiError>;
}
