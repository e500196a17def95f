//! CSI Node surface of a downstream plugin.
//!
//! The proxying node service never mounts anything itself; it resolves the
//! volume context and secrets and then hands each call to an implementation
//! of [`CsiNode`]:
//!
//! 1. **Stage**: set up per-volume state at the staging path.
//! 2. **Publish**: bind the volume into the workload's target path.
//! 3. **Unpublish**: undo the publish.
//! 4. **Unstage**: undo the stage.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::proto::{
    NodePublishVolumeRequest, NodeServiceCapability, NodeStageVolumeRequest,
    NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest,
};

/// Node service: the mount-capable operations of a downstream plugin.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume at `req.staging_target_path`.
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError>;

    /// Unstage a volume from its staging path.
    async fn unstage_volume(&self, req: NodeUnstageVolumeRequest) -> Result<(), CsiError>;

    /// Publish a volume at `req.target_path`.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unpublish a volume from its target path.
    async fn unpublish_volume(&self, req: NodeUnpublishVolumeRequest) -> Result<(), CsiError>;

    /// Node service capabilities advertised by the plugin.
    async fn get_capabilities(&self) -> Result<Vec<NodeServiceCapability>, CsiError>;
}
