//! CSI Node service.
//!
//! Nothing is mounted here.  Each call resolves the share, its access rule
//! and export location into the volume context and secrets the downstream
//! plugin understands, then forwards the request to it.  Staging results are
//! cached per volume so that publishing does not query the backend again.

use std::collections::HashMap;
use std::sync::Arc;

use libcsi::proto::node_server::Node;
use libcsi::proto::node_service_capability::rpc::Type as NodeRpc;
use libcsi::proto::{
    NodeExpandVolumeRequest, NodeExpandVolumeResponse, NodeGetCapabilitiesRequest,
    NodeGetCapabilitiesResponse, NodeGetInfoRequest, NodeGetInfoResponse,
    NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse, NodePublishVolumeRequest,
    NodePublishVolumeResponse, NodeServiceCapability, NodeStageVolumeRequest,
    NodeStageVolumeResponse, NodeUnpublishVolumeRequest, NodeUnpublishVolumeResponse,
    NodeUnstageVolumeRequest, NodeUnstageVolumeResponse,
};
use libcsi::{CsiError, CsiNode, has_node_capability, topology};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use crate::adapters::ShareAdapter;
use crate::config::{DriverConfig, TOPOLOGY_ZONE_KEY};
use crate::lifecycle::Lifecycle;
use crate::manila::{ClientBuilder, client_from_secrets};
use crate::options::{NodeVolumeContext, ShareRef};
use crate::pending::PendingSet;
use crate::stage_cache::{StageCache, StageCacheEntry};

pub struct NodeService {
    config: Arc<DriverConfig>,
    adapter: ShareAdapter,
    builder: Arc<dyn ClientBuilder>,
    forward: Arc<dyn CsiNode>,
    cache: StageCache,
    /// Volumes whose staging context is being resolved.
    resolving: PendingSet,
    /// Capabilities of the downstream plugin, advertised as our own.
    capabilities: Vec<NodeServiceCapability>,
    stage_supported: bool,
    cancel: CancellationToken,
}

impl NodeService {
    pub fn new(
        config: Arc<DriverConfig>,
        adapter: ShareAdapter,
        builder: Arc<dyn ClientBuilder>,
        forward: Arc<dyn CsiNode>,
        capabilities: Vec<NodeServiceCapability>,
        cancel: CancellationToken,
    ) -> Self {
        let stage_supported = has_node_capability(&capabilities, NodeRpc::StageUnstageVolume);
        Self {
            config,
            adapter,
            builder,
            forward,
            cache: StageCache::new(),
            resolving: PendingSet::new(),
            capabilities,
            stage_supported,
            cancel,
        }
    }

    /// Resolve what the downstream plugin needs to stage and publish a volume.
    #[instrument(skip_all)]
    async fn resolve(
        &self,
        volume_context: &HashMap<String, String>,
        secrets: &HashMap<String, String>,
    ) -> Result<StageCacheEntry, CsiError> {
        let ctx = NodeVolumeContext::parse(volume_context)?;
        let client = client_from_secrets(self.builder.as_ref(), secrets).await?;
        let lifecycle = Lifecycle::new(client.as_ref(), &self.config.wait, &self.cancel);

        let share = match &ctx.share {
            ShareRef::Id(id) => lifecycle.share(id).await?,
            ShareRef::Name(name) => lifecycle.share_by_name(name).await?,
        };
        let protocol = self.adapter.protocol();
        if !protocol.matches(&share.share_proto) {
            return Err(CsiError::InvalidArgument(format!(
                "share {} has protocol {}, this driver serves {protocol}",
                share.id, share.share_proto
            )));
        }

        let rights = lifecycle.access_rights(&share.id).await?;
        let right = ctx
            .access_ids
            .iter()
            .find_map(|id| rights.iter().find(|r| &r.id == id))
            .ok_or_else(|| {
                CsiError::InvalidArgument(format!(
                    "none of the access rights [{}] exist on share {}",
                    ctx.access_ids.join(", "),
                    share.id
                ))
            })?;

        let locations = lifecycle.export_locations(&share.id).await?;
        let entry = StageCacheEntry {
            volume_context: self
                .adapter
                .build_volume_context(&share, &locations, &ctx.cephfs)?,
            stage_secret: self.adapter.build_stage_secret(right)?,
            publish_secret: self.adapter.build_publish_secret(right)?,
        };
        debug!(share_id = %share.id, access_id = %right.id, "resolved share access");
        Ok(entry)
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn do_stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID cannot be empty".into()));
        }
        if req.staging_target_path.is_empty() {
            return Err(CsiError::InvalidArgument(
                "staging target path cannot be empty".into(),
            ));
        }
        if req.volume_capability.is_none() {
            return Err(CsiError::InvalidArgument(
                "volume capability must be provided".into(),
            ));
        }
        if !self.stage_supported {
            debug!("downstream plugin does not stage volumes, nothing to do");
            return Ok(());
        }

        let entry = match self.cache.get(&req.volume_id) {
            Some(entry) => entry,
            None => self.resolve_for_stage(&req).await?,
        };

        self.forward
            .stage_volume(NodeStageVolumeRequest {
                volume_context: entry.volume_context,
                secrets: entry.stage_secret,
                ..req
            })
            .await?;
        info!("volume staged");
        Ok(())
    }

    /// Resolve and cache a volume on a stage cache miss.  Only one request per
    /// volume resolves at a time; a concurrent one is aborted for retry.
    async fn resolve_for_stage(
        &self,
        req: &NodeStageVolumeRequest,
    ) -> Result<StageCacheEntry, CsiError> {
        let _guard = self.resolving.lock(&req.volume_id).ok_or_else(|| {
            CsiError::Aborted(format!("volume {} is already being staged", req.volume_id))
        })?;
        // a request that held the guard before us may have filled the cache
        if let Some(entry) = self.cache.get(&req.volume_id) {
            return Ok(entry);
        }
        let entry = self.resolve(&req.volume_context, &req.secrets).await?;
        Ok(self.cache.insert_if_absent(&req.volume_id, entry))
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn do_unstage_volume(&self, req: NodeUnstageVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID cannot be empty".into()));
        }
        if req.staging_target_path.is_empty() {
            return Err(CsiError::InvalidArgument(
                "staging target path cannot be empty".into(),
            ));
        }

        self.cache.remove(&req.volume_id);
        if self.stage_supported {
            self.forward.unstage_volume(req).await?;
        }
        info!("volume unstaged");
        Ok(())
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn do_publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID cannot be empty".into()));
        }
        if req.target_path.is_empty() {
            return Err(CsiError::InvalidArgument("target path cannot be empty".into()));
        }
        if req.volume_capability.is_none() {
            return Err(CsiError::InvalidArgument(
                "volume capability must be provided".into(),
            ));
        }

        let entry = match self.cache.get(&req.volume_id) {
            Some(entry) if self.stage_supported => entry,
            cached => {
                if self.stage_supported && cached.is_none() {
                    warn!("volume is not in the stage cache, resolving it again");
                }
                self.resolve(&req.volume_context, &req.secrets).await?
            }
        };

        self.forward
            .publish_volume(NodePublishVolumeRequest {
                volume_context: entry.volume_context,
                secrets: entry.publish_secret,
                ..req
            })
            .await?;
        info!("volume published");
        Ok(())
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn do_unpublish_volume(&self, req: NodeUnpublishVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID cannot be empty".into()));
        }
        if req.target_path.is_empty() {
            return Err(CsiError::InvalidArgument("target path cannot be empty".into()));
        }

        self.forward.unpublish_volume(req).await?;
        info!("volume unpublished");
        Ok(())
    }

    fn node_info(&self) -> NodeGetInfoResponse {
        let accessible_topology = match (&self.config.node_az, self.config.with_topology) {
            (Some(zone), true) => Some(topology(TOPOLOGY_ZONE_KEY, zone)),
            _ => None,
        };
        NodeGetInfoResponse {
            node_id: self.config.node_id.clone(),
            max_volumes_per_node: 0,
            accessible_topology,
        }
    }
}

#[tonic::async_trait]
impl Node for NodeService {
    async fn node_stage_volume(
        &self,
        request: Request<NodeStageVolumeRequest>,
    ) -> Result<Response<NodeStageVolumeResponse>, Status> {
        self.do_stage_volume(request.into_inner()).await?;
        Ok(Response::new(NodeStageVolumeResponse {}))
    }

    async fn node_unstage_volume(
        &self,
        request: Request<NodeUnstageVolumeRequest>,
    ) -> Result<Response<NodeUnstageVolumeResponse>, Status> {
        self.do_unstage_volume(request.into_inner()).await?;
        Ok(Response::new(NodeUnstageVolumeResponse {}))
    }

    async fn node_publish_volume(
        &self,
        request: Request<NodePublishVolumeRequest>,
    ) -> Result<Response<NodePublishVolumeResponse>, Status> {
        self.do_publish_volume(request.into_inner()).await?;
        Ok(Response::new(NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<NodeUnpublishVolumeRequest>,
    ) -> Result<Response<NodeUnpublishVolumeResponse>, Status> {
        self.do_unpublish_volume(request.into_inner()).await?;
        Ok(Response::new(NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_volume_stats(
        &self,
        _request: Request<NodeGetVolumeStatsRequest>,
    ) -> Result<Response<NodeGetVolumeStatsResponse>, Status> {
        Err(CsiError::Unimplemented("NodeGetVolumeStats is not supported".into()).into())
    }

    async fn node_expand_volume(
        &self,
        _request: Request<NodeExpandVolumeRequest>,
    ) -> Result<Response<NodeExpandVolumeResponse>, Status> {
        Err(CsiError::Unimplemented("NodeExpandVolume is not supported".into()).into())
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<NodeGetCapabilitiesRequest>,
    ) -> Result<Response<NodeGetCapabilitiesResponse>, Status> {
        Ok(Response::new(NodeGetCapabilitiesResponse {
            capabilities: self.capabilities.clone(),
        }))
    }

    async fn node_get_info(
        &self,
        _request: Request<NodeGetInfoRequest>,
    ) -> Result<Response<NodeGetInfoResponse>, Status> {
        Ok(Response::new(self.node_info()))
    }
}
