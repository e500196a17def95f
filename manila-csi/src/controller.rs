//! CSI Controller service: volume and snapshot provisioning against the
//! shared-filesystem backend.

use std::collections::HashMap;
use std::sync::Arc;

use libcsi::proto::controller_server::Controller;
use libcsi::proto::controller_service_capability::rpc::Type as ControllerRpc;
use libcsi::proto::validate_volume_capabilities_response::Confirmed;
use libcsi::proto::{
    self, ControllerExpandVolumeRequest, ControllerExpandVolumeResponse,
    ControllerGetCapabilitiesRequest, ControllerGetCapabilitiesResponse,
    ControllerGetVolumeRequest, ControllerGetVolumeResponse, ControllerModifyVolumeRequest,
    ControllerModifyVolumeResponse, ControllerPublishVolumeRequest,
    ControllerPublishVolumeResponse, ControllerUnpublishVolumeRequest,
    ControllerUnpublishVolumeResponse, CreateSnapshotRequest, CreateSnapshotResponse,
    CreateVolumeRequest, CreateVolumeResponse, DeleteSnapshotRequest, DeleteSnapshotResponse,
    DeleteVolumeRequest, DeleteVolumeResponse, GetCapacityRequest, GetCapacityResponse,
    ListSnapshotsRequest, ListSnapshotsResponse, ListVolumesRequest, ListVolumesResponse,
    Topology, TopologyRequirement, ValidateVolumeCapabilitiesRequest,
    ValidateVolumeCapabilitiesResponse, volume_content_source,
};
use libcsi::{
    CsiError, access_mode, bytes_to_gib, controller_capability, gib_to_bytes, is_block, topology,
};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use crate::adapters::ShareAdapter;
use crate::compatibility;
use crate::config::{DriverConfig, ShareProtocol, TOPOLOGY_ZONE_KEY};
use crate::lifecycle::Lifecycle;
use crate::manila::{
    ClientBuilder, CreateShareOpts, CreateSnapshotOpts, ManilaClient, ShareStatus, Snapshot,
    SnapshotStatus, client_from_secrets,
};
use crate::options::{ControllerVolumeOptions, KEY_SHARE_ACCESS_IDS, KEY_SHARE_ID};
use crate::pending::PendingSet;

/// Share metadata key recording the owning cluster.
pub const CLUSTER_METADATA_KEY: &str = "manila.csi.openstack.org/cluster";

pub struct ControllerService {
    config: Arc<DriverConfig>,
    adapter: ShareAdapter,
    builder: Arc<dyn ClientBuilder>,
    volumes: PendingSet,
    snapshots: PendingSet,
    cancel: CancellationToken,
}

impl ControllerService {
    pub fn new(
        config: Arc<DriverConfig>,
        adapter: ShareAdapter,
        builder: Arc<dyn ClientBuilder>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            adapter,
            builder,
            volumes: PendingSet::new(),
            snapshots: PendingSet::new(),
            cancel,
        }
    }

    async fn client(
        &self,
        secrets: &HashMap<String, String>,
    ) -> Result<Arc<dyn ManilaClient>, CsiError> {
        client_from_secrets(self.builder.as_ref(), secrets).await
    }

    fn lifecycle<'a>(&'a self, client: &'a dyn ManilaClient) -> Lifecycle<'a> {
        Lifecycle::new(client, &self.config.wait, &self.cancel)
    }

    fn description(&self) -> String {
        format!("provisioned-by={}", self.config.driver_name)
    }

    fn protocol(&self) -> ShareProtocol {
        self.adapter.protocol()
    }

    fn share_metadata(&self, options: &ControllerVolumeOptions) -> HashMap<String, String> {
        let mut metadata = options.append_share_metadata.clone();
        if let Some(cluster) = &self.config.cluster_id {
            metadata.insert(CLUSTER_METADATA_KEY.to_owned(), cluster.clone());
        }
        metadata
    }

    /// Availability zone for a new share and the topology reported for it.
    fn placement(
        &self,
        options: &ControllerVolumeOptions,
        requirements: Option<&TopologyRequirement>,
    ) -> (Option<String>, Vec<Topology>) {
        if !self.config.with_topology {
            return (options.availability.clone(), Vec::new());
        }
        if options.auto_topology
            && options.availability.is_none()
            && let Some(zone) = requirements.and_then(zone_from_requirements)
        {
            let accessible = vec![topology(TOPOLOGY_ZONE_KEY, &zone)];
            return (Some(zone), accessible);
        }
        let preferred = requirements
            .map(|r| r.preferred.clone())
            .unwrap_or_default();
        (options.availability.clone(), preferred)
    }

    /// Resolve the snapshot a new volume is restored from.
    async fn source_snapshot(
        &self,
        lifecycle: &Lifecycle<'_>,
        snapshot_id: &str,
    ) -> Result<Snapshot, CsiError> {
        if snapshot_id.is_empty() {
            return Err(CsiError::InvalidArgument(
                "source snapshot ID cannot be empty".into(),
            ));
        }
        let snapshot = lifecycle.snapshot(snapshot_id).await?;
        match snapshot.status {
            SnapshotStatus::Available => {}
            SnapshotStatus::Creating => {
                return Err(CsiError::Unavailable(format!(
                    "source snapshot {snapshot_id} is still being created"
                )));
            }
            status => {
                return Err(CsiError::FailedPrecondition(format!(
                    "source snapshot {snapshot_id} is in status {status}, expected available"
                )));
            }
        }
        if !self.protocol().matches(&snapshot.share_proto) {
            return Err(CsiError::InvalidArgument(format!(
                "source snapshot {snapshot_id} has protocol {}, this driver serves {}",
                snapshot.share_proto,
                self.protocol()
            )));
        }
        Ok(snapshot)
    }

    #[instrument(skip_all, fields(name = %req.name))]
    async fn do_create_volume(
        &self,
        req: CreateVolumeRequest,
    ) -> Result<CreateVolumeResponse, CsiError> {
        validate_create_volume(&req)?;
        let options = ControllerVolumeOptions::parse(&req.parameters)?;

        let _guard = self.volumes.lock(&req.name).ok_or_else(|| {
            CsiError::Aborted(format!("volume {} is already being processed", req.name))
        })?;

        let size = bytes_to_gib(req.capacity_range.as_ref().map_or(0, |r| r.required_bytes));
        let client = self.client(&req.secrets).await?;
        let lifecycle = self.lifecycle(client.as_ref());
        let (availability_zone, accessible_topology) =
            self.placement(&options, req.accessibility_requirements.as_ref());

        let mut opts = CreateShareOpts {
            name: req.name.clone(),
            description: self.description(),
            share_proto: self.protocol().as_str().to_owned(),
            size,
            share_type: options.share_type.clone(),
            share_network_id: options.share_network_id.clone(),
            availability_zone,
            metadata: self.share_metadata(&options),
            snapshot_id: None,
        };
        match req
            .volume_content_source
            .as_ref()
            .and_then(|source| source.r#type.as_ref())
        {
            None => {}
            Some(volume_content_source::Type::Snapshot(source)) => {
                let snapshot = self.source_snapshot(&lifecycle, &source.snapshot_id).await?;
                opts.snapshot_id = Some(snapshot.id);
            }
            Some(volume_content_source::Type::Volume(_)) => {
                return Err(CsiError::InvalidArgument(
                    "volume cloning is not supported".into(),
                ));
            }
        }

        let share = lifecycle.get_or_create_share(&opts).await?;
        compatibility::check_share(&share, &opts)?;
        let right = self
            .adapter
            .get_or_grant_access(&lifecycle, &share, &options)
            .await?;

        let mut volume_context = HashMap::from([
            (KEY_SHARE_ID.to_owned(), share.id.clone()),
            (KEY_SHARE_ACCESS_IDS.to_owned(), right.id.clone()),
        ]);
        if self.protocol() == ShareProtocol::Cephfs {
            options.cephfs.write_context(&mut volume_context);
        }

        info!(share_id = %share.id, size = share.size, access_id = %right.id, "volume ready");
        Ok(CreateVolumeResponse {
            volume: Some(proto::Volume {
                capacity_bytes: gib_to_bytes(share.size),
                volume_id: share.id,
                volume_context,
                content_source: req.volume_content_source,
                accessible_topology,
            }),
        })
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn do_delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID cannot be empty".into()));
        }
        let client = self.client(&req.secrets).await?;
        self.lifecycle(client.as_ref())
            .delete_share(&req.volume_id)
            .await
    }

    #[instrument(skip_all, fields(name = %req.name, source_volume_id = %req.source_volume_id))]
    async fn do_create_snapshot(
        &self,
        req: CreateSnapshotRequest,
    ) -> Result<CreateSnapshotResponse, CsiError> {
        if req.name.is_empty() {
            return Err(CsiError::InvalidArgument("snapshot name cannot be empty".into()));
        }
        if req.source_volume_id.is_empty() {
            return Err(CsiError::InvalidArgument(
                "source volume ID cannot be empty".into(),
            ));
        }

        let _guard = self.snapshots.lock(&req.name).ok_or_else(|| {
            CsiError::Aborted(format!("snapshot {} is already being processed", req.name))
        })?;

        let client = self.client(&req.secrets).await?;
        let lifecycle = self.lifecycle(client.as_ref());

        let share = lifecycle.share(&req.source_volume_id).await?;
        if !self.protocol().matches(&share.share_proto) {
            return Err(CsiError::InvalidArgument(format!(
                "source share {} has protocol {}, this driver serves {}",
                share.id,
                share.share_proto,
                self.protocol()
            )));
        }
        if !share.snapshot_support || !share.create_share_from_snapshot_support {
            return Err(CsiError::InvalidArgument(format!(
                "source share {} does not support snapshots \
                 (snapshot_support={}, create_share_from_snapshot_support={})",
                share.id, share.snapshot_support, share.create_share_from_snapshot_support
            )));
        }

        let snapshot = lifecycle
            .get_or_create_snapshot(&CreateSnapshotOpts {
                name: req.name.clone(),
                description: self.description(),
                share_id: share.id.clone(),
            })
            .await?;
        compatibility::check_snapshot(&snapshot, &share.id)?;
        let ready_to_use = ready_to_use(&snapshot)?;

        info!(snapshot_id = %snapshot.id, ready_to_use, "snapshot processed");
        Ok(CreateSnapshotResponse {
            snapshot: Some(proto::Snapshot {
                size_bytes: gib_to_bytes(snapshot.size),
                creation_time: creation_time(snapshot.created_at.as_deref()),
                snapshot_id: snapshot.id,
                source_volume_id: snapshot.share_id,
                ready_to_use,
                group_snapshot_id: String::new(),
            }),
        })
    }

    #[instrument(skip_all, fields(snapshot_id = %req.snapshot_id))]
    async fn do_delete_snapshot(&self, req: DeleteSnapshotRequest) -> Result<(), CsiError> {
        if req.snapshot_id.is_empty() {
            return Err(CsiError::InvalidArgument("snapshot ID cannot be empty".into()));
        }
        let client = self.client(&req.secrets).await?;
        self.lifecycle(client.as_ref())
            .delete_snapshot(&req.snapshot_id)
            .await
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn do_expand_volume(
        &self,
        req: ControllerExpandVolumeRequest,
    ) -> Result<ControllerExpandVolumeResponse, CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID cannot be empty".into()));
        }
        let Some(range) = req.capacity_range.as_ref() else {
            return Err(CsiError::InvalidArgument("capacity range must be provided".into()));
        };

        let client = self.client(&req.secrets).await?;
        let lifecycle = self.lifecycle(client.as_ref());
        let share = lifecycle.share(&req.volume_id).await?;

        let _guard = self.volumes.lock(&share.name).ok_or_else(|| {
            CsiError::Aborted(format!("volume {} is already being processed", share.name))
        })?;

        let desired = bytes_to_gib(range.required_bytes);
        let share = if share.size >= desired {
            info!(size = share.size, desired, "share is already large enough");
            share
        } else {
            lifecycle.extend_share(&share, desired).await?
        };

        Ok(ControllerExpandVolumeResponse {
            capacity_bytes: gib_to_bytes(share.size),
            node_expansion_required: false,
        })
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn do_validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse, CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID cannot be empty".into()));
        }
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::InvalidArgument(
                "volume capabilities cannot be empty".into(),
            ));
        }
        for cap in &req.volume_capabilities {
            if is_block(cap) {
                return Ok(unconfirmed("block access type is not supported"));
            }
            if access_mode(cap).is_none() {
                return Ok(unconfirmed("unknown volume access mode"));
            }
        }

        let client = self.client(&req.secrets).await?;
        let share = self.lifecycle(client.as_ref()).share(&req.volume_id).await?;
        match share.status {
            ShareStatus::Available => {}
            ShareStatus::Creating | ShareStatus::CreatingFromSnapshot | ShareStatus::Extending => {
                return Err(CsiError::Unavailable(format!(
                    "share {} is {}, retry later",
                    share.id, share.status
                )));
            }
            status => {
                return Err(CsiError::FailedPrecondition(format!(
                    "share {} is in status {status}, expected available",
                    share.id
                )));
            }
        }
        if !self.protocol().matches(&share.share_proto) {
            return Err(CsiError::InvalidArgument(format!(
                "share {} has protocol {}, this driver serves {}",
                share.id,
                share.share_proto,
                self.protocol()
            )));
        }

        Ok(ValidateVolumeCapabilitiesResponse {
            confirmed: Some(Confirmed {
                volume_context: req.volume_context,
                volume_capabilities: req.volume_capabilities,
                parameters: req.parameters,
                mutable_parameters: req.mutable_parameters,
            }),
            message: String::new(),
        })
    }
}

fn validate_create_volume(req: &CreateVolumeRequest) -> Result<(), CsiError> {
    if req.name.is_empty() {
        return Err(CsiError::InvalidArgument("volume name cannot be empty".into()));
    }
    if req.volume_capabilities.is_empty() {
        return Err(CsiError::InvalidArgument(
            "volume capabilities cannot be empty".into(),
        ));
    }
    if req.volume_capabilities.iter().any(is_block) {
        return Err(CsiError::InvalidArgument(
            "block access type is not supported".into(),
        ));
    }
    Ok(())
}

fn zone_from_requirements(requirements: &TopologyRequirement) -> Option<String> {
    requirements
        .preferred
        .iter()
        .chain(&requirements.requisite)
        .find_map(|t| t.segments.get(TOPOLOGY_ZONE_KEY).cloned())
}

fn unconfirmed(message: &str) -> ValidateVolumeCapabilitiesResponse {
    ValidateVolumeCapabilitiesResponse {
        confirmed: None,
        message: message.to_owned(),
    }
}

fn ready_to_use(snapshot: &Snapshot) -> Result<bool, CsiError> {
    match snapshot.status {
        SnapshotStatus::Available => Ok(true),
        SnapshotStatus::Creating => Ok(false),
        status => Err(CsiError::Internal(format!(
            "snapshot {} is in unexpected status {status}",
            snapshot.id
        ))),
    }
}

/// Backend timestamps carry no zone designator; they are UTC.
fn creation_time(created_at: Option<&str>) -> Option<prost_types::Timestamp> {
    let raw = created_at?;
    raw.parse::<prost_types::Timestamp>()
        .ok()
        .or_else(|| format!("{raw}Z").parse().ok())
}

fn unsupported(rpc: &str) -> Status {
    CsiError::Unimplemented(format!("{rpc} is not supported")).into()
}

#[tonic::async_trait]
impl Controller for ControllerService {
    async fn create_volume(
        &self,
        request: Request<CreateVolumeRequest>,
    ) -> Result<Response<CreateVolumeResponse>, Status> {
        Ok(Response::new(self.do_create_volume(request.into_inner()).await?))
    }

    async fn delete_volume(
        &self,
        request: Request<DeleteVolumeRequest>,
    ) -> Result<Response<DeleteVolumeResponse>, Status> {
        self.do_delete_volume(request.into_inner()).await?;
        Ok(Response::new(DeleteVolumeResponse {}))
    }

    async fn controller_publish_volume(
        &self,
        _request: Request<ControllerPublishVolumeRequest>,
    ) -> Result<Response<ControllerPublishVolumeResponse>, Status> {
        Err(unsupported("ControllerPublishVolume"))
    }

    async fn controller_unpublish_volume(
        &self,
        _request: Request<ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<ControllerUnpublishVolumeResponse>, Status> {
        Err(unsupported("ControllerUnpublishVolume"))
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<ValidateVolumeCapabilitiesResponse>, Status> {
        Ok(Response::new(
            self.do_validate_volume_capabilities(request.into_inner())
                .await?,
        ))
    }

    async fn list_volumes(
        &self,
        _request: Request<ListVolumesRequest>,
    ) -> Result<Response<ListVolumesResponse>, Status> {
        Err(unsupported("ListVolumes"))
    }

    async fn get_capacity(
        &self,
        _request: Request<GetCapacityRequest>,
    ) -> Result<Response<GetCapacityResponse>, Status> {
        Err(unsupported("GetCapacity"))
    }

    async fn controller_get_capabilities(
        &self,
        _request: Request<ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<ControllerGetCapabilitiesResponse>, Status> {
        Ok(Response::new(ControllerGetCapabilitiesResponse {
            capabilities: vec![
                controller_capability(ControllerRpc::CreateDeleteVolume),
                controller_capability(ControllerRpc::CreateDeleteSnapshot),
                controller_capability(ControllerRpc::ExpandVolume),
            ],
        }))
    }

    async fn create_snapshot(
        &self,
        request: Request<CreateSnapshotRequest>,
    ) -> Result<Response<CreateSnapshotResponse>, Status> {
        Ok(Response::new(self.do_create_snapshot(request.into_inner()).await?))
    }

    async fn delete_snapshot(
        &self,
        request: Request<DeleteSnapshotRequest>,
    ) -> Result<Response<DeleteSnapshotResponse>, Status> {
        self.do_delete_snapshot(request.into_inner()).await?;
        Ok(Response::new(DeleteSnapshotResponse {}))
    }

    async fn list_snapshots(
        &self,
        _request: Request<ListSnapshotsRequest>,
    ) -> Result<Response<ListSnapshotsResponse>, Status> {
        Err(unsupported("ListSnapshots"))
    }

    async fn controller_expand_volume(
        &self,
        request: Request<ControllerExpandVolumeRequest>,
    ) -> Result<Response<ControllerExpandVolumeResponse>, Status> {
        Ok(Response::new(self.do_expand_volume(request.into_inner()).await?))
    }

    async fn controller_get_volume(
        &self,
        _request: Request<ControllerGetVolumeRequest>,
    ) -> Result<Response<ControllerGetVolumeResponse>, Status> {
        Err(unsupported("ControllerGetVolume"))
    }

    async fn controller_modify_volume(
        &self,
        _request: Request<ControllerModifyVolumeRequest>,
    ) -> Result<Response<ControllerModifyVolumeResponse>, Status> {
        Err(unsupported("ControllerModifyVolume"))
    }
}
