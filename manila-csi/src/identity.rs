//! CSI Identity service.

use std::collections::HashMap;
use std::sync::Arc;

use libcsi::proto::identity_server::Identity;
use libcsi::proto::plugin_capability::{service, volume_expansion};
use libcsi::proto::{
    GetPluginCapabilitiesRequest, GetPluginCapabilitiesResponse, GetPluginInfoRequest,
    GetPluginInfoResponse, ProbeRequest, ProbeResponse,
};
use libcsi::{plugin_expansion_capability, plugin_service_capability};
use tonic::{Request, Response, Status};

use crate::config::DriverConfig;

pub struct IdentityService {
    config: Arc<DriverConfig>,
}

impl IdentityService {
    pub fn new(config: Arc<DriverConfig>) -> Self {
        Self { config }
    }
}

#[tonic::async_trait]
impl Identity for IdentityService {
    async fn get_plugin_info(
        &self,
        _request: Request<GetPluginInfoRequest>,
    ) -> Result<Response<GetPluginInfoResponse>, Status> {
        Ok(Response::new(GetPluginInfoResponse {
            name: self.config.driver_name.clone(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
            manifest: HashMap::new(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _request: Request<GetPluginCapabilitiesRequest>,
    ) -> Result<Response<GetPluginCapabilitiesResponse>, Status> {
        let mut capabilities = vec![
            plugin_service_capability(service::Type::ControllerService),
            plugin_expansion_capability(volume_expansion::Type::Online),
        ];
        if self.config.with_topology {
            capabilities.push(plugin_service_capability(
                service::Type::VolumeAccessibilityConstraints,
            ));
        }
        Ok(Response::new(GetPluginCapabilitiesResponse { capabilities }))
    }

    /// The downstream plugin is probed once at startup, so a running server
    /// is a ready one.
    async fn probe(
        &self,
        _request: Request<ProbeRequest>,
    ) -> Result<Response<ProbeResponse>, Status> {
        Ok(Response::new(ProbeResponse { ready: Some(true) }))
    }
}
