//! Driver bootstrap: validate configuration, connect to the downstream node
//! plugin, and serve the Identity, Controller and Node services.

use std::sync::Arc;

use anyhow::Context;
use libcsi::proto::NodeServiceCapability;
use libcsi::proto::node_service_capability::rpc::Type as NodeRpc;
use libcsi::{CsiClient, CsiError, CsiIdentity, CsiNode, CsiServer, DialPolicy, has_node_capability};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::ShareAdapter;
use crate::config::{DriverConfig, RuntimeConfig};
use crate::controller::ControllerService;
use crate::identity::IdentityService;
use crate::manila::ClientBuilder;
use crate::node::NodeService;

/// What the downstream plugin reported at startup.
#[derive(Debug, Clone)]
pub struct DownstreamInfo {
    pub name: String,
    pub vendor_version: String,
    pub capabilities: Vec<NodeServiceCapability>,
}

impl DownstreamInfo {
    pub fn stage_supported(&self) -> bool {
        has_node_capability(&self.capabilities, NodeRpc::StageUnstageVolume)
    }
}

/// Check that the downstream plugin is ready and collect its identity and
/// node capabilities.
pub async fn probe_downstream<P>(plugin: &P) -> Result<DownstreamInfo, CsiError>
where
    P: CsiIdentity + CsiNode,
{
    if !plugin.probe().await? {
        return Err(CsiError::Unavailable(
            "downstream plugin reports not ready".into(),
        ));
    }
    let info = plugin.get_plugin_info().await?;
    let capabilities = plugin.get_capabilities().await?;
    Ok(DownstreamInfo {
        name: info.name,
        vendor_version: info.vendor_version,
        capabilities,
    })
}

pub struct Driver {
    config: Arc<DriverConfig>,
    adapter: ShareAdapter,
    builder: Arc<dyn ClientBuilder>,
    dial: DialPolicy,
}

impl Driver {
    /// Validate `config` and load the runtime configuration file, if any.
    pub fn new(config: DriverConfig, builder: Arc<dyn ClientBuilder>) -> anyhow::Result<Self> {
        config.validate().context("invalid driver configuration")?;
        let runtime = RuntimeConfig::load(config.runtime_config_file.as_deref())?;
        let adapter = ShareAdapter::new(config.share_protocol, &runtime);
        Ok(Self {
            config: Arc::new(config),
            adapter,
            builder,
            dial: DialPolicy::default(),
        })
    }

    pub fn with_dial_policy(mut self, dial: DialPolicy) -> Self {
        self.dial = dial;
        self
    }

    /// Connect to the downstream plugin and serve until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let downstream = CsiClient::connect(&self.config.fwd_endpoint, self.dial)
            .await
            .with_context(|| {
                format!(
                    "failed to connect to downstream plugin at {}",
                    self.config.fwd_endpoint
                )
            })?;
        let info = probe_downstream(&downstream)
            .await
            .context("downstream plugin probe failed")?;
        if info.capabilities.is_empty() {
            warn!(downstream = %info.name, "downstream plugin advertises no node capabilities");
        }
        info!(
            driver = %self.config.driver_name,
            protocol = %self.config.share_protocol,
            downstream = %info.name,
            downstream_version = %info.vendor_version,
            stage_supported = info.stage_supported(),
            "downstream plugin ready"
        );

        let identity = IdentityService::new(self.config.clone());
        let controller = ControllerService::new(
            self.config.clone(),
            self.adapter.clone(),
            self.builder.clone(),
            shutdown.clone(),
        );
        let node = NodeService::new(
            self.config.clone(),
            self.adapter,
            self.builder,
            Arc::new(downstream),
            info.capabilities,
            shutdown.clone(),
        );

        let server = CsiServer::new(self.config.endpoint.clone(), identity, controller, node);
        let endpoint = server.endpoint().clone();
        info!(%endpoint, "serving CSI");
        server
            .serve(shutdown)
            .await
            .with_context(|| format!("CSI server on {endpoint} failed"))?;
        info!("CSI server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::io::Write;

    use async_trait::async_trait;
    use libcsi::node_capability;
    use libcsi::proto::{
        GetPluginInfoResponse, NodePublishVolumeRequest, NodeStageVolumeRequest,
        NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest,
    };
    use tonic::Code;

    use crate::config::ShareProtocol;
    use crate::manila::fake::{FakeBuilder, FakeManila};

    struct Plugin {
        ready: bool,
        capabilities: Vec<NodeServiceCapability>,
    }

    #[async_trait]
    impl CsiIdentity for Plugin {
        async fn probe(&self) -> Result<bool, CsiError> {
            Ok(self.ready)
        }

        async fn get_plugin_info(&self) -> Result<GetPluginInfoResponse, CsiError> {
            Ok(GetPluginInfoResponse {
                name: "nfs.csi.k8s.io".into(),
                vendor_version: "4.6.0".into(),
                manifest: HashMap::new(),
            })
        }
    }

    #[async_trait]
    impl CsiNode for Plugin {
        async fn stage_volume(&self, _req: NodeStageVolumeRequest) -> Result<(), CsiError> {
            Ok(())
        }

        async fn unstage_volume(&self, _req: NodeUnstageVolumeRequest) -> Result<(), CsiError> {
            Ok(())
        }

        async fn publish_volume(&self, _req: NodePublishVolumeRequest) -> Result<(), CsiError> {
            Ok(())
        }

        async fn unpublish_volume(&self, _req: NodeUnpublishVolumeRequest) -> Result<(), CsiError> {
            Ok(())
        }

        async fn get_capabilities(&self) -> Result<Vec<NodeServiceCapability>, CsiError> {
            Ok(self.capabilities.clone())
        }
    }

    #[tokio::test]
    async fn probe_records_stage_support() {
        let plugin = Plugin {
            ready: true,
            capabilities: vec![node_capability(NodeRpc::StageUnstageVolume)],
        };
        let info = probe_downstream(&plugin).await.unwrap();
        assert_eq!(info.name, "nfs.csi.k8s.io");
        assert!(info.stage_supported());

        let plugin = Plugin {
            ready: true,
            capabilities: Vec::new(),
        };
        let info = probe_downstream(&plugin).await.unwrap();
        assert!(!info.stage_supported());
    }

    #[tokio::test]
    async fn unready_plugin_is_unavailable() {
        let plugin = Plugin {
            ready: false,
            capabilities: Vec::new(),
        };
        let err = probe_downstream(&plugin).await.unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
    }

    #[test]
    fn new_validates_configuration() {
        let builder = Arc::new(FakeBuilder(Arc::new(FakeManila::new())));

        let mut config = DriverConfig::for_tests(ShareProtocol::Nfs);
        config.node_id.clear();
        assert!(Driver::new(config, builder.clone()).is_err());

        let mut config = DriverConfig::for_tests(ShareProtocol::Nfs);
        config.runtime_config_file = Some("/nonexistent/runtime.json".into());
        assert!(Driver::new(config, builder.clone()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"nfs": {{"matchExportLocationAddress": "10.0.0.0/24"}}}}"#).unwrap();
        let mut config = DriverConfig::for_tests(ShareProtocol::Nfs);
        config.runtime_config_file = Some(file.path().to_path_buf());
        let driver = Driver::new(config, builder).unwrap();
        assert_eq!(driver.adapter.protocol(), ShareProtocol::Nfs);
    }
}
