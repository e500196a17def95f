//! gRPC client used to forward node operations to a downstream CSI plugin.

use std::time::Duration;

use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Uri};
use tower::service_fn;
use tracing::{debug, info, instrument, warn};

use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::node::CsiNode;
use crate::proto::{
    GetPluginInfoRequest, GetPluginInfoResponse, NodeGetCapabilitiesRequest,
    NodePublishVolumeRequest, NodeServiceCapability, NodeStageVolumeRequest,
    NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest, ProbeRequest,
    identity_client::IdentityClient, node_client::NodeClient,
};
use crate::transport::Endpoint;

/// Retry policy for the initial dial of a downstream plugin.
#[derive(Debug, Clone, Copy)]
pub struct DialPolicy {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts.
    pub max_delay: Duration,
    /// Give up after this long.  `None` keeps dialing until success.
    pub timeout: Option<Duration>,
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            timeout: None,
        }
    }
}

/// A CSI client holding one persistent channel to a downstream plugin.
///
/// The channel is established once, in [`CsiClient::connect`], and every
/// request reuses it.
#[derive(Clone)]
pub struct CsiClient {
    channel: Channel,
    endpoint: Endpoint,
}

impl CsiClient {
    /// Dial `endpoint`, retrying with capped exponential delay until the
    /// connection is up or `policy.timeout` elapses.
    pub async fn connect(endpoint: &Endpoint, policy: DialPolicy) -> Result<Self, CsiError> {
        let started = tokio::time::Instant::now();
        let mut delay = policy.initial_delay;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match dial(endpoint).await {
                Ok(channel) => {
                    info!(%endpoint, attempt, "connected to CSI plugin");
                    return Ok(Self {
                        channel,
                        endpoint: endpoint.clone(),
                    });
                }
                Err(e) => {
                    if let Some(timeout) = policy.timeout
                        && started.elapsed() + delay > timeout
                    {
                        return Err(CsiError::Transport(format!(
                            "failed to connect to {endpoint} after {attempt} attempts: {e}"
                        )));
                    }
                    warn!(%endpoint, attempt, error = %e, "CSI plugin not reachable yet, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(policy.max_delay);
                }
            }
        }
    }

    /// The endpoint this client is connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn identity(&self) -> IdentityClient<Channel> {
        IdentityClient::new(self.channel.clone())
    }

    fn node(&self) -> NodeClient<Channel> {
        NodeClient::new(self.channel.clone())
    }
}

/// Open a single channel to `endpoint`.
async fn dial(endpoint: &Endpoint) -> Result<Channel, tonic::transport::Error> {
    match endpoint {
        Endpoint::Unix(path) => {
            let path = path.clone();
            // The URI is ignored by the connector; it only has to be valid.
            tonic::transport::Endpoint::from_static("http://[::]:50051")
                .connect_with_connector(service_fn(move |_: Uri| {
                    let path = path.clone();
                    async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
                }))
                .await
        }
        Endpoint::Tcp(addr) => {
            tonic::transport::Endpoint::from_shared(format!("http://{addr}"))?
                .connect()
                .await
        }
    }
}

#[async_trait]
impl CsiIdentity for CsiClient {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn probe(&self) -> Result<bool, CsiError> {
        let resp = self.identity().probe(ProbeRequest {}).await?.into_inner();
        Ok(resp.ready.unwrap_or(true))
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn get_plugin_info(&self) -> Result<GetPluginInfoResponse, CsiError> {
        let resp = self
            .identity()
            .get_plugin_info(GetPluginInfoRequest {})
            .await?
            .into_inner();
        debug!(name = %resp.name, version = %resp.vendor_version, "plugin info received");
        Ok(resp)
    }
}

#[async_trait]
impl CsiNode for CsiClient {
    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        self.node().node_stage_volume(req).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn unstage_volume(&self, req: NodeUnstageVolumeRequest) -> Result<(), CsiError> {
        self.node().node_unstage_volume(req).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        self.node().node_publish_volume(req).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn unpublish_volume(&self, req: NodeUnpublishVolumeRequest) -> Result<(), CsiError> {
        self.node().node_unpublish_volume(req).await?;
        Ok(())
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeServiceCapability>, CsiError> {
        let resp = self
            .node()
            .node_get_capabilities(NodeGetCapabilitiesRequest {})
            .await?
            .into_inner();
        Ok(resp.capabilities)
    }
}
