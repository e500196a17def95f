//! gRPC server exposing the Identity, Controller and Node services of a CSI
//! plugin on a Unix socket or TCP endpoint.

use std::net::SocketAddr;

use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::info;

use crate::error::CsiError;
use crate::proto::{
    controller_server::{Controller, ControllerServer},
    identity_server::{Identity, IdentityServer},
    node_server::{Node, NodeServer},
};
use crate::transport::Endpoint;

/// A CSI server that dispatches incoming gRPC requests to an Identity,
/// Controller and Node implementation.
pub struct CsiServer<I, C, N> {
    endpoint: Endpoint,
    identity: I,
    controller: C,
    node: N,
}

impl<I, C, N> CsiServer<I, C, N>
where
    I: Identity,
    C: Controller,
    N: Node,
{
    /// Create a new server that will listen on `endpoint`.
    pub fn new(endpoint: Endpoint, identity: I, controller: C, node: N) -> Self {
        Self {
            endpoint,
            identity,
            controller,
            node,
        }
    }

    /// Serve until `shutdown` is cancelled.
    ///
    /// For Unix endpoints a stale socket file left by a previous run is
    /// removed before binding.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), CsiError> {
        let router = Server::builder()
            .add_service(IdentityServer::new(self.identity))
            .add_service(ControllerServer::new(self.controller))
            .add_service(NodeServer::new(self.node));
        let signal = async move { shutdown.cancelled().await };

        match &self.endpoint {
            Endpoint::Unix(path) => {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(CsiError::Transport(format!(
                            "remove stale socket {}: {e}",
                            path.display()
                        )));
                    }
                }
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        CsiError::Transport(format!("create dir {}: {e}", parent.display()))
                    })?;
                }
                let listener = UnixListener::bind(path).map_err(CsiError::transport)?;
                info!(endpoint = %self.endpoint, "CSI gRPC server listening");
                router
                    .serve_with_incoming_shutdown(UnixListenerStream::new(listener), signal)
                    .await
                    .map_err(CsiError::transport)
            }
            Endpoint::Tcp(addr) => {
                let addr: SocketAddr = addr.parse().map_err(|e| {
                    CsiError::InvalidArgument(format!("endpoint {}: {e}", self.endpoint))
                })?;
                info!(endpoint = %self.endpoint, "CSI gRPC server listening");
                router
                    .serve_with_shutdown(addr, signal)
                    .await
                    .map_err(CsiError::transport)
            }
        }
    }

    /// The endpoint this server listens on.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}
