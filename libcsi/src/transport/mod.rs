//! gRPC transport for CSI services.
//!
//! This module provides [`CsiClient`] (a connection to a downstream plugin)
//! and [`CsiServer`] (the Identity/Controller/Node gRPC server), both
//! addressed by a CSI [`Endpoint`].

pub mod client;
pub mod server;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CsiError;

pub use client::{CsiClient, DialPolicy};
pub use server::CsiServer;

/// Address of a CSI gRPC endpoint, e.g. `unix:///csi/csi.sock` or
/// `tcp://127.0.0.1:10000`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    /// A Unix domain socket path.
    Unix(PathBuf),
    /// A `host:port` TCP address.
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = CsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(CsiError::InvalidArgument(format!(
                    "endpoint {s}: empty socket path"
                )));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            if addr.is_empty() {
                return Err(CsiError::InvalidArgument(format!(
                    "endpoint {s}: empty address"
                )));
            }
            return Ok(Self::Tcp(addr.to_owned()));
        }
        Err(CsiError::InvalidArgument(format!(
            "endpoint {s}: unsupported scheme, expected unix:// or tcp://"
        )))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = CsiError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_unix_endpoint() {
        let ep: Endpoint = "unix:///var/lib/kubelet/plugins/nfs/csi.sock".parse().unwrap();
        assert_eq!(
            ep,
            Endpoint::Unix(PathBuf::from("/var/lib/kubelet/plugins/nfs/csi.sock"))
        );
        assert_eq!(ep.to_string(), "unix:///var/lib/kubelet/plugins/nfs/csi.sock");
    }

    #[test]
    fn parse_tcp_endpoint() {
        let ep: Endpoint = "tcp://127.0.0.1:10000".parse().unwrap();
        assert_eq!(ep, Endpoint::Tcp("127.0.0.1:10000".into()));
    }

    #[test]
    fn reject_unknown_scheme() {
        assert!(matches!(
            "http://localhost".parse::<Endpoint>(),
            Err(CsiError::InvalidArgument(_))
        ));
        assert!("unix://".parse::<Endpoint>().is_err());
    }

    #[test]
    fn endpoint_serde() {
        let ep: Endpoint = serde_json::from_str("\"unix:///csi/csi.sock\"").unwrap();
        assert_eq!(ep, Endpoint::Unix(PathBuf::from("/csi/csi.sock")));
        assert!(serde_json::from_str::<Endpoint>("\"ftp://x\"").is_err());
    }
}
