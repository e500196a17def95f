//! Driver configuration.
//!
//! [`DriverConfig`] derives both `clap::Args` and serde, so an embedding
//! binary can flatten it into its own command line or read it from a file.
//! [`RuntimeConfig`] is an optional JSON file with settings that may change
//! between deployments without rebuilding the command line.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use ipnet::IpNet;
use libcsi::Endpoint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::Backoff;

pub const DEFAULT_DRIVER_NAME: &str = "manila.csi.openstack.org";

/// Topology segment key carrying the availability zone.
pub const TOPOLOGY_ZONE_KEY: &str = "topology.manila.csi.openstack.org/zone";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown share protocol {0:?}, expected NFS or CEPHFS")]
    UnknownProtocol(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Share protocol served by this driver instance.  Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ShareProtocol {
    Nfs,
    Cephfs,
}

impl ShareProtocol {
    /// The backend's spelling of the protocol.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nfs => "NFS",
            Self::Cephfs => "CEPHFS",
        }
    }

    /// Return `true` if a backend protocol string names this protocol.
    pub fn matches(&self, share_proto: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(share_proto)
    }
}

impl FromStr for ShareProtocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("nfs") {
            Ok(Self::Nfs)
        } else if s.eq_ignore_ascii_case("cephfs") {
            Ok(Self::Cephfs)
        } else {
            Err(ConfigError::UnknownProtocol(s.to_owned()))
        }
    }
}

impl TryFrom<String> for ShareProtocol {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ShareProtocol> for String {
    fn from(proto: ShareProtocol) -> Self {
        proto.as_str().to_owned()
    }
}

impl fmt::Display for ShareProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backoff policies for the different waits the driver performs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WaitConfig {
    /// Share creation and extension.
    pub share: Backoff,
    /// Snapshot creation.
    pub snapshot: Backoff,
    /// Waiting for a rolled back resource to disappear.
    pub rollback: Backoff,
    /// Waiting for the backend to issue an access key.
    pub access: Backoff,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            share: Backoff::new(Duration::from_secs(3), 1.2, 10),
            snapshot: Backoff::new(Duration::from_secs(1), 1.2, 5),
            rollback: Backoff::new(Duration::from_secs(1), 1.2, 5),
            access: Backoff::new(Duration::from_secs(1), 1.5, 8),
        }
    }
}

/// Upper bound on the steps of any single wait policy.
pub const MAX_WAIT_STEPS: u32 = 64;

impl WaitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, backoff) in [
            ("share", &self.share),
            ("snapshot", &self.snapshot),
            ("rollback", &self.rollback),
            ("access", &self.access),
        ] {
            if backoff.initial.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "{name} wait policy needs a non-zero initial interval"
                )));
            }
            if backoff.steps == 0 || backoff.steps > MAX_WAIT_STEPS {
                return Err(ConfigError::Invalid(format!(
                    "{name} wait policy needs between 1 and {MAX_WAIT_STEPS} steps"
                )));
            }
            if !backoff.factor.is_finite() || backoff.factor <= 1.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} wait policy needs a finite factor greater than 1"
                )));
            }
        }
        Ok(())
    }
}

/// Static driver configuration.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverConfig {
    /// Name of the driver.
    #[arg(long = "drivername", default_value = DEFAULT_DRIVER_NAME)]
    #[serde(default = "default_driver_name")]
    pub driver_name: String,

    /// Node ID reported by NodeGetInfo.
    #[arg(long = "nodeid", default_value = "")]
    #[serde(default)]
    pub node_id: String,

    /// Availability zone of this node.
    #[arg(long = "nodeaz")]
    #[serde(default)]
    pub node_az: Option<String>,

    /// Report and honour topology constraints.
    #[arg(long)]
    #[serde(default)]
    pub with_topology: bool,

    /// Share protocol to serve: NFS or CEPHFS.
    #[arg(long = "share-protocol-selector")]
    pub share_protocol: ShareProtocol,

    /// CSI endpoint this driver listens on.
    #[arg(long, default_value = "unix:///var/lib/kubelet/plugins/manila.csi.openstack.org/csi.sock")]
    #[serde(default = "default_endpoint")]
    pub endpoint: Endpoint,

    /// CSI endpoint of the downstream node plugin for the share protocol.
    #[arg(long = "fwdendpoint")]
    pub fwd_endpoint: Endpoint,

    /// Optional JSON runtime configuration file.
    #[arg(long = "runtime-config-file")]
    #[serde(default)]
    pub runtime_config_file: Option<PathBuf>,

    /// Cluster identifier recorded in share metadata.
    #[arg(long = "cluster-id")]
    #[serde(default)]
    pub cluster_id: Option<String>,

    #[arg(skip)]
    #[serde(default)]
    pub wait: WaitConfig,
}

fn default_driver_name() -> String {
    DEFAULT_DRIVER_NAME.to_owned()
}

fn default_endpoint() -> Endpoint {
    Endpoint::Unix(PathBuf::from(
        "/var/lib/kubelet/plugins/manila.csi.openstack.org/csi.sock",
    ))
}

impl DriverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.driver_name.is_empty() {
            return Err(ConfigError::Invalid("driver name must not be empty".into()));
        }
        if self.node_id.is_empty() {
            return Err(ConfigError::Invalid("node ID must not be empty".into()));
        }
        if self.with_topology && self.node_az.as_deref().unwrap_or_default().is_empty() {
            return Err(ConfigError::Invalid(
                "topology is enabled but no node availability zone is set".into(),
            ));
        }
        self.wait.validate()
    }
}

#[cfg(test)]
impl DriverConfig {
    pub(crate) fn for_tests(share_protocol: ShareProtocol) -> Self {
        Self {
            driver_name: DEFAULT_DRIVER_NAME.to_owned(),
            node_id: "node-1".to_owned(),
            node_az: Some("nova".to_owned()),
            with_topology: false,
            share_protocol,
            endpoint: default_endpoint(),
            fwd_endpoint: Endpoint::Unix(PathBuf::from("/csi/fwd.sock")),
            runtime_config_file: None,
            cluster_id: None,
            wait: WaitConfig::default(),
        }
    }
}

/// Settings read from the runtime configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default)]
    pub nfs: Option<NfsRuntimeConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfsRuntimeConfig {
    /// Only export locations whose address lies in this network are usable.
    #[serde(default)]
    pub match_export_location_address: Option<IpNet>,
}

impl RuntimeConfig {
    /// Load the runtime configuration, or the empty one if `path` is `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse runtime config {}", path.display()))
    }

    /// The NFS export location network filter, if configured.
    pub fn nfs_match_network(&self) -> Option<IpNet> {
        self.nfs.as_ref()?.match_export_location_address
    }
}
