//! Typed views of CreateVolume parameters and node volume contexts.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use libcsi::CsiError;
use serde::Deserialize;
use serde_json::Value;

/// Parameters under this prefix are added by the orchestrator's sidecars and
/// carry nothing for the driver.
const RESERVED_PREFIX: &str = "csi.storage.k8s.io/";

pub const KEY_SHARE_ID: &str = "shareID";
pub const KEY_SHARE_NAME: &str = "shareName";
pub const KEY_SHARE_ACCESS_IDS: &str = "shareAccessIDs";
pub const KEY_SHARE_ACCESS_ID: &str = "shareAccessID";
pub const KEY_CEPHFS_MOUNTER: &str = "cephfs-mounter";
pub const KEY_CEPHFS_KERNEL_MOUNT_OPTIONS: &str = "cephfs-kernelMountOptions";
pub const KEY_CEPHFS_FUSE_MOUNT_OPTIONS: &str = "cephfs-fuseMountOptions";
pub const KEY_CEPHFS_CLIENT_ID: &str = "cephfs-clientID";

/// Which CephFS client the downstream plugin should mount with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mounter {
    #[default]
    Fuse,
    Kernel,
}

impl Mounter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fuse => "fuse",
            Self::Kernel => "kernel",
        }
    }
}

impl FromStr for Mounter {
    type Err = CsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fuse" => Ok(Self::Fuse),
            "kernel" => Ok(Self::Kernel),
            other => Err(CsiError::InvalidArgument(format!(
                "invalid {KEY_CEPHFS_MOUNTER} {other:?}, expected fuse or kernel"
            ))),
        }
    }
}

impl fmt::Display for Mounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CephFS mount settings shared by the controller parameters and the node
/// volume context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CephfsOptions {
    pub mounter: Mounter,
    pub kernel_mount_options: Option<String>,
    pub fuse_mount_options: Option<String>,
    /// Name of the cephx client to grant access to.  Defaults to the share
    /// name.
    pub client_id: Option<String>,
}

impl CephfsOptions {
    fn from_raw(
        mounter: Option<String>,
        kernel_mount_options: Option<String>,
        fuse_mount_options: Option<String>,
        client_id: Option<String>,
    ) -> Result<Self, CsiError> {
        Ok(Self {
            mounter: mounter
                .as_deref()
                .filter(|m| !m.is_empty())
                .map(str::parse::<Mounter>)
                .transpose()?
                .unwrap_or_default(),
            kernel_mount_options: non_empty(kernel_mount_options),
            fuse_mount_options: non_empty(fuse_mount_options),
            client_id: non_empty(client_id),
        })
    }

    /// Write these settings into a volume context under their parameter keys.
    pub fn write_context(&self, ctx: &mut HashMap<String, String>) {
        ctx.insert(KEY_CEPHFS_MOUNTER.to_owned(), self.mounter.to_string());
        for (key, value) in [
            (KEY_CEPHFS_KERNEL_MOUNT_OPTIONS, &self.kernel_mount_options),
            (KEY_CEPHFS_FUSE_MOUNT_OPTIONS, &self.fuse_mount_options),
            (KEY_CEPHFS_CLIENT_ID, &self.client_id),
        ] {
            if let Some(value) = value {
                ctx.insert(key.to_owned(), value.clone());
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn to_object<'a>(entries: impl Iterator<Item = (&'a String, &'a String)>) -> Value {
    Value::Object(
        entries
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawControllerOptions {
    #[serde(rename = "type")]
    share_type: Option<String>,
    #[serde(rename = "shareNetworkID")]
    share_network_id: Option<String>,
    availability: Option<String>,
    #[serde(rename = "autoTopology")]
    auto_topology: Option<String>,
    #[serde(rename = "appendShareMetadata")]
    append_share_metadata: Option<String>,
    #[serde(rename = "cephfs-mounter")]
    cephfs_mounter: Option<String>,
    #[serde(rename = "cephfs-kernelMountOptions")]
    cephfs_kernel_mount_options: Option<String>,
    #[serde(rename = "cephfs-fuseMountOptions")]
    cephfs_fuse_mount_options: Option<String>,
    #[serde(rename = "cephfs-clientID")]
    cephfs_client_id: Option<String>,
    #[serde(rename = "nfs-shareClient")]
    nfs_share_client: Option<String>,
}

/// CreateVolume / CreateSnapshot parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerVolumeOptions {
    /// Backend share type.
    pub share_type: String,
    pub share_network_id: Option<String>,
    /// Explicit availability zone for new shares.
    pub availability: Option<String>,
    /// Derive the availability zone from the request's topology.
    pub auto_topology: bool,
    /// Extra metadata attached to every new share.
    pub append_share_metadata: HashMap<String, String>,
    pub cephfs: CephfsOptions,
    /// Address range granted access to NFS shares.
    pub nfs_share_client: String,
}

impl ControllerVolumeOptions {
    /// Parse request parameters.  Unknown keys are rejected; orchestrator
    /// reserved keys are skipped.
    pub fn parse(params: &HashMap<String, String>) -> Result<Self, CsiError> {
        let value = to_object(
            params
                .iter()
                .filter(|(k, _)| !k.starts_with(RESERVED_PREFIX)),
        );
        let raw: RawControllerOptions = serde_json::from_value(value)
            .map_err(|e| CsiError::InvalidArgument(format!("invalid volume parameters: {e}")))?;

        let auto_topology = match raw.auto_topology.as_deref() {
            None | Some("") => false,
            Some(v) => v.parse::<bool>().map_err(|_| {
                CsiError::InvalidArgument(format!("invalid autoTopology {v:?}, expected true or false"))
            })?,
        };
        let append_share_metadata = match raw.append_share_metadata.as_deref() {
            None | Some("") => HashMap::new(),
            Some(v) => serde_json::from_str(v).map_err(|e| {
                CsiError::InvalidArgument(format!("invalid appendShareMetadata: {e}"))
            })?,
        };

        Ok(Self {
            share_type: non_empty(raw.share_type).unwrap_or_else(|| "default".to_owned()),
            share_network_id: non_empty(raw.share_network_id),
            availability: non_empty(raw.availability),
            auto_topology,
            append_share_metadata,
            cephfs: CephfsOptions::from_raw(
                raw.cephfs_mounter,
                raw.cephfs_kernel_mount_options,
                raw.cephfs_fuse_mount_options,
                raw.cephfs_client_id,
            )?,
            nfs_share_client: non_empty(raw.nfs_share_client)
                .unwrap_or_else(|| "0.0.0.0/0".to_owned()),
        })
    }
}

/// How a node volume context identifies its share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareRef {
    Id(String),
    Name(String),
}

impl fmt::Display for ShareRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "share {id}"),
            Self::Name(name) => write!(f, "share named {name}"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawNodeContext {
    #[serde(rename = "shareID")]
    share_id: Option<String>,
    #[serde(rename = "shareName")]
    share_name: Option<String>,
    #[serde(rename = "shareAccessIDs")]
    share_access_ids: Option<String>,
    #[serde(rename = "shareAccessID")]
    share_access_id: Option<String>,
    #[serde(rename = "cephfs-mounter")]
    cephfs_mounter: Option<String>,
    #[serde(rename = "cephfs-kernelMountOptions")]
    cephfs_kernel_mount_options: Option<String>,
    #[serde(rename = "cephfs-fuseMountOptions")]
    cephfs_fuse_mount_options: Option<String>,
    #[serde(rename = "cephfs-clientID")]
    cephfs_client_id: Option<String>,
}

/// The volume context handed to NodeStageVolume / NodePublishVolume, either
/// produced by CreateVolume or written by hand for a pre-existing share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeVolumeContext {
    pub share: ShareRef,
    /// Access rights the node may use, in order of preference.
    pub access_ids: Vec<String>,
    pub cephfs: CephfsOptions,
}

impl NodeVolumeContext {
    /// Parse a volume context.  Unknown keys are ignored.
    pub fn parse(ctx: &HashMap<String, String>) -> Result<Self, CsiError> {
        let raw: RawNodeContext = serde_json::from_value(to_object(ctx.iter()))
            .map_err(|e| CsiError::InvalidArgument(format!("invalid volume context: {e}")))?;

        let share = match (non_empty(raw.share_id), non_empty(raw.share_name)) {
            (Some(id), None) => ShareRef::Id(id),
            (None, Some(name)) => ShareRef::Name(name),
            _ => {
                return Err(CsiError::InvalidArgument(format!(
                    "volume context must contain exactly one of {KEY_SHARE_ID} or {KEY_SHARE_NAME}"
                )));
            }
        };

        let access_ids = match (non_empty(raw.share_access_ids), non_empty(raw.share_access_id)) {
            (Some(ids), None) => ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_owned)
                .collect::<Vec<_>>(),
            (None, Some(id)) => vec![id],
            _ => Vec::new(),
        };
        if access_ids.is_empty() {
            return Err(CsiError::InvalidArgument(format!(
                "volume context must contain exactly one of {KEY_SHARE_ACCESS_IDS} or {KEY_SHARE_ACCESS_ID}"
            )));
        }

        Ok(Self {
            share,
            access_ids,
            cephfs: CephfsOptions::from_raw(
                raw.cephfs_mounter,
                raw.cephfs_kernel_mount_options,
                raw.cephfs_fuse_mount_options,
                raw.cephfs_client_id,
            )?,
        })
    }
}
