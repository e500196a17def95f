//! Protocol adapters.
//!
//! An adapter knows how a share of its protocol is accessed: which access
//! rule to request, which volume context keys the downstream node plugin
//! expects, and which secrets it needs.  The adapter is chosen once at
//! startup from [`ShareProtocol`].

mod cephfs;
mod nfs;

use std::collections::HashMap;

use libcsi::CsiError;

use crate::config::{RuntimeConfig, ShareProtocol};
use crate::lifecycle::Lifecycle;
use crate::manila::{AccessRight, ExportLocation, GrantAccessOpts, Share};
use crate::options::{CephfsOptions, ControllerVolumeOptions};

pub use cephfs::CephfsAdapter;
pub use nfs::NfsAdapter;

/// Flat string map handed to the downstream plugin.
pub type Secrets = HashMap<String, String>;

#[derive(Debug, Clone)]
pub enum ShareAdapter {
    Nfs(NfsAdapter),
    Cephfs(CephfsAdapter),
}

impl ShareAdapter {
    pub fn new(protocol: ShareProtocol, runtime: &RuntimeConfig) -> Self {
        match protocol {
            ShareProtocol::Nfs => Self::Nfs(NfsAdapter::new(runtime.nfs_match_network())),
            ShareProtocol::Cephfs => Self::Cephfs(CephfsAdapter),
        }
    }

    pub fn protocol(&self) -> ShareProtocol {
        match self {
            Self::Nfs(_) => ShareProtocol::Nfs,
            Self::Cephfs(_) => ShareProtocol::Cephfs,
        }
    }

    /// The access rule this protocol needs on `share`.
    pub fn access_request(&self, share: &Share, options: &ControllerVolumeOptions) -> GrantAccessOpts {
        match self {
            Self::Nfs(a) => a.access_request(options),
            Self::Cephfs(a) => a.access_request(share, &options.cephfs),
        }
    }

    /// Reuse or grant the access rule for `share`.  Keyed rules are returned
    /// only once the backend has issued their key.
    pub async fn get_or_grant_access(
        &self,
        lifecycle: &Lifecycle<'_>,
        share: &Share,
        options: &ControllerVolumeOptions,
    ) -> Result<AccessRight, CsiError> {
        let wanted = self.access_request(share, options);
        let right = lifecycle.get_or_grant_access(&share.id, &wanted).await?;
        match self {
            Self::Nfs(_) => Ok(right),
            Self::Cephfs(_) => lifecycle.wait_for_access_key(right).await,
        }
    }

    /// Mount parameters for the downstream plugin.
    pub fn build_volume_context(
        &self,
        share: &Share,
        locations: &[ExportLocation],
        options: &CephfsOptions,
    ) -> Result<HashMap<String, String>, CsiError> {
        match self {
            Self::Nfs(a) => a.build_volume_context(locations),
            Self::Cephfs(a) => a.build_volume_context(share, locations, options),
        }
    }

    pub fn build_stage_secret(&self, right: &AccessRight) -> Result<Secrets, CsiError> {
        match self {
            Self::Nfs(_) => Ok(Secrets::new()),
            Self::Cephfs(a) => a.build_stage_secret(right),
        }
    }

    pub fn build_publish_secret(&self, _right: &AccessRight) -> Result<Secrets, CsiError> {
        Ok(Secrets::new())
    }
}

/// Split an export path of the form `<endpoint>:/<path>` at the first `:/`.
fn split_export_path(path: &str) -> Result<(&str, String), CsiError> {
    match path.split_once(":/") {
        Some((endpoint, rest)) if !endpoint.is_empty() => Ok((endpoint, format!("/{rest}"))),
        _ => Err(CsiError::Internal(format!(
            "malformed export location {path:?}, expected <endpoint>:/<path>"
        ))),
    }
}
