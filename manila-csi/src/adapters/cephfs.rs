use std::collections::HashMap;

use libcsi::CsiError;

use super::{Secrets, split_export_path};
use crate::export_location;
use crate::manila::{AccessLevel, AccessRight, AccessType, ExportLocation, GrantAccessOpts, Share};
use crate::options::CephfsOptions;

/// Share metadata key holding backend mount options, e.g. `fs=cephfs,ro`.
const MOUNT_OPTIONS_METADATA: &str = "__mount_options";

/// CephFS shares: cephx access rules, monitor list and root path in the
/// volume context, credentials in the stage secret.
#[derive(Debug, Clone, Copy, Default)]
pub struct CephfsAdapter;

impl CephfsAdapter {
    pub fn access_request(&self, share: &Share, options: &CephfsOptions) -> GrantAccessOpts {
        GrantAccessOpts {
            access_type: AccessType::Cephx,
            access_to: options.client_id.clone().unwrap_or_else(|| share.name.clone()),
            access_level: AccessLevel::Rw,
        }
    }

    pub fn build_volume_context(
        &self,
        share: &Share,
        locations: &[ExportLocation],
        options: &CephfsOptions,
    ) -> Result<HashMap<String, String>, CsiError> {
        let idx = export_location::choose(locations, export_location::any_location)?;
        let (monitors, root_path) = split_export_path(&locations[idx].path)?;

        let mut ctx = HashMap::from([
            ("monitors".to_owned(), monitors.to_owned()),
            ("rootPath".to_owned(), root_path),
            ("mounter".to_owned(), options.mounter.to_string()),
            ("provisionVolume".to_owned(), "false".to_owned()),
        ]);
        if let Some(opts) = &options.kernel_mount_options {
            ctx.insert("kernelMountOptions".to_owned(), opts.clone());
        }
        if let Some(opts) = &options.fuse_mount_options {
            ctx.insert("fuseMountOptions".to_owned(), opts.clone());
        }
        if let Some(fs_name) = fs_name(share) {
            ctx.insert("fsName".to_owned(), fs_name.to_owned());
        }
        Ok(ctx)
    }

    pub fn build_stage_secret(&self, right: &AccessRight) -> Result<Secrets, CsiError> {
        let key = right.key().ok_or_else(|| {
            CsiError::Unavailable(format!(
                "access right {} of share {} has no access key yet",
                right.id, right.share_id
            ))
        })?;
        Ok(Secrets::from([
            ("userID".to_owned(), right.access_to.clone()),
            ("userKey".to_owned(), key.to_owned()),
        ]))
    }
}

/// The filesystem name from the share's `fs=<name>` mount option, if any.
fn fs_name(share: &Share) -> Option<&str> {
    share
        .metadata
        .get(MOUNT_OPTIONS_METADATA)?
        .split(',')
        .filter_map(|opt| opt.trim().strip_prefix("fs="))
        .find(|name| !name.is_empty())
}
