//! Checks that a resource found by name matches the request that names it.

use std::fmt::Display;

use libcsi::CsiError;

use crate::manila::{CreateShareOpts, Share, Snapshot};

fn mismatch(field: &str, requested: impl Display, actual: impl Display) -> String {
    format!("{field} mismatch: requested {requested}, found {actual}")
}

fn or_none(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("<none>")
}

/// Verify that `share` could have been created by `opts`.
pub fn check_share(share: &Share, opts: &CreateShareOpts) -> Result<(), CsiError> {
    let reason = if share.size != opts.size {
        Some(mismatch("size", format!("{} GiB", opts.size), format!("{} GiB", share.size)))
    } else if !share.share_proto.eq_ignore_ascii_case(&opts.share_proto) {
        Some(mismatch("protocol", &opts.share_proto, &share.share_proto))
    } else if or_none(share.share_network_id.as_deref()) != or_none(opts.share_network_id.as_deref()) {
        Some(mismatch(
            "share network",
            or_none(opts.share_network_id.as_deref()),
            or_none(share.share_network_id.as_deref()),
        ))
    } else if or_none(share.snapshot_id.as_deref()) != or_none(opts.snapshot_id.as_deref()) {
        Some(mismatch(
            "source snapshot",
            or_none(opts.snapshot_id.as_deref()),
            or_none(share.snapshot_id.as_deref()),
        ))
    } else {
        None
    };

    match reason {
        None => Ok(()),
        Some(reason) => Err(CsiError::AlreadyExists(format!(
            "a share named {} already exists, but is incompatible with the request: {reason}",
            share.name
        ))),
    }
}

/// Verify that `snapshot` was taken of `source_share_id`.
pub fn check_snapshot(snapshot: &Snapshot, source_share_id: &str) -> Result<(), CsiError> {
    if snapshot.share_id == source_share_id {
        return Ok(());
    }
    Err(CsiError::AlreadyExists(format!(
        "a snapshot named {} already exists, but is incompatible with the request: {}",
        snapshot.name,
        mismatch("source share", source_share_id, &snapshot.share_id)
    )))
}
