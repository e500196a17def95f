//! Helpers over the generated CSI data model.
//!
//! The message types themselves live in [`crate::proto`]; this module adds the
//! small pieces of arithmetic and inspection every plugin needs: capacity
//! rounding, access-type checks, and capability constructors.

use std::collections::HashMap;

use crate::proto::{
    ControllerServiceCapability, NodeServiceCapability, PluginCapability, Topology,
    VolumeCapability, controller_service_capability, node_service_capability, plugin_capability,
    volume_capability,
};

/// Bytes in one gibibyte.
pub const BYTES_IN_GIB: i64 = 1 << 30;

/// Round `bytes` up to whole gibibytes, with a minimum of 1 GiB.
///
/// Negative values (never valid on the wire) are treated as zero.
pub fn bytes_to_gib(bytes: i64) -> i64 {
    if bytes <= 0 {
        return 1;
    }
    let gib = bytes / BYTES_IN_GIB + i64::from(bytes % BYTES_IN_GIB != 0);
    gib.max(1)
}

/// Convert whole gibibytes back to bytes.
pub fn gib_to_bytes(gib: i64) -> i64 {
    gib.saturating_mul(BYTES_IN_GIB)
}

/// Return `true` if the capability requests raw block access.
pub fn is_block(cap: &VolumeCapability) -> bool {
    matches!(
        cap.access_type,
        Some(volume_capability::AccessType::Block(_))
    )
}

/// Return `true` if the capability requests filesystem (mount) access.
pub fn is_mount(cap: &VolumeCapability) -> bool {
    matches!(
        cap.access_type,
        Some(volume_capability::AccessType::Mount(_))
    )
}

/// Return the requested access mode, or `None` when absent or unknown.
pub fn access_mode(cap: &VolumeCapability) -> Option<volume_capability::access_mode::Mode> {
    let mode = cap.access_mode.as_ref()?.mode;
    match volume_capability::access_mode::Mode::try_from(mode) {
        Ok(volume_capability::access_mode::Mode::Unknown) | Err(_) => None,
        Ok(mode) => Some(mode),
    }
}

/// Build a single-segment topology.
pub fn topology(key: &str, value: &str) -> Topology {
    Topology {
        segments: HashMap::from([(key.to_owned(), value.to_owned())]),
    }
}

/// Build a controller RPC capability entry.
pub fn controller_capability(
    rpc: controller_service_capability::rpc::Type,
) -> ControllerServiceCapability {
    ControllerServiceCapability {
        r#type: Some(controller_service_capability::Type::Rpc(
            controller_service_capability::Rpc { r#type: rpc as i32 },
        )),
    }
}

/// Build a node RPC capability entry.
pub fn node_capability(rpc: node_service_capability::rpc::Type) -> NodeServiceCapability {
    NodeServiceCapability {
        r#type: Some(node_service_capability::Type::Rpc(
            node_service_capability::Rpc { r#type: rpc as i32 },
        )),
    }
}

/// Return `true` if `caps` contains the given node RPC capability.
pub fn has_node_capability(
    caps: &[NodeServiceCapability],
    wanted: node_service_capability::rpc::Type,
) -> bool {
    caps.iter().any(|cap| match &cap.r#type {
        Some(node_service_capability::Type::Rpc(rpc)) => rpc.r#type == wanted as i32,
        None => false,
    })
}

/// Build a plugin service capability entry.
pub fn plugin_service_capability(kind: plugin_capability::service::Type) -> PluginCapability {
    PluginCapability {
        r#type: Some(plugin_capability::Type::Service(plugin_capability::Service {
            r#type: kind as i32,
        })),
    }
}

/// Build a plugin volume-expansion capability entry.
pub fn plugin_expansion_capability(
    kind: plugin_capability::volume_expansion::Type,
) -> PluginCapability {
    PluginCapability {
        r#type: Some(plugin_capability::Type::VolumeExpansion(
            plugin_capability::VolumeExpansion {
                r#type: kind as i32,
            },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::volume_capability::{AccessMode, BlockVolume, MountVolume, access_mode::Mode};

    #[test]
    fn bytes_to_gib_is_ceiling_with_minimum() {
        assert_eq!(bytes_to_gib(0), 1);
        assert_eq!(bytes_to_gib(1), 1);
        assert_eq!(bytes_to_gib(BYTES_IN_GIB), 1);
        assert_eq!(bytes_to_gib(5 * BYTES_IN_GIB), 5);
        assert_eq!(bytes_to_gib(5 * BYTES_IN_GIB + 1), 6);
        assert_eq!(bytes_to_gib(-42), 1);
    }

    #[test]
    fn access_type_checks() {
        let block = VolumeCapability {
            access_type: Some(volume_capability::AccessType::Block(BlockVolume {})),
            access_mode: None,
        };
        let mount = VolumeCapability {
            access_type: Some(volume_capability::AccessType::Mount(MountVolume::default())),
            access_mode: Some(AccessMode {
                mode: Mode::MultiNodeMultiWriter as i32,
            }),
        };
        assert!(is_block(&block));
        assert!(!is_mount(&block));
        assert!(is_mount(&mount));
        assert_eq!(access_mode(&block), None);
        assert_eq!(access_mode(&mount), Some(Mode::MultiNodeMultiWriter));
    }

    #[test]
    fn unknown_access_mode_is_none() {
        let cap = VolumeCapability {
            access_type: None,
            access_mode: Some(AccessMode { mode: 99 }),
        };
        assert_eq!(access_mode(&cap), None);
    }

    #[test]
    fn node_capability_lookup() {
        let caps = vec![node_capability(
            node_service_capability::rpc::Type::StageUnstageVolume,
        )];
        assert!(has_node_capability(
            &caps,
            node_service_capability::rpc::Type::StageUnstageVolume
        ));
        assert!(!has_node_capability(
            &caps,
            node_service_capability::rpc::Type::ExpandVolume
        ));
    }
}
