//! # manila-csi: CSI plugin for network file shares
//!
//! The controller half provisions shares and snapshots on a shared-filesystem
//! backend and grants access to them.  The node half mounts nothing itself:
//! it turns a share into the volume context and secrets a protocol-specific
//! node plugin understands and forwards stage/publish calls to that plugin.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`manila`] | Backend data model and the [`manila::ManilaClient`] interface. |
//! | [`lifecycle`] | Get-or-create, backoff polling and rollback of shares and snapshots. |
//! | [`error`] | Backend error classification into [`libcsi::CsiError`]. |
//! | [`pending`] | Per-name guard against concurrent create/expand. |
//! | [`adapters`] | NFS and CephFS access rules, volume context and secrets. |
//! | [`export_location`] | Choice among a share's export locations. |
//! | [`compatibility`] | Checks that an existing resource matches a request. |
//! | [`options`] | Volume parameters and node volume context parsing. |
//! | [`controller`], [`node`], [`identity`] | The CSI gRPC services. |
//! | [`stage_cache`] | Node staging results kept until unstage. |
//! | [`config`], [`logging`], [`driver`] | Startup configuration and wiring. |

// tonic::Status is large by design
#![allow(clippy::result_large_err)]

pub mod adapters;
pub mod compatibility;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod export_location;
pub mod identity;
pub mod lifecycle;
pub mod logging;
pub mod manila;
pub mod node;
pub mod options;
pub mod pending;
pub mod stage_cache;

pub use config::{DriverConfig, ShareProtocol};
pub use driver::Driver;
