//! # libcsi: Container Storage Interface plumbing
//!
//! `libcsi` carries the protocol half of a [Container Storage
//! Interface][csi] plugin: the generated CSI v1 gRPC bindings, a unified error
//! type that maps one-to-one onto gRPC status codes, and a `tonic` based
//! transport for serving a plugin and for forwarding node operations to a
//! downstream, mount-capable plugin.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`proto`] | Generated `csi.v1` messages, clients and server traits. |
//! | [`types`] | Capacity rounding, capability checks and constructors. |
//! | [`error`] | [`CsiError`] enum covering all failure modes. |
//! | [`identity`] | [`CsiIdentity`] trait: downstream discovery & health. |
//! | [`node`] | [`CsiNode`] trait: downstream stage, publish, unpublish, unstage. |
//! | [`transport`] | gRPC client/server over Unix sockets or TCP. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

// Generated protobuf code has doc formatting issues
#![allow(clippy::doc_overindented_list_items)]
#![allow(clippy::doc_lazy_continuation)]
// tonic::Status is large by design
#![allow(clippy::result_large_err)]

pub mod error;
pub mod identity;
pub mod node;
pub mod transport;
pub mod types;

/// Generated CSI v1 protocol types and services.
pub mod proto {
    tonic::include_proto!("csi.v1");
}

// Re-export the most commonly used items at crate root for convenience.
pub use error::CsiError;
pub use identity::CsiIdentity;
pub use node::CsiNode;
pub use transport::{CsiClient, CsiServer, DialPolicy, Endpoint};
pub use types::*;
