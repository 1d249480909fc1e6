//! # libcsi — CSI controller for clustered filesystems, over QUIC
//!
//! `libcsi` implements the controller side of the [Container Storage
//! Interface][csi] for a clustered filesystem that exposes a REST management
//! API.  Volumes are provisioned either as filesets (with quotas) or as
//! plain directories, and are always addressed through a symlink in the
//! driver's primary fileset.  Requests travel as JSON over QUIC (via
//! [`quinn`]) instead of gRPC, following the RK8s conventions (Tokio async
//! runtime, `tracing` for observability, `thiserror` for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `VolumeId`, capabilities, requests. |
//! | [`error`] | [`CsiError`] enum and RPC status [`Code`]s. |
//! | [`message`] | [`CsiMessage`] protocol envelope for QUIC transport. |
//! | [`identity`] | [`CsiIdentity`] trait — plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait — volume lifecycle. |
//! | [`config`] | Cluster configuration file model and validation. |
//! | [`connector`] | [`Connector`] trait, REST and in-memory implementations. |
//! | [`volume_id`] | Volume identifier encoding and decoding. |
//! | [`options`] | Storage-class parameters resolved into a `VolumeSpec`. |
//! | [`consistency_group`] | Consistency-group volume handles. |
//! | [`nodemap`] | Node-name mapping and mount settings from the environment. |
//! | [`transport`] | QUIC client/server built on `quinn`. |
//! | [`backend`] | The clustered-filesystem controller backend. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod config;
pub mod connector;
pub mod consistency_group;
pub mod controller;
pub mod error;
pub mod identity;
pub mod message;
pub mod nodemap;
pub mod options;
pub mod transport;
pub mod types;
pub mod volume_id;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::scale::ScaleBackend;
pub use config::DriverConfig;
pub use connector::{Connector, ConnectorError, ConnectorFactory};
pub use consistency_group::{ConsistencyGroupHandle, PersistentVolumeCsiSource};
pub use controller::CsiController;
pub use error::{Code, CsiError};
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use types::*;
pub use volume_id::VolumeRef;
