//! Clustered-filesystem storage backend for CSI.
//!
//! [`ScaleBackend`] implements [`CsiIdentity`] and [`CsiController`] on top
//! of one [`Connector`] per configured cluster.  Volumes are either filesets
//! (dependent or independent) or plain directories ("lightweight"); each one
//! is reachable through a symlink in the primary fileset's `.volumes`
//! directory, and its volume id encodes enough to find it again without any
//! local state.
//!
//! # Layout on the primary filesystem
//!
//! ```text
//! <primary mount>/
//!   <primary fileset link>/
//!     .volumes/
//!       <volume name> -> <volume filesystem>:<fileset link>/<name>-data
//!       <volume name> -> <volume filesystem>:<volDirBasePath>/<name>
//! ```
//!
//! # Thread safety
//!
//! The only mutable state is the in-flight CreateVolume registry; everything
//! else is fixed once [`ScaleBackend::bootstrap`] returns.

mod bootstrap;
mod create;
mod delete;
mod publish;
mod registry;
mod rollback;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{instrument, warn};

use self::registry::InflightRegistry;
use crate::config::PrimaryConfig;
use crate::connector::Connector;
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::nodemap::PublishSettings;
use crate::types::*;

/// Plugin name reported by the Identity service.
pub const DRIVER_NAME: &str = "rk8s.scale.csi";

/// Directory under the primary fileset holding one symlink per volume.
pub const SYMLINK_DIR: &str = ".volumes";

/// Primary-cluster facts discovered by bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryRuntime {
    /// Mount point of the primary filesystem on the primary cluster.
    pub mount_point: String,
    /// Absolute link path of the primary fileset.
    pub fileset_link_path: String,
    /// Absolute path of the symlink directory.
    pub symlink_dir_abs: String,
    /// Symlink directory relative to the filesystem mount point.
    pub symlink_dir_rel: String,
    /// Filesystem in which symlinks are created.
    pub symlink_fs: String,
    /// Cluster owning [`Self::symlink_fs`].
    pub symlink_cluster: String,
}

/// Controller plugin backed by a clustered filesystem.
pub struct ScaleBackend {
    connectors: HashMap<String, Arc<dyn Connector>>,
    primary_cluster: String,
    primary: PrimaryConfig,
    runtime: PrimaryRuntime,
    publish: PublishSettings,
    inflight: InflightRegistry,
}

impl ScaleBackend {
    pub fn runtime(&self) -> &PrimaryRuntime {
        &self.runtime
    }

    fn connector(&self, cluster_id: &str) -> Result<&Arc<dyn Connector>, CsiError> {
        self.connectors
            .get(cluster_id)
            .ok_or_else(|| CsiError::Internal(format!("cluster [{cluster_id}] is not configured")))
    }

    fn primary_connector(&self) -> Result<&Arc<dyn Connector>, CsiError> {
        self.connector(&self.primary_cluster)
    }

    fn symlink_connector(&self) -> Result<&Arc<dyn Connector>, CsiError> {
        self.connector(&self.runtime.symlink_cluster)
    }
}

#[async_trait]
impl CsiIdentity for ScaleBackend {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: DRIVER_NAME.to_owned(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        match self.primary_connector()?.get_cluster_id().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(cluster = %self.primary_cluster, error = %e, "primary cluster unreachable");
                Ok(false)
            }
        }
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![PluginCapability::ControllerService])
    }
}

#[async_trait]
impl CsiController for ScaleBackend {
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        self.create(req).await
    }

    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        self.delete(volume_id).await
    }

    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<(), CsiError> {
        self.publish(req).await
    }

    async fn controller_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<(), CsiError> {
        self.unpublish(volume_id, node_id)
    }

    #[instrument(skip(self, capabilities), fields(volume_id = %volume_id))]
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<ValidateVolumeCapabilitiesResponse, CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id is missing".into()));
        }
        if capabilities.is_empty() {
            return Err(CsiError::InvalidArgument(
                "volume capabilities are missing".into(),
            ));
        }
        if let Some(cap) = capabilities
            .iter()
            .find(|c| c.access_mode != AccessMode::MultiNodeMultiWriter)
        {
            return Ok(ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: format!("access mode {:?} is not supported", cap.access_mode),
            });
        }
        Ok(ValidateVolumeCapabilitiesResponse {
            confirmed: Some(capabilities.to_vec()),
            message: String::new(),
        })
    }

    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(vec![
            ControllerCapability::CreateDeleteVolume,
            ControllerCapability::PublishUnpublishVolume,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::testing::harness;
    use super::*;
    use crate::error::Code;

    #[tokio::test]
    async fn plugin_info() {
        let h = harness().await;
        let info = h.backend.get_plugin_info().await.unwrap();
        assert_eq!(info.name, DRIVER_NAME);
        assert_eq!(
            h.backend.get_plugin_capabilities().await.unwrap(),
            vec![PluginCapability::ControllerService]
        );
    }

    #[tokio::test]
    async fn probe_reports_unreachable_primary() {
        let h = harness().await;
        assert!(h.backend.probe().await.unwrap());
        h.primary.fail_on("get_cluster_id");
        assert!(!h.backend.probe().await.unwrap());
    }

    #[tokio::test]
    async fn validate_confirms_only_multi_writer() {
        let h = harness().await;
        let id = VolumeId::from("c1;uuid-fs1;path=/gpfs/fs1/csi-volume-store/.volumes/pvc1");

        let resp = h
            .backend
            .validate_volume_capabilities(&id, &[VolumeCapability::default()])
            .await
            .unwrap();
        assert!(resp.confirmed.is_some());

        let resp = h
            .backend
            .validate_volume_capabilities(
                &id,
                &[
                    VolumeCapability::default(),
                    VolumeCapability::mount(AccessMode::SingleNodeWriter),
                ],
            )
            .await
            .unwrap();
        assert!(resp.confirmed.is_none());
        assert!(resp.message.contains("SingleNodeWriter"));

        let err = h
            .backend
            .validate_volume_capabilities(&VolumeId::default(), &[VolumeCapability::default()])
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn optional_rpcs_are_unimplemented() {
        let h = harness().await;
        let caps = h.backend.controller_get_capabilities().await.unwrap();
        assert!(caps.contains(&ControllerCapability::CreateDeleteVolume));
        assert!(!caps.contains(&ControllerCapability::ListVolumes));

        let id = VolumeId::from("c1;u;path=/p");
        assert_eq!(h.backend.list_volumes().await.unwrap_err().code(), Code::Unimplemented);
        assert_eq!(h.backend.get_capacity().await.unwrap_err().code(), Code::Unimplemented);
        assert_eq!(
            h.backend
                .controller_expand_volume(&id, 1)
                .await
                .unwrap_err()
                .code(),
            Code::Unimplemented
        );
        assert_eq!(
            h.backend.create_snapshot(&id, "snap").await.unwrap_err().code(),
            Code::Unimplemented
        );
        assert_eq!(h.backend.delete_snapshot("s").await.unwrap_err().code(), Code::Unimplemented);
        assert_eq!(h.backend.list_snapshots().await.unwrap_err().code(), Code::Unimplemented);
    }
}
