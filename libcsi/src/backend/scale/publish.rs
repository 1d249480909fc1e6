//! ControllerPublishVolume / ControllerUnpublishVolume.
//!
//! Publishing only makes sure the primary filesystem and the volume's
//! filesystem are mounted on the target node; the node plugin does the
//! bind mount.

use tracing::{debug, info, instrument};

use super::ScaleBackend;
use crate::error::CsiError;
use crate::types::{ControllerPublishVolumeRequest, VolumeId};
use crate::volume_id::addressing_prefix;

impl ScaleBackend {
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, node_id = %req.node_id))]
    pub(super) async fn publish(&self, req: ControllerPublishVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id is missing".into()));
        }
        if req.node_id.is_empty() {
            return Err(CsiError::InvalidArgument("node id is missing".into()));
        }
        let (_, fs_uuid) = addressing_prefix(req.volume_id.as_str())
            .map_err(|e| CsiError::InvalidArgument(e.to_string()))?;

        let conn = self.primary_connector()?;
        let volume_fs = conn.get_filesystem_name(fs_uuid).await.map_err(|e| {
            CsiError::remote(format!("unable to get filesystem name for uuid [{fs_uuid}]"), e)
        })?;
        let primary_fs = &self.primary.primary_fs;
        let node = self.publish.node_mapping.resolve(&req.node_id);
        debug!(%node, %volume_fs, "resolved cluster node");

        let mut filesystems = vec![primary_fs.as_str()];
        if volume_fs != *primary_fs {
            filesystems.push(volume_fs.as_str());
        }
        let mut unmounted = Vec::with_capacity(filesystems.len());
        for fs in filesystems {
            let mounted = conn.is_filesystem_mounted(fs, &node).await.map_err(|e| {
                CsiError::remote(
                    format!("unable to check mount of filesystem [{fs}] on node [{node}]"),
                    e,
                )
            })?;
            if !mounted {
                unmounted.push(fs);
            }
        }
        if unmounted.is_empty() {
            debug!("filesystems already mounted");
            return Ok(());
        }
        if self.publish.skip_mount_unmount {
            return Err(CsiError::Internal(format!(
                "filesystems {unmounted:?} are not mounted on node [{node}] and driver mounts are disabled"
            )));
        }

        // Primary first.
        for fs in unmounted {
            conn.mount_filesystem(fs, &node).await.map_err(|e| {
                CsiError::remote(format!("unable to mount filesystem [{fs}] on node [{node}]"), e)
            })?;
            info!(filesystem = fs, %node, "filesystem mounted");
        }
        Ok(())
    }

    /// Filesystems stay mounted; only the id is checked.
    #[instrument(skip(self), fields(volume_id = %volume_id))]
    pub(super) fn unpublish(&self, volume_id: &VolumeId, node_id: &str) -> Result<(), CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id is missing".into()));
        }
        addressing_prefix(volume_id.as_str())
            .map_err(|e| CsiError::InvalidArgument(e.to_string()))?;
        debug!(node_id, "nothing to unpublish");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::scale::testing::{create_request, harness, harness_with};
    use crate::controller::CsiController;
    use crate::error::Code;
    use crate::nodemap::PublishSettings;
    use crate::types::{ControllerPublishVolumeRequest, VolumeId};

    fn publish_request(volume_id: &VolumeId, node_id: &str) -> ControllerPublishVolumeRequest {
        ControllerPublishVolumeRequest {
            volume_id: volume_id.clone(),
            node_id: node_id.into(),
            volume_capability: None,
            readonly: false,
            volume_context: Default::default(),
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    async fn lightweight_on_fs2(h: &crate::backend::scale::testing::Harness) -> VolumeId {
        h.primary.add_filesystem("fs2", "uuid-fs2", "/gpfs/fs2");
        h.primary.mount_on("fs2", "node-a");
        h.primary.add_directory("fs2", "data");
        h.backend
            .create_volume(create_request(
                "pvc2",
                0,
                &[("volBackendFs", "fs2"), ("volDirBasePath", "data")],
            ))
            .await
            .unwrap()
            .volume_id
    }

    #[tokio::test]
    async fn mounted_filesystems_need_nothing() {
        let h = harness().await;
        let id = lightweight_on_fs2(&h).await;
        h.backend
            .controller_publish_volume(publish_request(&id, "node-a"))
            .await
            .unwrap();
        assert_eq!(h.primary.calls("mount_filesystem"), 0);
    }

    #[tokio::test]
    async fn mounts_missing_filesystems_on_mapped_node() {
        let h = harness_with(PublishSettings::from_vars(vars(&[(
            "K8sNodePrefix_worker-1",
            "node-b",
        )])))
        .await;
        let id = lightweight_on_fs2(&h).await;

        h.backend
            .controller_publish_volume(publish_request(&id, "worker-1"))
            .await
            .unwrap();
        assert!(h.primary.is_mounted_on("fs1", "node-b"));
        assert!(h.primary.is_mounted_on("fs2", "node-b"));
        assert!(!h.primary.is_mounted_on("fs1", "worker-1"));
        assert_eq!(h.primary.calls("mount_filesystem"), 2);
    }

    #[tokio::test]
    async fn same_filesystem_is_mounted_once() {
        let h = harness().await;
        let id = VolumeId::from("c1;uuid-fs1;path=/gpfs/fs1/csi-volume-store/.volumes/pvc1");
        h.backend
            .controller_publish_volume(publish_request(&id, "node-c"))
            .await
            .unwrap();
        assert!(h.primary.is_mounted_on("fs1", "node-c"));
        assert_eq!(h.primary.calls("mount_filesystem"), 1);
    }

    #[tokio::test]
    async fn skip_flag_requires_existing_mounts() {
        let h = harness_with(PublishSettings::from_vars(vars(&[("SKIP_MOUNT_UNMOUNT", "yes")]))).await;
        let id = lightweight_on_fs2(&h).await;

        h.backend
            .controller_publish_volume(publish_request(&id, "node-a"))
            .await
            .unwrap();
        let err = h
            .backend
            .controller_publish_volume(publish_request(&id, "node-b"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(h.primary.calls("mount_filesystem"), 0);
    }

    #[tokio::test]
    async fn publish_rejects_bad_requests() {
        let h = harness().await;
        let id = VolumeId::from("c1;uuid-fs1;path=/p");
        for req in [
            publish_request(&VolumeId::default(), "node-a"),
            publish_request(&id, ""),
            publish_request(&VolumeId::from("c1;uuid-fs1"), "node-a"),
        ] {
            let err = h.backend.controller_publish_volume(req).await.unwrap_err();
            assert_eq!(err.code(), Code::InvalidArgument);
        }
    }

    #[tokio::test]
    async fn unpublish_never_unmounts() {
        let h = harness().await;
        let id = VolumeId::from("c1;uuid-fs1;path=/p");
        h.backend
            .controller_unpublish_volume(&id, "node-a")
            .await
            .unwrap();
        assert!(h.primary.is_mounted_on("fs1", "node-a"));
        assert_eq!(h.primary.calls("unmount_filesystem"), 0);

        let err = h
            .backend
            .controller_unpublish_volume(&VolumeId::from("bad"), "node-a")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }
}
