//! DeleteVolume.

use tracing::{debug, info, instrument, warn};

use super::ScaleBackend;
use crate::connector::relative_to;
use crate::error::CsiError;
use crate::types::VolumeId;
use crate::volume_id::{VolumeIdError, VolumeRef};

impl ScaleBackend {
    #[instrument(skip(self), fields(volume_id = %volume_id))]
    pub(super) async fn delete(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id is missing".into()));
        }
        let volume_ref: VolumeRef = match volume_id.as_str().parse() {
            Ok(r) => r,
            // Not one of ours: nothing to delete.
            Err(e @ VolumeIdError::FieldCount { .. }) => {
                warn!(error = %e, "unrecognised volume id, treating as deleted");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let primary = self.primary_connector()?;
        let fs_name = primary
            .get_filesystem_name(volume_ref.fs_uuid())
            .await
            .map_err(|e| {
                CsiError::remote(
                    format!("unable to get filesystem name for uuid [{}]", volume_ref.fs_uuid()),
                    e,
                )
            })?;
        let details = primary
            .get_filesystem_mount_details(&fs_name)
            .await
            .map_err(|e| {
                CsiError::remote(format!("unable to get mount details of filesystem [{fs_name}]"), e)
            })?;
        let backend_fs = details.remote_filesystem().unwrap_or(fs_name.as_str()).to_owned();

        let rel_path = relative_to(volume_ref.symlink_path(), &self.runtime.mount_point);
        let conn = self.connector(volume_ref.cluster_id())?;

        if let Some(fileset_id) = volume_ref.fileset_id() {
            match conn.get_fileset_name_from_id(&backend_fs, fileset_id).await {
                Ok(name) => {
                    let link_name = rel_path.rsplit('/').next().unwrap_or(rel_path.as_str());
                    if link_name == name {
                        conn.delete_fileset(&backend_fs, &name).await.map_err(|e| {
                            CsiError::remote(
                                format!("unable to delete fileset [{name}] in filesystem [{backend_fs}]"),
                                e,
                            )
                        })?;
                        info!(fileset = %name, filesystem = %backend_fs, "fileset deleted");
                    } else {
                        warn!(
                            fileset = %name,
                            symlink = %rel_path,
                            "fileset id resolves to a fileset not named after the volume, skipping fileset deletion"
                        );
                    }
                }
                Err(e) if e.is_not_found() => {
                    debug!(fileset_id, filesystem = %backend_fs, "fileset already gone");
                }
                Err(e) => {
                    return Err(CsiError::remote(
                        format!(
                            "unable to get name of fileset with id [{fileset_id}] in filesystem [{backend_fs}]"
                        ),
                        e,
                    ));
                }
            }
        } else {
            // Mirrors the symlink path; the data directory itself stays.
            conn.delete_directory(&backend_fs, &rel_path)
                .await
                .map_err(|e| {
                    CsiError::remote(
                        format!("unable to delete directory [{rel_path}] in filesystem [{backend_fs}]"),
                        e,
                    )
                })?;
        }

        let symlink_fs = &self.runtime.symlink_fs;
        self.symlink_connector()?
            .delete_symlink(symlink_fs, &rel_path)
            .await
            .map_err(|e| {
                CsiError::remote(
                    format!("unable to delete symlink [{rel_path}] in filesystem [{symlink_fs}]"),
                    e,
                )
            })?;
        info!("volume deleted");
        Ok(())
    }
}
