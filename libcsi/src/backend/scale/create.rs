//! CreateVolume.
//!
//! The request is handled as a strictly sequential workflow:
//!
//! 1. validate the request and resolve its parameters,
//! 2. follow remote-mount aliases to the filesystem owning the data,
//! 3. claim the volume name in the in-flight registry,
//! 4. return early if a previous call already created everything,
//! 5. create the fileset or directory, then the symlink,
//! 6. encode the volume id.
//!
//! Every resource created by this call is recorded in a [`Rollback`] which
//! is replayed if a later step fails.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::ScaleBackend;
use super::rollback::{CleanupStep, Rollback};
use crate::connector::{
    Connector, FilesetInfo, FilesetOptions, FilesetType, join_path, relative_to,
};
use crate::error::CsiError;
use crate::options::{DEFAULT_PARENT_FILESET, VolumeSpec};
use crate::types::{AccessMode, CreateVolumeRequest, Volume, VolumeId};
use crate::volume_id::VolumeRef;

/// Suffix of the data directory created inside a volume fileset.
const DATA_DIR_SUFFIX: &str = "-data";

/// Quotas are stored in KiB, so a requested size may come back rounded up.
fn quota_matches(quota: u64, requested: u64) -> bool {
    quota == requested || requested.div_ceil(1024).checked_mul(1024) == Some(quota)
}

async fn fetch_fileset(
    conn: &Arc<dyn Connector>,
    fs: &str,
    name: &str,
) -> Result<FilesetInfo, CsiError> {
    conn.get_fileset(fs, name).await.map_err(|e| {
        CsiError::remote(format!("unable to get fileset [{name}] in filesystem [{fs}]"), e)
    })
}

/// Check the request shape and return the requested size.
fn validate(req: &CreateVolumeRequest) -> Result<u64, CsiError> {
    if req.name.is_empty() {
        return Err(CsiError::InvalidArgument("volume name is missing".into()));
    }
    if req.volume_capabilities.is_empty() {
        return Err(CsiError::InvalidArgument(
            "volume capabilities are missing".into(),
        ));
    }
    for cap in &req.volume_capabilities {
        if cap.is_block() {
            return Err(CsiError::Unimplemented(
                "block volumes are not supported".into(),
            ));
        }
        if cap.access_mode == AccessMode::MultiNodeReaderOnly {
            return Err(CsiError::Unimplemented(
                "access mode MultiNodeReaderOnly is not supported".into(),
            ));
        }
    }
    let range = req
        .capacity_range
        .ok_or_else(|| CsiError::InvalidArgument("capacity range is missing".into()))?;
    Ok(range.required_bytes)
}

impl ScaleBackend {
    #[instrument(skip(self, req), fields(volume = %req.name))]
    pub(super) async fn create(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        let size_bytes = validate(&req)?;
        let mut spec = VolumeSpec::resolve(&req.name, size_bytes, &req.parameters)?
            .with_symlink_dir(&self.runtime.symlink_dir_abs, &self.runtime.symlink_dir_rel);
        if let Some(cluster) = spec.cluster_id.as_deref()
            && !self.connectors.contains_key(cluster)
        {
            return Err(CsiError::InvalidArgument(format!(
                "clusterId [{cluster}] is not a configured cluster"
            )));
        }

        if spec.is_fileset_based() {
            self.resolve_remote_filesystem(&mut spec).await?;
        }
        let cluster_id = spec
            .cluster_id
            .clone()
            .unwrap_or_else(|| self.primary_cluster.clone());
        let conn = Arc::clone(self.connector(&cluster_id)?);

        let _inflight = self.inflight.register(&spec.name, size_bytes)?;

        let mut rollback = Rollback::new();
        let volume_ref = match self.provision(&conn, &spec, &cluster_id, &mut rollback).await {
            Ok(volume_ref) => volume_ref,
            Err(e) => {
                rollback.run().await;
                return Err(e);
            }
        };

        info!(volume_id = %volume_ref, "volume ready");
        Ok(Volume {
            volume_id: VolumeId(volume_ref.to_string()),
            capacity_bytes: size_bytes,
            volume_context: req.parameters,
        })
    }

    /// Substitute the owning cluster's filesystem name when the primary
    /// cluster only sees the volume filesystem as a remote mount.
    async fn resolve_remote_filesystem(&self, spec: &mut VolumeSpec) -> Result<(), CsiError> {
        let details = self
            .primary_connector()?
            .get_filesystem_mount_details(&spec.vol_backend_fs)
            .await
            .map_err(|e| {
                CsiError::remote(
                    format!("unable to get mount details of filesystem [{}]", spec.vol_backend_fs),
                    e,
                )
            })?;
        let Some(remote_fs) = details.remote_filesystem() else {
            return Ok(());
        };

        if spec.cluster_id.is_none() {
            let remote_cluster = self.primary.remote_cluster.clone().ok_or_else(|| {
                CsiError::Internal(format!(
                    "filesystem [{}] is remotely mounted but no remote cluster is configured",
                    spec.vol_backend_fs
                ))
            })?;
            spec.cluster_id = Some(remote_cluster);
        }
        debug!(local_fs = %spec.vol_backend_fs, %remote_fs, "volume filesystem is a remote mount");
        spec.local_fs = std::mem::replace(&mut spec.vol_backend_fs, remote_fs.to_owned());
        Ok(())
    }

    async fn provision(
        &self,
        conn: &Arc<dyn Connector>,
        spec: &VolumeSpec,
        cluster_id: &str,
        rollback: &mut Rollback,
    ) -> Result<VolumeRef, CsiError> {
        if self.volume_exists(conn, spec).await? {
            debug!("volume already exists, skipping creation");
        } else {
            let target = if spec.is_fileset_based() {
                self.create_fileset_volume(conn, spec, rollback).await?
            } else {
                self.create_directory_volume(conn, spec, rollback).await?
            };
            self.create_symlink(spec, &target, rollback).await?;
        }
        self.generate_volume_ref(conn, spec, cluster_id).await
    }

    /// True when the data and the symlink of a previous call are in place.
    async fn volume_exists(
        &self,
        conn: &Arc<dyn Connector>,
        spec: &VolumeSpec,
    ) -> Result<bool, CsiError> {
        let fs = &spec.vol_backend_fs;
        let data_present = if spec.is_fileset_based() {
            match conn.get_fileset(fs, &spec.name).await {
                Ok(_) => {
                    let quota = conn.list_fileset_quota(fs, &spec.name).await.map_err(|e| {
                        CsiError::remote(
                            format!("unable to list quota of fileset [{}] in filesystem [{fs}]", spec.name),
                            e,
                        )
                    })?;
                    match quota {
                        Some(quota) if !quota_matches(quota, spec.size_bytes) => {
                            return Err(CsiError::AlreadyExists(format!(
                                "fileset [{}] exists in filesystem [{fs}] with quota {quota} bytes, \
                                 requested {} bytes",
                                spec.name, spec.size_bytes
                            )));
                        }
                        Some(_) => true,
                        // Quota not set yet: a previous attempt stopped half way.
                        None => spec.size_bytes == 0,
                    }
                }
                Err(e) if e.is_not_found() => false,
                Err(e) => {
                    return Err(CsiError::remote(
                        format!("unable to get fileset [{}] in filesystem [{fs}]", spec.name),
                        e,
                    ));
                }
            }
        } else {
            let base = spec.dir_base_path.as_deref().unwrap_or_default();
            let dir = join_path(base, &spec.name);
            conn.path_exists(fs, &dir).await.map_err(|e| {
                CsiError::remote(format!("unable to check directory [{dir}] in filesystem [{fs}]"), e)
            })?
        };
        if !data_present {
            return Ok(false);
        }

        let link = spec.symlink_rel_path();
        self.symlink_connector()?
            .path_exists(&self.runtime.symlink_fs, &link)
            .await
            .map_err(|e| {
                CsiError::remote(
                    format!("unable to check symlink [{link}] in filesystem [{}]", self.runtime.symlink_fs),
                    e,
                )
            })
    }

    /// Create, link and size the fileset; returns the data directory
    /// relative to the filesystem mount point.
    async fn create_fileset_volume(
        &self,
        conn: &Arc<dyn Connector>,
        spec: &VolumeSpec,
        rollback: &mut Rollback,
    ) -> Result<String, CsiError> {
        let fs = &spec.vol_backend_fs;
        let name = &spec.name;
        let Some(fileset_type) = spec.fileset_type() else {
            return Err(CsiError::Internal(format!("volume [{name}] is not fileset based")));
        };

        let details = conn.get_filesystem_mount_details(fs).await.map_err(|e| {
            CsiError::remote(format!("unable to get mount details of filesystem [{fs}]"), e)
        })?;
        if !details.is_mounted() {
            return Err(CsiError::Internal(format!("filesystem [{fs}] is not mounted")));
        }
        if spec.size_bytes > 0 {
            let enabled = conn.check_quota_enabled(fs).await.map_err(|e| {
                CsiError::remote(format!("unable to check quota of filesystem [{fs}]"), e)
            })?;
            if !enabled {
                return Err(CsiError::Internal(format!(
                    "fileset quota is not enabled on filesystem [{fs}]"
                )));
            }
        }

        let link_path = self
            .fileset_link_target(conn, spec, fileset_type, &details.mount_point)
            .await?;
        let options = FilesetOptions {
            fileset_type,
            inode_limit: spec.inode_limit,
            parent_fileset: spec.parent_fileset.clone(),
            uid: spec.uid.clone(),
            gid: spec.gid.clone(),
            link_path: Some(link_path.clone()),
        };
        match conn.create_fileset(fs, name, &options).await {
            Ok(()) => {
                info!(filesystem = %fs, fileset_type = fileset_type.as_str(), "fileset created");
                rollback.push(
                    conn,
                    CleanupStep::DeleteFileset {
                        filesystem: fs.clone(),
                        name: name.clone(),
                    },
                );
            }
            Err(e) if e.is_already_exists() => debug!(filesystem = %fs, "fileset already exists"),
            Err(e) => {
                return Err(CsiError::remote(
                    format!("unable to create fileset [{name}] in filesystem [{fs}]"),
                    e,
                ));
            }
        }

        let mut fileset = fetch_fileset(conn, fs, name).await?;
        if fileset.link_path.is_none() {
            conn.link_fileset(fs, name, &link_path).await.map_err(|e| {
                CsiError::remote(
                    format!("unable to link fileset [{name}] at [{link_path}] in filesystem [{fs}]"),
                    e,
                )
            })?;
            info!(%link_path, "fileset linked");
            fileset = fetch_fileset(conn, fs, name).await?;
        }
        let Some(linked_at) = fileset.link_path else {
            return Err(CsiError::Internal(format!(
                "fileset [{name}] in filesystem [{fs}] is not linked"
            )));
        };

        if spec.size_bytes > 0 {
            conn.set_fileset_quota(fs, name, spec.size_bytes)
                .await
                .map_err(|e| {
                    CsiError::remote(
                        format!(
                            "unable to set quota of {} bytes on fileset [{name}] in filesystem [{fs}]",
                            spec.size_bytes
                        ),
                        e,
                    )
                })?;
            info!(bytes = spec.size_bytes, "fileset quota set");
        }

        let target = join_path(
            &relative_to(&linked_at, &details.mount_point),
            &format!("{name}{DATA_DIR_SUFFIX}"),
        );
        let (uid, gid) = spec.owner();
        match conn.make_directory(fs, &target, uid, gid).await {
            Ok(()) => debug!(path = %target, "data directory created"),
            Err(e) if e.is_already_exists() => debug!(path = %target, "data directory exists"),
            Err(e) => {
                return Err(CsiError::remote(
                    format!("unable to create directory [{target}] in filesystem [{fs}]"),
                    e,
                ));
            }
        }
        Ok(target)
    }

    /// Where a new fileset is linked: under the mount point for independent
    /// filesets, under the parent's link for dependent ones.
    async fn fileset_link_target(
        &self,
        conn: &Arc<dyn Connector>,
        spec: &VolumeSpec,
        fileset_type: FilesetType,
        mount_point: &str,
    ) -> Result<String, CsiError> {
        let parent = match fileset_type {
            FilesetType::Independent => None,
            FilesetType::Dependent => spec
                .parent_fileset
                .as_deref()
                .filter(|p| *p != DEFAULT_PARENT_FILESET),
        };
        let Some(parent) = parent else {
            return Ok(join_path(mount_point, &spec.name));
        };

        let fs = &spec.vol_backend_fs;
        let info = conn.get_fileset(fs, parent).await.map_err(|e| {
            CsiError::remote(
                format!("unable to get parent fileset [{parent}] in filesystem [{fs}]"),
                e,
            )
        })?;
        let base = info.link_path.as_deref().unwrap_or(mount_point);
        Ok(join_path(base, &spec.name))
    }

    /// Create `<volDirBasePath>/<name>`; returns it.
    async fn create_directory_volume(
        &self,
        conn: &Arc<dyn Connector>,
        spec: &VolumeSpec,
        rollback: &mut Rollback,
    ) -> Result<String, CsiError> {
        let fs = &spec.vol_backend_fs;
        let Some(base) = spec.dir_base_path.as_deref() else {
            return Err(CsiError::Internal(format!(
                "volume [{}] has no directory base path",
                spec.name
            )));
        };

        let base_exists = conn.path_exists(fs, base).await.map_err(|e| {
            CsiError::remote(format!("unable to check directory [{base}] in filesystem [{fs}]"), e)
        })?;
        if !base_exists {
            return Err(CsiError::Internal(format!(
                "directory base path [{base}] does not exist in filesystem [{fs}]"
            )));
        }

        let target = join_path(base, &spec.name);
        let (uid, gid) = spec.owner();
        match conn.make_directory(fs, &target, uid, gid).await {
            Ok(()) => {
                info!(filesystem = %fs, path = %target, "directory created");
                rollback.push(
                    conn,
                    CleanupStep::DeleteDirectory {
                        filesystem: fs.clone(),
                        path: target.clone(),
                    },
                );
            }
            Err(e) if e.is_already_exists() => debug!(path = %target, "directory already exists"),
            Err(e) => {
                return Err(CsiError::remote(
                    format!("unable to create directory [{target}] in filesystem [{fs}]"),
                    e,
                ));
            }
        }
        Ok(target)
    }

    async fn create_symlink(
        &self,
        spec: &VolumeSpec,
        target: &str,
        rollback: &mut Rollback,
    ) -> Result<(), CsiError> {
        let conn = self.symlink_connector()?;
        let symlink_fs = &self.runtime.symlink_fs;
        let link = spec.symlink_rel_path();
        match conn
            .create_symlink(symlink_fs, &spec.local_fs, target, &link)
            .await
        {
            Ok(()) => {
                info!(symlink = %link, %target, "symlink created");
                // Also undone when volume id generation fails afterwards.
                rollback.push(
                    conn,
                    CleanupStep::DeleteSymlink {
                        filesystem: symlink_fs.clone(),
                        path: link,
                    },
                );
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(symlink = %link, "symlink already exists");
                Ok(())
            }
            Err(e) => Err(CsiError::remote(
                format!("unable to create symlink [{link}] to [{target}] in filesystem [{symlink_fs}]"),
                e,
            )),
        }
    }

    async fn generate_volume_ref(
        &self,
        conn: &Arc<dyn Connector>,
        spec: &VolumeSpec,
        cluster_id: &str,
    ) -> Result<VolumeRef, CsiError> {
        let fs_uuid = self
            .primary_connector()?
            .get_filesystem_uid(&spec.local_fs)
            .await
            .map_err(|e| {
                CsiError::remote(format!("unable to get uuid of filesystem [{}]", spec.local_fs), e)
            })?;

        let fileset_id = if spec.is_fileset_based() {
            let id = conn
                .get_fileset_uid(&spec.vol_backend_fs, &spec.name)
                .await
                .map_err(|e| {
                    CsiError::remote(
                        format!(
                            "unable to get id of fileset [{}] in filesystem [{}]",
                            spec.name, spec.vol_backend_fs
                        ),
                        e,
                    )
                })?;
            Some(id)
        } else {
            None
        };

        Ok(VolumeRef::new(
            cluster_id,
            fs_uuid,
            fileset_id,
            spec.symlink_abs_path(),
        ))
    }
}
