//! Storage-class parameter resolution.
//!
//! [`VolumeSpec::resolve`] turns the free-form `parameters` map of a
//! CreateVolume request into a validated [`VolumeSpec`].  Deprecated
//! hyphenated keys are still accepted; when both spellings are present the
//! current one wins.

use std::collections::HashMap;

use crate::connector::{FilesetType, join_path};
use crate::error::CsiError;

pub const PARAM_VOL_BACKEND_FS: &str = "volBackendFs";
pub const PARAM_CLUSTER_ID: &str = "clusterId";
pub const PARAM_UID: &str = "uid";
pub const PARAM_GID: &str = "gid";
pub const PARAM_FILESET_TYPE: &str = "filesetType";
pub const PARAM_INODE_LIMIT: &str = "inodeLimit";
pub const PARAM_PARENT_FILESET: &str = "parentFileset";
pub const PARAM_VOL_DIR_BASE_PATH: &str = "volDirBasePath";

/// `(current, deprecated)` key pairs.
const ALIASES: &[(&str, &str)] = &[
    (PARAM_FILESET_TYPE, "fileset-type"),
    (PARAM_INODE_LIMIT, "inode-limit"),
];

/// Parent used for dependent filesets when none is requested.
pub const DEFAULT_PARENT_FILESET: &str = "root";

/// Owner applied to created directories when the request names none.
pub const DEFAULT_OWNER: &str = "0";

/// Resolved parameters of one CreateVolume call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub name: String,
    pub size_bytes: u64,
    /// Filesystem holding the data, on the cluster owning it.
    pub vol_backend_fs: String,
    /// Name of the same filesystem as the primary cluster sees it.
    pub local_fs: String,
    pub cluster_id: Option<String>,
    pub uid: Option<String>,
    pub gid: Option<String>,
    fileset_type: Option<FilesetType>,
    pub inode_limit: Option<u64>,
    pub parent_fileset: Option<String>,
    pub dir_base_path: Option<String>,
    /// Absolute path of the primary's symlink directory.
    pub symlink_dir_abs: String,
    /// Same directory, relative to the primary filesystem mount point.
    pub symlink_dir_rel: String,
}

fn lookup<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    let value = params.get(key).map(String::as_str).or_else(|| {
        ALIASES
            .iter()
            .find(|(current, _)| *current == key)
            .and_then(|(_, deprecated)| params.get(*deprecated))
            .map(String::as_str)
    });
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn numeric(key: &str, value: Option<&str>) -> Result<Option<String>, CsiError> {
    match value {
        Some(v) if v.parse::<u64>().is_err() => Err(CsiError::InvalidArgument(format!(
            "parameter {key} must be numeric, got [{v}]"
        ))),
        other => Ok(other.map(str::to_owned)),
    }
}

impl VolumeSpec {
    /// Validate `params` for a volume called `name` of `size_bytes`.
    pub fn resolve(
        name: &str,
        size_bytes: u64,
        params: &HashMap<String, String>,
    ) -> Result<Self, CsiError> {
        let vol_backend_fs = lookup(params, PARAM_VOL_BACKEND_FS).ok_or_else(|| {
            CsiError::InvalidArgument(format!("parameter {PARAM_VOL_BACKEND_FS} is required"))
        })?;

        let fileset_type = match lookup(params, PARAM_FILESET_TYPE) {
            None => None,
            Some(t) if t.eq_ignore_ascii_case("independent") => Some(FilesetType::Independent),
            Some(t) if t.eq_ignore_ascii_case("dependent") => Some(FilesetType::Dependent),
            Some(t) => {
                return Err(CsiError::InvalidArgument(format!(
                    "invalid {PARAM_FILESET_TYPE} [{t}], expected independent or dependent"
                )));
            }
        };

        let dir_base_path = lookup(params, PARAM_VOL_DIR_BASE_PATH)
            .map(|p| p.trim_matches('/').to_owned())
            .filter(|p| !p.is_empty());
        match (fileset_type, &dir_base_path) {
            (Some(_), Some(_)) => {
                return Err(CsiError::InvalidArgument(format!(
                    "{PARAM_VOL_DIR_BASE_PATH} and {PARAM_FILESET_TYPE} are mutually exclusive"
                )));
            }
            (None, None) => {
                return Err(CsiError::InvalidArgument(format!(
                    "either {PARAM_FILESET_TYPE} or {PARAM_VOL_DIR_BASE_PATH} must be specified"
                )));
            }
            _ => {}
        }

        let inode_limit = match lookup(params, PARAM_INODE_LIMIT) {
            None => None,
            Some(_) if fileset_type == Some(FilesetType::Dependent) => {
                return Err(CsiError::InvalidArgument(format!(
                    "{PARAM_INODE_LIMIT} cannot be set for dependent filesets"
                )));
            }
            Some(v) => Some(v.parse::<u64>().map_err(|_| {
                CsiError::InvalidArgument(format!(
                    "parameter {PARAM_INODE_LIMIT} must be numeric, got [{v}]"
                ))
            })?),
        };

        // Parent only means something for dependent filesets.
        let parent_fileset = (fileset_type == Some(FilesetType::Dependent)).then(|| {
            lookup(params, PARAM_PARENT_FILESET)
                .unwrap_or(DEFAULT_PARENT_FILESET)
                .to_owned()
        });

        Ok(Self {
            name: name.to_owned(),
            size_bytes,
            vol_backend_fs: vol_backend_fs.to_owned(),
            local_fs: vol_backend_fs.to_owned(),
            cluster_id: lookup(params, PARAM_CLUSTER_ID).map(str::to_owned),
            uid: numeric(PARAM_UID, lookup(params, PARAM_UID))?,
            gid: numeric(PARAM_GID, lookup(params, PARAM_GID))?,
            inode_limit: inode_limit.filter(|_| fileset_type.is_some()),
            fileset_type,
            parent_fileset,
            dir_base_path,
            symlink_dir_abs: String::new(),
            symlink_dir_rel: String::new(),
        })
    }

    /// Attach the primary symlink directory.
    pub fn with_symlink_dir(mut self, abs: &str, rel: &str) -> Self {
        self.symlink_dir_abs = abs.to_owned();
        self.symlink_dir_rel = rel.to_owned();
        self
    }

    pub fn fileset_type(&self) -> Option<FilesetType> {
        self.fileset_type
    }

    pub fn is_fileset_based(&self) -> bool {
        self.fileset_type.is_some()
    }

    /// Absolute symlink path, embedded in the volume id.
    pub fn symlink_abs_path(&self) -> String {
        join_path(&self.symlink_dir_abs, &self.name)
    }

    /// Symlink path relative to the primary mount point.
    pub fn symlink_rel_path(&self) -> String {
        join_path(&self.symlink_dir_rel, &self.name)
    }

    pub fn owner(&self) -> (&str, &str) {
        (
            self.uid.as_deref().unwrap_or(DEFAULT_OWNER),
            self.gid.as_deref().unwrap_or(DEFAULT_OWNER),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn invalid(pairs: &[(&str, &str)]) -> bool {
        matches!(
            VolumeSpec::resolve("pvc1", 0, &params(pairs)),
            Err(CsiError::InvalidArgument(_))
        )
    }

    #[test]
    fn independent_fileset() {
        let spec = VolumeSpec::resolve(
            "pvc1",
            1 << 30,
            &params(&[
                ("volBackendFs", "fs1"),
                ("filesetType", "independent"),
                ("inodeLimit", "100000"),
                ("uid", "1000"),
            ]),
        )
        .unwrap()
        .with_symlink_dir("/gpfs/fs1/csi/.volumes", "csi/.volumes");

        assert!(spec.is_fileset_based());
        assert_eq!(spec.fileset_type(), Some(FilesetType::Independent));
        assert_eq!(spec.inode_limit, Some(100_000));
        assert_eq!(spec.local_fs, "fs1");
        assert_eq!(spec.parent_fileset, None);
        assert_eq!(spec.owner(), ("1000", "0"));
        assert_eq!(spec.symlink_abs_path(), "/gpfs/fs1/csi/.volumes/pvc1");
        assert_eq!(spec.symlink_rel_path(), "csi/.volumes/pvc1");
    }

    #[test]
    fn deprecated_keys_fall_back_and_current_keys_win() {
        let spec = VolumeSpec::resolve(
            "pvc1",
            0,
            &params(&[("volBackendFs", "fs1"), ("fileset-type", "dependent")]),
        )
        .unwrap();
        assert_eq!(spec.fileset_type(), Some(FilesetType::Dependent));
        assert_eq!(spec.parent_fileset.as_deref(), Some(DEFAULT_PARENT_FILESET));

        let spec = VolumeSpec::resolve(
            "pvc1",
            0,
            &params(&[
                ("volBackendFs", "fs1"),
                ("filesetType", "independent"),
                ("fileset-type", "dependent"),
                ("inode-limit", "5000"),
            ]),
        )
        .unwrap();
        assert_eq!(spec.fileset_type(), Some(FilesetType::Independent));
        assert_eq!(spec.inode_limit, Some(5000));
    }

    #[test]
    fn lightweight_directory() {
        let spec = VolumeSpec::resolve(
            "pvc2",
            0,
            &params(&[
                ("volBackendFs", "fs1"),
                ("volDirBasePath", "/volumes/"),
                ("parentFileset", "ignored"),
            ]),
        )
        .unwrap();
        assert!(!spec.is_fileset_based());
        assert_eq!(spec.dir_base_path.as_deref(), Some("volumes"));
        assert_eq!(spec.parent_fileset, None);
    }

    #[test]
    fn rejects_invalid_combinations() {
        assert!(invalid(&[("filesetType", "independent")]));
        assert!(invalid(&[("volBackendFs", "fs1"), ("filesetType", "nested")]));
        assert!(invalid(&[("volBackendFs", "fs1")]));
        assert!(invalid(&[
            ("volBackendFs", "fs1"),
            ("filesetType", "independent"),
            ("volDirBasePath", "volumes"),
        ]));
        assert!(invalid(&[
            ("volBackendFs", "fs1"),
            ("filesetType", "dependent"),
            ("inodeLimit", "100"),
        ]));
        assert!(invalid(&[
            ("volBackendFs", "fs1"),
            ("filesetType", "independent"),
            ("inodeLimit", "lots"),
        ]));
        assert!(invalid(&[
            ("volBackendFs", "fs1"),
            ("volDirBasePath", "volumes"),
            ("gid", "staff"),
        ]));
    }
}
