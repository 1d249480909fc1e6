//! Volume identifier codec.
//!
//! The volume id is the only durable record of a provisioned volume.  It is
//! a `;`-separated string in one of two shapes:
//!
//! ```text
//! <clusterId>;<fsUUID>;path=<symlinkPath>                    lightweight
//! <clusterId>;<fsUUID>;fileset=<filesetId>;path=<symlinkPath> fileset-based
//! ```
//!
//! The field count alone selects the shape.  `fsUUID` always names the
//! filesystem as seen by the primary cluster, and `symlinkPath` is the
//! absolute path of the volume's symlink under the primary fileset.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::error::CsiError;

const FIELD_SEPARATOR: char = ';';

/// Why a volume id could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VolumeIdError {
    /// Neither the 3-field nor the 4-field shape.
    #[error("volume id [{id}] has {found} fields, expected 3 or 4")]
    FieldCount { id: String, found: usize },

    /// A `key=value` field that does not split into exactly two parts.
    #[error("volume id [{id}] has malformed field [{field}]")]
    MalformedField { id: String, field: String },
}

impl From<VolumeIdError> for CsiError {
    fn from(err: VolumeIdError) -> Self {
        match err {
            VolumeIdError::FieldCount { .. } => CsiError::InvalidArgument(err.to_string()),
            VolumeIdError::MalformedField { .. } => CsiError::Internal(err.to_string()),
        }
    }
}

/// A volume realised as a plain directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightweightVolumeRef {
    pub cluster_id: String,
    pub fs_uuid: String,
    pub symlink_path: String,
}

/// A volume realised as a fileset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesetVolumeRef {
    pub cluster_id: String,
    pub fs_uuid: String,
    /// Opaque fileset id on the cluster owning the data.
    pub fileset_id: String,
    pub symlink_path: String,
}

/// Decoded volume id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeRef {
    Lightweight(LightweightVolumeRef),
    Fileset(FilesetVolumeRef),
}

impl VolumeRef {
    /// Build a reference; `fileset_id` selects the fileset-based shape.
    pub fn new(
        cluster_id: impl Into<String>,
        fs_uuid: impl Into<String>,
        fileset_id: Option<String>,
        symlink_path: impl Into<String>,
    ) -> Self {
        let cluster_id = cluster_id.into();
        let fs_uuid = fs_uuid.into();
        let symlink_path = symlink_path.into();
        match fileset_id {
            Some(fileset_id) => Self::Fileset(FilesetVolumeRef {
                cluster_id,
                fs_uuid,
                fileset_id,
                symlink_path,
            }),
            None => Self::Lightweight(LightweightVolumeRef {
                cluster_id,
                fs_uuid,
                symlink_path,
            }),
        }
    }

    pub fn cluster_id(&self) -> &str {
        match self {
            Self::Lightweight(v) => &v.cluster_id,
            Self::Fileset(v) => &v.cluster_id,
        }
    }

    pub fn fs_uuid(&self) -> &str {
        match self {
            Self::Lightweight(v) => &v.fs_uuid,
            Self::Fileset(v) => &v.fs_uuid,
        }
    }

    pub fn symlink_path(&self) -> &str {
        match self {
            Self::Lightweight(v) => &v.symlink_path,
            Self::Fileset(v) => &v.symlink_path,
        }
    }

    pub fn fileset_id(&self) -> Option<&str> {
        match self {
            Self::Lightweight(_) => None,
            Self::Fileset(v) => Some(&v.fileset_id),
        }
    }

    pub fn is_fileset_based(&self) -> bool {
        matches!(self, Self::Fileset(_))
    }
}

/// Value of a `key=value` field.  The key itself is not checked.
fn field_value<'a>(id: &str, field: &'a str) -> Result<&'a str, VolumeIdError> {
    let mut parts = field.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(value), None) => Ok(value),
        _ => Err(VolumeIdError::MalformedField {
            id: id.to_owned(),
            field: field.to_owned(),
        }),
    }
}

impl FromStr for VolumeRef {
    type Err = VolumeIdError;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = id.split(FIELD_SEPARATOR).collect();
        match fields.as_slice() {
            [cluster_id, fs_uuid, path] => Ok(Self::Lightweight(LightweightVolumeRef {
                cluster_id: (*cluster_id).to_owned(),
                fs_uuid: (*fs_uuid).to_owned(),
                symlink_path: field_value(id, path)?.to_owned(),
            })),
            [cluster_id, fs_uuid, fileset, path] => Ok(Self::Fileset(FilesetVolumeRef {
                cluster_id: (*cluster_id).to_owned(),
                fs_uuid: (*fs_uuid).to_owned(),
                fileset_id: field_value(id, fileset)?.to_owned(),
                symlink_path: field_value(id, path)?.to_owned(),
            })),
            other => Err(VolumeIdError::FieldCount {
                id: id.to_owned(),
                found: other.len(),
            }),
        }
    }
}

impl fmt::Display for VolumeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lightweight(v) => {
                write!(f, "{};{};path={}", v.cluster_id, v.fs_uuid, v.symlink_path)
            }
            Self::Fileset(v) => write!(
                f,
                "{};{};fileset={};path={}",
                v.cluster_id, v.fs_uuid, v.fileset_id, v.symlink_path
            ),
        }
    }
}

/// Cluster id and filesystem UUID of an id with at least three fields.
///
/// Publish only needs the addressing prefix, so it accepts any id that
/// carries one instead of requiring a fully decodable shape.
pub fn addressing_prefix(id: &str) -> Result<(&str, &str), VolumeIdError> {
    let mut fields = id.split(FIELD_SEPARATOR);
    let found = id.split(FIELD_SEPARATOR).count();
    match (fields.next(), fields.next()) {
        (Some(cluster_id), Some(fs_uuid)) if found >= 3 => Ok((cluster_id, fs_uuid)),
        _ => Err(VolumeIdError::FieldCount {
            id: id.to_owned(),
            found,
        }),
    }
}
