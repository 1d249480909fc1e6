//! Consistency-group volume handle.
//!
//! Volumes grouped under a consistency group carry a 7-field handle:
//!
//! ```text
//! <scVersion>;<volType>;<clusterId>;<fsUid>;<cgName>;<filesetName>;<path>
//! ```
//!
//! This module only decodes such handles from a persistent volume's CSI
//! source and derives a few facts from them; nothing here mutates state.
//! The controller never receives these handles itself, so the decoder is a
//! library-level helper for tooling that inspects persistent volumes.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CsiError;

const HANDLE_FIELDS: usize = 7;

/// Storage-class generation a handle was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClassVersion {
    /// Classic storage class, one fileset or directory per volume.
    Classic,
    /// Consistency-group storage class.
    ConsistencyGroup,
}

/// How the volume's data is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleVolumeType {
    Lightweight,
    DependentFileset,
    IndependentFileset,
}

/// CSI section of a persistent volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeCsiSource {
    pub driver: String,
    pub volume_handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyGroupHandle {
    pub sc_version: StorageClassVersion,
    pub volume_type: HandleVolumeType,
    pub cluster_id: String,
    pub fs_uid: String,
    pub consistency_group: String,
    pub fileset_name: String,
    pub path: String,
}

impl ConsistencyGroupHandle {
    /// Decode the handle of a persistent volume provisioned by `driver`.
    pub fn from_source(source: &PersistentVolumeCsiSource, driver: &str) -> Result<Self, CsiError> {
        if source.driver != driver {
            return Err(CsiError::InvalidArgument(format!(
                "volume handle [{}] belongs to driver {}, not {driver}",
                source.volume_handle, source.driver
            )));
        }
        source.volume_handle.parse()
    }

    pub fn is_consistency_group(&self) -> bool {
        self.sc_version == StorageClassVersion::ConsistencyGroup
    }

    pub fn is_fileset_based(&self) -> bool {
        self.volume_type != HandleVolumeType::Lightweight
    }

    /// Independent fileset backing the consistency group, for
    /// consistency-group volumes.
    pub fn consistency_group_fileset(&self) -> Option<&str> {
        self.is_consistency_group()
            .then_some(self.consistency_group.as_str())
            .filter(|cg| !cg.is_empty())
    }
}

impl FromStr for ConsistencyGroupHandle {
    type Err = CsiError;

    fn from_str(handle: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = handle.split(';').collect();
        let [sc, vt, cluster_id, fs_uid, cg, fileset, path] = fields.as_slice() else {
            return Err(CsiError::InvalidArgument(format!(
                "volume handle [{handle}] has {} fields, expected {HANDLE_FIELDS}",
                fields.len()
            )));
        };

        let sc_version = match *sc {
            "0" => StorageClassVersion::Classic,
            "1" => StorageClassVersion::ConsistencyGroup,
            other => {
                return Err(CsiError::InvalidArgument(format!(
                    "volume handle [{handle}] has unknown storage class version {other}"
                )));
            }
        };
        let volume_type = match *vt {
            "0" => HandleVolumeType::Lightweight,
            "1" => HandleVolumeType::DependentFileset,
            "2" => HandleVolumeType::IndependentFileset,
            other => {
                return Err(CsiError::InvalidArgument(format!(
                    "volume handle [{handle}] has unknown volume type {other}"
                )));
            }
        };

        Ok(Self {
            sc_version,
            volume_type,
            cluster_id: (*cluster_id).to_owned(),
            fs_uid: (*fs_uid).to_owned(),
            consistency_group: (*cg).to_owned(),
            fileset_name: (*fileset).to_owned(),
            path: (*path).to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRIVER: &str = "rk8s.scale.csi";

    fn source(handle: &str) -> PersistentVolumeCsiSource {
        PersistentVolumeCsiSource {
            driver: DRIVER.into(),
            volume_handle: handle.into(),
        }
    }

    #[test]
    fn decodes_consistency_group_volume() {
        let handle = ConsistencyGroupHandle::from_source(
            &source("1;1;7118073361626808055;09A1B2;ns1-cg;pvc-1;/gpfs/fs1/ns1-cg/pvc-1"),
            DRIVER,
        )
        .unwrap();
        assert!(handle.is_consistency_group());
        assert!(handle.is_fileset_based());
        assert_eq!(handle.volume_type, HandleVolumeType::DependentFileset);
        assert_eq!(handle.consistency_group_fileset(), Some("ns1-cg"));
        assert_eq!(handle.path, "/gpfs/fs1/ns1-cg/pvc-1");
    }

    #[test]
    fn classic_handles_have_no_group_fileset() {
        let handle: ConsistencyGroupHandle = "0;0;c1;uuid;;;/gpfs/fs1/volumes/pvc2".parse().unwrap();
        assert!(!handle.is_fileset_based());
        assert_eq!(handle.consistency_group_fileset(), None);
    }

    #[test]
    fn rejects_foreign_or_malformed_handles() {
        let mut foreign = source("1;2;c1;uuid;cg;f;/p");
        foreign.driver = "other.csi".into();
        assert!(ConsistencyGroupHandle::from_source(&foreign, DRIVER).is_err());

        for bad in ["c1;uuid;path=/p", "1;9;c1;uuid;cg;f;/p", "3;1;c1;uuid;cg;f;/p"] {
            assert!(matches!(
                bad.parse::<ConsistencyGroupHandle>(),
                Err(CsiError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn source_parses_from_pv_json() {
        let src: PersistentVolumeCsiSource =
            serde_json::from_str(r#"{"driver":"rk8s.scale.csi","volumeHandle":"1;2;c;u;g;f;/p"}"#)
                .unwrap();
        assert_eq!(src.volume_handle, "1;2;c;u;g;f;/p");
    }
}
