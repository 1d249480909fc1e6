//! Connector abstraction over a cluster's filesystem management API.
//!
//! A [`Connector`] is bound to exactly one cluster and exposes the
//! operations the controller needs: cluster identity, filesystem queries and
//! mount control, fileset lifecycle, and directory / symlink management.
//! All paths passed to a connector are relative to the filesystem mount
//! point unless a method says otherwise.
//!
//! Implementations must wait for asynchronous remote jobs to reach a terminal
//! state before returning, and must treat "not found" on delete / unlink as
//! success so that orchestration above them can be retried safely.
//!
//! Two implementations ship with the crate:
//!
//! | Module | Purpose |
//! |---|---|
//! | [`rest`] | REST client for the filesystem management endpoint. |
//! | [`memory`] | In-memory cluster model used by tests and dry runs. |

pub mod memory;
pub mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a [`Connector`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// The addressed filesystem, fileset, or path does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The object we tried to create is already there.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The endpoint refused our credentials.
    #[error("authentication rejected by {0}")]
    Unauthenticated(String),

    /// An asynchronous remote job ended in the failed state.
    #[error("job {job_id} failed: {message}")]
    JobFailed { job_id: u64, message: String },

    /// The request could not be delivered or returned an error status.
    #[error("request {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The endpoint answered with something we could not interpret.
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl ConnectorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Inode space a new fileset is created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilesetType {
    /// Own inode space.
    Independent,
    /// Shares the parent fileset's inode space.
    Dependent,
}

impl FilesetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Independent => "independent",
            Self::Dependent => "dependent",
        }
    }
}

/// Options for [`Connector::create_fileset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesetOptions {
    pub fileset_type: FilesetType,
    /// Maximum inode count; only meaningful for independent filesets.
    pub inode_limit: Option<u64>,
    /// Parent fileset for dependent filesets.
    pub parent_fileset: Option<String>,
    pub uid: Option<String>,
    pub gid: Option<String>,
    /// Absolute junction path; when set the fileset is linked on creation.
    pub link_path: Option<String>,
}

/// Fileset metadata as returned by [`Connector::get_fileset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesetInfo {
    pub name: String,
    /// Opaque numeric id, stable for the fileset's lifetime.
    pub id: u64,
    /// Absolute junction path, `None` while unlinked.
    pub link_path: Option<String>,
}

/// Mount state of a filesystem as seen by one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountInfo {
    pub mount_point: String,
    /// Nodes on which the filesystem is currently mounted.
    pub nodes_mounted: Vec<String>,
    /// `"<owningCluster>:<fs>"` when the filesystem is remotely mounted.
    pub remote_device_name: Option<String>,
}

impl MountInfo {
    /// Name of the filesystem on its owning cluster, for remote mounts.
    pub fn remote_filesystem(&self) -> Option<&str> {
        self.remote_device_name
            .as_deref()
            .filter(|dev| !dev.is_empty())
            .map(|dev| dev.rsplit(':').next().unwrap_or(dev))
    }

    pub fn is_mounted(&self) -> bool {
        !self.nodes_mounted.is_empty()
    }
}

/// Capability set available against one cluster.
#[async_trait]
pub trait Connector: Send + Sync {
    // ----- cluster ----------------------------------------------------------

    /// Id of the cluster this connector talks to.
    async fn get_cluster_id(&self) -> Result<String, ConnectorError>;

    // ----- filesystems ------------------------------------------------------

    async fn list_filesystems(&self) -> Result<Vec<String>, ConnectorError>;

    async fn get_filesystem_name(&self, uuid: &str) -> Result<String, ConnectorError>;

    async fn get_filesystem_uid(&self, filesystem: &str) -> Result<String, ConnectorError>;

    async fn get_filesystem_mount_point(&self, filesystem: &str)
    -> Result<String, ConnectorError>;

    async fn get_filesystem_mount_details(
        &self,
        filesystem: &str,
    ) -> Result<MountInfo, ConnectorError>;

    /// Whether `filesystem` is mounted on `node` (a cluster node name).
    async fn is_filesystem_mounted(
        &self,
        filesystem: &str,
        node: &str,
    ) -> Result<bool, ConnectorError>;

    async fn mount_filesystem(&self, filesystem: &str, node: &str) -> Result<(), ConnectorError>;

    async fn unmount_filesystem(&self, filesystem: &str, node: &str)
    -> Result<(), ConnectorError>;

    /// Whether fileset quota enforcement is enabled on `filesystem`.
    async fn check_quota_enabled(&self, filesystem: &str) -> Result<bool, ConnectorError>;

    // ----- filesets ---------------------------------------------------------

    async fn create_fileset(
        &self,
        filesystem: &str,
        name: &str,
        options: &FilesetOptions,
    ) -> Result<(), ConnectorError>;

    async fn delete_fileset(&self, filesystem: &str, name: &str) -> Result<(), ConnectorError>;

    /// Link `name` at the absolute `link_path`.
    async fn link_fileset(
        &self,
        filesystem: &str,
        name: &str,
        link_path: &str,
    ) -> Result<(), ConnectorError>;

    async fn unlink_fileset(&self, filesystem: &str, name: &str) -> Result<(), ConnectorError>;

    async fn get_fileset(&self, filesystem: &str, name: &str)
    -> Result<FilesetInfo, ConnectorError>;

    /// Opaque id of a fileset, rendered as a string.
    async fn get_fileset_uid(&self, filesystem: &str, name: &str)
    -> Result<String, ConnectorError>;

    async fn get_fileset_name_from_id(
        &self,
        filesystem: &str,
        id: &str,
    ) -> Result<String, ConnectorError>;

    async fn is_fileset_linked(&self, filesystem: &str, name: &str)
    -> Result<bool, ConnectorError>;

    /// Hard block limit of the fileset quota in bytes, `None` if unset.
    async fn list_fileset_quota(
        &self,
        filesystem: &str,
        name: &str,
    ) -> Result<Option<u64>, ConnectorError>;

    async fn set_fileset_quota(
        &self,
        filesystem: &str,
        name: &str,
        bytes: u64,
    ) -> Result<(), ConnectorError>;

    // ----- directories & symlinks ------------------------------------------

    async fn make_directory(
        &self,
        filesystem: &str,
        rel_path: &str,
        uid: &str,
        gid: &str,
    ) -> Result<(), ConnectorError>;

    async fn delete_directory(&self, filesystem: &str, rel_path: &str)
    -> Result<(), ConnectorError>;

    async fn path_exists(&self, filesystem: &str, rel_path: &str) -> Result<bool, ConnectorError>;

    /// Create a symlink at `link_rel_path` in `link_filesystem` that points to
    /// `target_rel_path` inside `target_filesystem`.
    async fn create_symlink(
        &self,
        link_filesystem: &str,
        target_filesystem: &str,
        target_rel_path: &str,
        link_rel_path: &str,
    ) -> Result<(), ConnectorError>;

    async fn delete_symlink(&self, filesystem: &str, link_rel_path: &str)
    -> Result<(), ConnectorError>;
}

/// Anything that names a cluster.
pub trait HasClusterId {
    fn cluster_id(&self) -> &str;
}

impl HasClusterId for String {
    fn cluster_id(&self) -> &str {
        self
    }
}

/// Produces connectors bound to a cluster identity.
pub trait ConnectorFactory: Send + Sync {
    fn new_connector(&self, cluster: &dyn HasClusterId)
    -> Result<Arc<dyn Connector>, ConnectorError>;
}

/// Strip `mount_point` from an absolute `path`, yielding a mount-relative
/// path without leading or trailing slashes.
pub fn relative_to(path: &str, mount_point: &str) -> String {
    let mount_point = mount_point.trim_end_matches('/');
    let rest = match path.strip_prefix(mount_point) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    };
    rest.trim_matches('/').to_owned()
}

/// Join path segments with `/`, skipping empty segments.
pub fn join_path(base: &str, rest: &str) -> String {
    let base = base.trim_end_matches('/');
    let rest = rest.trim_start_matches('/');
    match (base.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_owned(),
        (_, true) => base.to_owned(),
        _ => format!("{base}/{rest}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_device_name_resolves_owning_filesystem() {
        let info = MountInfo {
            mount_point: "/gpfs/remote".into(),
            nodes_mounted: vec!["n1".into()],
            remote_device_name: Some("storagecluster:fs1".into()),
        };
        assert_eq!(info.remote_filesystem(), Some("fs1"));

        let local = MountInfo {
            remote_device_name: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(local.remote_filesystem(), None);
        assert!(!local.is_mounted());
    }

    #[test]
    fn relative_paths() {
        assert_eq!(
            relative_to("/gpfs/fs1/csi/.volumes/pvc1", "/gpfs/fs1"),
            "csi/.volumes/pvc1"
        );
        assert_eq!(relative_to("/gpfs/fs1/", "/gpfs/fs1/"), "");
        assert_eq!(relative_to("/gpfs/fs10/x", "/gpfs/fs1"), "gpfs/fs10/x");
        assert_eq!(join_path("/gpfs/fs1/", "/pvc1"), "/gpfs/fs1/pvc1");
        assert_eq!(join_path("", "pvc1"), "pvc1");
    }
}
