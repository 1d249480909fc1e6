//! In-memory [`Connector`] used by tests and dry runs.
//!
//! [`MemoryConnector`] models a single cluster: its filesystems with their
//! mount state, filesets (ids, junctions, quotas) and the directory / symlink
//! entries created through the connector.  Every call is counted so tests can
//! assert which remote operations an orchestration performed, and individual
//! operations can be made to fail on demand.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{
    Connector, ConnectorError, ConnectorFactory, FilesetInfo, FilesetOptions, HasClusterId,
    MountInfo, relative_to,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Directory { uid: String, gid: String },
    Junction,
    Symlink { target_filesystem: String, target_rel_path: String },
}

#[derive(Debug, Clone)]
struct FilesetState {
    id: u64,
    link_path: Option<String>,
    quota: Option<u64>,
}

#[derive(Debug, Clone)]
struct FilesystemState {
    uuid: String,
    mount_point: String,
    nodes_mounted: BTreeSet<String>,
    remote_device_name: Option<String>,
    quota_enabled: bool,
    filesets: BTreeMap<String, FilesetState>,
    entries: BTreeMap<String, Entry>,
}

impl FilesystemState {
    /// Drop `rel_path` and everything below it.
    fn remove_tree(&mut self, rel_path: &str) {
        let prefix = format!("{rel_path}/");
        self.entries
            .retain(|path, _| path != rel_path && !path.starts_with(&prefix));
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    filesystems: BTreeMap<String, FilesystemState>,
    next_fileset_id: u64,
    calls: HashMap<&'static str, usize>,
    failures: HashSet<&'static str>,
    /// New filesets ignore their requested link path.
    defer_links: bool,
}

impl ClusterState {
    fn fs(&self, name: &str) -> Result<&FilesystemState, ConnectorError> {
        self.filesystems
            .get(name)
            .ok_or_else(|| ConnectorError::NotFound(format!("filesystem {name}")))
    }

    fn fs_mut(&mut self, name: &str) -> Result<&mut FilesystemState, ConnectorError> {
        self.filesystems
            .get_mut(name)
            .ok_or_else(|| ConnectorError::NotFound(format!("filesystem {name}")))
    }
}

/// A single simulated cluster.
#[derive(Debug)]
pub struct MemoryConnector {
    cluster_id: String,
    state: Mutex<ClusterState>,
}

impl MemoryConnector {
    /// A cluster with no filesystems that reports `cluster_id`.
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            state: Mutex::new(ClusterState {
                next_fileset_id: 1,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and apply failure injection.
    fn enter(&self, op: &'static str) -> Result<MutexGuard<'_, ClusterState>, ConnectorError> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if state.failures.contains(op) {
            return Err(ConnectorError::Request {
                url: format!("memory://{}/{op}", self.cluster_id),
                reason: "injected failure".to_owned(),
            });
        }
        Ok(state)
    }

    // ----- setup ------------------------------------------------------------

    /// Register a filesystem mounted on no node yet.
    pub fn add_filesystem(&self, name: &str, uuid: &str, mount_point: &str) {
        self.lock().filesystems.insert(
            name.to_owned(),
            FilesystemState {
                uuid: uuid.to_owned(),
                mount_point: mount_point.trim_end_matches('/').to_owned(),
                nodes_mounted: BTreeSet::new(),
                remote_device_name: None,
                quota_enabled: false,
                filesets: BTreeMap::new(),
                entries: BTreeMap::new(),
            },
        );
    }

    pub fn mount_on(&self, filesystem: &str, node: &str) {
        if let Some(fs) = self.lock().filesystems.get_mut(filesystem) {
            fs.nodes_mounted.insert(node.to_owned());
        }
    }

    /// Mark `filesystem` as a remote mount of `device` (`"cluster:fs"`).
    pub fn set_remote_device(&self, filesystem: &str, device: &str) {
        if let Some(fs) = self.lock().filesystems.get_mut(filesystem) {
            fs.remote_device_name = Some(device.to_owned());
        }
    }

    pub fn enable_quota(&self, filesystem: &str) {
        if let Some(fs) = self.lock().filesystems.get_mut(filesystem) {
            fs.quota_enabled = true;
        }
    }

    pub fn add_directory(&self, filesystem: &str, rel_path: &str) {
        if let Some(fs) = self.lock().filesystems.get_mut(filesystem) {
            fs.entries.insert(
                rel_path.trim_matches('/').to_owned(),
                Entry::Directory {
                    uid: "0".to_owned(),
                    gid: "0".to_owned(),
                },
            );
        }
    }

    /// Create filesets unlinked, leaving the junction to `link_fileset`.
    pub fn defer_fileset_links(&self) {
        self.lock().defer_links = true;
    }

    /// Make every subsequent call of `op` fail.
    pub fn fail_on(&self, op: &'static str) {
        self.lock().failures.insert(op);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    // ----- inspection -------------------------------------------------------

    /// Number of times `op` has been called.
    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn fileset(&self, filesystem: &str, name: &str) -> Option<FilesetInfo> {
        let state = self.lock();
        let fset = state.filesystems.get(filesystem)?.filesets.get(name)?;
        Some(FilesetInfo {
            name: name.to_owned(),
            id: fset.id,
            link_path: fset.link_path.clone(),
        })
    }

    pub fn quota(&self, filesystem: &str, name: &str) -> Option<u64> {
        let state = self.lock();
        state.filesystems.get(filesystem)?.filesets.get(name)?.quota
    }

    pub fn has_path(&self, filesystem: &str, rel_path: &str) -> bool {
        self.lock()
            .filesystems
            .get(filesystem)
            .is_some_and(|fs| fs.entries.contains_key(rel_path.trim_matches('/')))
    }

    pub fn is_directory(&self, filesystem: &str, rel_path: &str) -> bool {
        self.lock().filesystems.get(filesystem).is_some_and(|fs| {
            matches!(
                fs.entries.get(rel_path.trim_matches('/')),
                Some(Entry::Directory { .. }) | Some(Entry::Junction)
            )
        })
    }

    /// `(uid, gid)` of a directory created through the connector.
    pub fn directory_owner(&self, filesystem: &str, rel_path: &str) -> Option<(String, String)> {
        let state = self.lock();
        match state
            .filesystems
            .get(filesystem)?
            .entries
            .get(rel_path.trim_matches('/'))?
        {
            Entry::Directory { uid, gid } => Some((uid.clone(), gid.clone())),
            _ => None,
        }
    }

    /// `(target filesystem, target path)` of the symlink at `rel_path`.
    pub fn symlink_target(&self, filesystem: &str, rel_path: &str) -> Option<(String, String)> {
        let state = self.lock();
        match state
            .filesystems
            .get(filesystem)?
            .entries
            .get(rel_path.trim_matches('/'))?
        {
            Entry::Symlink {
                target_filesystem,
                target_rel_path,
            } => Some((target_filesystem.clone(), target_rel_path.clone())),
            _ => None,
        }
    }

    pub fn is_mounted_on(&self, filesystem: &str, node: &str) -> bool {
        self.lock()
            .filesystems
            .get(filesystem)
            .is_some_and(|fs| fs.nodes_mounted.contains(node))
    }
}

fn link(fs: &mut FilesystemState, name: &str, link_path: &str) -> Result<(), ConnectorError> {
    let rel = relative_to(link_path, &fs.mount_point);
    if fs.entries.contains_key(&rel) {
        return Err(ConnectorError::AlreadyExists(format!("path {link_path}")));
    }
    let fset = fs
        .filesets
        .get_mut(name)
        .ok_or_else(|| ConnectorError::NotFound(format!("fileset {name}")))?;
    fset.link_path = Some(link_path.trim_end_matches('/').to_owned());
    fs.entries.insert(rel, Entry::Junction);
    Ok(())
}

fn unlink(fs: &mut FilesystemState, name: &str) {
    let Some(link_path) = fs.filesets.get_mut(name).and_then(|f| f.link_path.take()) else {
        return;
    };
    let rel = relative_to(&link_path, &fs.mount_point);
    fs.remove_tree(&rel);
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn get_cluster_id(&self) -> Result<String, ConnectorError> {
        let _state = self.enter("get_cluster_id")?;
        Ok(self.cluster_id.clone())
    }

    async fn list_filesystems(&self) -> Result<Vec<String>, ConnectorError> {
        let state = self.enter("list_filesystems")?;
        Ok(state.filesystems.keys().cloned().collect())
    }

    async fn get_filesystem_name(&self, uuid: &str) -> Result<String, ConnectorError> {
        let state = self.enter("get_filesystem_name")?;
        state
            .filesystems
            .iter()
            .find(|(_, fs)| fs.uuid == uuid)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| ConnectorError::NotFound(format!("filesystem with uuid {uuid}")))
    }

    async fn get_filesystem_uid(&self, filesystem: &str) -> Result<String, ConnectorError> {
        let state = self.enter("get_filesystem_uid")?;
        Ok(state.fs(filesystem)?.uuid.clone())
    }

    async fn get_filesystem_mount_point(
        &self,
        filesystem: &str,
    ) -> Result<String, ConnectorError> {
        let state = self.enter("get_filesystem_mount_point")?;
        Ok(state.fs(filesystem)?.mount_point.clone())
    }

    async fn get_filesystem_mount_details(
        &self,
        filesystem: &str,
    ) -> Result<MountInfo, ConnectorError> {
        let state = self.enter("get_filesystem_mount_details")?;
        let fs = state.fs(filesystem)?;
        Ok(MountInfo {
            mount_point: fs.mount_point.clone(),
            nodes_mounted: fs.nodes_mounted.iter().cloned().collect(),
            remote_device_name: fs.remote_device_name.clone(),
        })
    }

    async fn is_filesystem_mounted(
        &self,
        filesystem: &str,
        node: &str,
    ) -> Result<bool, ConnectorError> {
        let state = self.enter("is_filesystem_mounted")?;
        Ok(state.fs(filesystem)?.nodes_mounted.contains(node))
    }

    async fn mount_filesystem(&self, filesystem: &str, node: &str) -> Result<(), ConnectorError> {
        let mut state = self.enter("mount_filesystem")?;
        state.fs_mut(filesystem)?.nodes_mounted.insert(node.to_owned());
        Ok(())
    }

    async fn unmount_filesystem(
        &self,
        filesystem: &str,
        node: &str,
    ) -> Result<(), ConnectorError> {
        let mut state = self.enter("unmount_filesystem")?;
        state.fs_mut(filesystem)?.nodes_mounted.remove(node);
        Ok(())
    }

    async fn check_quota_enabled(&self, filesystem: &str) -> Result<bool, ConnectorError> {
        let state = self.enter("check_quota_enabled")?;
        Ok(state.fs(filesystem)?.quota_enabled)
    }

    async fn create_fileset(
        &self,
        filesystem: &str,
        name: &str,
        options: &FilesetOptions,
    ) -> Result<(), ConnectorError> {
        let mut state = self.enter("create_fileset")?;
        let id = state.next_fileset_id;
        let defer_links = state.defer_links;
        let fs = state.fs_mut(filesystem)?;
        if fs.filesets.contains_key(name) {
            return Err(ConnectorError::AlreadyExists(format!("fileset {name}")));
        }
        if let Some(parent) = options.parent_fileset.as_deref()
            && parent != "root"
            && !fs.filesets.contains_key(parent)
        {
            return Err(ConnectorError::NotFound(format!("fileset {parent}")));
        }
        fs.filesets.insert(
            name.to_owned(),
            FilesetState {
                id,
                link_path: None,
                quota: None,
            },
        );
        if let Some(link_path) = options.link_path.as_deref()
            && !defer_links
        {
            link(fs, name, link_path)?;
        }
        state.next_fileset_id += 1;
        Ok(())
    }

    async fn delete_fileset(&self, filesystem: &str, name: &str) -> Result<(), ConnectorError> {
        let mut state = self.enter("delete_fileset")?;
        let fs = state.fs_mut(filesystem)?;
        if !fs.filesets.contains_key(name) {
            return Ok(());
        }
        unlink(fs, name);
        fs.filesets.remove(name);
        Ok(())
    }

    async fn link_fileset(
        &self,
        filesystem: &str,
        name: &str,
        link_path: &str,
    ) -> Result<(), ConnectorError> {
        let mut state = self.enter("link_fileset")?;
        link(state.fs_mut(filesystem)?, name, link_path)
    }

    async fn unlink_fileset(&self, filesystem: &str, name: &str) -> Result<(), ConnectorError> {
        let mut state = self.enter("unlink_fileset")?;
        unlink(state.fs_mut(filesystem)?, name);
        Ok(())
    }

    async fn get_fileset(
        &self,
        filesystem: &str,
        name: &str,
    ) -> Result<FilesetInfo, ConnectorError> {
        let state = self.enter("get_fileset")?;
        let fset = state
            .fs(filesystem)?
            .filesets
            .get(name)
            .ok_or_else(|| ConnectorError::NotFound(format!("fileset {name}")))?;
        Ok(FilesetInfo {
            name: name.to_owned(),
            id: fset.id,
            link_path: fset.link_path.clone(),
        })
    }

    async fn get_fileset_uid(
        &self,
        filesystem: &str,
        name: &str,
    ) -> Result<String, ConnectorError> {
        let state = self.enter("get_fileset_uid")?;
        state
            .fs(filesystem)?
            .filesets
            .get(name)
            .map(|f| f.id.to_string())
            .ok_or_else(|| ConnectorError::NotFound(format!("fileset {name}")))
    }

    async fn get_fileset_name_from_id(
        &self,
        filesystem: &str,
        id: &str,
    ) -> Result<String, ConnectorError> {
        let state = self.enter("get_fileset_name_from_id")?;
        let wanted: u64 = id
            .parse()
            .map_err(|_| ConnectorError::Protocol(format!("fileset id {id} is not numeric")))?;
        state
            .fs(filesystem)?
            .filesets
            .iter()
            .find(|(_, f)| f.id == wanted)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| ConnectorError::NotFound(format!("fileset with id {id}")))
    }

    async fn is_fileset_linked(
        &self,
        filesystem: &str,
        name: &str,
    ) -> Result<bool, ConnectorError> {
        let state = self.enter("is_fileset_linked")?;
        state
            .fs(filesystem)?
            .filesets
            .get(name)
            .map(|f| f.link_path.is_some())
            .ok_or_else(|| ConnectorError::NotFound(format!("fileset {name}")))
    }

    async fn list_fileset_quota(
        &self,
        filesystem: &str,
        name: &str,
    ) -> Result<Option<u64>, ConnectorError> {
        let state = self.enter("list_fileset_quota")?;
        state
            .fs(filesystem)?
            .filesets
            .get(name)
            .map(|f| f.quota)
            .ok_or_else(|| ConnectorError::NotFound(format!("fileset {name}")))
    }

    async fn set_fileset_quota(
        &self,
        filesystem: &str,
        name: &str,
        bytes: u64,
    ) -> Result<(), ConnectorError> {
        let mut state = self.enter("set_fileset_quota")?;
        let fs = state.fs_mut(filesystem)?;
        if !fs.quota_enabled {
            return Err(ConnectorError::Protocol(format!(
                "quota is not enabled on filesystem {filesystem}"
            )));
        }
        let fset = fs
            .filesets
            .get_mut(name)
            .ok_or_else(|| ConnectorError::NotFound(format!("fileset {name}")))?;
        fset.quota = Some(bytes);
        Ok(())
    }

    async fn make_directory(
        &self,
        filesystem: &str,
        rel_path: &str,
        uid: &str,
        gid: &str,
    ) -> Result<(), ConnectorError> {
        let mut state = self.enter("make_directory")?;
        let fs = state.fs_mut(filesystem)?;
        let rel_path = rel_path.trim_matches('/');
        if fs.entries.contains_key(rel_path) {
            return Err(ConnectorError::AlreadyExists(format!("directory {rel_path}")));
        }
        fs.entries.insert(
            rel_path.to_owned(),
            Entry::Directory {
                uid: uid.to_owned(),
                gid: gid.to_owned(),
            },
        );
        Ok(())
    }

    async fn delete_directory(
        &self,
        filesystem: &str,
        rel_path: &str,
    ) -> Result<(), ConnectorError> {
        let mut state = self.enter("delete_directory")?;
        let fs = state.fs_mut(filesystem)?;
        let rel_path = rel_path.trim_matches('/');
        if matches!(fs.entries.get(rel_path), Some(Entry::Directory { .. })) {
            fs.remove_tree(rel_path);
        }
        Ok(())
    }

    async fn path_exists(&self, filesystem: &str, rel_path: &str) -> Result<bool, ConnectorError> {
        let state = self.enter("path_exists")?;
        Ok(state
            .fs(filesystem)?
            .entries
            .contains_key(rel_path.trim_matches('/')))
    }

    async fn create_symlink(
        &self,
        link_filesystem: &str,
        target_filesystem: &str,
        target_rel_path: &str,
        link_rel_path: &str,
    ) -> Result<(), ConnectorError> {
        let mut state = self.enter("create_symlink")?;
        let fs = state.fs_mut(link_filesystem)?;
        let link_rel_path = link_rel_path.trim_matches('/');
        if fs.entries.contains_key(link_rel_path) {
            return Err(ConnectorError::AlreadyExists(format!("symlink {link_rel_path}")));
        }
        fs.entries.insert(
            link_rel_path.to_owned(),
            Entry::Symlink {
                target_filesystem: target_filesystem.to_owned(),
                target_rel_path: target_rel_path.trim_matches('/').to_owned(),
            },
        );
        Ok(())
    }

    async fn delete_symlink(
        &self,
        filesystem: &str,
        link_rel_path: &str,
    ) -> Result<(), ConnectorError> {
        let mut state = self.enter("delete_symlink")?;
        let fs = state.fs_mut(filesystem)?;
        let link_rel_path = link_rel_path.trim_matches('/');
        if matches!(fs.entries.get(link_rel_path), Some(Entry::Symlink { .. })) {
            fs.entries.remove(link_rel_path);
        }
        Ok(())
    }
}

/// Hands out shared [`MemoryConnector`] instances by cluster id.
#[derive(Debug, Default)]
pub struct MemoryConnectorFactory {
    clusters: HashMap<String, Arc<MemoryConnector>>,
}

impl MemoryConnectorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `connector` for `cluster_id`.
    pub fn insert(&mut self, cluster_id: impl Into<String>, connector: Arc<MemoryConnector>) {
        self.clusters.insert(cluster_id.into(), connector);
    }
}

impl ConnectorFactory for MemoryConnectorFactory {
    fn new_connector(
        &self,
        cluster: &dyn HasClusterId,
    ) -> Result<Arc<dyn Connector>, ConnectorError> {
        self.clusters
            .get(cluster.cluster_id())
            .map(|c| Arc::clone(c) as Arc<dyn Connector>)
            .ok_or_else(|| ConnectorError::NotFound(format!("cluster {}", cluster.cluster_id())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::FilesetType;

    fn independent(link_path: Option<&str>) -> FilesetOptions {
        FilesetOptions {
            fileset_type: FilesetType::Independent,
            inode_limit: None,
            parent_fileset: None,
            uid: None,
            gid: None,
            link_path: link_path.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn fileset_lifecycle() {
        let conn = MemoryConnector::new("c1");
        conn.add_filesystem("fs1", "uuid-1", "/gpfs/fs1");

        conn.create_fileset("fs1", "pvc1", &independent(Some("/gpfs/fs1/pvc1")))
            .await
            .unwrap();
        assert!(conn.is_fileset_linked("fs1", "pvc1").await.unwrap());
        assert!(conn.path_exists("fs1", "pvc1").await.unwrap());

        let err = conn
            .create_fileset("fs1", "pvc1", &independent(None))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());

        let id = conn.get_fileset_uid("fs1", "pvc1").await.unwrap();
        assert_eq!(conn.get_fileset_name_from_id("fs1", &id).await.unwrap(), "pvc1");

        conn.make_directory("fs1", "pvc1/pvc1-data", "0", "0")
            .await
            .unwrap();
        conn.delete_fileset("fs1", "pvc1").await.unwrap();
        assert!(!conn.has_path("fs1", "pvc1/pvc1-data"));
        // Deleting twice is not an error.
        conn.delete_fileset("fs1", "pvc1").await.unwrap();
        assert_eq!(conn.calls("delete_fileset"), 2);
    }

    #[tokio::test]
    async fn quota_requires_enforcement() {
        let conn = MemoryConnector::new("c1");
        conn.add_filesystem("fs1", "uuid-1", "/gpfs/fs1");
        conn.create_fileset("fs1", "pvc1", &independent(None))
            .await
            .unwrap();
        assert!(conn.set_fileset_quota("fs1", "pvc1", 1024).await.is_err());
        conn.enable_quota("fs1");
        conn.set_fileset_quota("fs1", "pvc1", 1024).await.unwrap();
        assert_eq!(conn.list_fileset_quota("fs1", "pvc1").await.unwrap(), Some(1024));
    }

    #[tokio::test]
    async fn injected_failures_are_counted() {
        let conn = MemoryConnector::new("c1");
        conn.fail_on("get_cluster_id");
        assert!(conn.get_cluster_id().await.is_err());
        conn.clear_failures();
        assert_eq!(conn.get_cluster_id().await.unwrap(), "c1");
        assert_eq!(conn.calls("get_cluster_id"), 2);
    }

    #[test]
    fn factory_resolves_by_cluster_id() {
        let mut factory = MemoryConnectorFactory::new();
        factory.insert("c1", Arc::new(MemoryConnector::new("c1")));
        assert!(factory.new_connector(&"c1".to_owned()).is_ok());
        assert!(factory.new_connector(&"c2".to_owned()).is_err());
    }
}
