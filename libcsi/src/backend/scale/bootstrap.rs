//! One-time driver initialisation.
//!
//! Runs before the transport accepts any request: it checks every
//! configured cluster answers with its configured id, makes sure the primary
//! fileset exists and is linked, and creates the `.volumes` symlink
//! directory inside it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::registry::InflightRegistry;
use super::{PrimaryRuntime, SYMLINK_DIR, ScaleBackend};
use crate::config::{DriverConfig, PrimaryConfig};
use crate::connector::{
    Connector, ConnectorFactory, FilesetInfo, FilesetOptions, FilesetType, join_path, relative_to,
};
use crate::error::CsiError;
use crate::nodemap::PublishSettings;

impl ScaleBackend {
    /// Connect to every configured cluster and prepare the primary fileset.
    ///
    /// `host_path` is the host directory bind-mounted into the plugin; it
    /// must overlap the primary fileset link path or the filesystem mount
    /// point.
    #[instrument(skip_all, fields(host_path = %host_path))]
    pub async fn bootstrap(
        config: &DriverConfig,
        factory: &dyn ConnectorFactory,
        host_path: &str,
        publish: PublishSettings,
    ) -> Result<Self, CsiError> {
        if host_path.trim().is_empty() {
            return Err(CsiError::Config("host path is not set".into()));
        }
        let (primary_cluster, primary) = config.primary()?;

        let mut connectors: HashMap<String, Arc<dyn Connector>> = HashMap::new();
        for cluster in &config.clusters {
            let conn = factory.new_connector(cluster).map_err(|e| {
                CsiError::Config(format!("unable to initialize cluster [{}]: {e}", cluster.id))
            })?;
            let reported = conn.get_cluster_id().await.map_err(|e| {
                CsiError::remote(format!("unable to get id of cluster [{}]", cluster.id), e)
            })?;
            if reported != cluster.id {
                return Err(CsiError::Config(format!(
                    "cluster id mismatch: configured [{}], endpoint reports [{reported}]",
                    cluster.id
                )));
            }
            debug!(cluster = %cluster.id, "cluster verified");
            connectors.insert(cluster.id.clone(), conn);
        }

        let runtime = initialize_primary(&connectors, &primary_cluster.id, primary, host_path).await?;
        info!(
            mount_point = %runtime.mount_point,
            symlink_dir = %runtime.symlink_dir_abs,
            "primary fileset ready"
        );

        Ok(Self {
            connectors,
            primary_cluster: primary_cluster.id.clone(),
            primary: primary.clone(),
            runtime,
            publish,
            inflight: InflightRegistry::new(),
        })
    }
}

fn lookup<'a>(
    connectors: &'a HashMap<String, Arc<dyn Connector>>,
    id: &str,
) -> Result<&'a Arc<dyn Connector>, CsiError> {
    connectors
        .get(id)
        .ok_or_else(|| CsiError::Config(format!("cluster [{id}] is not configured")))
}

async fn initialize_primary(
    connectors: &HashMap<String, Arc<dyn Connector>>,
    primary_cluster: &str,
    primary: &PrimaryConfig,
    host_path: &str,
) -> Result<PrimaryRuntime, CsiError> {
    let primary_conn = lookup(connectors, primary_cluster)?;

    let local = primary_conn
        .get_filesystem_mount_details(&primary.primary_fs)
        .await
        .map_err(|e| {
            CsiError::remote(
                format!("unable to get mount details of primary filesystem [{}]", primary.primary_fs),
                e,
            )
        })?;
    if !local.is_mounted() {
        return Err(CsiError::Config(format!(
            "primary filesystem [{}] is not mounted on any node of cluster [{primary_cluster}]",
            primary.primary_fs
        )));
    }

    // A remotely mounted primary filesystem is managed on its owning cluster.
    let (owner_cluster, owner_fs, owner_mount) = match primary.remote_cluster.as_deref() {
        Some(remote) => {
            let owner_fs = local
                .remote_filesystem()
                .unwrap_or(&primary.primary_fs)
                .to_owned();
            let details = lookup(connectors, remote)?
                .get_filesystem_mount_details(&owner_fs)
                .await
                .map_err(|e| {
                    CsiError::remote(
                        format!("unable to get mount details of [{owner_fs}] on cluster [{remote}]"),
                        e,
                    )
                })?;
            if !details.is_mounted() {
                return Err(CsiError::Config(format!(
                    "primary filesystem [{owner_fs}] is not mounted on any node of cluster [{remote}]"
                )));
            }
            (remote.to_owned(), owner_fs, details.mount_point)
        }
        None => (
            primary_cluster.to_owned(),
            primary.primary_fs.clone(),
            local.mount_point.clone(),
        ),
    };
    let owner_conn = lookup(connectors, &owner_cluster)?;

    let fileset =
        ensure_primary_fileset(owner_conn.as_ref(), &owner_fs, &primary.primary_fset, &owner_mount)
            .await?;
    let fileset_rel = relative_to(&fileset, &owner_mount);
    let fileset_link_path = join_path(&local.mount_point, &fileset_rel);

    if !(paths_overlap(host_path, &fileset_link_path) || paths_overlap(host_path, &local.mount_point))
    {
        return Err(CsiError::Config(format!(
            "host path [{host_path}] overlaps neither primary fileset link [{fileset_link_path}] \
             nor mount point [{}]",
            local.mount_point
        )));
    }

    let symlink_dir_rel = join_path(&fileset_rel, SYMLINK_DIR);
    match owner_conn
        .make_directory(&owner_fs, &symlink_dir_rel, "0", "0")
        .await
    {
        Ok(()) => info!(path = %symlink_dir_rel, "symlink directory created"),
        Err(e) if e.is_already_exists() => debug!(path = %symlink_dir_rel, "symlink directory exists"),
        Err(e) => {
            return Err(CsiError::remote(
                format!("unable to create directory [{symlink_dir_rel}] in filesystem [{owner_fs}]"),
                e,
            ));
        }
    }

    Ok(PrimaryRuntime {
        symlink_dir_abs: join_path(&fileset_link_path, SYMLINK_DIR),
        mount_point: local.mount_point,
        fileset_link_path,
        symlink_dir_rel,
        symlink_fs: owner_fs,
        symlink_cluster: owner_cluster,
    })
}

/// Create the primary fileset if needed and return its absolute link path.
async fn ensure_primary_fileset(
    conn: &dyn Connector,
    filesystem: &str,
    name: &str,
    mount_point: &str,
) -> Result<String, CsiError> {
    let context = || format!("primary fileset [{name}] in filesystem [{filesystem}]");

    let info: FilesetInfo = match conn.get_fileset(filesystem, name).await {
        Ok(info) => info,
        Err(e) if e.is_not_found() => {
            let options = FilesetOptions {
                fileset_type: FilesetType::Independent,
                inode_limit: None,
                parent_fileset: None,
                uid: None,
                gid: None,
                link_path: None,
            };
            match conn.create_fileset(filesystem, name, &options).await {
                Ok(()) => info!(fileset = %name, "primary fileset created"),
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(CsiError::remote(format!("unable to create {}", context()), e)),
            }
            conn.get_fileset(filesystem, name)
                .await
                .map_err(|e| CsiError::remote(format!("unable to get {}", context()), e))?
        }
        Err(e) => return Err(CsiError::remote(format!("unable to get {}", context()), e)),
    };

    if let Some(link_path) = info.link_path {
        debug!(fileset = %name, %link_path, "primary fileset already linked");
        return Ok(link_path);
    }
    let link_path = join_path(mount_point, name);
    conn.link_fileset(filesystem, name, &link_path)
        .await
        .map_err(|e| CsiError::remote(format!("unable to link {}", context()), e))?;
    info!(fileset = %name, %link_path, "primary fileset linked");
    Ok(link_path)
}

/// True when one path is a component-wise prefix of the other.
fn paths_overlap(a: &str, b: &str) -> bool {
    fn is_prefix(prefix: &str, path: &str) -> bool {
        let prefix = prefix.trim_end_matches('/');
        prefix.is_empty()
            || path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }
    is_prefix(a, b) || is_prefix(b, a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::scale::testing::{
        PRIMARY_CLUSTER, cluster_config, harness, primary_cluster, primary_config,
    };
    use crate::connector::memory::{MemoryConnector, MemoryConnectorFactory};
    use crate::error::Code;

    #[tokio::test]
    async fn creates_and_links_primary_fileset() {
        let h = harness().await;
        let runtime = h.backend.runtime();
        assert_eq!(runtime.mount_point, "/gpfs/fs1");
        assert_eq!(runtime.fileset_link_path, "/gpfs/fs1/csi-volume-store");
        assert_eq!(runtime.symlink_dir_abs, "/gpfs/fs1/csi-volume-store/.volumes");
        assert_eq!(runtime.symlink_dir_rel, "csi-volume-store/.volumes");
        assert_eq!(runtime.symlink_fs, "fs1");

        let fileset = h.primary.fileset("fs1", "csi-volume-store").unwrap();
        assert_eq!(fileset.link_path.as_deref(), Some("/gpfs/fs1/csi-volume-store"));
        assert!(h.primary.is_directory("fs1", "csi-volume-store/.volumes"));
    }

    #[tokio::test]
    async fn existing_link_is_left_alone() {
        let primary = primary_cluster();
        primary
            .create_fileset(
                "fs1",
                "csi-volume-store",
                &FilesetOptions {
                    fileset_type: FilesetType::Independent,
                    inode_limit: None,
                    parent_fileset: None,
                    uid: None,
                    gid: None,
                    link_path: Some("/gpfs/fs1/infra/csi".into()),
                },
            )
            .await
            .unwrap();
        primary.add_directory("fs1", "infra/csi/.volumes");

        let mut factory = MemoryConnectorFactory::new();
        factory.insert(PRIMARY_CLUSTER, Arc::clone(&primary));
        let config = DriverConfig {
            clusters: vec![cluster_config(PRIMARY_CLUSTER, Some(primary_config(None)))],
        };
        let backend = ScaleBackend::bootstrap(&config, &factory, "/", Default::default())
            .await
            .unwrap();

        assert_eq!(backend.runtime().symlink_dir_rel, "infra/csi/.volumes");
        assert_eq!(primary.calls("link_fileset"), 0);
        assert_eq!(primary.calls("create_fileset"), 1);
    }

    #[tokio::test]
    async fn cluster_id_mismatch_is_fatal() {
        let primary = primary_cluster();
        let mut factory = MemoryConnectorFactory::new();
        factory.insert("c-other", Arc::clone(&primary));
        let config = DriverConfig {
            clusters: vec![cluster_config("c-other", Some(primary_config(None)))],
        };
        let err = ScaleBackend::bootstrap(&config, &factory, "/", Default::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CsiError::Config(msg) if msg.contains("mismatch")));
    }

    #[tokio::test]
    async fn unmounted_primary_filesystem_is_fatal() {
        let primary = Arc::new(MemoryConnector::new(PRIMARY_CLUSTER));
        primary.add_filesystem("fs1", "uuid-fs1", "/gpfs/fs1");
        let mut factory = MemoryConnectorFactory::new();
        factory.insert(PRIMARY_CLUSTER, Arc::clone(&primary));
        let config = DriverConfig {
            clusters: vec![cluster_config(PRIMARY_CLUSTER, Some(primary_config(None)))],
        };
        let err = ScaleBackend::bootstrap(&config, &factory, "/", Default::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(primary.calls("create_fileset"), 0);
    }

    #[tokio::test]
    async fn host_path_must_overlap() {
        let primary = primary_cluster();
        let mut factory = MemoryConnectorFactory::new();
        factory.insert(PRIMARY_CLUSTER, Arc::clone(&primary));
        let config = DriverConfig {
            clusters: vec![cluster_config(PRIMARY_CLUSTER, Some(primary_config(None)))],
        };
        let err = ScaleBackend::bootstrap(&config, &factory, "/var/lib/kubelet", Default::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CsiError::Config(msg) if msg.contains("host path")));

        ScaleBackend::bootstrap(&config, &factory, "/gpfs", Default::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_host_path_is_rejected() {
        let primary = primary_cluster();
        let mut factory = MemoryConnectorFactory::new();
        factory.insert(PRIMARY_CLUSTER, Arc::clone(&primary));
        let config = DriverConfig {
            clusters: vec![cluster_config(PRIMARY_CLUSTER, Some(primary_config(None)))],
        };
        for host_path in ["", "  "] {
            let err = ScaleBackend::bootstrap(&config, &factory, host_path, Default::default())
                .await
                .err()
                .unwrap();
            assert!(matches!(err, CsiError::Config(msg) if msg.contains("host path")));
        }
        assert_eq!(primary.calls("get_cluster_id"), 0);
    }

    #[tokio::test]
    async fn remote_primary_is_managed_on_owning_cluster() {
        let local = Arc::new(MemoryConnector::new(PRIMARY_CLUSTER));
        local.add_filesystem("remotefs", "uuid-remote", "/gpfs/remotefs");
        local.mount_on("remotefs", "node-a");
        local.set_remote_device("remotefs", "storage:fs9");

        let owner = Arc::new(MemoryConnector::new("c2"));
        owner.add_filesystem("fs9", "uuid-fs9", "/ibm/fs9");
        owner.mount_on("fs9", "storage-1");

        let mut settings = primary_config(Some("c2"));
        settings.primary_fs = "remotefs".into();
        let config = DriverConfig {
            clusters: vec![
                cluster_config(PRIMARY_CLUSTER, Some(settings)),
                cluster_config("c2", None),
            ],
        };
        let mut factory = MemoryConnectorFactory::new();
        factory.insert(PRIMARY_CLUSTER, Arc::clone(&local));
        factory.insert("c2", Arc::clone(&owner));

        let backend = ScaleBackend::bootstrap(&config, &factory, "/gpfs/remotefs", Default::default())
            .await
            .unwrap();
        let runtime = backend.runtime();
        assert_eq!(runtime.symlink_cluster, "c2");
        assert_eq!(runtime.symlink_fs, "fs9");
        assert_eq!(runtime.fileset_link_path, "/gpfs/remotefs/csi-volume-store");
        assert_eq!(
            owner.fileset("fs9", "csi-volume-store").unwrap().link_path.as_deref(),
            Some("/ibm/fs9/csi-volume-store")
        );
        assert!(owner.is_directory("fs9", "csi-volume-store/.volumes"));
        assert_eq!(local.calls("create_fileset"), 0);
    }

    #[test]
    fn overlap() {
        assert!(paths_overlap("/", "/gpfs/fs1"));
        assert!(paths_overlap("/gpfs/fs1/store", "/gpfs/fs1"));
        assert!(paths_overlap("/gpfs/fs1/", "/gpfs/fs1/store"));
        assert!(!paths_overlap("/gpfs/fs10", "/gpfs/fs1"));
        assert!(!paths_overlap("/var/lib", "/gpfs/fs1"));
    }
}
