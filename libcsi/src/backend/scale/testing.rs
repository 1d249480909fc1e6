//! Shared fixtures for the backend tests.

use std::collections::HashMap;
use std::sync::Arc;

use super::ScaleBackend;
use crate::config::{ClusterConfig, DEFAULT_PRIMARY_FILESET, DriverConfig, PrimaryConfig, RestEndpoint};
use crate::connector::memory::{MemoryConnector, MemoryConnectorFactory};
use crate::nodemap::PublishSettings;
use crate::types::{CapacityRange, CreateVolumeRequest, VolumeCapability};

pub(crate) const PRIMARY_CLUSTER: &str = "c1";
pub(crate) const GIB: u64 = 1 << 30;

pub(crate) struct Harness {
    pub primary: Arc<MemoryConnector>,
    pub backend: ScaleBackend,
}

/// Primary cluster with `fs1` mounted on `node-a`, fileset quotas enabled
/// and a `volumes` directory for lightweight volumes.
pub(crate) fn primary_cluster() -> Arc<MemoryConnector> {
    let conn = Arc::new(MemoryConnector::new(PRIMARY_CLUSTER));
    conn.add_filesystem("fs1", "uuid-fs1", "/gpfs/fs1");
    conn.mount_on("fs1", "node-a");
    conn.enable_quota("fs1");
    conn.add_directory("fs1", "volumes");
    conn
}

pub(crate) fn cluster_config(id: &str, primary: Option<PrimaryConfig>) -> ClusterConfig {
    ClusterConfig {
        id: id.into(),
        primary,
        rest_api: vec![RestEndpoint {
            gui_host: format!("gui.{id}"),
            gui_port: 443,
        }],
        username: "admin".into(),
        password: "secret".into(),
        secure_ssl_mode: false,
        cacert: None,
    }
}

pub(crate) fn primary_config(remote_cluster: Option<&str>) -> PrimaryConfig {
    PrimaryConfig {
        primary_fs: "fs1".into(),
        primary_fset: DEFAULT_PRIMARY_FILESET.into(),
        remote_cluster: remote_cluster.map(str::to_owned),
    }
}

pub(crate) async fn harness_with(publish: PublishSettings) -> Harness {
    let primary = primary_cluster();
    let mut factory = MemoryConnectorFactory::new();
    factory.insert(PRIMARY_CLUSTER, Arc::clone(&primary));
    let config = DriverConfig {
        clusters: vec![cluster_config(PRIMARY_CLUSTER, Some(primary_config(None)))],
    };
    let backend = ScaleBackend::bootstrap(&config, &factory, "/gpfs/fs1", publish)
        .await
        .expect("bootstrap");
    Harness { primary, backend }
}

pub(crate) async fn harness() -> Harness {
    harness_with(PublishSettings::default()).await
}

pub(crate) struct RemoteHarness {
    pub primary: Arc<MemoryConnector>,
    pub owner: Arc<MemoryConnector>,
    pub backend: ScaleBackend,
}

/// Primary cluster that sees `rfs` as a remote mount of `data` owned by
/// cluster `c2`. No `remoteCluster` is configured.
pub(crate) async fn remote_harness() -> RemoteHarness {
    let primary = primary_cluster();
    primary.add_filesystem("rfs", "uuid-rfs", "/gpfs/rfs");
    primary.mount_on("rfs", "node-a");
    primary.set_remote_device("rfs", "storage:data");

    let owner = Arc::new(MemoryConnector::new("c2"));
    owner.add_filesystem("data", "uuid-data", "/ibm/data");
    owner.mount_on("data", "storage-1");
    owner.enable_quota("data");

    let config = DriverConfig {
        clusters: vec![
            cluster_config(PRIMARY_CLUSTER, Some(primary_config(None))),
            cluster_config("c2", None),
        ],
    };
    let mut factory = MemoryConnectorFactory::new();
    factory.insert(PRIMARY_CLUSTER, Arc::clone(&primary));
    factory.insert("c2", Arc::clone(&owner));
    let backend = ScaleBackend::bootstrap(&config, &factory, "/", PublishSettings::default())
        .await
        .expect("bootstrap");
    RemoteHarness {
        primary,
        owner,
        backend,
    }
}

pub(crate) fn create_request(name: &str, size: u64, params: &[(&str, &str)]) -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: name.into(),
        capacity_range: Some(CapacityRange {
            required_bytes: size,
            limit_bytes: 0,
        }),
        volume_capabilities: vec![VolumeCapability::default()],
        parameters: params
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>(),
    }
}
