//! Driver configuration.
//!
//! The configuration file lists every cluster the driver may talk to.  It is
//! loaded once at startup and never changes afterwards; values computed at
//! runtime by bootstrap live in [`crate::backend::scale::PrimaryRuntime`].
//!
//! ```json
//! {
//!   "clusters": [{
//!     "id": "7118073361626808055",
//!     "primary": { "primaryFs": "fs1", "primaryFset": "csi-volume-store" },
//!     "restApi": [{ "guiHost": "gui.example", "guiPort": 443 }],
//!     "username": "csiadmin",
//!     "password": "secret",
//!     "secureSslMode": false
//!   }]
//! }
//! ```
//!
//! Files ending in `.yaml` / `.yml` are parsed as YAML, anything else as JSON.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connector::HasClusterId;
use crate::error::CsiError;

/// Fileset that hosts the driver's bookkeeping when none is configured.
pub const DEFAULT_PRIMARY_FILESET: &str = "csi-volume-store";

fn default_primary_fileset() -> String {
    DEFAULT_PRIMARY_FILESET.to_owned()
}

fn default_gui_port() -> u16 {
    443
}

/// One management endpoint of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestEndpoint {
    pub gui_host: String,
    #[serde(default = "default_gui_port")]
    pub gui_port: u16,
}

/// Extra settings carried by the primary cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryConfig {
    /// Filesystem hosting the primary fileset.
    pub primary_fs: String,
    /// Fileset holding the `.volumes` symlink directory.
    #[serde(default = "default_primary_fileset")]
    pub primary_fset: String,
    /// Cluster owning `primary_fs` when it is remotely mounted here.
    #[serde(default)]
    pub remote_cluster: Option<String>,
}

/// Connection details for one cluster.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    pub id: String,
    #[serde(default)]
    pub primary: Option<PrimaryConfig>,
    pub rest_api: Vec<RestEndpoint>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Verify the endpoint certificate against `cacert`.
    #[serde(default)]
    pub secure_ssl_mode: bool,
    #[serde(default)]
    pub cacert: Option<PathBuf>,
}

// Keep the password out of logs.
impl std::fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("id", &self.id)
            .field("primary", &self.primary)
            .field("rest_api", &self.rest_api)
            .field("username", &self.username)
            .field("secure_ssl_mode", &self.secure_ssl_mode)
            .field("cacert", &self.cacert)
            .finish_non_exhaustive()
    }
}

impl HasClusterId for ClusterConfig {
    fn cluster_id(&self) -> &str {
        &self.id
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverConfig {
    pub clusters: Vec<ClusterConfig>,
}

impl DriverConfig {
    /// Read, parse and validate the configuration at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CsiError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CsiError::Config(format!("read {}: {e}", path.display())))?;

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        let config: DriverConfig = if is_yaml {
            serde_yaml::from_str(&raw)
                .map_err(|e| CsiError::Config(format!("parse {}: {e}", path.display())))?
        } else {
            serde_json::from_str(&raw)
                .map_err(|e| CsiError::Config(format!("parse {}: {e}", path.display())))?
        };

        config.validate()?;
        debug!(path = %path.display(), clusters = config.clusters.len(), "configuration loaded");
        Ok(config)
    }

    /// Check the invariants the rest of the driver relies on.
    pub fn validate(&self) -> Result<(), CsiError> {
        if self.clusters.is_empty() {
            return Err(CsiError::Config("no clusters configured".into()));
        }

        let mut ids = HashSet::new();
        for cluster in &self.clusters {
            if cluster.id.is_empty() {
                return Err(CsiError::Config("cluster id must not be empty".into()));
            }
            if !ids.insert(cluster.id.as_str()) {
                return Err(CsiError::Config(format!(
                    "cluster {} is configured more than once",
                    cluster.id
                )));
            }
            if cluster.rest_api.is_empty() || cluster.rest_api.iter().any(|e| e.gui_host.is_empty())
            {
                return Err(CsiError::Config(format!(
                    "cluster {} needs at least one REST endpoint with a host",
                    cluster.id
                )));
            }
            if cluster.secure_ssl_mode && cluster.cacert.is_none() {
                return Err(CsiError::Config(format!(
                    "cluster {}: secureSslMode requires cacert",
                    cluster.id
                )));
            }
        }

        let primaries: Vec<&ClusterConfig> = self
            .clusters
            .iter()
            .filter(|c| c.primary.is_some())
            .collect();
        let [primary] = primaries.as_slice() else {
            return Err(CsiError::Config(format!(
                "exactly one primary cluster is required, found {}",
                primaries.len()
            )));
        };
        let Some(settings) = primary.primary.as_ref() else {
            return Err(CsiError::Config("primary cluster lost its settings".into()));
        };
        if settings.primary_fs.is_empty() {
            return Err(CsiError::Config(format!(
                "primary cluster {} has no primaryFs",
                primary.id
            )));
        }
        if let Some(remote) = settings.remote_cluster.as_deref()
            && (remote == primary.id || !ids.contains(remote))
        {
            return Err(CsiError::Config(format!(
                "remoteCluster {remote} of the primary is not another configured cluster"
            )));
        }
        Ok(())
    }

    /// The primary cluster. Only valid after [`Self::validate`].
    pub fn primary(&self) -> Result<(&ClusterConfig, &PrimaryConfig), CsiError> {
        self.clusters
            .iter()
            .find_map(|c| c.primary.as_ref().map(|p| (c, p)))
            .ok_or_else(|| CsiError::Config("no primary cluster configured".into()))
    }

    pub fn cluster(&self, id: &str) -> Option<&ClusterConfig> {
        self.clusters.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cluster(id: &str, primary: Option<PrimaryConfig>) -> ClusterConfig {
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

    fn primary(fs: &str) -> Option<PrimaryConfig> {
        Some(PrimaryConfig {
            primary_fs: fs.into(),
            primary_fset: DEFAULT_PRIMARY_FILESET.into(),
            remote_cluster: None,
        })
    }

    #[test]
    fn load_json_applies_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"clusters":[{{"id":"c1","primary":{{"primaryFs":"fs1"}},
                "restApi":[{{"guiHost":"gui1"}}],"username":"u","password":"p"}}]}}"#
        )
        .unwrap();

        let config = DriverConfig::load(file.path()).unwrap();
        let (cluster, settings) = config.primary().unwrap();
        assert_eq!(cluster.id, "c1");
        assert_eq!(cluster.rest_api[0].gui_port, 443);
        assert_eq!(settings.primary_fset, DEFAULT_PRIMARY_FILESET);
        assert!(!cluster.secure_ssl_mode);
    }

    #[test]
    fn load_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            "clusters:\n  - id: c1\n    primary:\n      primaryFs: fs1\n      primaryFset: store\n    restApi:\n      - guiHost: gui1\n        guiPort: 8443\n"
        )
        .unwrap();

        let config = DriverConfig::load(file.path()).unwrap();
        assert_eq!(config.clusters[0].rest_api[0].gui_port, 8443);
        assert_eq!(config.primary().unwrap().1.primary_fset, "store");
    }

    #[test]
    fn exactly_one_primary() {
        let none = DriverConfig {
            clusters: vec![cluster("c1", None)],
        };
        assert!(matches!(none.validate(), Err(CsiError::Config(_))));

        let two = DriverConfig {
            clusters: vec![cluster("c1", primary("fs1")), cluster("c2", primary("fs2"))],
        };
        assert!(two.validate().is_err());

        let one = DriverConfig {
            clusters: vec![cluster("c1", primary("fs1")), cluster("c2", None)],
        };
        one.validate().unwrap();
    }

    #[test]
    fn rejects_duplicate_ids_and_unknown_remote() {
        let dup = DriverConfig {
            clusters: vec![cluster("c1", primary("fs1")), cluster("c1", None)],
        };
        assert!(dup.validate().is_err());

        let mut settings = primary("fs1");
        if let Some(p) = settings.as_mut() {
            p.remote_cluster = Some("c9".into());
        }
        let remote = DriverConfig {
            clusters: vec![cluster("c1", settings)],
        };
        assert!(remote.validate().is_err());
    }

    #[test]
    fn secure_mode_needs_ca() {
        let mut c = cluster("c1", primary("fs1"));
        c.secure_ssl_mode = true;
        let config = DriverConfig { clusters: vec![c] };
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_hides_password() {
        let rendered = format!("{:?}", cluster("c1", None));
        assert!(!rendered.contains("secret"));
    }
}
