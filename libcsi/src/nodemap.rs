//! Orchestrator node id to cluster node name translation.
//!
//! The mapping is read from the environment: a variable named after the
//! orchestrator node id holds the cluster node name.  Node names that cannot
//! be used as variable names directly are looked up with a configurable
//! prefix, and the node id itself is the final fallback.

use std::collections::HashMap;

/// Overrides the prefix used for the second lookup.
pub const NODE_MAPPING_PREFIX_ENV: &str = "SCALE_NODE_MAPPING_PREFIX";
pub const DEFAULT_NODE_MAPPING_PREFIX: &str = "K8sNodePrefix_";
/// When set, the driver never mounts or unmounts filesystems itself.
pub const SKIP_MOUNT_UNMOUNT_ENV: &str = "SKIP_MOUNT_UNMOUNT";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMapping {
    entries: HashMap<String, String>,
    prefix: String,
}

impl NodeMapping {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let entries: HashMap<String, String> = vars.into_iter().collect();
        let prefix = entries
            .get(NODE_MAPPING_PREFIX_ENV)
            .filter(|p| !p.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_NODE_MAPPING_PREFIX.to_owned());
        Self { entries, prefix }
    }

    /// Cluster node name for `node_id`.
    pub fn resolve(&self, node_id: &str) -> String {
        self.entries
            .get(node_id)
            .or_else(|| self.entries.get(&format!("{}{node_id}", self.prefix)))
            .filter(|name| !name.is_empty())
            .cloned()
            .unwrap_or_else(|| node_id.to_owned())
    }
}

/// Environment-driven settings consumed by ControllerPublishVolume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSettings {
    pub node_mapping: NodeMapping,
    pub skip_mount_unmount: bool,
}

impl PublishSettings {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let node_mapping = NodeMapping::from_vars(vars);
        let skip_mount_unmount = node_mapping
            .entries
            .get(SKIP_MOUNT_UNMOUNT_ENV)
            .is_some_and(|v| is_truthy(v));
        Self {
            node_mapping,
            skip_mount_unmount,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "1"
    )
}
