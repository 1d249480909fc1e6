//! CSI Identity service trait.
//!
//! Every plugin answers the Identity RPCs; the orchestrator uses them to
//! learn the driver name and to gate traffic on readiness.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{PluginCapability, PluginInfo};

#[async_trait]
pub trait CsiIdentity: Send + Sync {
    /// Driver name and version, as registered with the orchestrator.
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError>;

    /// `Ok(false)` means alive but unable to serve yet, e.g. the storage
    /// management endpoint does not answer.
    async fn probe(&self) -> Result<bool, CsiError>;

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError>;
}
