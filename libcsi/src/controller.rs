//! CSI Controller service trait.
//!
//! The Controller service manages the centralized volume lifecycle:
//! provisioning, deletion, attaching a volume's filesystems to a node and
//! capability validation.  Listing, capacity, expansion and snapshots are
//! part of the standard method set; backends that do not support them
//! return [`CsiError::Unimplemented`].

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    ControllerCapability, ControllerPublishVolumeRequest, CreateVolumeRequest, Volume,
    ValidateVolumeCapabilitiesResponse, VolumeCapability, VolumeId,
};

/// Controller service — centralized volume management.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume.  Repeating the call with the same name and
    /// size returns the same [`Volume`].
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.  Deleting an unknown volume
    /// succeeds.
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError>;

    /// Make the volume's filesystems available on a node.
    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<(), CsiError>;

    async fn controller_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<(), CsiError>;

    /// Check whether the given capabilities are compatible with the volume.
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<ValidateVolumeCapabilitiesResponse, CsiError>;

    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;

    async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError> {
        Err(CsiError::Unimplemented("ListVolumes".into()))
    }

    async fn get_capacity(&self) -> Result<u64, CsiError> {
        Err(CsiError::Unimplemented("GetCapacity".into()))
    }

    async fn controller_expand_volume(
        &self,
        _volume_id: &VolumeId,
        _required_bytes: u64,
    ) -> Result<u64, CsiError> {
        Err(CsiError::Unimplemented("ControllerExpandVolume".into()))
    }

    async fn create_snapshot(
        &self,
        _source_volume_id: &VolumeId,
        _name: &str,
    ) -> Result<String, CsiError> {
        Err(CsiError::Unimplemented("CreateSnapshot".into()))
    }

    async fn delete_snapshot(&self, _snapshot_id: &str) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("DeleteSnapshot".into()))
    }

    async fn list_snapshots(&self) -> Result<Vec<String>, CsiError> {
        Err(CsiError::Unimplemented("ListSnapshots".into()))
    }
}
