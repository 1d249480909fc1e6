//! In-flight CreateVolume registry.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::CsiError;

/// Volume names currently being created, with their requested size.
#[derive(Debug, Default)]
pub(crate) struct InflightRegistry {
    entries: DashMap<String, u64>,
}

impl InflightRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for the lifetime of the returned guard.
    ///
    /// A concurrent request for the same name fails right away: with
    /// [`CsiError::Aborted`] when it asks for the same size, with
    /// [`CsiError::Internal`] when the sizes conflict.
    pub(crate) fn register(&self, name: &str, size_bytes: u64) -> Result<InflightGuard<'_>, CsiError> {
        match self.entries.entry(name.to_owned()) {
            Entry::Occupied(entry) => {
                let inflight = *entry.get();
                if inflight == size_bytes {
                    Err(CsiError::Aborted(format!(
                        "volume creation for [{name}] is already in process"
                    )))
                } else {
                    Err(CsiError::Internal(format!(
                        "volume [{name}] is being created with {inflight} bytes, \
                         conflicting request asks for {size_bytes} bytes"
                    )))
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(size_bytes);
                Ok(InflightGuard {
                    registry: self,
                    name: name.to_owned(),
                })
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

/// Releases a registry entry on drop.
#[derive(Debug)]
pub(crate) struct InflightGuard<'a> {
    registry: &'a InflightRegistry,
    name: String,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.registry.entries.remove(&self.name);
    }
}
