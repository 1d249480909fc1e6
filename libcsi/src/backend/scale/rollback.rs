//! Compensating cleanup for partially created volumes.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::connector::{Connector, ConnectorError};

/// One resource created during CreateVolume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CleanupStep {
    DeleteFileset { filesystem: String, name: String },
    DeleteDirectory { filesystem: String, path: String },
    DeleteSymlink { filesystem: String, path: String },
}

impl CleanupStep {
    async fn apply(&self, connector: &dyn Connector) -> Result<(), ConnectorError> {
        match self {
            Self::DeleteFileset { filesystem, name } => {
                connector.delete_fileset(filesystem, name).await
            }
            Self::DeleteDirectory { filesystem, path } => {
                connector.delete_directory(filesystem, path).await
            }
            Self::DeleteSymlink { filesystem, path } => {
                connector.delete_symlink(filesystem, path).await
            }
        }
    }
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteFileset { filesystem, name } => {
                write!(f, "delete fileset [{name}] in filesystem [{filesystem}]")
            }
            Self::DeleteDirectory { filesystem, path } => {
                write!(f, "delete directory [{path}] in filesystem [{filesystem}]")
            }
            Self::DeleteSymlink { filesystem, path } => {
                write!(f, "delete symlink [{path}] in filesystem [{filesystem}]")
            }
        }
    }
}

/// Cleanup steps, run newest first.
#[derive(Default)]
pub(crate) struct Rollback {
    steps: Vec<(Arc<dyn Connector>, CleanupStep)>,
}

impl Rollback {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, connector: &Arc<dyn Connector>, step: CleanupStep) {
        self.steps.push((Arc::clone(connector), step));
    }

    /// Undo every registered step.  Failures are logged and skipped.
    pub(crate) async fn run(self) {
        for (connector, step) in self.steps.into_iter().rev() {
            match step.apply(connector.as_ref()).await {
                Ok(()) => debug!(%step, "rolled back"),
                Err(e) => warn!(%step, error = %e, "rollback step failed"),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn steps(&self) -> impl Iterator<Item = &CleanupStep> {
        self.steps.iter().map(|(_, step)| step)
    }
}
