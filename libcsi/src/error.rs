//! CSI error types.
//!
//! All errors surfaced to the orchestrator are represented by the
//! [`CsiError`] enum.  Each variant corresponds to one RPC status category
//! (see [`Code`]), so the transport can report a stable status alongside the
//! human-readable message.  [`CsiError`] also implements
//! [`Serialize`]/[`Deserialize`] so errors can travel across the QUIC
//! transport layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connector::ConnectorError;

/// RPC status codes used by the CSI surface.
///
/// The numeric values match the gRPC status code table so they can be
/// reported verbatim to a gRPC-speaking orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    /// Client specified an invalid argument.
    InvalidArgument = 3,
    /// Some requested entity was not found.
    NotFound = 5,
    /// Some entity that we attempted to create already exists.
    AlreadyExists = 6,
    /// The operation was aborted, typically due to a concurrency issue.
    Aborted = 10,
    /// Operation is not implemented or not supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// The request does not have valid authentication credentials.
    Unauthenticated = 16,
}

impl Code {
    /// Get human-readable description of this code
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Code::InvalidArgument => "Client specified an invalid argument",
            Code::NotFound => "Some requested entity was not found",
            Code::AlreadyExists => "Some entity that we attempted to create already exists",
            Code::Aborted => "The operation was aborted",
            Code::Unimplemented => "Operation is not implemented or not supported",
            Code::Internal => "Internal error",
            Code::Unauthenticated => "The request does not have valid authentication credentials",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl From<Code> for i32 {
    fn from(code: Code) -> i32 {
        code as i32
    }
}

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CsiError {
    /// The caller supplied an invalid or incomplete request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced volume or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A resource with the same name exists but is incompatible.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// An identical request is still being processed.
    #[error("aborted: {0}")]
    Aborted(String),

    /// The requested operation or capability is not supported.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// The filesystem management API rejected our credentials.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The driver configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsiError {
    /// RPC status category of this error.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::NotFound(_) => Code::NotFound,
            Self::AlreadyExists(_) => Code::AlreadyExists,
            Self::Aborted(_) => Code::Aborted,
            Self::Unimplemented(_) => Code::Unimplemented,
            Self::Unauthenticated(_) => Code::Unauthenticated,
            Self::TransportError(_) | Self::Config(_) | Self::Internal(_) => Code::Internal,
        }
    }

    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Wrap a connector failure with the operation that was being attempted.
    ///
    /// Authentication failures keep their own category; everything else is
    /// reported as [`CsiError::Internal`].
    pub fn remote(context: impl fmt::Display, err: ConnectorError) -> Self {
        match err {
            ConnectorError::Unauthenticated(_) => {
                Self::Unauthenticated(format!("{context}: {err}"))
            }
            other => Self::Internal(format!("{context}: {other}")),
        }
    }
}

impl From<ConnectorError> for CsiError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Unauthenticated(_) => Self::Unauthenticated(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CsiError::Aborted("volume pvc1 already in process".into());
        assert_eq!(err.to_string(), "aborted: volume pvc1 already in process");
    }

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(CsiError::Config("x".into()).code(), Code::Internal);
        assert_eq!(CsiError::TransportError("x".into()).code(), Code::Internal);
        assert_eq!(CsiError::AlreadyExists("x".into()).code(), Code::AlreadyExists);
        assert_eq!(i32::from(Code::Unauthenticated), 16);
    }

    #[test]
    fn remote_errors_keep_auth_category() {
        let err = CsiError::remote(
            "unable to list filesets",
            ConnectorError::Unauthenticated("gui.example:443".into()),
        );
        assert_eq!(err.code(), Code::Unauthenticated);

        let err = CsiError::remote(
            "unable to create fileset [pvc1]",
            ConnectorError::Protocol("missing jobs array".into()),
        );
        assert_eq!(err.code(), Code::Internal);
        assert!(err.to_string().contains("unable to create fileset [pvc1]"));
    }

    #[test]
    fn error_serde_roundtrip() {
        let err = CsiError::InvalidArgument("volume name missing".into());
        let json = serde_json::to_string(&err).expect("serialize");
        let de: CsiError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(err, de);
    }
}
