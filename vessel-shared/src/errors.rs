//! Error types used across the Vessel runtime.

use thiserror::Error;

/// Result type for Vessel operations.
pub type VesselResult<T> = Result<T, VesselError>;

/// Error taxonomy for the runtime.
///
/// Host syscall errors are translated into these kinds at the isolation and
/// VFS boundaries; upward they pass unmodified through the supervisor, the
/// sandbox manager, and the CRI server.
#[derive(Debug, Error)]
pub enum VesselError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("in use: {0}")]
    InUse(String),

    #[error("start failed at stage {stage}: {cause}")]
    StartFailed { stage: &'static str, cause: String },

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("unsupported on this host: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Discriminant of [`VesselError`], used by the CRI error mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidArg,
    InUse,
    StartFailed,
    Timeout,
    Unsupported,
    Internal,
}

impl VesselError {
    /// Kind accessor for error mapping without string matching.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VesselError::NotFound(_) => ErrorKind::NotFound,
            VesselError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            VesselError::InvalidArg(_) => ErrorKind::InvalidArg,
            VesselError::InUse(_) => ErrorKind::InUse,
            VesselError::StartFailed { .. } => ErrorKind::StartFailed,
            VesselError::Timeout(_) => ErrorKind::Timeout,
            VesselError::Unsupported(_) => ErrorKind::Unsupported,
            VesselError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Build a `StartFailed` from a stage label and any displayable cause.
    pub fn start_failed(stage: &'static str, cause: impl std::fmt::Display) -> Self {
        VesselError::StartFailed {
            stage,
            cause: cause.to_string(),
        }
    }
}

// Implement From for common error types to enable `?` operator
impl From<std::io::Error> for VesselError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => VesselError::NotFound(err.to_string()),
            std::io::ErrorKind::AlreadyExists => VesselError::AlreadyExists(err.to_string()),
            _ => VesselError::Internal(format!("I/O error: {}", err)),
        }
    }
}

impl From<serde_json::Error> for VesselError {
    fn from(err: serde_json::Error) -> Self {
        VesselError::Internal(format!("JSON error: {}", err))
    }
}

impl From<String> for VesselError {
    fn from(err: String) -> Self {
        VesselError::Internal(err)
    }
}

impl From<&str> for VesselError {
    fn from(err: &str) -> Self {
        VesselError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(VesselError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            VesselError::start_failed("clone", "EPERM").kind(),
            ErrorKind::StartFailed
        );
        assert_eq!(VesselError::InUse("img".into()).kind(), ErrorKind::InUse);
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(VesselError::from(io).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn start_failed_displays_stage() {
        let err = VesselError::start_failed("pivot_root", "EINVAL");
        assert!(err.to_string().contains("pivot_root"));
        assert!(err.to_string().contains("EINVAL"));
    }
}
