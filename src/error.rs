//! Error taxonomy for the node graph, mapped to filesystem errno values.
//!
//! Each variant corresponds to exactly one errno, and [`FsError::errno`] is
//! the single place that translation happens so reply sites never hand-pick
//! a raw `libc` constant.

use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("operation not permitted: {0}")]
    Permission(String),

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("cross-device link: {0}")]
    CrossDevice(String),

    #[error("backend error (status {status:?}): {body}")]
    Backend { status: Option<u16>, body: String },

    #[error("not supported: {0}")]
    Unsupported(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// Translate to the errno the kernel should see.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::Permission(_) => libc::EPERM,
            FsError::Invalid(_) => libc::EINVAL,
            FsError::Exists(_) => libc::EEXIST,
            FsError::Busy(_) => libc::EBUSY,
            FsError::CrossDevice(_) => libc::EXDEV,
            FsError::Backend { .. } => libc::EIO,
            FsError::Unsupported(_) => libc::ENOTSUP,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        FsError::NotFound(what.to_string())
    }

    pub fn invalid(what: impl fmt::Display) -> Self {
        FsError::Invalid(what.to_string())
    }

    pub fn permission(what: impl fmt::Display) -> Self {
        FsError::Permission(what.to_string())
    }
}

/// Typed failure from a backend RPC. Logged unconditionally at the call site,
/// since the cause would otherwise vanish once it's squashed into an
/// `FsError::Backend` / `EIO`.
#[derive(Debug, Clone)]
pub struct BackendError {
    pub status: Option<u16>,
    pub body: String,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend error (status {:?}): {}", self.status, self.body)
    }
}

impl std::error::Error for BackendError {}

impl From<BackendError> for FsError {
    fn from(e: BackendError) -> Self {
        tracing::error!(status = ?e.status, body = %e.body, "backend call failed");
        FsError::Backend {
            status: e.status,
            body: e.body,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_matches_spec_table() {
        assert_eq!(FsError::not_found("x").errno(), libc::ENOENT);
        assert_eq!(FsError::permission("x").errno(), libc::EPERM);
        assert_eq!(FsError::invalid("x").errno(), libc::EINVAL);
        assert_eq!(FsError::Exists("x".into()).errno(), libc::EEXIST);
        assert_eq!(FsError::Busy("x".into()).errno(), libc::EBUSY);
        assert_eq!(FsError::CrossDevice("x".into()).errno(), libc::EXDEV);
        assert_eq!(
            FsError::Backend {
                status: Some(500),
                body: "oops".into()
            }
            .errno(),
            libc::EIO
        );
        assert_eq!(FsError::Unsupported("setattr").errno(), libc::ENOTSUP);
    }

    #[test]
    fn backend_error_converts_and_logs() {
        let be = BackendError {
            status: Some(503),
            body: "unavailable".into(),
        };
        let fe: FsError = be.into();
        assert_eq!(fe.errno(), libc::EIO);
        assert!(fe.to_string().contains("503"));
    }

    #[test]
    fn display_messages_carry_context() {
        let err = FsError::not_found("conversation abcd1234");
        assert_eq!(err.to_string(), "no such entry: conversation abcd1234");
    }
}
