use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VolumeError>;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("{context} ({}): {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("capability error: {0:#}")]
    Capability(#[source] anyhow::Error),
}

impl VolumeError {
    pub(crate) fn io(
        context: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        VolumeError::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// Short machine-friendly name of the error kind, used by the CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            VolumeError::InvalidArgument(_) => "InvalidArgument",
            VolumeError::AlreadyExists(_) => "AlreadyExists",
            VolumeError::NotFound(_) => "NotFound",
            VolumeError::PreconditionFailed(_) => "PreconditionFailed",
            VolumeError::Io { .. } => "IOError",
            VolumeError::Capability(_) => "CapabilityError",
        }
    }
}
