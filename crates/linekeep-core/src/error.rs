use std::path::PathBuf;

/// Errors surfaced by the store and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage access not authorized: {0}")]
    Permission(String),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("could not watch {path}: {reason}")]
    WatchSetup { path: PathBuf, reason: String },
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_encryption(&self) -> bool {
        matches!(self, StoreError::Encryption(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
