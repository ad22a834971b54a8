//! Collaborator hooks the store consumes from its host application.

use std::path::PathBuf;
use std::sync::Arc;

/// Invoked on the watcher's notification thread whenever the tracked file
/// changed outside the store.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Storage-access probe. Queried by callers before store operations; the
/// store itself never enforces it.
pub trait StorageAccess: Send + Sync {
    fn is_authorized(&self) -> bool;
}

impl<F> StorageAccess for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_authorized(&self) -> bool {
        self()
    }
}

/// Authorized when the storage root exists, is a directory and is writable.
#[derive(Debug, Clone)]
pub struct DirectoryAccess {
    root: PathBuf,
}

impl DirectoryAccess {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StorageAccess for DirectoryAccess {
    fn is_authorized(&self) -> bool {
        match std::fs::metadata(&self.root) {
            Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
            Err(_) => false,
        }
    }
}

/// Which login flow the host should present before using the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFlow {
    /// Ask the user to grant access to the storage root.
    StoragePermission,
}

impl LoginFlow {
    pub fn id(&self) -> &'static str {
        match self {
            LoginFlow::StoragePermission => "storage-permission",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn directory_access_requires_existing_dir() {
        let dir = tempdir().unwrap();
        assert!(DirectoryAccess::new(dir.path()).is_authorized());
        assert!(!DirectoryAccess::new(dir.path().join("missing")).is_authorized());

        let file = dir.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(!DirectoryAccess::new(&file).is_authorized());
    }

    #[test]
    fn closures_are_probes() {
        let deny = || false;
        assert!(!deny.is_authorized());
    }
}
