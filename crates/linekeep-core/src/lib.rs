pub mod codec;
pub mod crypto;
pub mod error;
pub mod host;
pub mod paths;
pub mod secure_storage;
pub mod settings;
pub mod store;
pub mod watcher;

pub use codec::{CryptoCodec, Password};
pub use error::{Result, StoreError};
pub use host::{ChangeCallback, DirectoryAccess, LoginFlow, StorageAccess};
pub use settings::StoreSettings;
pub use store::{FileEntry, FileStore, VersionToken};
pub use watcher::{ChangeKind, ChangeWatcher, WatchPhase};
