use crate::codec::DEFAULT_ENCRYPTED_SUFFIX;
use crate::crypto::KdfParams;
use crate::error::{Result, StoreError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_RESUME_DELAY_MS: u64 = 1000;
pub const DEFAULT_FILE_NAME: &str = "todo.txt";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionSettings {
    /// Whether the runtime may encrypt at all. When false no path is eligible.
    pub enabled: bool,
    pub suffix: String,
    #[serde(default)]
    pub kdf: KdfParams,
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            suffix: DEFAULT_ENCRYPTED_SUFFIX.into(),
            kdf: KdfParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Quiet period after a local save before change events are delivered again.
    pub resume_delay_ms: u64,
    pub default_file_name: String,
    #[serde(default)]
    pub storage_root: Option<PathBuf>,
    #[serde(default)]
    pub encryption: EncryptionSettings,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            resume_delay_ms: DEFAULT_RESUME_DELAY_MS,
            default_file_name: DEFAULT_FILE_NAME.into(),
            storage_root: None,
            encryption: EncryptionSettings::default(),
        }
    }
}

impl StoreSettings {
    /// Loads settings from the platform config directory, or defaults when no
    /// file exists there.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::settings_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read(path).map_err(|e| StoreError::io(path, e))?;
        let settings: StoreSettings = serde_json::from_slice(&data)
            .map_err(|e| StoreError::Config(format!("parse {}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| StoreError::Config(format!("serialize settings: {e}")))?;
        std::fs::write(path, data).map_err(|e| StoreError::io(path, e))
    }

    pub fn validate(&self) -> Result<()> {
        if self.resume_delay_ms == 0 {
            return Err(StoreError::Config("resume delay must be positive".into()));
        }
        if !self.encryption.suffix.starts_with('.') || self.encryption.suffix.len() < 2 {
            return Err(StoreError::Config(
                "encrypted suffix must look like '.ext'".into(),
            ));
        }
        if self.default_file_name.is_empty() || self.default_file_name.contains('/') {
            return Err(StoreError::Config("default file name must be a bare name".into()));
        }
        self.encryption
            .kdf
            .validate()
            .map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }

    /// Configured storage root, falling back to the platform location.
    pub fn storage_root(&self) -> Result<PathBuf> {
        match &self.storage_root {
            Some(root) => Ok(root.clone()),
            None => paths::storage_root(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = StoreSettings::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.resume_delay_ms, DEFAULT_RESUME_DELAY_MS);
        assert_eq!(settings.encryption.suffix, ".jenc");
    }

    #[test]
    fn save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg").join("settings.json");
        let mut settings = StoreSettings::default();
        settings.resume_delay_ms = 250;
        settings.storage_root = Some(dir.path().to_path_buf());
        settings.save_to(&path).unwrap();

        let loaded = StoreSettings::load_from(&path).unwrap();
        assert_eq!(loaded.resume_delay(), Duration::from_millis(250));
        assert_eq!(loaded.storage_root().unwrap(), dir.path());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"resume_delay_ms": 500, "default_file_name": "done.txt"}"#)
            .unwrap();
        let loaded = StoreSettings::load_from(&path).unwrap();
        assert_eq!(loaded.default_file_name, "done.txt");
        assert!(loaded.encryption.enabled);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut settings = StoreSettings::default();
        settings.resume_delay_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = StoreSettings::default();
        settings.encryption.suffix = "jenc".into();
        assert!(settings.validate().is_err());
    }
}
