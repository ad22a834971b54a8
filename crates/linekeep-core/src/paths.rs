use crate::error::{Result, StoreError};
use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORG: &str = "linekeep";
pub const APP_NAME: &str = "linekeep";

pub const STORAGE_ROOT_ENV: &str = "LINEKEEP_STORAGE_ROOT";
pub const SETTINGS_FILE: &str = "settings.json";

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| StoreError::Config("cannot determine home directory".into()))
}

pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

pub fn config_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().to_path_buf())
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(SETTINGS_FILE))
}

/// The application's external storage directory: the environment override if
/// set, otherwise `<data dir>/files`.
pub fn storage_root() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(STORAGE_ROOT_ENV) {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    Ok(data_dir()?.join("files"))
}
