use directories::ProjectDirs;
use std::path::PathBuf;

use crate::error::{GateError, Result};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "relock";
pub const APP_NAME: &str = "relock";

pub const SETTINGS_FILE: &str = "settings.json";
pub const POLICY_FILE: &str = "security.json";

pub fn data_dir() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("RELOCK_DATA_DIR") {
        return Ok(PathBuf::from(override_path));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| GateError::Config("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(SETTINGS_FILE))
}

pub fn policy_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(POLICY_FILE))
}
