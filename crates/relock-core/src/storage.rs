use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::Result;
use crate::settings::GateSettings;

pub fn load_settings(path: &Path) -> Result<GateSettings> {
    let settings = if path.exists() {
        let data = fs::read(path)?;
        serde_json::from_slice(&data)?
    } else {
        GateSettings::default()
    };
    settings.validate()?;
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &GateSettings) -> Result<()> {
    settings.validate()?;
    write_json_durable(path, settings)
}

/// Writes `value` next to `path`, fsyncs it and renames it into place.
pub(crate) fn write_json_durable<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = load_settings(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, GateSettings::default());
    }

    #[test]
    fn saved_settings_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = GateSettings::default();
        settings.failed_attempt_threshold = 5;
        settings.prompt.title = "Locked".into();
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path).unwrap(), settings);
    }

    #[test]
    fn invalid_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, br#"{"failed_attempt_threshold": 0}"#).unwrap();
        assert!(load_settings(&path).is_err());
    }
}
