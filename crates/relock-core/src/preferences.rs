use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::storage::write_json_durable;

/// Boolean key-value persistence. A successful `put_bool` must be durable
/// before it returns; the next `get_bool` observes it.
pub trait PreferenceStore: Send + Sync {
    fn get_bool(&self, key: &str, default: bool) -> bool;
    fn put_bool(&self, key: &str, value: bool) -> Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PreferenceDocument {
    #[serde(default)]
    values: BTreeMap<String, bool>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// JSON document on disk, cached in memory after open.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    doc: RwLock<PreferenceDocument>,
}

impl FilePreferences {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = if path.exists() {
            let data = fs::read(&path)?;
            serde_json::from_slice(&data)?
        } else {
            PreferenceDocument::default()
        };
        Ok(Self {
            path,
            doc: RwLock::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for FilePreferences {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.doc.read().values.get(key).copied().unwrap_or(default)
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<()> {
        let mut doc = self.doc.write();
        if doc.values.get(key) == Some(&value) {
            return Ok(());
        }
        let mut next = doc.clone();
        next.values.insert(key.to_string(), value);
        next.updated_at = Some(Utc::now());
        write_json_durable(&self.path, &next)?;
        *doc = next;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<BTreeMap<String, bool>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.values.read().get(key).copied().unwrap_or(default)
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_store_persists_across_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("security.json");
        let prefs = FilePreferences::open(&path).unwrap();
        assert!(!prefs.get_bool("biometric_lock_enabled", false));
        prefs.put_bool("biometric_lock_enabled", true).unwrap();
        assert!(prefs.get_bool("biometric_lock_enabled", false));

        let reopened = FilePreferences::open(&path).unwrap();
        assert!(reopened.get_bool("biometric_lock_enabled", false));
    }

    #[test]
    fn failed_write_leaves_cache_untouched() {
        let dir = tempdir().unwrap();
        // parent is a regular file, so the temp file cannot be created
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let prefs = FilePreferences::open(blocker.join("security.json")).unwrap();
        assert!(prefs.put_bool("k", true).is_err());
        assert!(!prefs.get_bool("k", false));
    }

    #[test]
    fn corrupt_file_fails_to_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("security.json");
        fs::write(&path, b"not json").unwrap();
        assert!(FilePreferences::open(&path).is_err());
    }
}
