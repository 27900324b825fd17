//! File-backed settings store.
//!
//! All watch settings live in one flat JSON object:
//!
//! ```text
//! {data_dir}/settings.json
//! {
//!   "armed": true,
//!   "anchorLat": 48.0, "anchorLon": -4.5, "anchorRadius": 60.0,
//!   "intervalSec": 60,
//!   ...
//! }
//! ```
//!
//! The whole object is cached in memory and rewritten on every change, via a
//! temporary file and a rename so a crash never leaves a truncated file.

use anchorwatch_core::{KeyValueStore, StoreError};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

pub struct FileConfigStore {
    path: PathBuf,
    cache: RwLock<Map<String, Value>>,
}

impl FileConfigStore {
    /// Open the store, loading existing settings from `path` if present
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let cache = load(&path);
        info!(
            "Settings file {} ({} keys)",
            path.display(),
            cache.len()
        );

        Ok(FileConfigStore {
            path,
            cache: RwLock::new(cache),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update<F>(&self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = cache.clone();
        change(&mut next);
        if next == *cache {
            return Ok(());
        }
        save(&self.path, &next)?;
        *cache = next;
        Ok(())
    }
}

fn load(path: &Path) -> Map<String, Value> {
    if !path.exists() {
        debug!("No settings file at {}", path.display());
        return Map::new();
    }

    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Failed to open settings {}: {}", path.display(), e);
            return Map::new();
        }
    };

    match serde_json::from_reader(BufReader::new(file)) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!("Settings {} is not a JSON object, ignoring", path.display());
            Map::new()
        }
        Err(e) => {
            warn!("Failed to parse settings {}: {}", path.display(), e);
            Map::new()
        }
    }
}

fn save(path: &Path, values: &Map<String, Value>) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    let file = fs::File::create(&tmp)
        .map_err(|e| StoreError(format!("Failed to create {}: {}", tmp.display(), e)))?;

    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, values)
        .map_err(|e| StoreError(format!("Failed to write settings: {}", e)))?;
    writer
        .write_all(b"\n")
        .and_then(|_| writer.flush())
        .map_err(|e| StoreError(format!("Failed to flush {}: {}", tmp.display(), e)))?;
    drop(writer);

    fs::rename(&tmp, path).map_err(|e| {
        StoreError(format!(
            "Failed to replace {}: {}",
            path.display(),
            e
        ))
    })?;
    debug!("Stored settings -> {}", path.display());
    Ok(())
}

impl KeyValueStore for FileConfigStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.update(|map| {
            map.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|map| {
            map.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchorwatch_core::{AnchorConfig, Prefs};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (FileConfigStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileConfigStore::open(temp_dir.path().join("settings.json")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_put_and_get() {
        let (store, _temp) = create_test_store();
        store.put("intervalSec", json!(30)).unwrap();
        assert_eq!(store.get("intervalSec"), Some(json!(30)));

        // Re-open and read from file
        let reopened = FileConfigStore::open(store.path().to_path_buf()).unwrap();
        assert_eq!(reopened.get("intervalSec"), Some(json!(30)));
    }

    #[test]
    fn test_remove() {
        let (store, _temp) = create_test_store();
        store.put("armed", json!(true)).unwrap();
        store.remove("armed").unwrap();
        assert!(store.get("armed").is_none());

        let reopened = FileConfigStore::open(store.path().to_path_buf()).unwrap();
        assert!(reopened.get("armed").is_none());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let store = FileConfigStore::open(path).unwrap();
        assert!(store.get("armed").is_none());
        store.put("armed", json!(false)).unwrap();
        assert_eq!(store.get("armed"), Some(json!(false)));
    }

    #[test]
    fn test_prefs_survive_restart() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");

        {
            let prefs = Prefs::new(Arc::new(FileConfigStore::open(path.clone()).unwrap()));
            prefs
                .set_anchor(Some(&AnchorConfig::new(48.0, -4.5, 60.0)))
                .unwrap();
            prefs.set_armed(true).unwrap();
            prefs.set_heading_deg(400).unwrap();
        }

        let prefs = Prefs::new(Arc::new(FileConfigStore::open(path).unwrap()));
        assert!(prefs.is_armed());
        assert_eq!(prefs.anchor(), Some(AnchorConfig::new(48.0, -4.5, 60.0)));
        assert_eq!(prefs.heading_deg(), 40);
    }
}
