//! File-per-record store for persistent storage.

use crate::error::StorageResult;
use crate::store::{validate_key, ReplicantStore};
use parking_lot::Mutex;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const RECORD_EXTENSION: &str = "rep";

/// A store keeping one JSON file per Replicant.
///
/// Records live at `<root>/<namespace>/<name>.rep`. Each save writes the
/// whole value to a temporary file and renames it over the record, so a
/// reader never observes a half-written value.
///
/// # Durability
///
/// With `sync_on_write` enabled (the default) the temporary file is
/// `fsync`ed before the rename.
///
/// # Example
///
/// ```no_run
/// use replicant_storage::{FileStore, ReplicantStore};
/// use serde_json::json;
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("db/replicants")).unwrap();
/// store.save("game", "score", &json!(5)).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    sync_on_write: bool,
    // Serializes writers so two saves of one key cannot race on the temp file.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            sync_on_write: true,
            write_lock: Mutex::new(()),
        })
    }

    /// Sets whether each write is synced to disk before it is published.
    #[must_use]
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of the record file for a key.
    #[must_use]
    pub fn record_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.root
            .join(namespace)
            .join(format!("{name}.{RECORD_EXTENSION}"))
    }
}

impl ReplicantStore for FileStore {
    fn load(&self, namespace: &str, name: &str) -> StorageResult<Option<Value>> {
        validate_key(namespace, name)?;
        let text = match fs::read_to_string(self.record_path(namespace, name)) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save(&self, namespace: &str, name: &str, value: &Value) -> StorageResult<()> {
        validate_key(namespace, name)?;
        let bytes = serde_json::to_vec(value)?;

        let _guard = self.write_lock.lock();
        let path = self.record_path(namespace, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension(format!("{RECORD_EXTENSION}.tmp"));
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            if self.sync_on_write {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn remove(&self, namespace: &str, name: &str) -> StorageResult<bool> {
        validate_key(namespace, name)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.record_path(namespace, name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, namespace: Option<&str>) -> StorageResult<Vec<(String, String)>> {
        let mut keys = Vec::new();
        let namespaces: Vec<String> = match namespace {
            Some(ns) => vec![ns.to_string()],
            None => {
                let mut found = Vec::new();
                for entry in fs::read_dir(&self.root)? {
                    let entry = entry?;
                    if entry.file_type()?.is_dir() {
                        found.push(entry.file_name().to_string_lossy().into_owned());
                    }
                }
                found
            }
        };

        for ns in namespaces {
            let dir = self.root.join(&ns);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push((ns.clone(), stem.to_string()));
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
