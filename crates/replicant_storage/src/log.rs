//! Single-file keyed log store.
//!
//! The log is a sequence of rows, each a little-endian `u32` length followed
//! by a JSON document `{"namespace", "name", "value", "deleted"}`. The latest
//! row for a key wins; a row with `deleted: true` is a tombstone. The whole
//! log is indexed in memory on open.

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, ReplicantStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LEN_PREFIX: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
struct Row {
    namespace: String,
    name: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug)]
struct LogInner {
    file: File,
    size: u64,
    index: BTreeMap<(String, String), Value>,
    dead_rows: u64,
}

/// A store keeping every Replicant in one append-only file.
///
/// This is the "table keyed by (namespace, name)" layout: useful when a
/// deployment wants a single durable artifact instead of a directory tree.
///
/// # Recovery
///
/// A row cut short by a crash is detected on open and the file is truncated
/// back to the last complete row.
///
/// # Example
///
/// ```no_run
/// use replicant_storage::{LogStore, ReplicantStore};
/// use serde_json::json;
/// use std::path::Path;
///
/// let store = LogStore::open(Path::new("replicants.log")).unwrap();
/// store.save("game", "score", &json!(5)).unwrap();
/// store.compact().unwrap();
/// ```
#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    sync_on_write: bool,
    inner: Mutex<LogInner>,
}

impl LogStore {
    /// Opens or creates a log at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, read or repaired.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let (index, dead_rows, valid_len) = replay(&bytes);
        if valid_len < bytes.len() as u64 {
            warn!(
                path = %path.display(),
                kept = valid_len,
                dropped = bytes.len() as u64 - valid_len,
                "truncating torn tail of replicant log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        debug!(path = %path.display(), records = index.len(), "opened replicant log");

        Ok(Self {
            path: path.to_path_buf(),
            sync_on_write: true,
            inner: Mutex::new(LogInner {
                file,
                size: valid_len,
                index,
                dead_rows,
            }),
        })
    }

    /// Sets whether each appended row is synced to disk.
    #[must_use]
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Returns the path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current file size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Returns the number of superseded rows and tombstones in the file.
    #[must_use]
    pub fn dead_rows(&self) -> u64 {
        self.inner.lock().dead_rows
    }

    /// Rewrites the log so it contains exactly one row per live key.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement file cannot be written or swapped in.
    pub fn compact(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();

        let tmp_path = self.path.with_extension("compact");
        let mut size = 0u64;
        {
            let mut tmp = File::create(&tmp_path)?;
            for ((namespace, name), value) in &inner.index {
                let row = Row {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    value: value.clone(),
                    deleted: false,
                };
                let framed = frame(&row)?;
                tmp.write_all(&framed)?;
                size += framed.len() as u64;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        inner.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        inner.size = size;
        let removed = inner.dead_rows;
        inner.dead_rows = 0;

        debug!(path = %self.path.display(), removed, "compacted replicant log");
        Ok(())
    }

    /// Writes a row at the end of the last complete row.
    ///
    /// A failed write is trimmed off again; whatever survives the trim is
    /// overwritten by the next append since it starts at `inner.size`, not
    /// at the physical end of the file.
    fn append(&self, inner: &mut LogInner, row: &Row) -> StorageResult<()> {
        let framed = frame(row)?;
        let written = write_row(&mut inner.file, inner.size, &framed).and_then(|()| {
            if self.sync_on_write {
                inner.file.sync_data()
            } else {
                inner.file.flush()
            }
        });
        if let Err(e) = written {
            if let Err(trim) = inner.file.set_len(inner.size) {
                warn!(path = %self.path.display(), error = %trim, "failed to trim partial row");
            }
            return Err(e.into());
        }
        inner.size += framed.len() as u64;
        Ok(())
    }
}

fn write_row<W: Write + Seek>(out: &mut W, at: u64, framed: &[u8]) -> io::Result<()> {
    out.seek(SeekFrom::Start(at))?;
    out.write_all(framed)
}

fn frame(row: &Row) -> StorageResult<Vec<u8>> {
    let payload = serde_json::to_vec(row)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StorageError::Corrupted(format!("row too large: {} bytes", payload.len())))?;
    let mut framed = Vec::with_capacity(LEN_PREFIX + payload.len());
    framed.extend_from_slice(&len.to_le_bytes());
    framed.extend_from_slice(&payload);
    Ok(framed)
}

/// Rebuilds the index from raw log bytes.
///
/// Returns the index, the count of dead rows and the length of the valid prefix.
fn replay(bytes: &[u8]) -> (BTreeMap<(String, String), Value>, u64, u64) {
    let mut index = BTreeMap::new();
    let mut dead_rows = 0u64;
    let mut offset = 0usize;

    while offset + LEN_PREFIX <= bytes.len() {
        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&bytes[offset..offset + LEN_PREFIX]);
        let len = u32::from_le_bytes(len_bytes) as usize;

        let start = offset + LEN_PREFIX;
        let Some(end) = start.checked_add(len).filter(|end| *end <= bytes.len()) else {
            break;
        };
        let Ok(row) = serde_json::from_slice::<Row>(&bytes[start..end]) else {
            break;
        };

        let key = (row.namespace, row.name);
        let replaced = if row.deleted {
            dead_rows += 1;
            index.remove(&key).is_some()
        } else {
            index.insert(key, row.value).is_some()
        };
        if replaced {
            dead_rows += 1;
        }
        offset = end;
    }

    (index, dead_rows, offset as u64)
}

impl ReplicantStore for LogStore {
    fn load(&self, namespace: &str, name: &str) -> StorageResult<Option<Value>> {
        Ok(self
            .inner
            .lock()
            .index
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    fn save(&self, namespace: &str, name: &str, value: &Value) -> StorageResult<()> {
        validate_key(namespace, name)?;
        let row = Row {
            namespace: namespace.to_string(),
            name: name.to_string(),
            value: value.clone(),
            deleted: false,
        };

        let mut inner = self.inner.lock();
        self.append(&mut inner, &row)?;
        if inner
            .index
            .insert((row.namespace, row.name), row.value)
            .is_some()
        {
            inner.dead_rows += 1;
        }
        Ok(())
    }

    fn remove(&self, namespace: &str, name: &str) -> StorageResult<bool> {
        let key = (namespace.to_string(), name.to_string());
        let mut inner = self.inner.lock();
        if !inner.index.contains_key(&key) {
            return Ok(false);
        }

        let row = Row {
            namespace: key.0.clone(),
            name: key.1.clone(),
            value: Value::Null,
            deleted: true,
        };
        self.append(&mut inner, &row)?;
        inner.index.remove(&key);
        inner.dead_rows += 2;
        Ok(true)
    }

    fn list(&self, namespace: Option<&str>) -> StorageResult<Vec<(String, String)>> {
        Ok(self
            .inner
            .lock()
            .index
            .keys()
            .filter(|(ns, _)| namespace.map_or(true, |wanted| wanted == ns))
            .cloned()
            .collect())
    }
}
