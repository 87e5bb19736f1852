//! CLI command implementations.

pub mod compact;
pub mod list;
pub mod records;
pub mod schema;

use clap::ValueEnum;
use replicant_storage::{FileStore, LogStore, ReplicantStore};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Store layouts the CLI can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// One file per Replicant under a root directory.
    File,
    /// A single append-only log file.
    Log,
}

/// Opens the store at `path` with the given backend.
pub fn open_store(path: &Path, backend: Backend) -> Result<Box<dyn ReplicantStore>, Box<dyn std::error::Error>> {
    debug!(path = %path.display(), ?backend, "opening store");
    let store: Box<dyn ReplicantStore> = match backend {
        Backend::File => Box::new(FileStore::open(path)?),
        Backend::Log => Box::new(LogStore::open(path)?),
    };
    Ok(store)
}

/// Parses a JSON argument; `@path` reads the JSON from a file.
pub fn parse_value(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let text = match arg.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).map_err(|e| format!("cannot read {path}: {e}"))?,
        None => arg.to_string(),
    };
    Ok(serde_json::from_str(&text).map_err(|e| format!("invalid JSON: {e}"))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn parse_inline_and_file_values() {
        assert_eq!(parse_value("{\"a\": 1}").unwrap(), json!({"a": 1}));
        assert_eq!(parse_value("null").unwrap(), Value::Null);
        assert!(parse_value("{oops").is_err());

        let dir = tempdir().unwrap();
        let path = dir.path().join("value.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert_eq!(parse_value(&format!("@{}", path.display())).unwrap(), json!([1, 2]));
        assert!(parse_value("@/definitely/missing.json").is_err());
    }

    #[test]
    fn open_both_backends() {
        let dir = tempdir().unwrap();
        let files = open_store(&dir.path().join("records"), Backend::File).unwrap();
        files.save("game", "score", &json!(1)).unwrap();

        let log = open_store(&dir.path().join("replicants.log"), Backend::Log).unwrap();
        log.save("game", "score", &json!(2)).unwrap();

        assert_eq!(files.load("game", "score").unwrap(), Some(json!(1)));
        assert_eq!(log.load("game", "score").unwrap(), Some(json!(2)));
    }
}
