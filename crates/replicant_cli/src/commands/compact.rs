//! Compact command implementation.

use replicant_storage::LogStore;
use std::io::Write;
use std::path::Path;

/// Runs the compact command on the log store at `path`.
pub fn run(path: &Path, out: &mut dyn Write) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No replicant log found at {}", path.display()).into());
    }

    let store = LogStore::open(path)?;
    let bytes_before = store.size();
    let dead_rows = store.dead_rows();
    store.compact()?;
    let bytes_after = store.size();

    writeln!(out, "Compacted {}", path.display())?;
    writeln!(out, "  Dead rows removed: {dead_rows}")?;
    writeln!(out, "  Size before: {bytes_before} bytes")?;
    writeln!(out, "  Size after:  {bytes_after} bytes")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicant_storage::ReplicantStore;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn compact_shrinks_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replicants.log");
        {
            let store = LogStore::open(&path).unwrap();
            for i in 0..10 {
                store.save("game", "score", &json!(i)).unwrap();
            }
        }

        let mut out = Vec::new();
        run(&path, &mut out).unwrap();
        let report = String::from_utf8(out).unwrap();
        assert!(report.contains("Dead rows removed: 9"));

        let store = LogStore::open(&path).unwrap();
        assert_eq!(store.load("game", "score").unwrap(), Some(json!(9)));
        assert_eq!(store.dead_rows(), 0);
    }

    #[test]
    fn compact_requires_existing_log() {
        let dir = tempdir().unwrap();
        assert!(run(&dir.path().join("missing.log"), &mut Vec::new()).is_err());
    }
}
