//! List command implementation.

use replicant_storage::ReplicantStore;
use serde::Serialize;
use std::io::Write;

/// One listed record.
#[derive(Debug, Serialize)]
pub struct Entry {
    /// Namespace.
    pub namespace: String,
    /// Name.
    pub name: String,
    /// Size of the stored value as compact JSON, in bytes.
    pub size: usize,
}

/// Runs the list command.
pub fn run(
    store: &dyn ReplicantStore,
    namespace: Option<&str>,
    format: &str,
    out: &mut dyn Write,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut entries = Vec::new();
    for (namespace, name) in store.list(namespace)? {
        let size = match store.load(&namespace, &name)? {
            Some(value) => serde_json::to_string(&value)?.len(),
            None => 0,
        };
        entries.push(Entry { namespace, name, size });
    }

    match format {
        "json" => writeln!(out, "{}", serde_json::to_string_pretty(&entries)?)?,
        _ => {
            if entries.is_empty() {
                writeln!(out, "No replicants stored")?;
            }
            for entry in &entries {
                writeln!(out, "{}:{}  ({} bytes)", entry.namespace, entry.name, entry.size)?;
            }
        }
    }
    Ok(())
}
