//! Get, set and remove commands.

use replicant_schema::load_schema_file;
use replicant_storage::ReplicantStore;
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Prints the stored value for a key.
pub fn get(
    store: &dyn ReplicantStore,
    namespace: &str,
    name: &str,
    out: &mut dyn Write,
) -> Result<(), Box<dyn std::error::Error>> {
    let value = store
        .load(namespace, name)?
        .ok_or_else(|| format!("{namespace}:{name} is not stored"))?;
    writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
    Ok(())
}

/// Stores a value, checking it against `schema` first when given.
pub fn set(
    store: &dyn ReplicantStore,
    namespace: &str,
    name: &str,
    value: &Value,
    schema: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = schema {
        let schema = load_schema_file(path)?;
        if let Err(violations) = schema.validate(value) {
            let details: Vec<String> = violations.iter().map(ToString::to_string).collect();
            return Err(format!("value rejected by schema: {}", details.join("; ")).into());
        }
    }

    store.save(namespace, name, value)?;
    info!(namespace, name, "stored value");
    Ok(())
}

/// Removes the stored value for a key.
pub fn remove(
    store: &dyn ReplicantStore,
    namespace: &str,
    name: &str,
    out: &mut dyn Write,
) -> Result<(), Box<dyn std::error::Error>> {
    if store.remove(namespace, name)? {
        writeln!(out, "Removed {namespace}:{name}")?;
    } else {
        writeln!(out, "{namespace}:{name} was not stored")?;
    }
    Ok(())
}
