//! Schema commands.

use replicant_schema::load_schema_file;
use serde_json::Value;
use std::io::Write;
use std::path::Path;

/// Validates `value` against the schema at `schema`, listing any violations.
///
/// Returns an error if the value does not conform.
pub fn validate(schema: &Path, value: &Value, out: &mut dyn Write) -> Result<(), Box<dyn std::error::Error>> {
    let compiled = load_schema_file(schema)?;
    match compiled.validate(value) {
        Ok(()) => {
            writeln!(out, "valid ({:?})", compiled.draft())?;
            Ok(())
        }
        Err(violations) => {
            for violation in &violations {
                writeln!(out, "{violation}")?;
            }
            Err(format!("{} violation(s)", violations.len()).into())
        }
    }
}

/// Prints the default value derived from the schema at `schema`.
pub fn default(schema: &Path, out: &mut dyn Write) -> Result<(), Box<dyn std::error::Error>> {
    let compiled = load_schema_file(schema)?;
    match compiled.default_value() {
        Some(value) => writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?,
        None => writeln!(out, "(undefined)")?,
    }
    Ok(())
}
