//! Compiled schemas and validation.

use crate::defaults::{compute_default, declares_default};
use crate::draft::SchemaDraft;
use crate::error::{SchemaError, SchemaResult};
use serde_json::Value;
use std::fmt;

/// One schema violation found while validating a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON pointer to the offending part of the instance (empty for the root).
    pub pointer: String,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pointer.is_empty() {
            write!(f, "(root): {}", self.message)
        } else {
            write!(f, "{}: {}", self.pointer, self.message)
        }
    }
}

/// A schema compiled once and reused for every validation.
///
/// Compilation dispatches on the detected [`SchemaDraft`] to the
/// draft-specific validator; after that all drafts share the same
/// `validate` / `default_value` surface.
pub struct CompiledSchema {
    draft: SchemaDraft,
    document: Value,
    validator: jsonschema::Validator,
}

impl CompiledSchema {
    /// Compiles a schema document.
    ///
    /// # Errors
    ///
    /// Returns an error if the draft is unsupported or the document is not a
    /// valid schema for its draft.
    pub fn compile(document: &Value) -> SchemaResult<Self> {
        let draft = SchemaDraft::detect(document)?;
        let compiled = match draft {
            SchemaDraft::Draft04 => jsonschema::draft4::new(document),
            SchemaDraft::Draft07 => jsonschema::draft7::new(document),
            SchemaDraft::Draft2019 => jsonschema::draft201909::new(document),
            SchemaDraft::Draft2020 => jsonschema::draft202012::new(document),
        };
        let validator = compiled.map_err(|e| SchemaError::Invalid(e.to_string()))?;

        Ok(Self {
            draft,
            document: document.clone(),
            validator,
        })
    }

    /// Returns the draft this schema was compiled for.
    pub fn draft(&self) -> SchemaDraft {
        self.draft
    }

    /// Returns the source document.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Validates a value, collecting every violation.
    ///
    /// # Errors
    ///
    /// Returns the list of violations if the value does not satisfy the schema.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<Violation>> {
        let violations: Vec<Violation> = self
            .validator
            .iter_errors(value)
            .map(|error| Violation {
                pointer: error.instance_path.to_string(),
                message: error.to_string(),
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Returns true if the value satisfies the schema.
    pub fn is_valid(&self, value: &Value) -> bool {
        self.validator.is_valid(value)
    }

    /// Derives the default value described by the schema.
    pub fn default_value(&self) -> Option<Value> {
        compute_default(&self.document)
    }

    /// Returns true if the schema declares a `default` anywhere its default
    /// value is derived from, including nested properties and `$ref` targets.
    ///
    /// Zero values filled in for required properties do not count.
    pub fn has_explicit_default(&self) -> bool {
        declares_default(&self.document)
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("draft", &self.draft)
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn score_schema(draft: SchemaDraft) -> Value {
        json!({
            "$schema": draft.uri(),
            "type": "object",
            "properties": {
                "home": { "type": "integer", "minimum": 0 },
                "away": { "type": "integer", "minimum": 0 }
            },
            "required": ["home", "away"]
        })
    }

    #[test]
    fn compiles_every_draft() {
        for draft in [
            SchemaDraft::Draft04,
            SchemaDraft::Draft07,
            SchemaDraft::Draft2019,
            SchemaDraft::Draft2020,
        ] {
            let schema = CompiledSchema::compile(&score_schema(draft)).unwrap();
            assert_eq!(schema.draft(), draft);
            assert!(schema.is_valid(&json!({ "home": 1, "away": 2 })));
            assert!(!schema.is_valid(&json!({ "home": -1, "away": 2 })));
        }
    }

    #[test]
    fn violations_carry_pointers() {
        let schema = CompiledSchema::compile(&score_schema(SchemaDraft::Draft07)).unwrap();
        let violations = schema
            .validate(&json!({ "home": "one", "away": 2 }))
            .unwrap_err();

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].pointer, "/home");
        assert!(violations[0].to_string().starts_with("/home: "));
    }

    #[test]
    fn missing_required_reports_root() {
        let schema = CompiledSchema::compile(&score_schema(SchemaDraft::Draft07)).unwrap();
        let violations = schema.validate(&json!({ "home": 1 })).unwrap_err();

        assert_eq!(violations[0].pointer, "");
        assert!(violations[0].to_string().starts_with("(root): "));
    }

    #[test]
    fn invalid_schema_fails_to_compile() {
        let result = CompiledSchema::compile(&json!({ "type": 12 }));
        assert!(matches!(result, Err(SchemaError::Invalid(_))));
    }

    #[test]
    fn explicit_default_detection() {
        let with = CompiledSchema::compile(&json!({ "type": "string", "default": "x" })).unwrap();
        let without = CompiledSchema::compile(&json!({ "type": "string" })).unwrap();
        assert!(with.has_explicit_default());
        assert!(!without.has_explicit_default());
        assert_eq!(with.default_value(), Some(json!("x")));
        assert_eq!(without.default_value(), None);

        let nested = CompiledSchema::compile(&json!({
            "type": "object",
            "properties": { "home": { "type": "integer", "default": 0 } }
        }))
        .unwrap();
        assert!(nested.has_explicit_default());
    }
}
