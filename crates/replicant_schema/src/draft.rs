//! JSON Schema draft detection.

use crate::error::{SchemaError, SchemaResult};
use serde_json::Value;
use std::fmt;

/// A supported JSON Schema draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaDraft {
    /// draft-04
    Draft04,
    /// draft-07
    Draft07,
    /// 2019-09
    Draft2019,
    /// 2020-12
    Draft2020,
}

impl SchemaDraft {
    /// Draft assumed when a schema has no `$schema` keyword.
    pub const DEFAULT: SchemaDraft = SchemaDraft::Draft07;

    /// Detects the draft of a schema document from its `$schema` keyword.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnsupportedDraft`] for an unknown URI, and
    /// [`SchemaError::Invalid`] if `$schema` is present but not a string.
    pub fn detect(schema: &Value) -> SchemaResult<Self> {
        match schema.get("$schema") {
            None => Ok(Self::DEFAULT),
            Some(Value::String(uri)) => {
                Self::from_uri(uri).ok_or_else(|| SchemaError::UnsupportedDraft(uri.clone()))
            }
            Some(other) => Err(SchemaError::Invalid(format!(
                "$schema must be a string, got {other}"
            ))),
        }
    }

    /// Maps a `$schema` URI to a draft.
    ///
    /// The scheme (`http`/`https`) and a trailing `#` are ignored.
    pub fn from_uri(uri: &str) -> Option<Self> {
        let trimmed = uri.trim().trim_end_matches('#');
        let without_scheme = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);

        match without_scheme {
            "json-schema.org/draft-04/schema" => Some(Self::Draft04),
            "json-schema.org/draft-07/schema" => Some(Self::Draft07),
            "json-schema.org/draft/2019-09/schema" => Some(Self::Draft2019),
            "json-schema.org/draft/2020-12/schema" => Some(Self::Draft2020),
            _ => None,
        }
    }

    /// Returns the canonical `$schema` URI.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Draft04 => "http://json-schema.org/draft-04/schema#",
            Self::Draft07 => "http://json-schema.org/draft-07/schema#",
            Self::Draft2019 => "https://json-schema.org/draft/2019-09/schema",
            Self::Draft2020 => "https://json-schema.org/draft/2020-12/schema",
        }
    }
}

impl fmt::Display for SchemaDraft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft04 => "draft-04",
            Self::Draft07 => "draft-07",
            Self::Draft2019 => "2019-09",
            Self::Draft2020 => "2020-12",
        };
        f.write_str(name)
    }
}
