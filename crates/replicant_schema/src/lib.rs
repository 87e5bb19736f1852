//! # Replicant Schema
//!
//! JSON Schema support for Replicants.
//!
//! This crate provides:
//! - Draft detection from `$schema` ([`SchemaDraft`])
//! - Compiled, reusable validators with JSON-pointer violation reports
//!   ([`CompiledSchema`])
//! - Deterministic default derivation ([`compute_default`])
//! - Mapping of a Replicant to its schema file on disk ([`SchemaResolver`])
//!
//! Supported drafts are draft-04, draft-07, 2019-09 and 2020-12. A schema
//! without `$schema` is treated as draft-07.
//!
//! ## Example
//!
//! ```rust
//! use replicant_schema::CompiledSchema;
//! use serde_json::json;
//!
//! let schema = CompiledSchema::compile(&json!({
//!     "type": "object",
//!     "properties": { "score": { "type": "integer", "default": 0 } }
//! })).unwrap();
//!
//! assert_eq!(schema.default_value(), Some(json!({ "score": 0 })));
//! assert!(schema.validate(&json!({ "score": "ten" })).is_err());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compiled;
mod defaults;
mod draft;
mod error;
mod resolver;

pub use compiled::{CompiledSchema, Violation};
pub use defaults::compute_default;
pub use draft::SchemaDraft;
pub use error::{SchemaError, SchemaResult};
pub use resolver::{load_schema_file, BundleSchemaResolver, NoSchemas, SchemaResolver};
