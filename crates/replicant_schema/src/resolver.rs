//! Mapping Replicants to schema files.

use crate::compiled::CompiledSchema;
use crate::error::{SchemaError, SchemaResult};
use serde_json::Value;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Locates the schema file for a Replicant.
pub trait SchemaResolver: Send + Sync {
    /// Returns the schema file for `(namespace, name)`.
    ///
    /// `schema_path` is the caller's explicit choice, if any. `Ok(None)` means
    /// the Replicant has no schema.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly requested file does not exist.
    fn resolve(
        &self,
        namespace: &str,
        name: &str,
        schema_path: Option<&str>,
    ) -> SchemaResult<Option<PathBuf>>;

    /// Resolves and compiles the schema for `(namespace, name)`.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution, reading or compilation fails.
    fn load(
        &self,
        namespace: &str,
        name: &str,
        schema_path: Option<&str>,
    ) -> SchemaResult<Option<CompiledSchema>> {
        match self.resolve(namespace, name, schema_path)? {
            Some(path) => load_schema_file(&path).map(Some),
            None => Ok(None),
        }
    }
}

/// Resolver for bundle-style directory layouts.
///
/// ```text
/// <root>/
///   <namespace>/
///     schemas/
///       <name>.json      # default schema for <namespace>/<name>
/// ```
///
/// An explicit relative `schema_path` is resolved against `<root>/<namespace>/`.
#[derive(Debug, Clone)]
pub struct BundleSchemaResolver {
    root: PathBuf,
}

impl BundleSchemaResolver {
    /// Creates a resolver over bundles under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the bundles root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns where the default schema for a Replicant would live.
    pub fn default_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.root
            .join(namespace)
            .join("schemas")
            .join(format!("{name}.json"))
    }
}

impl SchemaResolver for BundleSchemaResolver {
    fn resolve(
        &self,
        namespace: &str,
        name: &str,
        schema_path: Option<&str>,
    ) -> SchemaResult<Option<PathBuf>> {
        match schema_path {
            Some(explicit) => {
                let path = within(&self.root, namespace, explicit)
                    .ok_or_else(|| SchemaError::OutsideRoot(PathBuf::from(explicit)))?;
                if path.is_file() {
                    Ok(Some(path))
                } else {
                    Err(SchemaError::NotFound(path))
                }
            }
            None => {
                let path = self.default_path(namespace, name);
                if path.is_file() {
                    Ok(Some(path))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

/// Joins `relative` onto `<root>/<namespace>` lexically. Returns `None` for
/// absolute paths and for paths that climb out of the namespace directory.
fn within(root: &Path, namespace: &str, relative: &str) -> Option<PathBuf> {
    let mut parts: Vec<&OsStr> = Vec::new();
    let bundle = Path::new(namespace).components();
    for component in bundle.chain(Path::new(relative).components()) {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.first() != Some(&OsStr::new(namespace)) {
        return None;
    }
    Some(parts.iter().fold(root.to_path_buf(), |path, part| path.join(part)))
}

/// Resolver for deployments without schema files.
///
/// Every Replicant is schema-less unless its declaration carries an inline
/// schema; an explicit `schema_path` is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSchemas;

impl SchemaResolver for NoSchemas {
    fn resolve(
        &self,
        _namespace: &str,
        _name: &str,
        schema_path: Option<&str>,
    ) -> SchemaResult<Option<PathBuf>> {
        match schema_path {
            Some(path) => Err(SchemaError::NotFound(PathBuf::from(path))),
            None => Ok(None),
        }
    }
}

/// Reads and compiles a schema file.
///
/// # Errors
///
/// Returns an error if the file is missing, unreadable, not JSON, or not a
/// valid schema.
pub fn load_schema_file(path: &Path) -> SchemaResult<CompiledSchema> {
    let text = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            SchemaError::NotFound(path.to_path_buf())
        } else {
            SchemaError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let document: Value = serde_json::from_str(&text).map_err(|source| SchemaError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let schema = CompiledSchema::compile(&document)?;
    debug!(path = %path.display(), draft = %schema.draft(), "compiled schema");
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn write(path: &Path, value: &Value) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_vec(value).unwrap()).unwrap();
    }

    #[test]
    fn default_schema_location() {
        let dir = tempdir().unwrap();
        let resolver = BundleSchemaResolver::new(dir.path());
        let expected = dir.path().join("game").join("schemas").join("score.json");
        write(&expected, &json!({ "type": "integer" }));

        assert_eq!(resolver.resolve("game", "score", None).unwrap(), Some(expected));
    }

    #[test]
    fn missing_default_schema_means_no_schema() {
        let dir = tempdir().unwrap();
        let resolver = BundleSchemaResolver::new(dir.path());
        assert_eq!(resolver.resolve("game", "score", None).unwrap(), None);
        assert!(resolver.load("game", "score", None).unwrap().is_none());
    }

    #[test]
    fn explicit_path_is_relative_to_namespace() {
        let dir = tempdir().unwrap();
        let resolver = BundleSchemaResolver::new(dir.path());
        let file = dir.path().join("game").join("shared").join("team.json");
        write(&file, &json!({ "type": "string", "default": "red" }));

        let schema = resolver
            .load("game", "team", Some("shared/team.json"))
            .unwrap()
            .unwrap();
        assert_eq!(schema.default_value(), Some(json!("red")));
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let dir = tempdir().unwrap();
        let resolver = BundleSchemaResolver::new(dir.path());
        assert!(matches!(
            resolver.resolve("game", "team", Some("nope.json")),
            Err(SchemaError::NotFound(_))
        ));
    }

    #[test]
    fn explicit_path_cannot_leave_the_bundle() {
        let dir = tempdir().unwrap();
        let bundles = dir.path().join("bundles");
        let resolver = BundleSchemaResolver::new(&bundles);
        let secret = dir.path().join("secret.json");
        write(&secret, &json!({ "type": "string" }));
        write(&bundles.join("other").join("team.json"), &json!({ "type": "string" }));
        write(&bundles.join("game").join("team.json"), &json!({ "type": "string" }));

        let absolute = secret.to_string_lossy().into_owned();
        for escape in [absolute.as_str(), "../../secret.json", "../other/team.json", "a/../../x.json"] {
            assert!(
                matches!(
                    resolver.resolve("game", "team", Some(escape)),
                    Err(SchemaError::OutsideRoot(_))
                ),
                "{escape} was not refused"
            );
        }
        assert!(matches!(
            resolver.resolve("../bundles/game", "team", Some("team.json")),
            Err(SchemaError::OutsideRoot(_))
        ));

        assert_eq!(
            resolver.resolve("game", "team", Some("./x/../team.json")).unwrap(),
            Some(bundles.join("game").join("team.json"))
        );
    }

    #[test]
    fn malformed_schema_file_reports_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(matches!(load_schema_file(&path), Err(SchemaError::Parse { .. })));
    }

    #[test]
    fn no_schemas_resolver() {
        assert_eq!(NoSchemas.resolve("a", "b", None).unwrap(), None);
        assert!(NoSchemas.resolve("a", "b", Some("x.json")).is_err());
    }
}
