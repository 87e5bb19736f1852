//! Operations: minimal descriptions of a change to a value.

use crate::error::PatchError;
use crate::value::present;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One step of a path into a JSON value.
///
/// Serialized as a bare JSON string (object key) or number (array index).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Array index.
    Index(usize),
    /// Object key.
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(index) => write!(f, "{index}"),
            PathSegment::Key(key) => f.write_str(&key.replace('~', "~0").replace('/', "~1")),
        }
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

/// Renders a path as a JSON pointer (`""` for the whole value).
pub fn pointer(path: &[PathSegment]) -> String {
    path.iter().map(|segment| format!("/{segment}")).collect()
}

/// A single change to a Replicant's value.
///
/// Operations produced for one mutation are ordered; applying them in
/// sequence to the prior value yields exactly the new value.
///
/// # Wire format
///
/// ```json
/// { "kind": "update", "path": ["players", 0, "score"], "oldValue": 1, "newValue": 2 }
/// { "kind": "splice", "path": ["log"], "index": 3, "removed": [], "inserted": ["hi"] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Operation {
    /// Creates a new object property or inserts an array element.
    Add {
        /// Location of the new value.
        path: Vec<PathSegment>,
        /// The value created.
        new_value: Value,
    },
    /// Replaces an existing value.
    ///
    /// With an empty path this replaces the whole value, and either side may
    /// be undefined.
    Update {
        /// Location of the replaced value.
        path: Vec<PathSegment>,
        /// The value before the change.
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
        old_value: Option<Value>,
        /// The value after the change.
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
        new_value: Option<Value>,
    },
    /// Removes an object property or array element.
    Delete {
        /// Location of the removed value.
        path: Vec<PathSegment>,
        /// The value removed.
        old_value: Value,
    },
    /// Replaces a run of array elements.
    Splice {
        /// Location of the array.
        path: Vec<PathSegment>,
        /// First affected index.
        index: usize,
        /// Elements removed, starting at `index`.
        removed: Vec<Value>,
        /// Elements inserted at `index`.
        inserted: Vec<Value>,
    },
}

impl Operation {
    /// Returns the operation's path.
    pub fn path(&self) -> &[PathSegment] {
        match self {
            Operation::Add { path, .. }
            | Operation::Update { path, .. }
            | Operation::Delete { path, .. }
            | Operation::Splice { path, .. } => path,
        }
    }

    /// Returns the wire name of the operation kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Add { .. } => "add",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
            Operation::Splice { .. } => "splice",
        }
    }

    /// Returns true if this operation replaces the whole value.
    pub fn is_whole_value(&self) -> bool {
        matches!(self, Operation::Update { path, .. } if path.is_empty())
    }

    fn apply(&self, root: &mut Option<Value>) -> Result<(), PatchError> {
        let kind = self.kind();

        if let Operation::Update { path, new_value, .. } = self {
            if path.is_empty() {
                root.clone_from(new_value);
                return Ok(());
            }
        }

        let root = root.as_mut().ok_or(PatchError::Undefined { kind })?;

        match self {
            Operation::Add { path, new_value } => {
                let (last, parent_path) = path.split_last().ok_or(PatchError::EmptyPath { kind })?;
                match (resolve_mut(root, parent_path)?, last) {
                    (Value::Object(map), PathSegment::Key(key)) => {
                        if map.contains_key(key) {
                            return Err(PatchError::AlreadyExists { path: pointer(path) });
                        }
                        map.insert(key.clone(), new_value.clone());
                    }
                    (Value::Array(items), PathSegment::Index(index)) => {
                        if *index > items.len() {
                            return Err(PatchError::OutOfBounds {
                                path: pointer(parent_path),
                                index: *index,
                                len: items.len(),
                            });
                        }
                        items.insert(*index, new_value.clone());
                    }
                    (_, segment) => return Err(mismatch(parent_path, segment)),
                }
            }
            Operation::Update { path, new_value, .. } => {
                let new_value = new_value
                    .as_ref()
                    .ok_or_else(|| PatchError::MissingValue { path: pointer(path) })?;
                *resolve_mut(root, path)? = new_value.clone();
            }
            Operation::Delete { path, .. } => {
                let (last, parent_path) = path.split_last().ok_or(PatchError::EmptyPath { kind })?;
                match (resolve_mut(root, parent_path)?, last) {
                    (Value::Object(map), PathSegment::Key(key)) => {
                        if map.remove(key).is_none() {
                            return Err(PatchError::NotFound { path: pointer(path) });
                        }
                    }
                    (Value::Array(items), PathSegment::Index(index)) => {
                        if *index >= items.len() {
                            return Err(PatchError::OutOfBounds {
                                path: pointer(parent_path),
                                index: *index,
                                len: items.len(),
                            });
                        }
                        items.remove(*index);
                    }
                    (_, segment) => return Err(mismatch(parent_path, segment)),
                }
            }
            Operation::Splice {
                path,
                index,
                removed,
                inserted,
            } => {
                let Value::Array(items) = resolve_mut(root, path)? else {
                    return Err(PatchError::TypeMismatch {
                        path: pointer(path),
                        expected: "array",
                    });
                };
                let len = items.len();
                let end = index
                    .checked_add(removed.len())
                    .filter(|end| *end <= len)
                    .ok_or_else(|| PatchError::OutOfBounds {
                        path: pointer(path),
                        index: *index,
                        len,
                    })?;
                items.splice(*index..end, inserted.iter().cloned());
            }
        }
        Ok(())
    }
}

fn mismatch(path: &[PathSegment], segment: &PathSegment) -> PatchError {
    PatchError::TypeMismatch {
        path: pointer(path),
        expected: match segment {
            PathSegment::Index(_) => "array",
            PathSegment::Key(_) => "object",
        },
    }
}

fn resolve_mut<'v>(root: &'v mut Value, path: &[PathSegment]) -> Result<&'v mut Value, PatchError> {
    let mut current = root;
    for (depth, segment) in path.iter().enumerate() {
        current = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map
                .get_mut(key)
                .ok_or_else(|| PatchError::NotFound {
                    path: pointer(&path[..=depth]),
                })?,
            (Value::Array(items), PathSegment::Index(index)) => {
                let len = items.len();
                items.get_mut(*index).ok_or_else(|| PatchError::OutOfBounds {
                    path: pointer(&path[..depth]),
                    index: *index,
                    len,
                })?
            }
            (_, segment) => return Err(mismatch(&path[..depth], segment)),
        };
    }
    Ok(current)
}

/// Applies operations in order.
///
/// Either every operation applies or `target` is left untouched.
///
/// # Errors
///
/// Returns the first [`PatchError`] encountered.
pub fn apply_operations(target: &mut Option<Value>, operations: &[Operation]) -> Result<(), PatchError> {
    let mut working = target.clone();
    for operation in operations {
        operation.apply(&mut working)?;
    }
    *target = working;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(segments: &[PathSegment]) -> Vec<PathSegment> {
        segments.to_vec()
    }

    #[test]
    fn whole_value_update_handles_undefined() {
        let mut value = None;
        let set = Operation::Update {
            path: vec![],
            old_value: None,
            new_value: Some(json!(5)),
        };
        apply_operations(&mut value, &[set]).unwrap();
        assert_eq!(value, Some(json!(5)));

        let clear = Operation::Update {
            path: vec![],
            old_value: Some(json!(5)),
            new_value: None,
        };
        apply_operations(&mut value, &[clear]).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn nested_add_update_delete() {
        let mut value = Some(json!({ "players": [{ "score": 1 }], "title": "x" }));
        let ops = vec![
            Operation::Update {
                path: path(&["players".into(), 0usize.into(), "score".into()]),
                old_value: Some(json!(1)),
                new_value: Some(json!(2)),
            },
            Operation::Delete {
                path: path(&["title".into()]),
                old_value: json!("x"),
            },
            Operation::Add {
                path: path(&["round".into()]),
                new_value: json!(3),
            },
        ];
        apply_operations(&mut value, &ops).unwrap();
        assert_eq!(value, Some(json!({ "players": [{ "score": 2 }], "round": 3 })));
    }

    #[test]
    fn splice_replaces_range() {
        let mut value = Some(json!([1, 2, 3, 4]));
        let op = Operation::Splice {
            path: vec![],
            index: 1,
            removed: vec![json!(2), json!(3)],
            inserted: vec![json!("a")],
        };
        apply_operations(&mut value, &[op]).unwrap();
        assert_eq!(value, Some(json!([1, "a", 4])));
    }

    #[test]
    fn failure_leaves_target_untouched() {
        let original = Some(json!({ "a": 1 }));
        let mut value = original.clone();
        let ops = vec![
            Operation::Add {
                path: path(&["b".into()]),
                new_value: json!(2),
            },
            Operation::Delete {
                path: path(&["missing".into()]),
                old_value: json!(0),
            },
        ];

        let err = apply_operations(&mut value, &ops).unwrap_err();
        assert_eq!(err, PatchError::NotFound { path: "/missing".into() });
        assert_eq!(value, original);
    }

    #[test]
    fn structural_errors() {
        let mut value = Some(json!({ "list": [1] }));

        let add_existing = Operation::Add {
            path: path(&["list".into()]),
            new_value: json!(0),
        };
        assert!(matches!(
            apply_operations(&mut value, &[add_existing]),
            Err(PatchError::AlreadyExists { .. })
        ));

        let index_into_object = Operation::Update {
            path: path(&[0usize.into()]),
            old_value: None,
            new_value: Some(json!(1)),
        };
        assert!(matches!(
            apply_operations(&mut value, &[index_into_object]),
            Err(PatchError::TypeMismatch { expected: "array", .. })
        ));

        let splice_past_end = Operation::Splice {
            path: path(&["list".into()]),
            index: 1,
            removed: vec![json!(9)],
            inserted: vec![],
        };
        assert!(matches!(
            apply_operations(&mut value, &[splice_past_end]),
            Err(PatchError::OutOfBounds { .. })
        ));

        for index in [usize::MAX, usize::MAX - 1, 2] {
            let overflowing = Operation::Splice {
                path: path(&["list".into()]),
                index,
                removed: vec![json!(1), json!(2)],
                inserted: vec![json!(3)],
            };
            assert_eq!(
                apply_operations(&mut value, &[overflowing]),
                Err(PatchError::OutOfBounds {
                    path: "/list".into(),
                    index,
                    len: 1,
                })
            );
        }
        assert_eq!(value, Some(json!({ "list": [1] })));

        let mut undefined = None;
        let delete = Operation::Delete {
            path: path(&["a".into()]),
            old_value: json!(1),
        };
        assert_eq!(
            apply_operations(&mut undefined, &[delete]),
            Err(PatchError::Undefined { kind: "delete" })
        );
    }

    #[test]
    fn wire_format() {
        let op = Operation::Update {
            path: path(&["a/b".into(), 2usize.into()]),
            old_value: None,
            new_value: Some(Value::Null),
        };
        let encoded = serde_json::to_value(&op).unwrap();
        assert_eq!(
            encoded,
            json!({ "kind": "update", "path": ["a/b", 2], "newValue": null })
        );

        let decoded: Operation = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, op);
        assert_eq!(pointer(op.path()), "/a~1b/2");
    }

    #[test]
    fn splice_wire_format() {
        let decoded: Operation = serde_json::from_value(json!({
            "kind": "splice",
            "path": ["log"],
            "index": 0,
            "removed": [],
            "inserted": ["x"]
        }))
        .unwrap();
        assert_eq!(decoded.kind(), "splice");
        assert!(!decoded.is_whole_value());
    }
}
