//! Computing the operations that turn one value into another.

use crate::operation::{Operation, PathSegment};
use serde_json::{Map, Value};

/// Computes the ordered operations that transform `old` into `new`.
///
/// - objects recurse per key: deletes, then updates, then adds, each in key
///   order
/// - arrays trim their common prefix and suffix; a middle section of equal
///   length is compared element by element, otherwise it becomes one splice
/// - anything else that differs is an `update`
///
/// Equal values produce no operations. A change to or from an undefined
/// value is a whole-value `update`.
pub fn diff(old: Option<&Value>, new: Option<&Value>) -> Vec<Operation> {
    let mut ops = Vec::new();
    match (old, new) {
        (None, None) => {}
        (Some(old), Some(new)) => diff_at(&mut Vec::new(), old, new, &mut ops),
        (old, new) => ops.push(Operation::Update {
            path: Vec::new(),
            old_value: old.cloned(),
            new_value: new.cloned(),
        }),
    }
    ops
}

fn diff_at(path: &mut Vec<PathSegment>, old: &Value, new: &Value, ops: &mut Vec<Operation>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => diff_objects(path, old, new, ops),
        (Value::Array(old), Value::Array(new)) => diff_arrays(path, old, new, ops),
        _ => ops.push(Operation::Update {
            path: path.clone(),
            old_value: Some(old.clone()),
            new_value: Some(new.clone()),
        }),
    }
}

fn diff_objects(
    path: &mut Vec<PathSegment>,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    ops: &mut Vec<Operation>,
) {
    let mut old_keys: Vec<&String> = old.keys().collect();
    let mut new_keys: Vec<&String> = new.keys().collect();
    old_keys.sort();
    new_keys.sort();

    for key in old_keys.iter().filter(|k| !new.contains_key(k.as_str())) {
        ops.push(Operation::Delete {
            path: child(path, PathSegment::Key((*key).clone())),
            old_value: old[key.as_str()].clone(),
        });
    }

    for key in &old_keys {
        if let Some(new_value) = new.get(key.as_str()) {
            path.push(PathSegment::Key((*key).clone()));
            diff_at(path, &old[key.as_str()], new_value, ops);
            path.pop();
        }
    }

    for key in new_keys.iter().filter(|k| !old.contains_key(k.as_str())) {
        ops.push(Operation::Add {
            path: child(path, PathSegment::Key((*key).clone())),
            new_value: new[key.as_str()].clone(),
        });
    }
}

fn diff_arrays(path: &mut Vec<PathSegment>, old: &[Value], new: &[Value], ops: &mut Vec<Operation>) {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let old_middle = &old[prefix..old.len() - suffix];
    let new_middle = &new[prefix..new.len() - suffix];

    if old_middle.len() == new_middle.len() {
        for (offset, (a, b)) in old_middle.iter().zip(new_middle).enumerate() {
            path.push(PathSegment::Index(prefix + offset));
            diff_at(path, a, b, ops);
            path.pop();
        }
    } else {
        ops.push(Operation::Splice {
            path: path.clone(),
            index: prefix,
            removed: old_middle.to_vec(),
            inserted: new_middle.to_vec(),
        });
    }
}

fn child(path: &[PathSegment], segment: PathSegment) -> Vec<PathSegment> {
    let mut child = path.to_vec();
    child.push(segment);
    child
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::apply_operations;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn equal_values_produce_nothing() {
        let value = json!({ "a": [1, 2, { "b": null }] });
        assert!(diff(Some(&value), Some(&value)).is_empty());
        assert!(diff(None, None).is_empty());
    }

    #[test]
    fn scalar_change_is_root_update() {
        let ops = diff(Some(&json!(0)), Some(&json!(5)));
        assert_eq!(
            ops,
            vec![Operation::Update {
                path: vec![],
                old_value: Some(json!(0)),
                new_value: Some(json!(5)),
            }]
        );
    }

    #[test]
    fn undefined_transitions_are_root_updates() {
        let ops = diff(None, Some(&json!("x")));
        assert!(ops[0].is_whole_value());
        let ops = diff(Some(&json!("x")), None);
        assert_eq!(
            ops,
            vec![Operation::Update {
                path: vec![],
                old_value: Some(json!("x")),
                new_value: None,
            }]
        );
    }

    #[test]
    fn object_ops_are_ordered() {
        let old = json!({ "b": 1, "c": 1, "z": 1 });
        let new = json!({ "a": 1, "c": 2, "y": 1 });
        let kinds: Vec<_> = diff(Some(&old), Some(&new))
            .iter()
            .map(|op| (op.kind(), crate::operation::pointer(op.path())))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("delete", "/b".to_string()),
                ("delete", "/z".to_string()),
                ("update", "/c".to_string()),
                ("add", "/a".to_string()),
                ("add", "/y".to_string()),
            ]
        );
    }

    #[test]
    fn array_push_is_one_splice() {
        let ops = diff(Some(&json!([1, 2])), Some(&json!([1, 2, 3])));
        assert_eq!(
            ops,
            vec![Operation::Splice {
                path: vec![],
                index: 2,
                removed: vec![],
                inserted: vec![json!(3)],
            }]
        );
    }

    #[test]
    fn same_length_arrays_recurse() {
        let ops = diff(
            Some(&json!([{ "hp": 1 }, { "hp": 2 }])),
            Some(&json!([{ "hp": 1 }, { "hp": 3 }])),
        );
        assert_eq!(ops.len(), 1);
        assert_eq!(
            ops[0].path(),
            &[PathSegment::Index(1), PathSegment::Key("hp".into())]
        );
    }

    #[test]
    fn overlapping_prefix_and_suffix() {
        let old = json!([1, 1]);
        let new = json!([1, 1, 1]);
        let mut value = Some(old.clone());
        apply_operations(&mut value, &diff(Some(&old), Some(&new))).unwrap();
        assert_eq!(value, Some(new));
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (-50i64..50).prop_map(Value::from),
            "[a-c]{0,2}".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
                prop::collection::btree_map("[a-e]", inner, 0..5)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn arb_replicant_value() -> impl Strategy<Value = Option<Value>> {
        prop_oneof![1 => Just(None), 6 => arb_json().prop_map(Some)]
    }

    proptest! {
        #[test]
        fn diff_then_apply_round_trips(old in arb_replicant_value(), new in arb_replicant_value()) {
            let ops = diff(old.as_ref(), new.as_ref());
            let mut replayed = old.clone();
            apply_operations(&mut replayed, &ops).unwrap();

            prop_assert_eq!(&replayed, &new);
            prop_assert_eq!(
                serde_json::to_string(&replayed).unwrap(),
                serde_json::to_string(&new).unwrap()
            );
        }

        #[test]
        fn operations_survive_the_wire(old in arb_json(), new in arb_json()) {
            let ops = diff(Some(&old), Some(&new));
            let text = serde_json::to_string(&ops).unwrap();
            let decoded: Vec<Operation> = serde_json::from_str(&text).unwrap();

            let mut replayed = Some(old);
            apply_operations(&mut replayed, &decoded).unwrap();
            prop_assert_eq!(replayed, Some(new));
        }

        #[test]
        fn replaying_a_mutation_log(values in prop::collection::vec(arb_json(), 1..6)) {
            let mut current: Option<Value> = None;
            let mut log = Vec::new();
            for value in &values {
                let next = Some(value.clone());
                log.push(diff(current.as_ref(), next.as_ref()));
                current = next;
            }

            let mut replayed = None;
            for ops in &log {
                apply_operations(&mut replayed, ops).unwrap();
            }
            prop_assert_eq!(replayed, current);
        }
    }
}
