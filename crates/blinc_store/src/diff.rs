//! Change records
//!
//! A [`Mutation`] describes how a value changed; a [`Change`] adds where in the
//! graph it happened. Listeners receive a `Change` whose `parents` chain runs
//! from the mutated container up to the root and whose `path` spells the keys
//! from the root down.

use indexmap::IndexMap;
use serde::Serialize;
use smallvec::SmallVec;

use crate::value::{Container, Key, RawData, Value};

/// Object.is semantics: NaN equals NaN, `+0` differs from `-0`, containers
/// compare by identity.
pub fn is_same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if x.is_nan() && y.is_nan() {
                true
            } else {
                x == y && x.is_sign_negative() == y.is_sign_negative()
            }
        }
        _ => a == b,
    }
}

/// How a value changed
#[derive(Clone, Debug, Default, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    /// Nothing observable changed
    #[default]
    Unchanged,
    /// The value was replaced wholesale
    Replaced { from: Value, to: Value },
    /// Element-wise diff of two arrays
    Array {
        changed: bool,
        items: Vec<Mutation>,
        from: Value,
        to: Value,
    },
    /// Key-wise diff of two objects
    Object {
        changed: bool,
        attributes: IndexMap<String, Mutation>,
        from: Value,
        to: Value,
    },
}

impl Mutation {
    pub fn is_changed(&self) -> bool {
        match self {
            Mutation::Unchanged => false,
            Mutation::Replaced { .. } => true,
            Mutation::Array { changed, .. } | Mutation::Object { changed, .. } => *changed,
        }
    }

    /// Value before the change, when recorded
    pub fn from_value(&self) -> Option<&Value> {
        match self {
            Mutation::Unchanged => None,
            Mutation::Replaced { from, .. }
            | Mutation::Array { from, .. }
            | Mutation::Object { from, .. } => Some(from),
        }
    }

    /// Value after the change, when recorded
    pub fn to_value(&self) -> Option<&Value> {
        match self {
            Mutation::Unchanged => None,
            Mutation::Replaced { to, .. }
            | Mutation::Array { to, .. }
            | Mutation::Object { to, .. } => Some(to),
        }
    }
}

/// Structural diff of `from` against `to`
pub fn resolve_mutation(from: &Value, to: &Value) -> Mutation {
    let (Value::Ref(a), Value::Ref(b)) = (from, to) else {
        return replaced_unless_same(from, to);
    };
    if a.ptr_eq(b) {
        return Mutation::Unchanged;
    }

    match (&*a.borrow(), &*b.borrow()) {
        (RawData::Array(old), RawData::Array(new)) => {
            let len = old.len().max(new.len());
            let items: Vec<Mutation> = (0..len)
                .map(|i| {
                    resolve_mutation(
                        old.get(i).unwrap_or(&Value::Undefined),
                        new.get(i).unwrap_or(&Value::Undefined),
                    )
                })
                .collect();
            let changed = old.len() != new.len() || items.iter().any(Mutation::is_changed);
            Mutation::Array {
                changed,
                items,
                from: from.clone(),
                to: to.clone(),
            }
        }
        (RawData::Object(old), RawData::Object(new)) => {
            let mut attributes = IndexMap::new();
            for key in old.keys().chain(new.keys()) {
                if attributes.contains_key(key) {
                    continue;
                }
                let mutation = resolve_mutation(
                    old.get(key).unwrap_or(&Value::Undefined),
                    new.get(key).unwrap_or(&Value::Undefined),
                );
                attributes.insert(key.clone(), mutation);
            }
            let changed = attributes.values().any(Mutation::is_changed);
            Mutation::Object {
                changed,
                attributes,
                from: from.clone(),
                to: to.clone(),
            }
        }
        _ => replaced_unless_same(from, to),
    }
}

fn replaced_unless_same(from: &Value, to: &Value) -> Mutation {
    if is_same(from, to) {
        Mutation::Unchanged
    } else {
        Mutation::Replaced {
            from: from.clone(),
            to: to.clone(),
        }
    }
}

/// A change as seen by a listener
#[derive(Clone, Debug, Default)]
pub struct Change {
    /// What changed, relative to the container the listener is attached to
    pub mutation: Mutation,
    /// Containers from the mutated one up to the listener's own
    pub parents: Vec<Container>,
    path: SmallVec<[Key; 4]>,
}

impl Change {
    pub fn new(mutation: Mutation) -> Self {
        Self {
            mutation,
            parents: Vec::new(),
            path: SmallVec::new(),
        }
    }

    /// Keys from the listener's container down to the mutated one
    pub fn path(&self) -> &[Key] {
        &self.path
    }

    /// Key of the outermost step, if the change came from a child
    pub fn key(&self) -> Option<&Key> {
        self.path.first()
    }

    /// Container the listener is attached to
    pub fn root(&self) -> Option<&Container> {
        self.parents.last()
    }

    pub(crate) fn push_parent(&mut self, container: Container) {
        self.parents.push(container);
    }

    pub(crate) fn prepend_key(&mut self, key: Key) {
        self.path.insert(0, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_same_edge_cases() {
        assert!(is_same(&Value::Number(f64::NAN), &Value::Number(f64::NAN)));
        assert!(!is_same(&Value::Number(0.0), &Value::Number(-0.0)));
        assert!(is_same(&Value::from("a"), &Value::from("a")));
        assert!(!is_same(&Value::Undefined, &Value::Null));
    }

    #[test]
    fn test_primitive_mutation() {
        assert!(!resolve_mutation(&Value::from(1), &Value::from(1)).is_changed());
        let mutation = resolve_mutation(&Value::from(1), &Value::from(2));
        assert!(mutation.is_changed());
        assert_eq!(mutation.from_value(), Some(&Value::from(1)));
        assert_eq!(mutation.to_value(), Some(&Value::from(2)));
    }

    #[test]
    fn test_object_mutation_by_attribute() {
        let from = Value::from(json!({"a": 1, "b": {"c": 1}}));
        let to = Value::from(json!({"a": 1, "b": {"c": 2}, "d": true}));
        let Mutation::Object {
            changed,
            attributes,
            ..
        } = resolve_mutation(&from, &to)
        else {
            panic!("expected object mutation");
        };
        assert!(changed);
        assert!(!attributes["a"].is_changed());
        assert!(attributes["b"].is_changed());
        assert!(attributes["d"].is_changed());
    }

    #[test]
    fn test_equal_structures_are_unchanged() {
        let from = Value::from(json!({"list": [1, 2, {"x": null}]}));
        let to = Value::from(json!({"list": [1, 2, {"x": null}]}));
        assert!(!resolve_mutation(&from, &to).is_changed());
    }

    #[test]
    fn test_array_length_change() {
        let from = Value::from(json!([1, 2]));
        let to = Value::from(json!([1, 2, 3]));
        let Mutation::Array { changed, items, .. } = resolve_mutation(&from, &to) else {
            panic!("expected array mutation");
        };
        assert!(changed);
        assert_eq!(items.len(), 3);
        assert!(items[2].is_changed());
    }

    #[test]
    fn test_mutation_serializes_with_kind_tag() {
        let mutation = resolve_mutation(&Value::from(1), &Value::from(2));
        let json = serde_json::to_value(&mutation).unwrap();
        assert_eq!(json, json!({"kind": "replaced", "from": 1, "to": 2}));
    }

    #[test]
    fn test_change_path_prepends() {
        let mut change = Change::new(Mutation::Unchanged);
        change.prepend_key(Key::prop("c"));
        change.prepend_key(Key::prop("b"));
        assert_eq!(change.path(), &[Key::prop("b"), Key::prop("c")]);
        assert_eq!(change.key(), Some(&Key::prop("b")));
    }
}
