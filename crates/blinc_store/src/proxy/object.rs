//! Plain-object proxy

use super::{Handle, Reactive, Write};
use crate::error::Result;
use crate::value::{Key, Value};

/// Reactive view of a plain object
#[derive(Clone)]
pub struct ObjectProxy(pub(crate) Handle);

proxy_common!(ObjectProxy);

impl ObjectProxy {
    /// Read `key`, wrapping container values
    pub fn get(&self, key: &str) -> Reactive {
        let prop = Key::prop(key);
        self.0.track(&prop);
        let value = match &*self.0.target().borrow() {
            crate::value::RawData::Object(map) => map.get(key).cloned().unwrap_or_default(),
            _ => Value::Undefined,
        };
        self.0.wrap_child(prop, value)
    }

    /// Write `key`
    ///
    /// Notifies only when the value changed; adding a new key also notifies
    /// readers of the key set.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.0.ensure_writable(key)?;
        let value = value.into();
        let pre = self.0.pre_snapshot();

        let (old, existed) = {
            let Some(mut map) = self.0.target().object_mut() else {
                return Ok(());
            };
            match map.insert(key.to_string(), value.clone()) {
                Some(old) => (old, true),
                None => (Value::Undefined, false),
            }
        };

        self.0.commit(
            vec![Write {
                key: Key::prop(key),
                old,
                new: value,
            }],
            (!existed).then_some(Key::Entries),
            pre,
        );
        Ok(())
    }

    /// Delete `key`, returning the removed value
    pub fn remove(&self, key: &str) -> Result<Value> {
        self.0.ensure_writable(key)?;
        let pre = self.0.pre_snapshot();

        let removed = match self.0.target().object_mut() {
            Some(mut map) => map.shift_remove(key),
            None => None,
        };
        let Some(old) = removed else {
            return Ok(Value::Undefined);
        };

        self.0.commit(
            vec![Write {
                key: Key::prop(key),
                old: old.clone(),
                new: Value::Undefined,
            }],
            Some(Key::Entries),
            pre,
        );
        Ok(old)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.track(&Key::Entries);
        self.with_map(|map| map.contains_key(key))
    }

    /// Own keys in insertion order
    pub fn keys(&self) -> Vec<String> {
        self.0.track(&Key::Entries);
        self.with_map(|map| map.keys().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.0.track(&Key::Entries);
        self.with_map(|map| map.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_map<R: Default>(&self, f: impl FnOnce(&indexmap::IndexMap<String, Value>) -> R) -> R {
        match &*self.0.target().borrow() {
            crate::value::RawData::Object(map) => f(map),
            _ => R::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Change;
    use crate::error::StoreError;
    use crate::proxy::{create_proxy, noop_listener};
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    fn object(json: serde_json::Value) -> ObjectProxy {
        create_proxy(Value::from(json), noop_listener(), true)
            .as_object()
            .cloned()
            .unwrap()
    }

    fn count_changes(proxy: &ObjectProxy) -> Rc<Cell<usize>> {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        proxy.add_listener(move |_: &Change| counter.set(counter.get() + 1));
        calls
    }

    #[test]
    fn test_get_and_set() {
        let state = object(json!({"count": 1}));
        assert_eq!(state.get("count").as_f64(), Some(1.0));
        assert!(state.get("missing").is_undefined());

        state.set("count", 2).unwrap();
        assert_eq!(state.get("count").as_f64(), Some(2.0));
    }

    #[test]
    fn test_new_key_notifies_key_set() {
        let state = object(json!({}));
        let calls = count_changes(&state);

        let keys_changed = Rc::new(Cell::new(0));
        let counter = keys_changed.clone();
        let _watch = state.watch(Key::Entries, move |_, _, _, _| counter.set(counter.get() + 1));

        state.set("a", Value::Undefined).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(state.keys(), vec!["a".to_string()]);

        // Pseudo keys reach dependents and listeners, not watchers
        assert_eq!(keys_changed.get(), 0);
    }

    #[test]
    fn test_remove() {
        let state = object(json!({"a": 1, "b": 2}));
        let calls = count_changes(&state);

        assert_eq!(state.remove("a").unwrap(), Value::from(1));
        assert_eq!(calls.get(), 1);
        assert!(!state.contains_key("a"));
        assert_eq!(state.len(), 1);

        assert_eq!(state.remove("a").unwrap(), Value::Undefined);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_storing_a_proxy_stores_raw() {
        let state = object(json!({"a": {"x": 1}}));
        let a = state.get("a").as_object().cloned().unwrap();
        state.set("b", a.clone()).unwrap();
        assert!(state.get("b").as_object().unwrap().ptr_eq(&a));
    }

    #[test]
    fn test_read_only_remove() {
        let state = object(json!({"a": 1}));
        let view = state.read_only();
        assert_eq!(
            view.remove("a"),
            Err(StoreError::ReadOnly { key: "a".into() })
        );
        assert_eq!(view.get("a").as_f64(), Some(1.0));
    }
}
