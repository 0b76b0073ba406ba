//! Keyed-collection proxy (map, set, weak map, weak set)
//!
//! Reads depend on `Entry(key)` for a single key and on `Entries` for size and
//! iteration. Writes notify the entry key plus `Entries` when membership
//! changed. Weak kinds accept only container keys, drop entries whose key has
//! been released, and cannot be sized or iterated.

use super::{Handle, Reactive, Write};
use crate::error::{Result, StoreError};
use crate::value::{CollectionKind, EntryKey, Key, RawData, Shape, Value};

/// Reactive view of a map, set, weak map or weak set
#[derive(Clone)]
pub struct CollectionProxy(pub(crate) Handle);

proxy_common!(CollectionProxy);

impl CollectionProxy {
    pub fn kind(&self) -> CollectionKind {
        match self.0.target().shape() {
            Shape::Collection(kind) => kind,
            // Collection proxies are only built for collection shapes
            _ => CollectionKind::Map,
        }
    }

    fn unsupported(&self, op: &'static str) -> StoreError {
        StoreError::Unsupported {
            op,
            shape: self.kind().name().to_string(),
        }
    }

    /// Entry key for `key`, or `None` if a weak collection cannot hold it
    fn entry_key(&self, key: &Value) -> Option<EntryKey> {
        if self.kind().is_weak() && !key.is_container() {
            return None;
        }
        Some(EntryKey::of(key))
    }

    fn prune(&self) {
        let mut data = self.0.target().borrow_mut();
        match &mut *data {
            RawData::WeakMap(entries) => entries.retain(|_, (key, _)| key.is_alive()),
            RawData::WeakSet(members) => members.retain(|_, member| member.is_alive()),
            _ => {}
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Whether `key` (or member) is present
    pub fn has(&self, key: impl Into<Value>) -> bool {
        let key = key.into();
        let Some(entry) = self.entry_key(&key) else {
            return false;
        };
        self.0.track(&Key::Entry(entry.clone()));
        self.prune();
        self.lookup(&entry).is_some()
    }

    /// Value stored under `key` (maps only)
    pub fn get(&self, key: impl Into<Value>) -> Result<Reactive> {
        if !self.kind().is_keyed() {
            return Err(self.unsupported("get"));
        }
        let key = key.into();
        let Some(entry) = self.entry_key(&key) else {
            return Ok(Reactive::Value(Value::Undefined));
        };
        self.0.track(&Key::Entry(entry.clone()));
        self.prune();
        let value = self.lookup(&entry).unwrap_or_default();
        Ok(self.0.wrap_child(Key::Entry(entry), value))
    }

    pub fn size(&self) -> Result<usize> {
        if self.kind().is_weak() {
            return Err(self.unsupported("size"));
        }
        self.0.track(&Key::Entries);
        Ok(match &*self.0.target().borrow() {
            RawData::Map(entries) => entries.len(),
            RawData::Set(members) => members.len(),
            _ => 0,
        })
    }

    /// Keys of a map, or members of a set, unwrapped
    pub fn keys(&self) -> Result<Vec<Value>> {
        if self.kind().is_weak() {
            return Err(self.unsupported("keys"));
        }
        self.0.track(&Key::Entries);
        Ok(match &*self.0.target().borrow() {
            RawData::Map(entries) => entries.values().map(|(key, _)| key.clone()).collect(),
            RawData::Set(members) => members.values().cloned().collect(),
            _ => Vec::new(),
        })
    }

    /// Values of a map, or members of a set, wrapped
    pub fn values(&self) -> Result<Vec<Reactive>> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// `(key, value)` pairs; sets pair each member with itself
    pub fn entries(&self) -> Result<Vec<(Value, Reactive)>> {
        if self.kind().is_weak() {
            return Err(self.unsupported("entries"));
        }
        self.0.track(&Key::Entries);
        let pairs: Vec<(EntryKey, Value, Value)> = match &*self.0.target().borrow() {
            RawData::Map(entries) => entries
                .iter()
                .map(|(entry, (key, value))| (entry.clone(), key.clone(), value.clone()))
                .collect(),
            RawData::Set(members) => members
                .iter()
                .map(|(entry, member)| (entry.clone(), member.clone(), member.clone()))
                .collect(),
            _ => Vec::new(),
        };
        Ok(pairs
            .into_iter()
            .map(|(entry, key, value)| (key, self.0.wrap_child(Key::Entry(entry), value)))
            .collect())
    }

    fn lookup(&self, entry: &EntryKey) -> Option<Value> {
        match (&*self.0.target().borrow(), entry) {
            (RawData::Map(entries), _) => entries.get(entry).map(|(_, value)| value.clone()),
            (RawData::Set(members), _) => members.get(entry).cloned(),
            (RawData::WeakMap(entries), EntryKey::Ref(id)) => {
                entries.get(id).map(|(_, value)| value.clone())
            }
            (RawData::WeakSet(members), EntryKey::Ref(id)) => {
                members.get(id).and_then(|member| member.upgrade()).map(Value::Ref)
            }
            _ => None,
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store `value` under `key` (maps only)
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        if !self.kind().is_keyed() {
            return Err(self.unsupported("set"));
        }
        let key = key.into();
        let value = value.into();
        self.0.ensure_writable(&Key::entry(&key))?;
        let entry = self
            .entry_key(&key)
            .ok_or(StoreError::InvalidWeakKey("weak map keys must be containers"))?;
        self.prune();
        let pre = self.0.pre_snapshot();

        let previous = {
            let mut data = self.0.target().borrow_mut();
            match (&mut *data, &entry) {
                (RawData::Map(entries), _) => entries
                    .insert(entry.clone(), (key.clone(), value.clone()))
                    .map(|(_, old)| old),
                (RawData::WeakMap(entries), EntryKey::Ref(id)) => {
                    let weak = match key.as_container() {
                        Some(container) => container.downgrade(),
                        None => return Err(StoreError::InvalidWeakKey("weak map keys must be containers")),
                    };
                    entries.insert(*id, (weak, value.clone())).map(|(_, old)| old)
                }
                _ => return Err(self.unsupported("set")),
            }
        };

        let added = previous.is_none();
        self.0.commit(
            vec![Write {
                key: Key::Entry(entry),
                old: previous.unwrap_or_default(),
                new: value,
            }],
            added.then_some(Key::Entries),
            pre,
        );
        Ok(())
    }

    /// Add `member` (sets only); adding a present member is silent
    pub fn add(&self, member: impl Into<Value>) -> Result<()> {
        if self.kind().is_keyed() {
            return Err(self.unsupported("add"));
        }
        let member = member.into();
        self.0.ensure_writable(&Key::entry(&member))?;
        let entry = self
            .entry_key(&member)
            .ok_or(StoreError::InvalidWeakKey("weak set members must be containers"))?;
        self.prune();
        let pre = self.0.pre_snapshot();

        let added = {
            let mut data = self.0.target().borrow_mut();
            match (&mut *data, &entry) {
                (RawData::Set(members), _) => {
                    if members.contains_key(&entry) {
                        false
                    } else {
                        members.insert(entry.clone(), member.clone());
                        true
                    }
                }
                (RawData::WeakSet(members), EntryKey::Ref(id)) => {
                    let weak = match member.as_container() {
                        Some(container) => container.downgrade(),
                        None => return Err(StoreError::InvalidWeakKey("weak set members must be containers")),
                    };
                    if members.contains_key(id) {
                        false
                    } else {
                        members.insert(*id, weak);
                        true
                    }
                }
                _ => return Err(self.unsupported("add")),
            }
        };
        if !added {
            return Ok(());
        }

        self.0.commit(
            vec![Write {
                key: Key::Entry(entry),
                old: Value::Undefined,
                new: member,
            }],
            Some(Key::Entries),
            pre,
        );
        Ok(())
    }

    /// Remove `key` (or member); returns whether anything was removed
    pub fn delete(&self, key: impl Into<Value>) -> Result<bool> {
        let key = key.into();
        self.0.ensure_writable(&Key::entry(&key))?;
        let Some(entry) = self.entry_key(&key) else {
            return Ok(false);
        };
        self.prune();
        let pre = self.0.pre_snapshot();

        let removed = {
            let mut data = self.0.target().borrow_mut();
            match (&mut *data, &entry) {
                (RawData::Map(entries), _) => entries.shift_remove(&entry).map(|(_, old)| old),
                (RawData::Set(members), _) => members.shift_remove(&entry),
                (RawData::WeakMap(entries), EntryKey::Ref(id)) => {
                    entries.remove(id).map(|(_, old)| old)
                }
                (RawData::WeakSet(members), EntryKey::Ref(id)) => members
                    .remove(id)
                    .map(|_| key.clone()),
                _ => None,
            }
        };
        let Some(old) = removed else {
            return Ok(false);
        };

        self.0.commit(
            vec![Write {
                key: Key::Entry(entry),
                old,
                new: Value::Undefined,
            }],
            Some(Key::Entries),
            pre,
        );
        Ok(true)
    }

    /// Remove every entry, notifying all dependents
    pub fn clear(&self) -> Result<()> {
        if self.kind().is_weak() {
            return Err(self.unsupported("clear"));
        }
        self.0.ensure_writable("clear")?;

        let writes: Vec<Write> = {
            let mut data = self.0.target().borrow_mut();
            match &mut *data {
                RawData::Map(entries) => entries
                    .drain(..)
                    .map(|(entry, (_, old))| Write {
                        key: Key::Entry(entry),
                        old,
                        new: Value::Undefined,
                    })
                    .collect(),
                RawData::Set(members) => members
                    .drain(..)
                    .map(|(entry, old)| Write {
                        key: Key::Entry(entry),
                        old,
                        new: Value::Undefined,
                    })
                    .collect(),
                _ => Vec::new(),
            }
        };
        if writes.is_empty() {
            return Ok(());
        }

        self.0.commit_all(writes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Change;
    use crate::proxy::{create_proxy, noop_listener, ObjectProxy};
    use crate::value::Container;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    fn collection(container: Container) -> CollectionProxy {
        create_proxy(container, noop_listener(), true)
            .as_collection()
            .cloned()
            .unwrap()
    }

    fn count_changes(proxy: &CollectionProxy) -> Rc<Cell<usize>> {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        proxy.add_listener(move |_: &Change| counter.set(counter.get() + 1));
        calls
    }

    #[test]
    fn test_set_membership() {
        let state = create_proxy(Value::from(json!({})), noop_listener(), true)
            .as_object()
            .cloned()
            .unwrap();
        state.set("set", Container::set(Vec::new())).unwrap();
        let set = state.get("set").as_collection().cloned().unwrap();
        let calls = count_changes(&set);

        set.add("x").unwrap();
        assert!(set.has("x"));
        assert_eq!(calls.get(), 1);

        set.delete("x").unwrap();
        set.add("x").unwrap();
        set.add("x").unwrap();
        set.add("x").unwrap();
        assert_eq!(calls.get(), 3);
        assert_eq!(set.size().unwrap(), 1);
    }

    #[test]
    fn test_set_changes_bubble_to_root() {
        let root: ObjectProxy = create_proxy(Value::from(json!({})), noop_listener(), true)
            .as_object()
            .cloned()
            .unwrap();
        root.set("tags", Container::set(Vec::new())).unwrap();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        root.add_listener(move |change: &Change| {
            assert_eq!(change.key(), Some(&Key::prop("tags")));
            counter.set(counter.get() + 1);
        });

        let tags = root.get("tags");
        let tags = tags.as_collection().unwrap();
        tags.add("a").unwrap();
        tags.delete("a").unwrap();
        tags.add("a").unwrap();
        tags.add("a").unwrap();
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_map_operations() {
        let map = collection(Container::map(Vec::new()));
        let calls = count_changes(&map);

        map.set("a", 1).unwrap();
        map.set("a", 1).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(map.get("a").unwrap().as_f64(), Some(1.0));
        assert_eq!(map.keys().unwrap(), vec![Value::from("a")]);

        map.set("b", json!({"n": 1})).unwrap();
        let b = map.get("b").unwrap();
        b.as_object().unwrap().set("n", 2).unwrap();
        assert_eq!(calls.get(), 3);

        assert!(map.delete("a").unwrap());
        assert!(!map.delete("a").unwrap());
        assert_eq!(map.size().unwrap(), 1);
        assert_eq!(map.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_nan_keys_are_equal() {
        let map = collection(Container::map(Vec::new()));
        map.set(f64::NAN, "nan").unwrap();
        assert_eq!(map.get(f64::NAN).unwrap().as_str(), Some("nan"));
        map.set(-0.0, "zero").unwrap();
        assert_eq!(map.get(0.0).unwrap().as_str(), Some("zero"));
    }

    #[test]
    fn test_clear_notifies_all_dependents() {
        let map = collection(Container::map([
            (Value::from("a"), Value::from(1)),
            (Value::from("b"), Value::from(2)),
        ]));
        let calls = count_changes(&map);

        let cleared = Rc::new(Cell::new(0));
        let counter = cleared.clone();
        let _watch = map.watch(Key::entry(&Value::from("a")), move |_, _, new, _| {
            assert!(new.is_undefined());
            counter.set(counter.get() + 1);
        });

        map.clear().unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(cleared.get(), 1);
        assert_eq!(map.size().unwrap(), 0);

        map.clear().unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_unsupported_operations() {
        let set = collection(Container::set(Vec::new()));
        assert!(matches!(set.set("a", 1), Err(StoreError::Unsupported { op: "set", .. })));
        assert!(matches!(set.get("a"), Err(StoreError::Unsupported { op: "get", .. })));

        let weak = collection(Container::weak_map());
        assert!(matches!(weak.size(), Err(StoreError::Unsupported { .. })));
        assert!(matches!(weak.keys(), Err(StoreError::Unsupported { .. })));
        assert!(matches!(weak.set("a", 1), Err(StoreError::InvalidWeakKey(_))));
    }

    #[test]
    fn test_weak_map_drops_released_keys() {
        let weak = collection(Container::weak_map());
        let key = Container::object(Vec::<(String, Value)>::new());
        weak.set(key.clone(), 1).unwrap();
        assert!(weak.has(key.clone()));
        assert_eq!(weak.get(key.clone()).unwrap().as_f64(), Some(1.0));
        assert!(!weak.has("primitive"));

        drop(key);
        // Any keyed access prunes entries whose key is gone
        assert!(!weak.has(Container::array(Vec::new())));
        assert!(matches!(
            &*weak.raw().borrow(),
            RawData::WeakMap(entries) if entries.is_empty()
        ));
    }

    #[test]
    fn test_weak_set_membership() {
        let weak = collection(Container::weak_set());
        let member = Container::array(Vec::new());
        weak.add(member.clone()).unwrap();
        weak.add(member.clone()).unwrap();
        assert!(weak.has(member.clone()));
        assert!(weak.delete(member.clone()).unwrap());
        assert!(!weak.has(member));
    }

    #[test]
    fn test_read_only_collections_reject_writes() {
        let map = collection(Container::map([(Value::from("a"), Value::from(1))]));
        let view = map.read_only();
        assert!(view.is_read_only());
        assert!(matches!(view.set("b", 2), Err(StoreError::ReadOnly { .. })));
        assert!(matches!(view.delete("a"), Err(StoreError::ReadOnly { .. })));
        assert!(matches!(view.clear(), Err(StoreError::ReadOnly { .. })));
        assert_eq!(view.get("a").unwrap().as_f64(), Some(1.0));
        assert_eq!(map.size().unwrap(), 1);

        let set = collection(Container::set([Value::from("x")]));
        let view = set.read_only();
        assert!(matches!(view.add("y"), Err(StoreError::ReadOnly { .. })));
        assert!(matches!(view.delete("x"), Err(StoreError::ReadOnly { .. })));
        assert!(matches!(view.clear(), Err(StoreError::ReadOnly { .. })));
        assert!(view.has("x"));
        assert_eq!(set.size().unwrap(), 1);
    }
}
