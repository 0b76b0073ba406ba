//! Array proxy
//!
//! `set`, `push` and `pop` know exactly which slots they touch and report
//! those writes directly. Reordering mutators (`insert`, `remove`, `swap`,
//! `truncate`, `clear`) snapshot the element list and diff it against the
//! result. Either way each changed index is notified, `length` is notified
//! when it moved, and one call produces one listener notification.

use super::{Handle, Reactive, Write};
use crate::diff::is_same;
use crate::error::{Result, StoreError};
use crate::value::{padded_len, Key, RawData, Value};

/// Reactive view of an array
#[derive(Clone)]
pub struct ArrayProxy(pub(crate) Handle);

proxy_common!(ArrayProxy);

fn length_write(old: usize, new: usize) -> Write {
    Write {
        key: Key::Length,
        old: Value::from(old),
        new: Value::from(new),
    }
}

impl ArrayProxy {
    pub fn len(&self) -> usize {
        self.0.track(&Key::Length);
        self.with_items(|items| items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read element `index`; out of range reads are `Undefined`
    pub fn get(&self, index: usize) -> Reactive {
        self.0.track(&Key::Index(index));
        let value = self.with_items(|items| items.get(index).cloned().unwrap_or_default());
        self.0.wrap_child(Key::Index(index), value)
    }

    /// All elements, depending on the length and every index
    pub fn to_vec(&self) -> Vec<Reactive> {
        let len = self.len();
        (0..len).map(|index| self.get(index)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Reactive> {
        self.to_vec().into_iter()
    }

    /// Write element `index`, padding with `Undefined` past the end
    ///
    /// Indices above [`MAX_ARRAY_INDEX`](crate::value::MAX_ARRAY_INDEX), or
    /// that the array cannot grow to, fail with `IndexOutOfRange`.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let key = Key::Index(index);
        let len = padded_len(index).ok_or(StoreError::IndexOutOfRange { index })?;
        let value = value.into();
        self.edit(&key, move |items| {
            let old_len = items.len();
            if index >= old_len {
                items
                    .try_reserve(len - old_len)
                    .map_err(|_| StoreError::IndexOutOfRange { index })?;
                items.resize(len, Value::Undefined);
            }
            let old = std::mem::replace(&mut items[index], value.clone());

            let mut writes = vec![Write {
                key: Key::Index(index),
                old,
                new: value,
            }];
            if len > old_len {
                writes.push(length_write(old_len, len));
            }
            Ok(((), writes))
        })
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.edit("push", move |items| {
            let index = items.len();
            items.push(value.clone());
            Ok((
                (),
                vec![
                    Write {
                        key: Key::Index(index),
                        old: Value::Undefined,
                        new: value,
                    },
                    length_write(index, index + 1),
                ],
            ))
        })
    }

    pub fn pop(&self) -> Result<Value> {
        self.edit("pop", |items| {
            let Some(old) = items.pop() else {
                return Ok((Value::Undefined, Vec::new()));
            };
            let index = items.len();
            let writes = vec![
                Write {
                    key: Key::Index(index),
                    old: old.clone(),
                    new: Value::Undefined,
                },
                length_write(index + 1, index),
            ];
            Ok((old, writes))
        })
    }

    /// Insert at `index`, clamped to the current length
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.mutate("insert", move |items| {
            let index = index.min(items.len());
            items.insert(index, value);
        })
    }

    /// Remove element `index`; out of range removes nothing
    pub fn remove(&self, index: usize) -> Result<Value> {
        self.mutate("remove", move |items| {
            if index < items.len() {
                items.remove(index)
            } else {
                Value::Undefined
            }
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.mutate("clear", |items| items.clear())
    }

    pub fn truncate(&self, len: usize) -> Result<()> {
        self.mutate("truncate", move |items| items.truncate(len))
    }

    /// Swap two elements; out of range indices leave the array untouched
    pub fn swap(&self, a: usize, b: usize) -> Result<()> {
        self.mutate("swap", move |items| {
            if a < items.len() && b < items.len() {
                items.swap(a, b);
            }
        })
    }

    /// Apply `f` and commit the writes it reports
    fn edit<R: Default>(
        &self,
        op: impl std::fmt::Display,
        f: impl FnOnce(&mut Vec<Value>) -> Result<(R, Vec<Write>)>,
    ) -> Result<R> {
        self.0.ensure_writable(op)?;
        let pre = self.0.pre_snapshot();

        let Some(mut items) = self.0.target().array_mut() else {
            return Ok(R::default());
        };
        let (result, writes) = f(&mut *items)?;
        drop(items);

        self.0.commit(writes, None, pre);
        Ok(result)
    }

    /// Apply a reordering `f`, diffing every index
    fn mutate<R: Default>(
        &self,
        op: impl std::fmt::Display,
        f: impl FnOnce(&mut Vec<Value>) -> R,
    ) -> Result<R> {
        self.edit(op, |items| {
            let before = items.clone();
            let result = f(&mut *items);

            let mut writes: Vec<Write> = (0..before.len().max(items.len()))
                .filter_map(|index| {
                    let old = before.get(index).cloned().unwrap_or_default();
                    let new = items.get(index).cloned().unwrap_or_default();
                    (!is_same(&old, &new)).then_some(Write {
                        key: Key::Index(index),
                        old,
                        new,
                    })
                })
                .collect();
            if before.len() != items.len() {
                writes.push(length_write(before.len(), items.len()));
            }
            Ok((result, writes))
        })
    }

    fn with_items<R: Default>(&self, f: impl FnOnce(&Vec<Value>) -> R) -> R {
        match &*self.0.target().borrow() {
            RawData::Array(items) => f(items),
            _ => R::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Change;
    use crate::proxy::{create_proxy, noop_listener};
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn array(json: serde_json::Value) -> ArrayProxy {
        create_proxy(Value::from(json), noop_listener(), true)
            .as_array()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_push_notifies_index_and_length_once() {
        let list = array(json!([1, 2]));
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        list.add_listener(move |_: &Change| counter.set(counter.get() + 1));

        let lengths = Rc::new(RefCell::new(Vec::new()));
        let sink = lengths.clone();
        let _watch = list.watch(Key::Length, move |_, old, new, _| {
            sink.borrow_mut().push((old.as_f64(), new.as_f64()));
        });

        list.push(3).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(*lengths.borrow(), vec![(Some(2.0), Some(3.0))]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(2).as_f64(), Some(3.0));
    }

    #[test]
    fn test_set_past_end_pads() {
        let list = array(json!([]));
        list.set(2, "x").unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.get(0).is_undefined());
        assert_eq!(list.get(2).as_str(), Some("x"));
    }

    #[test]
    fn test_same_value_is_silent() {
        let list = array(json!([1, 2]));
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        list.add_listener(move |_: &Change| counter.set(counter.get() + 1));

        list.set(0, 1).unwrap();
        list.swap(0, 5).unwrap();
        list.truncate(10).unwrap();
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_mutators() {
        let list = array(json!([1, 2, 3]));
        assert_eq!(list.pop().unwrap(), Value::from(3));
        list.insert(0, 0).unwrap();
        list.insert(99, 9).unwrap();
        assert_eq!(list.remove(1).unwrap(), Value::from(1));
        list.swap(0, 1).unwrap();

        let values: Vec<f64> = list.iter().filter_map(|item| item.as_f64()).collect();
        assert_eq!(values, vec![2.0, 0.0, 9.0]);

        list.clear().unwrap();
        assert!(list.is_empty());
        assert_eq!(list.pop().unwrap(), Value::Undefined);
    }

    #[test]
    fn test_index_watchers_after_remove() {
        let list = array(json!(["a", "b", "c"]));
        let shifted = Rc::new(Cell::new(0));
        let counter = shifted.clone();
        let _watch = list.watch(1usize, move |_, _, _, _| counter.set(counter.get() + 1));

        list.remove(0).unwrap();
        assert_eq!(shifted.get(), 1);
        assert_eq!(list.get(1).as_str(), Some("c"));
    }

    #[test]
    fn test_read_only_array() {
        let list = array(json!([1]));
        let view = list.read_only();
        assert!(view.push(2).is_err());
        assert!(view.clear().is_err());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_set_rejects_huge_index() {
        let list = array(json!([1]));
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        list.add_listener(move |_: &Change| counter.set(counter.get() + 1));

        assert_eq!(
            list.set(usize::MAX, 1),
            Err(StoreError::IndexOutOfRange { index: usize::MAX })
        );
        assert!(matches!(
            list.set(crate::value::MAX_ARRAY_INDEX + 1, 1),
            Err(StoreError::IndexOutOfRange { .. })
        ));
        assert_eq!(list.len(), 1);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_set_and_pop_notify_touched_keys() {
        let list = array(json!([1, 2, 3]));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _watches: Vec<_> = [Key::Index(1), Key::Index(2), Key::Length]
            .into_iter()
            .map(|key| {
                let sink = seen.clone();
                let name = key.to_string();
                list.watch(key, move |_, _, _, _| sink.borrow_mut().push(name.clone()))
            })
            .collect();

        list.set(1, 20).unwrap();
        assert_eq!(*seen.borrow(), vec!["1"]);

        seen.borrow_mut().clear();
        assert_eq!(list.pop().unwrap(), Value::from(3));
        assert_eq!(*seen.borrow(), vec!["2", "length"]);
        assert_eq!(list.len(), 2);
    }
}
