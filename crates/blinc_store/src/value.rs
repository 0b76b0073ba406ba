//! Dynamic values and raw containers
//!
//! Store state is an object graph of unknown shape. [`Value`] is the dynamic
//! value placed into that graph and [`Container`] is a shared handle to one raw
//! container (plain object, array, or keyed collection).
//!
//! Containers have pointer identity: cloning a `Container` clones the handle,
//! not the data. Identity is what the proxy cache, the observer side table, and
//! [`is_same`](crate::diff::is_same) all key on.
//!
//! Observers are never stored inside a container. They live in an out-of-band
//! table (see [`slots`](crate::slots)) keyed by [`ContainerId`], so neither
//! [`Value::snapshot`] nor serialization can see or duplicate them.

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Result, StoreError};
use crate::slots::{self, ContainerId};

// =============================================================================
// VALUE
// =============================================================================

/// A dynamic state value
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Missing value (absent key, out-of-range index)
    #[default]
    Undefined,
    /// Explicit null
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all numbers are f64)
    Number(f64),
    /// UTF-8 string
    String(Rc<str>),
    /// Reference to a raw container
    Ref(Container),
}

impl Value {
    /// Whether this is `Undefined`
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Whether this is `Undefined` or `Null`
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Whether this value is a container reference
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Ref(_))
    }

    /// Extract as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract as i64, truncating any fractional part
    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().filter(|n| n.is_finite()).map(|n| n as i64)
    }

    /// Extract as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Extract as container handle
    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Value::Ref(c) => Some(c),
            _ => None,
        }
    }

    /// Get type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Ref(c) => match c.shape() {
                Shape::Object => "object",
                Shape::Array => "array",
                Shape::Collection(kind) => kind.name(),
            },
        }
    }

    /// Deep copy of this value (structural clone)
    ///
    /// Objects and arrays are copied recursively into fresh containers.
    /// Collection keys and set members keep their identity; map values are
    /// copied. Fails with [`StoreError::CyclicValue`] if the graph contains a
    /// cycle.
    pub fn snapshot(&self) -> Result<Value> {
        let mut visiting = FxHashSet::default();
        snapshot_inner(self, &mut visiting)
    }

    /// Serialize to JSON
    ///
    /// `Undefined` and non-finite numbers become `null`, maps become arrays of
    /// `[key, value]` pairs, weak collections become `{}`.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|_| StoreError::CyclicValue)
    }
}

fn snapshot_inner(value: &Value, visiting: &mut FxHashSet<ContainerId>) -> Result<Value> {
    let Value::Ref(container) = value else {
        return Ok(value.clone());
    };
    if !visiting.insert(container.id()) {
        return Err(StoreError::CyclicValue);
    }

    let copy = {
        let data = container.borrow();
        match &*data {
            RawData::Object(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (key, item) in map {
                    out.insert(key.clone(), snapshot_inner(item, visiting)?);
                }
                RawData::Object(out)
            }
            RawData::Array(items) => RawData::Array(
                items
                    .iter()
                    .map(|item| snapshot_inner(item, visiting))
                    .collect::<Result<Vec<_>>>()?,
            ),
            RawData::Map(entries) => {
                let mut out = IndexMap::with_capacity(entries.len());
                for (key, (key_value, item)) in entries {
                    out.insert(
                        key.clone(),
                        (key_value.clone(), snapshot_inner(item, visiting)?),
                    );
                }
                RawData::Map(out)
            }
            other => other.clone(),
        }
    };

    visiting.remove(&container.id());
    Ok(Value::Ref(Container::new(copy)))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Number(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{:?}", v),
            Value::Ref(c) => write!(f, "[{} #{:?}]", c.shape(), c.id()),
        }
    }
}

// =============================================================================
// CONVERSIONS
// =============================================================================

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Rc::from(v))
    }
}

impl From<Rc<str>> for Value {
    fn from(v: Rc<str>) -> Self {
        Value::String(v)
    }
}

impl From<Container> for Value {
    fn from(v: Container) -> Self {
        Value::Ref(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(v) => Value::Bool(v),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::Ref(Container::array(items.into_iter().map(Value::from)))
            }
            serde_json::Value::Object(map) => Value::Ref(Container::object(
                map.into_iter().map(|(key, item)| (key, Value::from(item))),
            )),
        }
    }
}

// =============================================================================
// SERIALIZATION
// =============================================================================

/// Largest integer an f64 represents exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let visiting = RefCell::new(FxHashSet::default());
        Guarded {
            value: self,
            visiting: &visiting,
        }
        .serialize(serializer)
    }
}

/// Serializes a value while tracking the containers on the current path
struct Guarded<'a> {
    value: &'a Value,
    visiting: &'a RefCell<FxHashSet<ContainerId>>,
}

impl<'a> Guarded<'a> {
    fn child(&self, value: &'a Value) -> Guarded<'a> {
        Guarded {
            value,
            visiting: self.visiting,
        }
    }
}

impl Serialize for Guarded<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let container = match self.value {
            Value::Undefined | Value::Null => return serializer.serialize_unit(),
            Value::Bool(v) => return serializer.serialize_bool(*v),
            Value::Number(n) if !n.is_finite() => return serializer.serialize_unit(),
            Value::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                return serializer.serialize_i64(*n as i64);
            }
            Value::Number(n) => return serializer.serialize_f64(*n),
            Value::String(s) => return serializer.serialize_str(s),
            Value::Ref(container) => container,
        };

        if !self.visiting.borrow_mut().insert(container.id()) {
            return Err(S::Error::custom("cyclic structure"));
        }

        let data = container.borrow();
        let result = match &*data {
            RawData::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, item) in map {
                    out.serialize_entry(key, &self.child(item))?;
                }
                out.end()
            }
            RawData::Array(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(&self.child(item))?;
                }
                out.end()
            }
            RawData::Map(entries) => {
                let mut out = serializer.serialize_seq(Some(entries.len()))?;
                for (key, item) in entries.values() {
                    out.serialize_element(&[self.child(key), self.child(item)])?;
                }
                out.end()
            }
            RawData::Set(members) => {
                let mut out = serializer.serialize_seq(Some(members.len()))?;
                for member in members.values() {
                    out.serialize_element(&self.child(member))?;
                }
                out.end()
            }
            RawData::WeakMap(_) | RawData::WeakSet(_) => serializer.serialize_map(Some(0))?.end(),
        };
        drop(data);

        self.visiting.borrow_mut().remove(&container.id());
        result
    }
}

// =============================================================================
// CONTAINERS
// =============================================================================

/// Largest writable array index (`2^32 - 2`)
pub const MAX_ARRAY_INDEX: usize = (u32::MAX - 1) as usize;

/// Array length needed to hold `index`, or `None` past [`MAX_ARRAY_INDEX`]
pub(crate) fn padded_len(index: usize) -> Option<usize> {
    index.checked_add(1).filter(|_| index <= MAX_ARRAY_INDEX)
}

/// Shape of a raw container, fixed at creation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    Object,
    Array,
    Collection(CollectionKind),
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Object => write!(f, "object"),
            Shape::Array => write!(f, "array"),
            Shape::Collection(kind) => write!(f, "{}", kind.name()),
        }
    }
}

/// Keyed collection flavours
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Map,
    Set,
    WeakMap,
    WeakSet,
}

impl CollectionKind {
    /// Whether keys are held weakly (and the collection is not iterable)
    pub fn is_weak(&self) -> bool {
        matches!(self, CollectionKind::WeakMap | CollectionKind::WeakSet)
    }

    /// Whether entries carry a value in addition to the key
    pub fn is_keyed(&self) -> bool {
        matches!(self, CollectionKind::Map | CollectionKind::WeakMap)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CollectionKind::Map => "map",
            CollectionKind::Set => "set",
            CollectionKind::WeakMap => "weak map",
            CollectionKind::WeakSet => "weak set",
        }
    }
}

/// Raw container contents
#[derive(Clone, Debug)]
pub enum RawData {
    /// Plain object with insertion-ordered keys
    Object(IndexMap<String, Value>),
    /// Dense array
    Array(Vec<Value>),
    /// Map: entry key -> (original key, value)
    Map(IndexMap<EntryKey, (Value, Value)>),
    /// Set: entry key -> member
    Set(IndexMap<EntryKey, Value>),
    /// Weak map: key container -> (weak key, value)
    WeakMap(FxHashMap<ContainerId, (WeakContainer, Value)>),
    /// Weak set: member container -> weak member
    WeakSet(FxHashMap<ContainerId, WeakContainer>),
}

impl RawData {
    pub fn shape(&self) -> Shape {
        match self {
            RawData::Object(_) => Shape::Object,
            RawData::Array(_) => Shape::Array,
            RawData::Map(_) => Shape::Collection(CollectionKind::Map),
            RawData::Set(_) => Shape::Collection(CollectionKind::Set),
            RawData::WeakMap(_) => Shape::Collection(CollectionKind::WeakMap),
            RawData::WeakSet(_) => Shape::Collection(CollectionKind::WeakSet),
        }
    }
}

struct ContainerCell {
    id: ContainerId,
    shape: Shape,
    data: RefCell<RawData>,
}

impl Drop for ContainerCell {
    fn drop(&mut self) {
        slots::release(self.id);
    }
}

/// Shared handle to a raw container
///
/// This is the raw escape hatch: reading through a `Container` records no
/// dependencies. Mutation goes through proxies so observers are notified.
#[derive(Clone)]
pub struct Container(Rc<ContainerCell>);

impl Container {
    /// Create a container holding `data`
    pub fn new(data: RawData) -> Self {
        Container(Rc::new(ContainerCell {
            id: slots::allocate(),
            shape: data.shape(),
            data: RefCell::new(data),
        }))
    }

    /// Create a plain object from key/value pairs
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::new(RawData::Object(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Create an array
    pub fn array<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Self::new(RawData::Array(items.into_iter().collect()))
    }

    /// Create a map from key/value pairs (later duplicates win)
    pub fn map<I: IntoIterator<Item = (Value, Value)>>(entries: I) -> Self {
        let mut out = IndexMap::new();
        for (key, value) in entries {
            out.insert(EntryKey::of(&key), (key, value));
        }
        Self::new(RawData::Map(out))
    }

    /// Create a set (duplicates collapse under SameValueZero)
    pub fn set<I: IntoIterator<Item = Value>>(members: I) -> Self {
        let mut out = IndexMap::new();
        for member in members {
            out.entry(EntryKey::of(&member)).or_insert(member);
        }
        Self::new(RawData::Set(out))
    }

    /// Create an empty weak map
    pub fn weak_map() -> Self {
        Self::new(RawData::WeakMap(FxHashMap::default()))
    }

    /// Create an empty weak set
    pub fn weak_set() -> Self {
        Self::new(RawData::WeakSet(FxHashMap::default()))
    }

    /// Identity of this container
    pub fn id(&self) -> ContainerId {
        self.0.id
    }

    pub fn shape(&self) -> Shape {
        self.0.shape
    }

    /// Whether both handles point at the same container
    pub fn ptr_eq(&self, other: &Container) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakContainer {
        WeakContainer(Rc::downgrade(&self.0))
    }

    /// Borrow the raw contents
    ///
    /// # Panics
    ///
    /// Panics if the container is currently being mutated.
    pub fn borrow(&self) -> Ref<'_, RawData> {
        self.0.data.borrow()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, RawData> {
        self.0.data.borrow_mut()
    }

    pub(crate) fn object_mut(&self) -> Option<RefMut<'_, IndexMap<String, Value>>> {
        RefMut::filter_map(self.borrow_mut(), |data| match data {
            RawData::Object(map) => Some(map),
            _ => None,
        })
        .ok()
    }

    pub(crate) fn array_mut(&self) -> Option<RefMut<'_, Vec<Value>>> {
        RefMut::filter_map(self.borrow_mut(), |data| match data {
            RawData::Array(items) => Some(items),
            _ => None,
        })
        .ok()
    }

    /// Copy of this container with the entry at `key` replaced by `value`
    ///
    /// This is the `{ ...parent, [key]: value }` view used to describe a child
    /// change in terms of its parent.
    pub(crate) fn shallow_with(&self, key: &Key, value: Value) -> Value {
        let copy = {
            let data = self.borrow();
            match (&*data, key) {
                (RawData::Object(map), Key::Prop(name)) => {
                    let mut map = map.clone();
                    map.insert(name.to_string(), value);
                    RawData::Object(map)
                }
                (RawData::Array(items), Key::Index(index)) => {
                    let mut items = items.clone();
                    if *index < items.len() {
                        items[*index] = value;
                    } else if let Some(len) = padded_len(*index) {
                        items.resize(len, Value::Undefined);
                        items[*index] = value;
                    }
                    RawData::Array(items)
                }
                (RawData::Map(entries), Key::Entry(entry)) => {
                    let mut entries = entries.clone();
                    if let Some(slot) = entries.get_mut(entry) {
                        slot.1 = value;
                    }
                    RawData::Map(entries)
                }
                (RawData::WeakMap(entries), Key::Entry(EntryKey::Ref(id))) => {
                    let mut entries = entries.clone();
                    if let Some(slot) = entries.get_mut(id) {
                        slot.1 = value;
                    }
                    RawData::WeakMap(entries)
                }
                (other, _) => other.clone(),
            }
        };
        Value::Ref(Container::new(copy))
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Container({} {:?})", self.shape(), self.id())
    }
}

/// Weak handle to a raw container
#[derive(Clone, Debug)]
pub struct WeakContainer(Weak<ContainerCell>);

impl WeakContainer {
    pub fn upgrade(&self) -> Option<Container> {
        self.0.upgrade().map(Container)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl fmt::Debug for ContainerCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerCell({} {:?})", self.shape, self.id)
    }
}

// =============================================================================
// KEYS
// =============================================================================

/// Collection key under SameValueZero equality
///
/// NaN equals NaN, `-0` equals `+0`, containers compare by identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Undefined,
    Null,
    Bool(bool),
    Number(u64),
    String(Rc<str>),
    Ref(ContainerId),
}

impl EntryKey {
    /// Canonical key for `value`
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Undefined => EntryKey::Undefined,
            Value::Null => EntryKey::Null,
            Value::Bool(v) => EntryKey::Bool(*v),
            Value::Number(n) if n.is_nan() => EntryKey::Number(f64::NAN.to_bits()),
            Value::Number(n) if *n == 0.0 => EntryKey::Number(0.0f64.to_bits()),
            Value::Number(n) => EntryKey::Number(n.to_bits()),
            Value::String(s) => EntryKey::String(s.clone()),
            Value::Ref(c) => EntryKey::Ref(c.id()),
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKey::Undefined => write!(f, "undefined"),
            EntryKey::Null => write!(f, "null"),
            EntryKey::Bool(v) => write!(f, "{}", v),
            EntryKey::Number(bits) => write!(f, "{}", f64::from_bits(*bits)),
            EntryKey::String(s) => write!(f, "{:?}", s),
            EntryKey::Ref(id) => write!(f, "#{:?}", id),
        }
    }
}

/// An observable property of a container
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// Named object property
    Prop(Rc<str>),
    /// Array index
    Index(usize),
    /// Array length
    Length,
    /// Collection entry (by key for maps, by member for sets)
    Entry(EntryKey),
    /// Membership of a collection or the key set of an object
    Entries,
}

impl Key {
    pub fn prop(name: &str) -> Self {
        Key::Prop(Rc::from(name))
    }

    pub fn entry(value: &Value) -> Self {
        Key::Entry(EntryKey::of(value))
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::prop(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Prop(Rc::from(name))
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Prop(name) => write!(f, "{}", name),
            Key::Index(index) => write!(f, "{}", index),
            Key::Length => write!(f, "length"),
            Key::Entry(entry) => write!(f, "[{}]", entry),
            Key::Entries => write!(f, "[[entries]]"),
        }
    }
}
