//! Reactive proxies
//!
//! A proxy is a live wrapper over one raw container. Reads through it record
//! dependencies on the container's observer; writes notify watchers, bubble a
//! [`Change`] up to every ancestor proxy, and schedule dependent components.
//!
//! [`create_proxy`] is the identity-preserving entry point. Each container has
//! at most one canonical [`ProxyCore`], cached in the side table, so wrapping
//! the same container (or an existing proxy) twice yields the same proxy.
//!
//! Child values are wrapped on access. The child remembers its first parent
//! and the key it was reached through; a write anywhere below the root is
//! reported to the root listener with the full path.
//!
//! # Example
//!
//! ```ignore
//! use blinc_store::{create_proxy, noop_listener, Value};
//! use serde_json::json;
//!
//! let state = create_proxy(Value::from(json!({"a": {"b": 1}})), noop_listener(), true);
//! let state = state.as_object().unwrap();
//! let a = state.get("a");
//! a.as_object().unwrap().set("b", 2)?;
//! ```

pub use array::ArrayProxy;
pub use collection::CollectionProxy;
pub use object::ObjectProxy;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::devtools;
use crate::diff::{is_same, resolve_mutation, Change, Mutation};
use crate::error::{Result, StoreError};
use crate::observer::{ChangeListener, ListenerId, Observer, WatcherId};
use crate::slots::{self, ContainerId};
use crate::value::{Container, Key, Shape, Value, WeakContainer};

// =============================================================================
// PROXY CORE
// =============================================================================

/// Canonical per-container proxy state
///
/// Holds no strong reference to its container, so the side table never keeps
/// a container alive.
pub(crate) struct ProxyCore {
    id: ContainerId,
    target: WeakContainer,
    shape: Shape,
    observer: Rc<Observer>,
    hooked: bool,
    /// Listener of the parent (or the root owner)
    incoming: RefCell<Option<Rc<ChangeListener>>>,
    /// Listeners added through the proxy itself
    listeners: RefCell<Vec<(ListenerId, Rc<ChangeListener>)>>,
}

impl ProxyCore {
    /// Forward observer notifications, tagged with the raw container
    fn attach(self: &Rc<Self>) {
        let core = Rc::downgrade(self);
        self.observer.add_listener(Rc::new(move |change: &Change| {
            let Some(core) = core.upgrade() else {
                return;
            };
            let Some(container) = core.target.upgrade() else {
                return;
            };
            let mut change = change.clone();
            change.push_parent(container);
            core.emit(&change);
        }));
    }

    /// Adopt `listener` if this proxy has no parent yet
    fn adopt(&self, listener: Rc<ChangeListener>) {
        let mut incoming = self.incoming.borrow_mut();
        if incoming.is_none() {
            *incoming = Some(listener);
        }
    }

    fn emit(&self, change: &Change) {
        let incoming = self.incoming.borrow().clone();
        let listeners: Vec<Rc<ChangeListener>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        if let Some(incoming) = incoming {
            incoming(change);
        }
        for listener in listeners {
            listener(change);
        }
    }

    /// Listener handed to the child reached through `key`
    ///
    /// Rewrites the child's mutation as a change of this container with only
    /// `key` swapped, then forwards it.
    fn child_listener(self: &Rc<Self>, key: Key) -> Rc<ChangeListener> {
        let parent = Rc::downgrade(self);
        Rc::new(move |change: &Change| {
            let Some(parent) = parent.upgrade() else {
                return;
            };
            let Some(container) = parent.target.upgrade() else {
                return;
            };

            let mut change = change.clone();
            let from = change
                .mutation
                .from_value()
                .cloned()
                .unwrap_or(Value::Undefined);
            let to = change.mutation.to_value().cloned().unwrap_or(Value::Undefined);
            change.mutation = resolve_mutation(
                &container.shallow_with(&key, from),
                &container.shallow_with(&key, to),
            );
            change.push_parent(container);
            change.prepend_key(key.clone());
            parent.emit(&change);
        })
    }
}

/// Canonical core for `container`, created and cached on first use
fn core_for(
    container: &Container,
    incoming: Option<Rc<ChangeListener>>,
    hooked: bool,
) -> Rc<ProxyCore> {
    if let Some(core) = slots::proxy(container.id()) {
        if let Some(listener) = incoming {
            core.adopt(listener);
        }
        return core;
    }

    let observer = slots::ensure_observer(container.id(), hooked);
    let core = Rc::new(ProxyCore {
        id: container.id(),
        target: container.downgrade(),
        shape: container.shape(),
        hooked: observer.is_hooked(),
        observer,
        incoming: RefCell::new(incoming),
        listeners: RefCell::new(Vec::new()),
    });
    core.attach();
    slots::install_proxy(container.id(), core.clone());
    tracing::trace!(id = ?core.id, shape = %core.shape, "created proxy");
    core
}

// =============================================================================
// HANDLE
// =============================================================================

/// A single property write, as seen by watchers
pub(crate) struct Write {
    pub key: Key,
    pub old: Value,
    pub new: Value,
}

/// Strong handle shared by the typed proxies
#[derive(Clone)]
pub(crate) struct Handle {
    target: Container,
    core: Rc<ProxyCore>,
    read_only: bool,
}

impl Handle {
    fn new(target: Container, core: Rc<ProxyCore>, read_only: bool) -> Self {
        Self {
            target,
            core,
            read_only,
        }
    }

    pub(crate) fn target(&self) -> &Container {
        &self.target
    }

    pub(crate) fn observer(&self) -> &Rc<Observer> {
        &self.core.observer
    }

    pub(crate) fn ensure_writable(&self, key: impl fmt::Display) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Record a read of `key`
    pub(crate) fn track(&self, key: &Key) {
        self.core.observer.use_prop(key);
    }

    /// Wrap a value read through `key`
    pub(crate) fn wrap_child(&self, key: Key, value: Value) -> Reactive {
        match value {
            Value::Ref(child) => {
                let listener = self.core.child_listener(key);
                let core = core_for(&child, Some(listener), self.core.hooked);
                Reactive::Proxy(Proxy::from_handle(Handle::new(child, core, self.read_only)))
            }
            other => Reactive::Value(other),
        }
    }

    pub(crate) fn pre_snapshot(&self) -> Option<Value> {
        devtools::capture(&self.target)
    }

    /// Mutation from an optional pre-snapshot to the live container
    pub(crate) fn mutation_since(&self, pre: Option<Value>) -> Mutation {
        let now = Value::Ref(self.target.clone());
        match pre {
            Some(before) => resolve_mutation(&before, &now),
            None => Mutation::Replaced {
                from: Value::Undefined,
                to: now,
            },
        }
    }

    /// Notify a committed write batch
    ///
    /// Writes whose value did not change are dropped. Watchers fire per write,
    /// then dependents of every changed key (plus `pseudo`) are scheduled and
    /// listeners see a single change.
    pub(crate) fn commit(&self, writes: Vec<Write>, pseudo: Option<Key>, pre: Option<Value>) {
        let writes: Vec<Write> = writes
            .into_iter()
            .filter(|write| !is_same(&write.old, &write.new))
            .collect();
        if writes.is_empty() && pseudo.is_none() {
            return;
        }

        let mutation = self.mutation_since(pre);
        let observer = &self.core.observer;
        for write in &writes {
            observer.trigger_watchers(&write.key, &write.old, &write.new, &mutation);
        }

        let mut keys: Vec<Key> = writes.iter().map(|write| write.key.clone()).collect();
        let mut change = Change::new(mutation);
        if let Some(first) = keys.first() {
            change.prepend_key(first.clone());
        }
        keys.extend(pseudo);
        observer.set_props(&keys, &change);
    }

    /// Notify every dependent after a wholesale change
    pub(crate) fn commit_all(&self, writes: Vec<Write>) {
        let mutation = self.mutation_since(None);
        let observer = &self.core.observer;
        for write in &writes {
            observer.trigger_watchers(&write.key, &write.old, &write.new, &mutation);
        }
        observer.all_change(&Change::new(mutation));
    }
}

// =============================================================================
// TYPED PROXIES
// =============================================================================

/// Unregisters a watcher
#[must_use = "dropping the handle keeps the watcher registered"]
pub struct WatchHandle {
    observer: Weak<Observer>,
    key: Key,
    id: WatcherId,
}

impl WatchHandle {
    /// Remove the watcher; returns whether it was still registered
    pub fn unwatch(self) -> bool {
        self.observer
            .upgrade()
            .is_some_and(|observer| observer.unwatch(&self.key, self.id))
    }
}

/// Methods shared by every proxy shape
macro_rules! proxy_common {
    ($name:ident) => {
        impl $name {
            pub(crate) fn from_handle(handle: crate::proxy::Handle) -> Self {
                Self(handle)
            }

            /// Register a watcher for `key`
            pub fn watch<F>(&self, key: impl Into<crate::value::Key>, handler: F) -> crate::proxy::WatchHandle
            where
                F: Fn(&crate::value::Key, &crate::value::Value, &crate::value::Value, &crate::diff::Mutation)
                    + 'static,
            {
                let key = key.into();
                let observer = self.0.observer();
                let id = observer.watch(key.clone(), std::rc::Rc::new(handler));
                crate::proxy::WatchHandle {
                    observer: std::rc::Rc::downgrade(observer),
                    key,
                    id,
                }
            }

            /// Listen to every change on this container and below
            pub fn add_listener<F>(&self, listener: F) -> crate::observer::ListenerId
            where
                F: Fn(&crate::diff::Change) + 'static,
            {
                self.0.core.add_local_listener(std::rc::Rc::new(listener))
            }

            pub fn remove_listener(&self, id: crate::observer::ListenerId) -> bool {
                self.0.core.remove_local_listener(id)
            }

            /// Underlying raw container
            ///
            /// Reads through it record no dependencies and writes notify no
            /// one.
            pub fn raw(&self) -> &crate::value::Container {
                self.0.target()
            }

            /// View of the same container that rejects every mutation
            pub fn read_only(&self) -> Self {
                let mut handle = self.0.clone();
                handle.read_only = true;
                Self(handle)
            }

            pub fn is_read_only(&self) -> bool {
                self.0.read_only
            }

            /// Whether both proxies wrap the same container
            pub fn ptr_eq(&self, other: &Self) -> bool {
                std::rc::Rc::ptr_eq(&self.0.core, &other.0.core)
            }

            pub fn observer(&self) -> &std::rc::Rc<crate::observer::Observer> {
                self.0.observer()
            }

            /// Deep copy of the current contents
            pub fn snapshot(&self) -> crate::error::Result<crate::value::Value> {
                crate::value::Value::Ref(self.0.target().clone()).snapshot()
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.ptr_eq(other) && self.0.read_only == other.0.read_only
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("target", self.0.target())
                    .field("read_only", &self.0.read_only)
                    .finish()
            }
        }

        impl From<$name> for crate::value::Value {
            fn from(proxy: $name) -> Self {
                crate::value::Value::Ref(proxy.0.target().clone())
            }
        }
    };
}

mod array;
mod collection;
mod object;

impl ProxyCore {
    fn add_local_listener(&self, listener: Rc<ChangeListener>) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    fn remove_local_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}

/// A proxy of any shape, selected once when the container is wrapped
#[derive(Clone, Debug, PartialEq)]
pub enum Proxy {
    Object(ObjectProxy),
    Array(ArrayProxy),
    Collection(CollectionProxy),
}

impl Proxy {
    fn from_handle(handle: Handle) -> Self {
        match handle.core.shape {
            Shape::Object => Proxy::Object(ObjectProxy::from_handle(handle)),
            Shape::Array => Proxy::Array(ArrayProxy::from_handle(handle)),
            Shape::Collection(_) => Proxy::Collection(CollectionProxy::from_handle(handle)),
        }
    }

    pub fn raw(&self) -> &Container {
        match self {
            Proxy::Object(p) => p.raw(),
            Proxy::Array(p) => p.raw(),
            Proxy::Collection(p) => p.raw(),
        }
    }

    pub fn shape(&self) -> Shape {
        self.raw().shape()
    }

    pub fn read_only(&self) -> Proxy {
        match self {
            Proxy::Object(p) => Proxy::Object(p.read_only()),
            Proxy::Array(p) => Proxy::Array(p.read_only()),
            Proxy::Collection(p) => Proxy::Collection(p.read_only()),
        }
    }

    pub fn ptr_eq(&self, other: &Proxy) -> bool {
        self.raw().ptr_eq(other.raw())
    }
}

impl From<Proxy> for Value {
    fn from(proxy: Proxy) -> Self {
        Value::Ref(proxy.raw().clone())
    }
}

// =============================================================================
// REACTIVE
// =============================================================================

/// A value read from reactive state: a primitive, or a proxy
#[derive(Clone, Debug, PartialEq)]
pub enum Reactive {
    Value(Value),
    Proxy(Proxy),
}

impl Reactive {
    pub fn as_object(&self) -> Option<&ObjectProxy> {
        match self {
            Reactive::Proxy(Proxy::Object(p)) => Some(p),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayProxy> {
        match self {
            Reactive::Proxy(Proxy::Array(p)) => Some(p),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&CollectionProxy> {
        match self {
            Reactive::Proxy(Proxy::Collection(p)) => Some(p),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Reactive::Proxy(p) => Some(p),
            Reactive::Value(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reactive::Value(v) => v.as_f64(),
            Reactive::Proxy(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reactive::Value(v) => v.as_str(),
            Reactive::Proxy(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Reactive::Value(v) => v.as_bool(),
            Reactive::Proxy(_) => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Reactive::Value(Value::Undefined))
    }

    /// Unwrapped value (raw container for proxies)
    pub fn to_value(&self) -> Value {
        match self {
            Reactive::Value(v) => v.clone(),
            Reactive::Proxy(p) => Value::Ref(p.raw().clone()),
        }
    }

    pub fn into_raw(self) -> Value {
        match self {
            Reactive::Value(v) => v,
            Reactive::Proxy(p) => p.into(),
        }
    }
}

impl From<Value> for Reactive {
    fn from(value: Value) -> Self {
        Reactive::Value(value)
    }
}

impl From<Container> for Reactive {
    fn from(container: Container) -> Self {
        Reactive::Value(Value::Ref(container))
    }
}

impl From<Proxy> for Reactive {
    fn from(proxy: Proxy) -> Self {
        Reactive::Proxy(proxy)
    }
}

impl From<ObjectProxy> for Reactive {
    fn from(proxy: ObjectProxy) -> Self {
        Reactive::Proxy(Proxy::Object(proxy))
    }
}

impl From<ArrayProxy> for Reactive {
    fn from(proxy: ArrayProxy) -> Self {
        Reactive::Proxy(Proxy::Array(proxy))
    }
}

impl From<CollectionProxy> for Reactive {
    fn from(proxy: CollectionProxy) -> Self {
        Reactive::Proxy(Proxy::Collection(proxy))
    }
}

impl From<Reactive> for Value {
    fn from(reactive: Reactive) -> Self {
        reactive.into_raw()
    }
}

// =============================================================================
// FACTORY
// =============================================================================

/// Wrap `target` reactively
///
/// Primitives come back unchanged and existing proxies are returned as they
/// are. A container gets its canonical proxy; the first call for a container
/// decides its listener and whether its observer is hooked.
pub fn create_proxy(
    target: impl Into<Reactive>,
    listener: Rc<ChangeListener>,
    is_hook_observer: bool,
) -> Reactive {
    match target.into() {
        Reactive::Value(Value::Ref(container)) => {
            let core = core_for(&container, Some(listener), is_hook_observer);
            Reactive::Proxy(Proxy::from_handle(Handle::new(container, core, false)))
        }
        other => other,
    }
}

/// Wrap `target` without attaching a parent listener
pub fn wrap(target: impl Into<Reactive>) -> Reactive {
    match target.into() {
        Reactive::Value(Value::Ref(container)) => {
            let core = core_for(&container, None, true);
            Reactive::Proxy(Proxy::from_handle(Handle::new(container, core, false)))
        }
        other => other,
    }
}

/// Listener that ignores every change
pub fn noop_listener() -> Rc<ChangeListener> {
    Rc::new(|_: &Change| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    fn state(json: serde_json::Value) -> ObjectProxy {
        create_proxy(Value::from(json), noop_listener(), true)
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_primitives_are_not_wrapped() {
        let out = create_proxy(Value::from(3), noop_listener(), true);
        assert_eq!(out, Reactive::Value(Value::from(3)));
    }

    #[test]
    fn test_wrapping_is_idempotent() {
        let raw = Container::object([("a", Value::from(1))]);
        let first = create_proxy(raw.clone(), noop_listener(), true);
        let second = create_proxy(raw.clone(), noop_listener(), true);
        assert_eq!(first, second);

        let again = create_proxy(first.clone(), noop_listener(), true);
        assert_eq!(again, first);
        assert!(first.as_proxy().unwrap().raw().ptr_eq(&raw));
    }

    #[test]
    fn test_child_proxies_are_cached() {
        let root = state(json!({"a": {"b": 1}}));
        let a1 = root.get("a");
        let a2 = root.get("a");
        assert!(a1.as_object().unwrap().ptr_eq(a2.as_object().unwrap()));
    }

    #[test]
    fn test_path_reconstruction() {
        let root = state(json!({"a": {"b": {"c": 1}}}));
        let changes = Rc::new(RefCell::new(Vec::new()));
        let sink = changes.clone();
        root.add_listener(move |change: &Change| sink.borrow_mut().push(change.clone()));

        let b = root.get("a").as_object().unwrap().get("b");
        b.as_object().unwrap().set("c", 2).unwrap();

        let changes = changes.borrow();
        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(
            change.path(),
            &[Key::prop("a"), Key::prop("b"), Key::prop("c")]
        );
        assert_eq!(change.parents.len(), 3);
        assert!(change.root().unwrap().ptr_eq(root.raw()));
        assert!(change.mutation.is_changed());
    }

    #[test]
    fn test_no_spurious_notification() {
        let root = state(json!({"a": 1, "nested": {"x": 1}}));
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let _watch = root.watch("a", move |_, _, _, _| counter.set(counter.get() + 1));

        root.set("a", 1).unwrap();
        assert_eq!(calls.get(), 0);

        let nested = root.get("nested").into_raw();
        root.set("nested", nested).unwrap();
        root.set("a", 2).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_watch_receives_old_and_new() {
        let root = state(json!({"a": 1}));
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        let handle = root.watch("a", move |_, old, new, _| {
            *sink.borrow_mut() = Some((old.clone(), new.clone()));
        });

        root.set("a", 5).unwrap();
        assert_eq!(*seen.borrow(), Some((Value::from(1), Value::from(5))));

        assert!(handle.unwatch());
        root.set("a", 6).unwrap();
        assert_eq!(*seen.borrow(), Some((Value::from(1), Value::from(5))));
    }

    #[test]
    fn test_read_only_view_rejects_writes() {
        let root = state(json!({"a": {"b": 1}}));
        let view = root.read_only();
        assert!(matches!(view.set("a", 1), Err(StoreError::ReadOnly { .. })));

        let child = view.get("a");
        let child = child.as_object().unwrap();
        assert!(child.is_read_only());
        assert!(child.set("b", 2).is_err());
        assert_eq!(root.get("a").as_object().unwrap().get("b").as_f64(), Some(1.0));
    }

    #[test]
    fn test_detached_child_adopts_parent() {
        let child = Container::object([("x", Value::from(1))]);
        let detached = wrap(child.clone());

        let root = state(json!({}));
        root.set("child", child).unwrap();

        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        root.add_listener(move |_: &Change| counter.set(counter.get() + 1));

        // Reading through the parent attaches the existing proxy to it
        let via_parent = root.get("child");
        assert!(via_parent.as_proxy().unwrap().ptr_eq(detached.as_proxy().unwrap()));
        detached.as_object().unwrap().set("x", 2).unwrap();
        assert_eq!(calls.get(), 1);
    }

    struct OpenPanel;

    impl crate::devtools::DevtoolsSink for OpenPanel {
        fn send(&self, _event: &crate::devtools::DevtoolsEvent) {}

        fn is_panel_active(&self) -> bool {
            true
        }
    }

    fn attribute<'a>(mutation: &'a Mutation, key: &str) -> &'a Mutation {
        match mutation {
            Mutation::Object { attributes, .. } => &attributes[key],
            other => panic!("expected an object mutation, got {:?}", other),
        }
    }

    #[test]
    fn test_open_panel_reports_structural_mutation() {
        let root = state(json!({"a": {"b": {"c": 1, "d": 4}}}));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        root.add_listener(move |change: &Change| sink.borrow_mut().push(change.clone()));

        crate::devtools::set_devtools(Rc::new(OpenPanel));
        let b = root.get("a").as_object().unwrap().get("b");
        b.as_object().unwrap().set("c", 2).unwrap();
        crate::devtools::clear_devtools();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        let change = &seen[0];
        let path: Vec<String> = change.path().iter().map(ToString::to_string).collect();
        assert_eq!(path, vec!["a", "b", "c"]);

        let a = attribute(&change.mutation, "a");
        assert!(matches!(a, Mutation::Object { changed: true, .. }));
        let b = attribute(a, "b");
        assert!(matches!(
            attribute(b, "c"),
            Mutation::Replaced { from, to } if *from == Value::from(1) && *to == Value::from(2)
        ));
        assert!(matches!(attribute(b, "d"), Mutation::Unchanged));
    }
}
