//! Per-container dependency ledger
//!
//! An [`Observer`] belongs to exactly one raw container. It records which
//! rendering contexts read which keys, holds per-key watchers, and fans
//! changes out to generic listeners.
//!
//! Two flavours share the type:
//!
//! - **hooked** (`Observer::new`): reads taken while a component renders
//!   subscribe that component to the key.
//! - **hookless** (`Observer::hookless`): never consults the rendering
//!   context, so only explicit watchers and listeners ever fire. Used by
//!   adapters that manage their own subscriber lists.
//!
//! # Reentrancy
//!
//! Callbacks are cloned out of the ledger before they run, so a callback may
//! register or remove others. There is no guard against a watcher that writes
//! back into the state it watches; such a loop recurses until something
//! outside the store stops it.

use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::{self, VNodeRef};
use crate::diff::{Change, Mutation};
use crate::value::{Key, Value};

/// Per-key watcher: `(key, old, new, mutation)`
pub type WatchCallback = dyn Fn(&Key, &Value, &Value, &Mutation);

/// Generic change listener
pub type ChangeListener = dyn Fn(&Change);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handle for a registered watcher
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

/// Handle for a registered listener
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        ListenerId(next_id())
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

type WatcherList = SmallVec<[(WatcherId, Rc<WatchCallback>); 2]>;

/// Dependency ledger for one raw container
pub struct Observer {
    hooked: bool,
    watchers: RefCell<FxHashMap<Key, WatcherList>>,
    listeners: RefCell<Vec<(ListenerId, Rc<ChangeListener>)>>,
    /// key -> components that read it
    key_vnodes: RefCell<FxHashMap<Key, IndexSet<VNodeRef>>>,
    /// component -> keys it read
    vnode_keys: RefCell<FxHashMap<VNodeRef, FxHashSet<Key>>>,
}

impl Observer {
    /// Observer that subscribes rendering components to the keys they read
    pub fn new() -> Self {
        Self::with_hooks(true)
    }

    /// Observer that never records rendering dependencies
    pub fn hookless() -> Self {
        Self::with_hooks(false)
    }

    fn with_hooks(hooked: bool) -> Self {
        Self {
            hooked,
            watchers: RefCell::new(FxHashMap::default()),
            listeners: RefCell::new(Vec::new()),
            key_vnodes: RefCell::new(FxHashMap::default()),
            vnode_keys: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn is_hooked(&self) -> bool {
        self.hooked
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Record a read of `key`
    ///
    /// Outside a render (or on a hookless observer) this is a no-op.
    pub fn use_prop(self: &Rc<Self>, key: &Key) {
        if !self.hooked {
            return;
        }
        let Some(vnode) = context::processing_vnode() else {
            return;
        };

        self.key_vnodes
            .borrow_mut()
            .entry(key.clone())
            .or_default()
            .insert(vnode.clone());
        self.vnode_keys
            .borrow_mut()
            .entry(vnode.clone())
            .or_default()
            .insert(key.clone());

        context::record_observer(&vnode, self);
    }

    /// Components currently depending on `key`
    pub fn dependents(&self, key: &Key) -> Vec<VNodeRef> {
        self.key_vnodes
            .borrow()
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `vnode` depends on any key of this observer
    pub fn is_tracking(&self, vnode: &VNodeRef) -> bool {
        self.vnode_keys.borrow().contains_key(vnode)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Invoke the watchers registered for `key`
    pub fn trigger_watchers(&self, key: &Key, old: &Value, new: &Value, mutation: &Mutation) {
        let watchers: WatcherList = match self.watchers.borrow().get(key) {
            Some(list) => list.clone(),
            None => return,
        };
        for (_, watcher) in watchers {
            watcher(key, old, new, mutation);
        }
    }

    /// Notify dependents of `key`, then every listener
    pub fn set_prop(&self, key: &Key, change: &Change) {
        self.set_props(std::slice::from_ref(key), change);
    }

    /// Notify dependents of each key, then every listener once
    pub fn set_props(&self, keys: &[Key], change: &Change) {
        let vnodes: IndexSet<VNodeRef> = {
            let key_vnodes = self.key_vnodes.borrow();
            keys.iter()
                .filter_map(|key| key_vnodes.get(key))
                .flat_map(|set| set.iter().cloned())
                .collect()
        };
        tracing::trace!(keys = keys.len(), vnodes = vnodes.len(), "observer set_props");

        for vnode in vnodes {
            vnode.schedule_update();
        }
        self.notify_listeners(change);
    }

    /// Notify every dependent regardless of key, then every listener
    pub fn all_change(&self, change: &Change) {
        let vnodes: Vec<VNodeRef> = self.vnode_keys.borrow().keys().cloned().collect();
        for vnode in vnodes {
            vnode.schedule_update();
        }
        self.notify_listeners(change);
    }

    fn notify_listeners(&self, change: &Change) {
        let listeners: Vec<Rc<ChangeListener>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(change);
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Register a watcher for `key`
    pub fn watch(&self, key: Key, callback: Rc<WatchCallback>) -> WatcherId {
        let id = WatcherId(next_id());
        self.watchers
            .borrow_mut()
            .entry(key)
            .or_default()
            .push((id, callback));
        id
    }

    /// Remove a watcher; returns whether it was registered
    pub fn unwatch(&self, key: &Key, id: WatcherId) -> bool {
        let mut watchers = self.watchers.borrow_mut();
        let Some(list) = watchers.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            watchers.remove(key);
        }
        removed
    }

    pub fn watcher_count(&self, key: &Key) -> usize {
        self.watchers.borrow().get(key).map_or(0, |list| list.len())
    }

    pub fn add_listener(&self, listener: Rc<ChangeListener>) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Forget every dependency recorded for `vnode`
    ///
    /// Idempotent: clearing an unknown component does nothing.
    pub fn clear_by_vnode(&self, vnode: &VNodeRef) {
        let Some(keys) = self.vnode_keys.borrow_mut().remove(vnode) else {
            return;
        };
        let mut key_vnodes = self.key_vnodes.borrow_mut();
        for key in keys {
            if let Some(set) = key_vnodes.get_mut(&key) {
                set.shift_remove(vnode);
                if set.is_empty() {
                    key_vnodes.remove(&key);
                }
            }
        }
    }
}

impl Default for Observer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("hooked", &self.hooked)
            .field("watched_keys", &self.watchers.borrow().len())
            .field("listeners", &self.listeners.borrow().len())
            .field("dependents", &self.vnode_keys.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{
        clear_rendering_context, set_rendering_context, RenderingContext, VNode,
    };
    use std::cell::Cell;

    struct Counter(Cell<usize>);

    impl VNode for Counter {
        fn schedule_update(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    struct Rendering(RefCell<Option<VNodeRef>>);

    impl RenderingContext for Rendering {
        fn processing_vnode(&self) -> Option<VNodeRef> {
            self.0.borrow().clone()
        }

        fn register_cleanup(&self, _vnode: &VNodeRef, _cleanup: Box<dyn FnOnce()>) {}
    }

    fn rendering(vnode: &VNodeRef) -> Rc<Rendering> {
        let ctx = Rc::new(Rendering(RefCell::new(Some(vnode.clone()))));
        set_rendering_context(ctx.clone());
        ctx
    }

    #[test]
    fn test_use_prop_outside_render_is_noop() {
        clear_rendering_context();
        let observer = Rc::new(Observer::new());
        observer.use_prop(&Key::prop("a"));
        assert!(observer.dependents(&Key::prop("a")).is_empty());
    }

    #[test]
    fn test_use_prop_records_and_set_prop_schedules() {
        let node = Rc::new(Counter(Cell::new(0)));
        let vnode = VNodeRef::new(node.clone());
        let ctx = rendering(&vnode);

        let observer = Rc::new(Observer::new());
        observer.use_prop(&Key::prop("a"));
        *ctx.0.borrow_mut() = None;

        assert_eq!(observer.dependents(&Key::prop("a")), vec![vnode.clone()]);
        assert!(observer.is_tracking(&vnode));

        observer.set_prop(&Key::prop("b"), &Change::default());
        assert_eq!(node.0.get(), 0);
        observer.set_prop(&Key::prop("a"), &Change::default());
        assert_eq!(node.0.get(), 1);

        clear_rendering_context();
    }

    #[test]
    fn test_hookless_never_records() {
        let vnode = VNodeRef::new(Rc::new(Counter(Cell::new(0))));
        let _ctx = rendering(&vnode);

        let observer = Rc::new(Observer::hookless());
        observer.use_prop(&Key::prop("a"));
        assert!(!observer.is_tracking(&vnode));

        clear_rendering_context();
    }

    #[test]
    fn test_clear_by_vnode_is_idempotent() {
        let node = Rc::new(Counter(Cell::new(0)));
        let vnode = VNodeRef::new(node.clone());
        let _ctx = rendering(&vnode);

        let observer = Rc::new(Observer::new());
        observer.use_prop(&Key::prop("a"));
        clear_rendering_context();

        observer.clear_by_vnode(&vnode);
        observer.clear_by_vnode(&vnode);
        assert!(!observer.is_tracking(&vnode));

        observer.all_change(&Change::default());
        assert_eq!(node.0.get(), 0);
    }

    #[test]
    fn test_watchers_and_listeners() {
        let observer = Observer::hookless();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let log = seen.clone();
        let id = observer.watch(
            Key::prop("a"),
            Rc::new(move |key: &Key, old: &Value, new: &Value, _: &Mutation| {
                log.borrow_mut()
                    .push(format!("{}: {} -> {}", key, old, new));
            }),
        );
        assert_eq!(observer.watcher_count(&Key::prop("a")), 1);

        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let listener = observer.add_listener(Rc::new(move |_: &Change| {
            counter.set(counter.get() + 1);
        }));

        observer.trigger_watchers(
            &Key::prop("a"),
            &Value::from(1),
            &Value::from(2),
            &Mutation::Unchanged,
        );
        observer.set_props(&[Key::prop("a"), Key::Entries], &Change::default());

        assert_eq!(*seen.borrow(), vec!["a: 1 -> 2".to_string()]);
        assert_eq!(calls.get(), 1);

        assert!(observer.unwatch(&Key::prop("a"), id));
        assert!(!observer.unwatch(&Key::prop("a"), id));
        assert!(observer.remove_listener(listener));
        observer.set_prop(&Key::prop("a"), &Change::default());
        assert_eq!(calls.get(), 1);
    }
}
