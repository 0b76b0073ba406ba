//! Store registry
//!
//! A [`StoreRegistry`] owns stores by id. Every thread has a default registry
//! behind the free functions ([`create_store`], [`get_store`], ...); tests and
//! embedders that want isolation can create their own.
//!
//! Registering an id that already exists replaces the old entry (with a
//! warning). Clearing an entry does not revoke proxies or queued actions that
//! are still held elsewhere.

use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::devtools::{self, DevtoolsEvent};
use crate::error::Result;
use crate::store::{Store, StoreConfig, StoreHook};
use crate::value::Value;

#[derive(Default)]
struct RegistryInner {
    stores: RefCell<IndexMap<String, Store>>,
    unnamed: Cell<u64>,
}

/// Owner of stores keyed by id
#[derive(Clone, Default)]
pub struct StoreRegistry {
    inner: Rc<RegistryInner>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `config` and register it
    ///
    /// Returns the accessor; call [`StoreHook::use_store`] inside components.
    pub fn create_store(&self, config: StoreConfig) -> Result<StoreHook> {
        config.validate()?;
        let id = match config.get_id() {
            Some(id) => id.to_string(),
            None => self.next_unnamed(),
        };

        let store = Store::build(id.clone(), config)?;
        let replaced = self
            .inner
            .stores
            .borrow_mut()
            .insert(id.clone(), store.clone());
        if replaced.is_some() {
            tracing::warn!(store = %id, "store id already registered; replacing previous store");
        }

        devtools::emit(|| DevtoolsEvent::Initialized {
            store: id.clone(),
            state: devtools::to_json(&Value::from(store.state().clone())),
        });
        Ok(StoreHook::new(store))
    }

    fn next_unnamed(&self) -> String {
        loop {
            let n = self.inner.unnamed.get();
            self.inner.unnamed.set(n + 1);
            let id = format!("UNNAMED_STORE_{}", n);
            if !self.inner.stores.borrow().contains_key(&id) {
                return id;
            }
        }
    }

    /// Store registered under `id`
    pub fn get_store(&self, id: &str) -> Option<Store> {
        self.inner.stores.borrow().get(id).cloned()
    }

    /// Store registered under `id`, hooking the rendering component
    pub fn use_store(&self, id: &str) -> Option<Store> {
        let store = self.get_store(id)?;
        Some(StoreHook::new(store).use_store())
    }

    /// Every registered store, in registration order
    pub fn all_stores(&self) -> Vec<Store> {
        self.inner.stores.borrow().values().cloned().collect()
    }

    /// Remove `id`; returns whether it was registered
    pub fn clear_store(&self, id: &str) -> bool {
        let removed = self.inner.stores.borrow_mut().shift_remove(id);
        if removed.is_some() {
            tracing::debug!(store = id, "store cleared");
        }
        removed.is_some()
    }

    pub fn clear(&self) {
        let stores = std::mem::take(&mut *self.inner.stores.borrow_mut());
        tracing::debug!(count = stores.len(), "all stores cleared");
    }

    pub fn len(&self) -> usize {
        self.inner.stores.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Thread-default registry
// =============================================================================

thread_local! {
    static DEFAULT_REGISTRY: StoreRegistry = StoreRegistry::new();
}

/// This thread's default registry
pub fn registry() -> StoreRegistry {
    DEFAULT_REGISTRY.with(Clone::clone)
}

/// Create and register a store in the default registry
///
/// # Example
///
/// ```ignore
/// let todos = create_store(StoreConfig::new(json!({"items": []})).id("todos"))?;
/// let store = todos.use_store();
/// ```
pub fn create_store(config: StoreConfig) -> Result<StoreHook> {
    registry().create_store(config)
}

pub fn get_store(id: &str) -> Option<Store> {
    registry().get_store(id)
}

pub fn use_store(id: &str) -> Option<Store> {
    registry().use_store(id)
}

pub fn get_all_stores() -> Vec<Store> {
    registry().all_stores()
}

pub fn clear_store(id: &str) -> bool {
    registry().clear_store(id)
}

pub fn clear_all_stores() {
    registry().clear()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devtools::{clear_devtools, set_devtools, DevtoolsSink};
    use crate::error::StoreError;
    use serde_json::json;

    #[test]
    fn test_create_and_lookup() {
        let registry = StoreRegistry::new();
        let hook = registry
            .create_store(StoreConfig::new(json!({"a": 1})).id("s"))
            .unwrap();
        let store = hook.use_store();
        assert_eq!(store.id(), "s");
        assert!(registry.get_store("s").unwrap().ptr_eq(&store));
        assert!(hook.use_store().ptr_eq(&store));
        assert!(registry.get_store("missing").is_none());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let registry = StoreRegistry::new();
        let a = registry.create_store(StoreConfig::new(json!({}))).unwrap();
        let b = registry.create_store(StoreConfig::new(json!({}))).unwrap();
        assert_ne!(a.store().id(), b.store().id());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_id_replaces() {
        let registry = StoreRegistry::new();
        let first = registry
            .create_store(StoreConfig::new(json!({"v": 1})).id("dup"))
            .unwrap();
        let second = registry
            .create_store(StoreConfig::new(json!({"v": 2})).id("dup"))
            .unwrap();

        let current = registry.get_store("dup").unwrap();
        assert!(current.ptr_eq(second.store()));
        assert!(!current.ptr_eq(first.store()));
        assert_eq!(registry.len(), 1);
        // The replaced store keeps working for whoever still holds it
        assert_eq!(first.store().get("v").unwrap().as_f64(), Some(1.0));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let registry = StoreRegistry::new();
        let err = registry
            .create_store(StoreConfig::new("not an object"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_store() {
        let registry = StoreRegistry::new();
        registry
            .create_store(StoreConfig::new(json!({})).id("gone"))
            .unwrap();
        assert!(registry.clear_store("gone"));
        assert!(!registry.clear_store("gone"));
        assert!(registry.get_store("gone").is_none());

        registry
            .create_store(StoreConfig::new(json!({})).id("x"))
            .unwrap();
        registry.clear();
        assert!(registry.all_stores().is_empty());
    }

    #[test]
    fn test_default_registry_functions() {
        clear_all_stores();
        create_store(StoreConfig::new(json!({"n": 1})).id("global")).unwrap();
        assert!(get_store("global").is_some());
        assert!(use_store("global").is_some());
        assert_eq!(get_all_stores().len(), 1);
        assert!(clear_store("global"));
        assert!(get_all_stores().is_empty());
    }

    #[derive(Default)]
    struct Initialized(RefCell<Vec<serde_json::Value>>);

    impl DevtoolsSink for Initialized {
        fn send(&self, event: &DevtoolsEvent) {
            if let DevtoolsEvent::Initialized { state, .. } = event {
                self.0.borrow_mut().push(state.clone());
            }
        }
    }

    #[test]
    fn test_initialized_event_carries_state() {
        let sink = Rc::new(Initialized::default());
        set_devtools(sink.clone());
        StoreRegistry::new()
            .create_store(StoreConfig::new(json!({"n": 1})).id("init"))
            .unwrap();
        clear_devtools();

        assert_eq!(
            *sink.0.borrow(),
            vec![json!({"n": 1})]
        );
    }
}
