//! Blinc Store - reactive state with actions, queued actions and computed values
//!
//! A store turns a declarative [`StoreConfig`] into a live object:
//!
//! - **state** (`$s`): the root [`ObjectProxy`]; reads inside a render
//!   subscribe the rendering component, writes notify precisely.
//! - **actions** (`$a`): run immediately, whatever the queue is doing.
//! - **queue** (`$queue`): the same actions, serialized one at a time in call
//!   order (see [`queue`](crate::queue)).
//! - **computed** (`$c`): pure projections over a read-only view of the state,
//!   re-evaluated on every access.
//! - **subscriptions** (`$subscribe`): listeners receiving every state change.
//!
//! # Example
//!
//! ```ignore
//! use blinc_store::{create_store, StoreConfig, Value};
//! use serde_json::json;
//!
//! let counter = create_store(
//!     StoreConfig::new(json!({"count": 0}))
//!         .id("counter")
//!         .action("increment", |_, state, _| {
//!             let next = state.get("count").as_f64().unwrap_or(0.0) + 1.0;
//!             state.set("count", next)?;
//!             Ok(Value::Undefined)
//!         })
//!         .computed("double", |_, state| {
//!             Ok(Value::from(state.get("count").as_f64().unwrap_or(0.0) * 2.0))
//!         }),
//! )?;
//!
//! let store = counter.use_store();
//! store.call("increment", &[])?;
//! assert_eq!(store.computed().get("double")?.as_f64(), Some(2.0));
//! ```

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::context;
use crate::devtools::{self, DevtoolsEvent};
use crate::diff::Change;
use crate::error::{Result, StoreError};
use crate::observer::{ChangeListener, ListenerId};
use crate::proxy::{create_proxy, ObjectProxy, Reactive};
use crate::queue::{ActionQueue, QueuedCall};
use crate::value::{Shape, Value};

/// Future returned by an asynchronous action
pub type LocalFuture = Pin<Box<dyn Future<Output = Result<Value>>>>;

/// Action body: `(store, state, payload)`
pub type ActionFn = dyn Fn(&Store, &ObjectProxy, &[Value]) -> ActionOutput;

/// Computed body: `(store, read-only state)`
pub type ComputedFn = dyn Fn(&Store, &ObjectProxy) -> Result<Reactive>;

/// Name of the state key mirroring the queue's pending timestamp
///
/// Created by the first queued call; `false` once the queue drains.
pub const PENDING_KEY: &str = "$pending";

/// What an action returned
pub enum ActionOutput {
    /// Finished synchronously
    Ready(Result<Value>),
    /// Still running; settles when the future completes
    Pending(LocalFuture),
}

impl ActionOutput {
    pub fn ready(value: impl Into<Value>) -> Self {
        ActionOutput::Ready(Ok(value.into()))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ActionOutput::Pending(_))
    }

    /// Wait for the action's result
    pub async fn settle(self) -> Result<Value> {
        match self {
            ActionOutput::Ready(result) => result,
            ActionOutput::Pending(future) => future.await,
        }
    }
}

impl From<Result<Value>> for ActionOutput {
    fn from(result: Result<Value>) -> Self {
        ActionOutput::Ready(result)
    }
}

impl fmt::Debug for ActionOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutput::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            ActionOutput::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Store behaviour switches
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// State reads never subscribe rendering components; used by adapters
    /// that keep their own subscriber lists
    pub is_redux_adapter: bool,
    /// `use_store` does not register component cleanup
    pub suppress_hooks: bool,
}

/// Declarative store definition
#[derive(Clone)]
pub struct StoreConfig {
    pub(crate) id: Option<String>,
    pub(crate) state: Value,
    pub(crate) actions: IndexMap<String, Rc<ActionFn>>,
    pub(crate) computed: IndexMap<String, Rc<ComputedFn>>,
    pub(crate) options: StoreOptions,
}

impl StoreConfig {
    /// Start a config from the initial state (must be a plain object)
    pub fn new(state: impl Into<Value>) -> Self {
        Self {
            id: None,
            state: state.into(),
            actions: IndexMap::new(),
            computed: IndexMap::new(),
            options: StoreOptions::default(),
        }
    }

    /// Registry id; generated when omitted
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Synchronous action
    pub fn action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&Store, &ObjectProxy, &[Value]) -> Result<Value> + 'static,
    {
        let action: Rc<ActionFn> = Rc::new(move |store: &Store, state: &ObjectProxy, payload: &[Value]| {
            ActionOutput::Ready(action(store, state, payload))
        });
        self.actions.insert(name.into(), action);
        self
    }

    /// Asynchronous action
    pub fn async_action<F, Fut>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&Store, &ObjectProxy, &[Value]) -> Fut + 'static,
        Fut: Future<Output = Result<Value>> + 'static,
    {
        let action: Rc<ActionFn> = Rc::new(move |store: &Store, state: &ObjectProxy, payload: &[Value]| {
            ActionOutput::Pending(Box::pin(action(store, state, payload)))
        });
        self.actions.insert(name.into(), action);
        self
    }

    /// Computed value over a read-only view of the state
    pub fn computed<F, R>(mut self, name: impl Into<String>, computed: F) -> Self
    where
        F: Fn(&Store, &ObjectProxy) -> Result<R> + 'static,
        R: Into<Reactive>,
    {
        let computed: Rc<ComputedFn> =
            Rc::new(move |store: &Store, state: &ObjectProxy| computed(store, state).map(Into::into));
        self.computed.insert(name.into(), computed);
        self
    }

    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn get_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn get_options(&self) -> StoreOptions {
        self.options
    }

    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn computed_names(&self) -> impl Iterator<Item = &str> {
        self.computed.keys().map(String::as_str)
    }

    /// Reject configs a store cannot be built from
    pub fn validate(&self) -> Result<()> {
        let state = match &self.state {
            Value::Ref(container) if container.shape() == Shape::Object => container,
            other => {
                return Err(StoreError::InvalidConfig(format!(
                    "state must be a plain object, got {}",
                    other.type_name()
                )))
            }
        };

        let state_keys: Vec<String> = match &*state.borrow() {
            crate::value::RawData::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };

        let mut seen = FxHashSet::default();
        let members = state_keys
            .iter()
            .map(|name| (name.as_str(), "state key"))
            .chain(self.actions.keys().map(|name| (name.as_str(), "action")))
            .chain(self.computed.keys().map(|name| (name.as_str(), "computed value")));
        for (name, role) in members {
            if name.starts_with('$') && name != PENDING_KEY {
                return Err(StoreError::InvalidConfig(format!(
                    "{} `{}` uses the reserved `$` prefix",
                    role, name
                )));
            }
            if !seen.insert(name) {
                return Err(StoreError::InvalidConfig(format!(
                    "{} `{}` collides with another store member",
                    role, name
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("id", &self.id)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("computed", &self.computed.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

// =============================================================================
// STORE
// =============================================================================

type Subscribers = Rc<RefCell<Vec<(ListenerId, Rc<ChangeListener>)>>>;

pub(crate) struct StoreInner {
    id: String,
    state: ObjectProxy,
    config: StoreConfig,
    listeners: Subscribers,
    pub(crate) queue: ActionQueue,
}

/// A live store
///
/// Cloning is cheap and yields a handle to the same store.
#[derive(Clone)]
pub struct Store(pub(crate) Rc<StoreInner>);

impl Store {
    /// Build a store from a validated config
    pub(crate) fn build(id: String, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let Value::Ref(raw) = config.state.clone() else {
            return Err(StoreError::InvalidConfig("state must be a plain object".into()));
        };

        let listeners: Subscribers = Rc::new(RefCell::new(Vec::new()));
        let root_listener: Rc<ChangeListener> = {
            let listeners = listeners.clone();
            let store_id = id.clone();
            Rc::new(move |change: &Change| {
                devtools::emit(|| DevtoolsEvent::StateChange {
                    store: store_id.clone(),
                    path: change.path().iter().map(ToString::to_string).collect(),
                    mutation: devtools::to_json(&change.mutation),
                });
                let subscribers: Vec<Rc<ChangeListener>> = listeners
                    .borrow()
                    .iter()
                    .map(|(_, listener)| listener.clone())
                    .collect();
                for subscriber in subscribers {
                    subscriber(change);
                }
            })
        };

        let hooked = !config.options.is_redux_adapter;
        let state = create_proxy(raw, root_listener, hooked)
            .as_object()
            .cloned()
            .ok_or_else(|| StoreError::InvalidConfig("state must be a plain object".into()))?;

        tracing::debug!(store = %id, actions = config.actions.len(), computed = config.computed.len(), "store created");
        Ok(Store(Rc::new(StoreInner {
            id,
            state,
            config,
            listeners,
            queue: ActionQueue::default(),
        })))
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// Root state proxy (`$s`)
    pub fn state(&self) -> &ObjectProxy {
        &self.0.state
    }

    /// The config the store was built from (`$config`)
    pub fn config(&self) -> &StoreConfig {
        &self.0.config
    }

    pub fn options(&self) -> StoreOptions {
        self.0.config.options
    }

    /// Immediate action dispatch (`$a`)
    pub fn actions(&self) -> Actions<'_> {
        Actions { store: self }
    }

    /// Serialized action dispatch (`$queue`)
    pub fn queue(&self) -> Queue<'_> {
        Queue { store: self }
    }

    /// Computed getters (`$c`)
    pub fn computed(&self) -> Computed<'_> {
        Computed { store: self }
    }

    /// Run an action immediately (`store.action(...)`)
    pub fn call(&self, action: &str, payload: &[Value]) -> Result<ActionOutput> {
        self.actions().call(action, payload)
    }

    /// Read a computed value or a top-level state key
    pub fn get(&self, name: &str) -> Result<Reactive> {
        if self.0.config.computed.contains_key(name) {
            return self.computed().get(name);
        }
        Ok(self.0.state.get(name))
    }

    /// Write a top-level state key
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        if self.0.config.actions.contains_key(name) || self.0.config.computed.contains_key(name) {
            return Err(StoreError::NotWritable {
                member: name.to_string(),
            });
        }
        self.0.state.set(name, value)
    }

    /// Receive every state change (`$subscribe`)
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Change) + 'static,
    {
        let id = ListenerId::next();
        self.0.listeners.borrow_mut().push((id, Rc::new(listener)));
        devtools::emit(|| DevtoolsEvent::Subscribed {
            store: self.0.id.clone(),
            listener: id.as_u64(),
        });
        id
    }

    /// Stop a subscription (`$unsubscribe`); returns whether it existed
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let removed = {
            let mut listeners = self.0.listeners.borrow_mut();
            let before = listeners.len();
            listeners.retain(|(existing, _)| *existing != id);
            listeners.len() != before
        };
        if removed {
            devtools::emit(|| DevtoolsEvent::Unsubscribed {
                store: self.0.id.clone(),
                listener: id.as_u64(),
            });
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.listeners.borrow().len()
    }

    /// Start time (epoch ms) of the queued run in flight, read from `$pending`
    pub fn pending(&self) -> Option<f64> {
        self.0.state.get(PENDING_KEY).as_f64()
    }

    /// Whether a queued action is in flight
    pub fn is_pending(&self) -> bool {
        self.0.queue.is_pending()
    }

    /// Number of queued calls waiting behind the one in flight
    pub fn queued_len(&self) -> usize {
        self.0.queue.planned_len()
    }

    pub fn ptr_eq(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Invoke an action body without devtools reporting
    pub(crate) fn invoke(&self, action: &str, payload: &[Value]) -> Result<ActionOutput> {
        let body = self
            .0
            .config
            .actions
            .get(action)
            .cloned()
            .ok_or_else(|| StoreError::UnknownAction {
                store: self.0.id.clone(),
                action: action.to_string(),
            })?;
        Ok(body(self, &self.0.state, payload))
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.0.id)
            .field("pending", &self.is_pending())
            .finish()
    }
}

// =============================================================================
// VIEWS
// =============================================================================

/// Immediate action dispatch
pub struct Actions<'a> {
    store: &'a Store,
}

impl Actions<'_> {
    /// Run `action` now, bypassing the queue
    pub fn call(&self, action: &str, payload: &[Value]) -> Result<ActionOutput> {
        let store = self.store;
        devtools::emit(|| DevtoolsEvent::Action {
            store: store.id().to_string(),
            action: action.to_string(),
            payload: devtools::to_json(payload),
        });
        tracing::trace!(store = store.id(), action, "action");
        store.invoke(action, payload)
    }

    pub fn contains(&self, action: &str) -> bool {
        self.store.0.config.actions.contains_key(action)
    }

    pub fn names(&self) -> Vec<&str> {
        self.store.0.config.action_names().collect()
    }
}

/// Serialized action dispatch
pub struct Queue<'a> {
    store: &'a Store,
}

impl Queue<'_> {
    /// Enqueue `action`; the returned future resolves once it has run
    ///
    /// # Panics
    ///
    /// Asynchronous actions are driven with `tokio::task::spawn_local`, which
    /// panics outside a `tokio::task::LocalSet`.
    pub fn call(&self, action: &str, payload: &[Value]) -> QueuedCall {
        ActionQueue::enqueue(self.store, action, payload.to_vec())
    }
}

/// Computed getters
pub struct Computed<'a> {
    store: &'a Store,
}

impl Computed<'_> {
    /// Evaluate `name` against a read-only view of the current state
    pub fn get(&self, name: &str) -> Result<Reactive> {
        let store = self.store;
        let body = store
            .0
            .config
            .computed
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownComputed {
                store: store.id().to_string(),
                name: name.to_string(),
            })?;
        body(store, &store.0.state.read_only())
    }

    pub fn names(&self) -> Vec<&str> {
        self.store.0.config.computed_names().collect()
    }
}

// =============================================================================
// HOOK
// =============================================================================

/// Accessor returned by `create_store`
///
/// Calling [`use_store`](Self::use_store) while a component renders registers
/// that component's dependency cleanup.
#[derive(Clone, Debug)]
pub struct StoreHook {
    store: Store,
}

impl StoreHook {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    /// Get the store, hooking the rendering component's lifecycle
    pub fn use_store(&self) -> Store {
        if !self.store.options().suppress_hooks {
            context::hook_store();
        }
        self.store.clone()
    }

    /// Get the store without touching the rendering context
    pub fn store(&self) -> &Store {
        &self.store
    }
}
