//! Blinc Store
//!
//! Fine-grained reactive state for Blinc UIs. State is an object graph of
//! arbitrary shape; components read it through proxies that remember exactly
//! which keys each component touched, and writes notify only those readers.
//!
//! # Features
//!
//! - **Identity-preserving proxies**: one canonical proxy per container, for
//!   plain objects, arrays, maps, sets, weak maps and weak sets
//! - **Precise notifications**: per-key watchers, generic listeners, and change
//!   records carrying the full path from the store root
//! - **Stores**: actions, a serialized action queue, computed values and
//!   subscriptions built from a declarative [`StoreConfig`]
//! - **Lifecycle cleanup**: unmounted components are dropped from every
//!   observer they read
//!
//! # Example
//!
//! ```ignore
//! use blinc_store::{create_store, StoreConfig, Value};
//! use serde_json::json;
//!
//! let todos = create_store(
//!     StoreConfig::new(json!({"items": [], "filter": "all"}))
//!         .id("todos")
//!         .action("add", |_, state, payload| {
//!             let items = state.get("items");
//!             items.as_array().unwrap().push(payload[0].clone())?;
//!             Ok(Value::Undefined)
//!         }),
//! )?;
//!
//! // Inside a component render:
//! let store = todos.use_store();
//! store.subscribe(|change| println!("changed at {:?}", change.path()));
//! store.call("add", &[Value::from("write docs")])?;
//! ```
//!
//! # Threading
//!
//! Stores are single-threaded (`Rc`-based). Observers, proxies, the
//! registry, and the installed collaborators are all per thread.

pub mod context;
pub mod devtools;
pub mod diff;
pub mod error;
pub mod observer;
pub mod proxy;
pub mod queue;
pub mod registry;
pub mod slots;
pub mod store;
pub mod value;

pub use context::{
    clear_rendering_context, clear_vnode_observers, hook_store, set_rendering_context,
    RenderingContext, VNode, VNodeRef,
};
pub use devtools::{clear_devtools, set_devtools, DevtoolsEvent, DevtoolsSink};
pub use diff::{is_same, resolve_mutation, Change, Mutation};
pub use error::{Result, StoreError};
pub use observer::{ChangeListener, ListenerId, Observer, WatchCallback, WatcherId};
pub use proxy::{
    create_proxy, noop_listener, wrap, ArrayProxy, CollectionProxy, ObjectProxy, Proxy, Reactive,
    WatchHandle,
};
pub use queue::QueuedCall;
pub use registry::{
    clear_all_stores, clear_store, create_store, get_all_stores, get_store, registry, use_store,
    StoreRegistry,
};
pub use slots::ContainerId;
pub use store::{
    ActionFn, ActionOutput, Actions, Computed, ComputedFn, LocalFuture, Queue, Store, StoreConfig,
    StoreHook, StoreOptions, PENDING_KEY,
};
pub use value::{
    CollectionKind, Container, EntryKey, Key, RawData, Shape, Value, WeakContainer, MAX_ARRAY_INDEX,
};
