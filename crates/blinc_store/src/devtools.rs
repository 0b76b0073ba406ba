//! Developer-tools event sink
//!
//! Stores describe their lifecycle as [`DevtoolsEvent`]s. A sink installed with
//! [`set_devtools`] receives them; without one, events are never built.
//!
//! Emission is isolated from the mutation path: serialization failures and
//! panicking sinks are logged and swallowed.

use serde::Serialize;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use crate::value::{Container, Value};

/// Structured store event
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DevtoolsEvent {
    Initialized {
        store: String,
        state: serde_json::Value,
    },
    Action {
        store: String,
        action: String,
        payload: serde_json::Value,
    },
    ActionQueued {
        store: String,
        action: String,
        payload: serde_json::Value,
    },
    QueuePending {
        store: String,
        action: String,
    },
    QueueFinished {
        store: String,
        ended_at: u64,
        duration_ms: u64,
    },
    StateChange {
        store: String,
        path: Vec<String>,
        mutation: serde_json::Value,
    },
    Subscribed {
        store: String,
        listener: u64,
    },
    Unsubscribed {
        store: String,
        listener: u64,
    },
}

impl DevtoolsEvent {
    /// Id of the store the event belongs to
    pub fn store(&self) -> &str {
        match self {
            DevtoolsEvent::Initialized { store, .. }
            | DevtoolsEvent::Action { store, .. }
            | DevtoolsEvent::ActionQueued { store, .. }
            | DevtoolsEvent::QueuePending { store, .. }
            | DevtoolsEvent::QueueFinished { store, .. }
            | DevtoolsEvent::StateChange { store, .. }
            | DevtoolsEvent::Subscribed { store, .. }
            | DevtoolsEvent::Unsubscribed { store, .. } => store,
        }
    }

    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self {
            DevtoolsEvent::Initialized { .. } => "INITIALIZED",
            DevtoolsEvent::Action { .. } => "ACTION",
            DevtoolsEvent::ActionQueued { .. } => "ACTION_QUEUED",
            DevtoolsEvent::QueuePending { .. } => "QUEUE_PENDING",
            DevtoolsEvent::QueueFinished { .. } => "QUEUE_FINISHED",
            DevtoolsEvent::StateChange { .. } => "STATE_CHANGE",
            DevtoolsEvent::Subscribed { .. } => "SUBSCRIBED",
            DevtoolsEvent::Unsubscribed { .. } => "UNSUBSCRIBED",
        }
    }
}

/// Receiver for store events
pub trait DevtoolsSink {
    fn send(&self, event: &DevtoolsEvent);

    /// Whether a panel is attached and wants before/after snapshots
    ///
    /// Snapshots deep-copy state on every write, so they are only taken when
    /// this returns true.
    fn is_panel_active(&self) -> bool {
        false
    }
}

thread_local! {
    static SINK: RefCell<Option<Rc<dyn DevtoolsSink>>> = const { RefCell::new(None) };
}

/// Install the devtools sink for this thread
pub fn set_devtools(sink: Rc<dyn DevtoolsSink>) {
    SINK.with(|slot| *slot.borrow_mut() = Some(sink));
}

/// Remove the devtools sink
pub fn clear_devtools() {
    SINK.with(|slot| slot.borrow_mut().take());
}

fn sink() -> Option<Rc<dyn DevtoolsSink>> {
    SINK.try_with(|slot| slot.borrow().clone()).ok().flatten()
}

pub fn is_attached() -> bool {
    sink().is_some()
}

pub fn is_panel_active() -> bool {
    sink().is_some_and(|sink| sink.is_panel_active())
}

/// Build and deliver an event if a sink is installed
pub(crate) fn emit(event: impl FnOnce() -> DevtoolsEvent) {
    let Some(sink) = sink() else {
        return;
    };
    let event = event();
    let kind = event.kind();
    if catch_unwind(AssertUnwindSafe(|| sink.send(&event))).is_err() {
        tracing::warn!(kind, store = event.store(), "devtools sink panicked");
    }
}

/// JSON for an event payload; failures are logged and yield `null`
pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|err| {
        tracing::warn!(%err, "devtools serialization failed");
        serde_json::Value::Null
    })
}

/// Pre-mutation snapshot of `container`, taken only for an active panel
pub(crate) fn capture(container: &Container) -> Option<Value> {
    if !is_panel_active() {
        return None;
    }
    match Value::Ref(container.clone()).snapshot() {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            tracing::warn!(%err, "devtools snapshot failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Panicky;

    impl DevtoolsSink for Panicky {
        fn send(&self, _event: &DevtoolsEvent) {
            panic!("sink failure");
        }
    }

    #[derive(Default)]
    struct Recorder(RefCell<Vec<DevtoolsEvent>>);

    impl DevtoolsSink for Recorder {
        fn send(&self, event: &DevtoolsEvent) {
            self.0.borrow_mut().push(event.clone());
        }
    }

    #[test]
    fn test_event_wire_format() {
        let event = DevtoolsEvent::QueuePending {
            store: "counter".into(),
            action: "increment".into(),
        };
        assert_eq!(
            to_json(&event),
            json!({"type": "QUEUE_PENDING", "store": "counter", "action": "increment"})
        );
    }

    #[test]
    fn test_emit_without_sink_skips_building() {
        clear_devtools();
        emit(|| panic!("event must not be built"));
    }

    #[test]
    fn test_emit_delivers() {
        let recorder = Rc::new(Recorder::default());
        set_devtools(recorder.clone());
        emit(|| DevtoolsEvent::Subscribed {
            store: "s".into(),
            listener: 1,
        });
        clear_devtools();
        assert_eq!(recorder.0.borrow().len(), 1);
        assert_eq!(recorder.0.borrow()[0].kind(), "SUBSCRIBED");
    }

    #[test]
    fn test_panicking_sink_is_isolated() {
        set_devtools(Rc::new(Panicky));
        emit(|| DevtoolsEvent::Unsubscribed {
            store: "s".into(),
            listener: 1,
        });
        clear_devtools();
    }

    #[test]
    fn test_capture_requires_active_panel() {
        let container = Container::array(vec![Value::from(1)]);
        set_devtools(Rc::new(Recorder::default()));
        assert!(capture(&container).is_none());
        clear_devtools();
    }
}
