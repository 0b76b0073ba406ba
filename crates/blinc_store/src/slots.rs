//! Per-container side table
//!
//! Each raw container gets a [`ContainerId`] key in a thread-local slot map.
//! The slot holds the container's observer and its cached proxy so that
//! neither is ever stored on the raw data itself.
//!
//! Slots are released when the container is dropped. A release that happens
//! while the table is borrowed (a drop nested inside another table operation)
//! is deferred and applied on the next table access.

use slotmap::{new_key_type, SlotMap};
use std::cell::RefCell;
use std::rc::Rc;

use crate::observer::Observer;
use crate::proxy::ProxyCore;

new_key_type! {
    /// Identity of a raw container
    pub struct ContainerId;
}

#[derive(Default)]
struct Slot {
    observer: Option<Rc<Observer>>,
    proxy: Option<Rc<ProxyCore>>,
}

thread_local! {
    static SLOTS: RefCell<SlotMap<ContainerId, Slot>> = RefCell::new(SlotMap::with_key());
    static DEFERRED: RefCell<Vec<ContainerId>> = const { RefCell::new(Vec::new()) };
}

/// Run `f` against the table, applying deferred releases first
fn with_slots<R>(f: impl FnOnce(&mut SlotMap<ContainerId, Slot>) -> R) -> R {
    let (result, released) = SLOTS.with(|slots| {
        let mut slots = slots.borrow_mut();
        let released = drain_deferred(&mut slots);
        (f(&mut slots), released)
    });
    // Released slots may own the last handle to other containers
    drop(released);
    result
}

fn drain_deferred(slots: &mut SlotMap<ContainerId, Slot>) -> Vec<Slot> {
    let ids = DEFERRED
        .try_with(|deferred| std::mem::take(&mut *deferred.borrow_mut()))
        .unwrap_or_default();
    ids.into_iter().filter_map(|id| slots.remove(id)).collect()
}

/// Reserve a slot for a new container
pub(crate) fn allocate() -> ContainerId {
    with_slots(|slots| slots.insert(Slot::default()))
}

/// Free the slot of a dropped container
pub(crate) fn release(id: ContainerId) {
    let released = SLOTS.try_with(|slots| match slots.try_borrow_mut() {
        Ok(mut slots) => {
            let mut released = drain_deferred(&mut slots);
            released.extend(slots.remove(id));
            released
        }
        Err(_) => {
            let _ = DEFERRED.try_with(|deferred| deferred.borrow_mut().push(id));
            Vec::new()
        }
    });
    // Thread teardown: nothing left to release into
    drop(released);
}

/// Observer for `id`, if one has been created
pub(crate) fn observer(id: ContainerId) -> Option<Rc<Observer>> {
    with_slots(|slots| slots.get(id).and_then(|slot| slot.observer.clone()))
}

/// Observer for `id`, created on first use
///
/// The flavour is chosen by whichever caller creates it first. A container
/// that is mid-drop gets a detached observer nobody else will see.
pub(crate) fn ensure_observer(id: ContainerId, hooked: bool) -> Rc<Observer> {
    let fresh = || {
        Rc::new(if hooked {
            Observer::new()
        } else {
            Observer::hookless()
        })
    };
    with_slots(|slots| match slots.get_mut(id) {
        Some(slot) => slot.observer.get_or_insert_with(fresh).clone(),
        None => fresh(),
    })
}

/// Cached proxy for `id`
pub(crate) fn proxy(id: ContainerId) -> Option<Rc<ProxyCore>> {
    with_slots(|slots| slots.get(id).and_then(|slot| slot.proxy.clone()))
}

/// Cache `core` as the proxy for `id`
pub(crate) fn install_proxy(id: ContainerId, core: Rc<ProxyCore>) {
    with_slots(|slots| {
        if let Some(slot) = slots.get_mut(id) {
            slot.proxy = Some(core);
        }
    })
}

/// Number of live containers on this thread
pub fn live_containers() -> usize {
    with_slots(|slots| slots.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Container;

    #[test]
    fn test_slot_released_on_drop() {
        let before = live_containers();
        let container = Container::array(Vec::new());
        assert_eq!(live_containers(), before + 1);

        ensure_observer(container.id(), true);
        assert!(observer(container.id()).is_some());

        let id = container.id();
        drop(container);
        assert_eq!(live_containers(), before);
        assert!(observer(id).is_none());
    }

    #[test]
    fn test_observer_created_once() {
        let container = Container::array(Vec::new());
        let a = ensure_observer(container.id(), true);
        let b = ensure_observer(container.id(), false);
        assert!(Rc::ptr_eq(&a, &b));
        assert!(a.is_hooked());
    }
}
