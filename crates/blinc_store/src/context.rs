//! Rendering-context collaborator
//!
//! The store never owns components. A UI layer installs a [`RenderingContext`]
//! that answers "which component is rendering right now" and accepts cleanup
//! callbacks. On the first reactive read inside a component the store
//! registers one cleanup with it; when the component unmounts that cleanup
//! clears the component from every observer it read.
//!
//! # Example
//!
//! ```ignore
//! use blinc_store::context::{set_rendering_context, RenderingContext, VNodeRef};
//!
//! struct Renderer { /* ... */ }
//!
//! impl RenderingContext for Renderer {
//!     fn processing_vnode(&self) -> Option<VNodeRef> { self.current() }
//!     fn register_cleanup(&self, vnode: &VNodeRef, cleanup: Box<dyn FnOnce()>) {
//!         self.on_unmount(vnode, cleanup);
//!     }
//! }
//!
//! set_rendering_context(Rc::new(Renderer::new()));
//! ```

use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use crate::observer::Observer;

/// A component instance that can be asked to re-render
pub trait VNode {
    /// Schedule a re-render; timing is up to the UI layer
    fn schedule_update(&self);
}

/// Shared handle to a component, compared by identity
#[derive(Clone)]
pub struct VNodeRef(Rc<dyn VNode>);

impl VNodeRef {
    pub fn new(node: Rc<dyn VNode>) -> Self {
        VNodeRef(node)
    }

    pub fn schedule_update(&self) {
        self.0.schedule_update();
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for VNodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for VNodeRef {}

impl Hash for VNodeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for VNodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VNodeRef({:p})", self.addr())
    }
}

/// Rendering engine hooks consumed by the store
pub trait RenderingContext {
    /// Component currently rendering, if any
    fn processing_vnode(&self) -> Option<VNodeRef>;

    /// Run `cleanup` when `vnode` unmounts
    fn register_cleanup(&self, vnode: &VNodeRef, cleanup: Box<dyn FnOnce()>);
}

thread_local! {
    static RENDERING: RefCell<Option<Rc<dyn RenderingContext>>> = const { RefCell::new(None) };

    /// component -> observers it has read from (keyed by observer address)
    static TRACKED: RefCell<FxHashMap<VNodeRef, FxHashMap<usize, Weak<Observer>>>> =
        RefCell::new(FxHashMap::default());
}

// =============================================================================
// Installation
// =============================================================================

/// Install the rendering context for this thread
pub fn set_rendering_context(ctx: Rc<dyn RenderingContext>) {
    RENDERING.with(|slot| *slot.borrow_mut() = Some(ctx));
}

/// Remove the rendering context; reads stop creating subscriptions
pub fn clear_rendering_context() {
    RENDERING.with(|slot| slot.borrow_mut().take());
}

fn rendering_context() -> Option<Rc<dyn RenderingContext>> {
    RENDERING
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

/// Component currently rendering, if a context is installed and reports one
pub fn processing_vnode() -> Option<VNodeRef> {
    rendering_context()?.processing_vnode()
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Register lifecycle cleanup for the rendering component, if any
///
/// Called by store accessors; harmless outside a render and on repeat calls.
pub fn hook_store() {
    if let Some(vnode) = processing_vnode() {
        ensure_hooked(&vnode);
    }
}

fn ensure_hooked(vnode: &VNodeRef) {
    let fresh = TRACKED.with(|tracked| {
        let mut tracked = tracked.borrow_mut();
        if tracked.contains_key(vnode) {
            return false;
        }
        tracked.insert(vnode.clone(), FxHashMap::default());
        true
    });
    if !fresh {
        return;
    }

    if let Some(ctx) = rendering_context() {
        let target = vnode.clone();
        ctx.register_cleanup(vnode, Box::new(move || clear_vnode_observers(&target)));
        tracing::trace!(?vnode, "registered store cleanup");
    }
}

/// Remember that `vnode` read from `observer`
pub(crate) fn record_observer(vnode: &VNodeRef, observer: &Rc<Observer>) {
    ensure_hooked(vnode);
    TRACKED.with(|tracked| {
        if let Some(observers) = tracked.borrow_mut().get_mut(vnode) {
            observers
                .entry(Rc::as_ptr(observer) as usize)
                .or_insert_with(|| Rc::downgrade(observer));
        }
    });
}

/// Clear `vnode` from every observer it read and forget it
///
/// Safe to call for components that never read anything, and more than once.
pub fn clear_vnode_observers(vnode: &VNodeRef) {
    let observers = TRACKED
        .try_with(|tracked| tracked.borrow_mut().remove(vnode))
        .ok()
        .flatten();
    let Some(observers) = observers else {
        return;
    };

    tracing::debug!(?vnode, observers = observers.len(), "clearing component dependencies");
    for observer in observers.values().filter_map(Weak::upgrade) {
        observer.clear_by_vnode(vnode);
    }
}

/// Number of components with recorded dependencies on this thread
pub fn tracked_vnodes() -> usize {
    TRACKED.with(|tracked| tracked.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Key;
    use std::cell::Cell;

    struct Noop;

    impl VNode for Noop {
        fn schedule_update(&self) {}
    }

    #[derive(Default)]
    struct Rendering {
        current: RefCell<Option<VNodeRef>>,
        cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
        registered: Cell<usize>,
    }

    impl RenderingContext for Rendering {
        fn processing_vnode(&self) -> Option<VNodeRef> {
            self.current.borrow().clone()
        }

        fn register_cleanup(&self, _vnode: &VNodeRef, cleanup: Box<dyn FnOnce()>) {
            self.registered.set(self.registered.get() + 1);
            self.cleanups.borrow_mut().push(cleanup);
        }
    }

    #[test]
    fn test_vnode_identity() {
        let node: Rc<dyn VNode> = Rc::new(Noop);
        let a = VNodeRef::new(node.clone());
        let b = VNodeRef::new(node);
        let c = VNodeRef::new(Rc::new(Noop));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hook_store_outside_render() {
        clear_rendering_context();
        hook_store();
        assert_eq!(tracked_vnodes(), 0);
    }

    #[test]
    fn test_cleanup_registered_once_per_component() {
        let ctx = Rc::new(Rendering::default());
        let vnode = VNodeRef::new(Rc::new(Noop));
        *ctx.current.borrow_mut() = Some(vnode.clone());
        set_rendering_context(ctx.clone());

        hook_store();
        hook_store();
        let observer = Rc::new(Observer::new());
        observer.use_prop(&Key::prop("a"));
        assert_eq!(ctx.registered.get(), 1);
        assert!(observer.is_tracking(&vnode));

        *ctx.current.borrow_mut() = None;
        for cleanup in ctx.cleanups.borrow_mut().drain(..) {
            cleanup();
        }
        assert!(!observer.is_tracking(&vnode));
        assert_eq!(tracked_vnodes(), 0);

        // Safe to repeat after the component is gone
        clear_vnode_observers(&vnode);
        clear_rendering_context();
    }
}
