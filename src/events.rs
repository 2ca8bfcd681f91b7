/// Layout and lifecycle events with explicit listener registration
///
/// Everything here is single-threaded. Listeners run synchronously inside `emit`,
/// in registration order.
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use log::warn;

use crate::geometry::SurfaceSize;
use crate::surface::SurfaceHandle;

#[derive(Debug, Clone)]
pub enum LayoutEvent {
    /// A new image element was mounted, or the current one removed
    SurfaceMounted(Option<SurfaceHandle>),
    /// The surface finished loading new pixels; the tick increases with every load
    ContentLoaded(u64),
    /// The viewport changed size
    ViewportResized(SurfaceSize),
}

type Listener<E> = Rc<RefCell<dyn FnMut(&E)>>;

struct Registry<E> {
    next_id: u64,
    listeners: Vec<(u64, Listener<E>)>,
}

/// Broadcasts events to registered listeners
pub struct EventBus<E> {
    registry: Rc<RefCell<Registry<E>>>,
}

impl<E: 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Register a listener. It stays registered until the returned subscription is dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&E) + 'static,
    {
        let id = {
            let mut registry = self.registry.borrow_mut();
            let id = registry.next_id;
            registry.next_id += 1;
            let listener: Listener<E> = Rc::new(RefCell::new(listener));
            registry.listeners.push((id, listener));
            id
        };

        let registry: Weak<RefCell<Registry<E>>> = Rc::downgrade(&self.registry);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    if let Ok(mut registry) = registry.try_borrow_mut() {
                        registry.listeners.retain(|(listener_id, _)| *listener_id != id);
                    }
                }
            })),
        }
    }

    /// Deliver `event` to every listener registered at the time of the call.
    /// Returns the number of listeners that ran.
    pub fn emit(&self, event: &E) -> usize {
        let snapshot: Vec<Listener<E>> = self
            .registry
            .borrow()
            .listeners
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();

        let mut delivered = 0;
        for listener in snapshot {
            match listener.try_borrow_mut() {
                Ok(mut listener) => {
                    (&mut *listener)(event);
                    delivered += 1;
                }
                Err(_) => warn!("Skipping re-entrant listener"),
            }
        }
        delivered
    }

    pub fn listener_count(&self) -> usize {
        self.registry.borrow().listeners.len()
    }
}

impl<E: 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a listener registered; dropping it tears the listener down.
#[must_use = "dropping a subscription unregisters its listener"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Unregister now instead of at end of scope
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}
