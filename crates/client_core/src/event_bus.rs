//! Typed fan-out of push events, keyed by event kind or by room.
//!
//! Subscriptions live as long as the returned [`Subscription`] guard. A room
//! subscription held by a selection goes away with that selection.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use shared::{
    domain::Room,
    protocol::{EventKind, ServerEvent},
};

pub type EventHandler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventFilter {
    All,
    Kind(EventKind),
    Room(Room),
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventFilter, Vec<(u64, EventHandler)>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .handlers
            .entry(filter.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            filter,
            id,
        }
    }

    /// Delivers `event` to every matching handler and returns how many ran.
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let handlers: Vec<EventHandler> = {
            let registry = lock(&self.registry);
            let mut keys = vec![EventFilter::All, EventFilter::Kind(event.kind())];
            if let Some(room) = event.room() {
                keys.push(EventFilter::Room(room));
            }
            keys.iter()
                .filter_map(|key| registry.handlers.get(key))
                .flat_map(|entries| entries.iter().map(|(_, handler)| Arc::clone(handler)))
                .collect()
        };
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).handlers.values().map(Vec::len).sum()
    }
}

/// Removes its handler from the bus when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    filter: EventFilter,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = lock(&registry);
        if let Some(entries) = registry.handlers.get_mut(&self.filter) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                registry.handlers.remove(&self.filter);
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/event_bus_tests.rs"]
mod tests;
