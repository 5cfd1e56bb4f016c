use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

pub type Callback = Box<dyn Fn(&Value) + Send + 'static>;

/// Handle returned when a listener is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Outcome of [`ListenerTable::dispatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    NoListener,
    Panicked,
}

/// Topic-keyed listener table
///
/// Holds exactly one callback per topic. Registering a second callback for
/// the same topic replaces the first.
#[derive(Default)]
pub struct ListenerTable {
    listeners: HashMap<String, (ListenerId, Callback)>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of the replaced listener, if there was one
    pub fn insert(&mut self, topic: String, id: ListenerId, callback: Callback) -> Option<ListenerId> {
        self.listeners
            .insert(topic, (id, callback))
            .map(|(previous, _)| previous)
    }

    /// Removes the listener for `topic` only if it is still the one registered under `id`
    pub fn remove(&mut self, topic: &str, id: ListenerId) -> bool {
        match self.listeners.get(topic) {
            Some((current, _)) if *current == id => {
                self.listeners.remove(topic);
                true
            }
            _ => false,
        }
    }

    /// Invokes the listener for `topic`
    ///
    /// A panicking callback is contained so it cannot take the connection
    /// loop down with it.
    pub fn dispatch(&self, topic: &str, data: &Value) -> Dispatch {
        let Some((_, callback)) = self.listeners.get(topic) else {
            log::trace!("No listener for topic '{topic}'");
            return Dispatch::NoListener;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| callback(data))) {
            Ok(()) => Dispatch::Delivered,
            Err(_panic) => Dispatch::Panicked,
        }
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.listeners.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
