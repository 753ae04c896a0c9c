//! Node - the concrete event target of the page host
//!
//! Listener storage is a per-kind table. Most kinds carry one or two
//! listeners, so each slot is a SmallVec and the common case never
//! touches the heap.
//!
//! Dispatch snapshots the matching handlers first and calls them with no
//! lock held. A handler is free to add or remove listeners on the very
//! node it is running on.

use dashmap::DashMap;
use smallvec::SmallVec;

use crate::error::Result;
use crate::target::{same_handler, EventTarget, Handler};
use crate::types::{Event, ListenerOptions, NodeId};

#[derive(Clone)]
struct ListenerEntry {
    handler: Handler,
    options: ListenerOptions,
}

type ListenerSlot = SmallVec<[ListenerEntry; 2]>;

/// A page node that listeners can be attached to
pub struct Node {
    id: NodeId,
    tag: String,
    listeners: DashMap<String, ListenerSlot>,
}

impl Node {
    pub fn new(id: NodeId, tag: impl Into<String>) -> Self {
        Self {
            id,
            tag: tag.into(),
            listeners: DashMap::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Deliver `event` to every listener for its kind
    ///
    /// Returns the number of handlers that ran.
    pub fn dispatch(&self, event: &Event) -> usize {
        let to_run: ListenerSlot = match self.listeners.get_mut(&event.kind) {
            Some(mut slot) => {
                let snapshot = slot.clone();
                // `once` listeners go away before they run
                slot.retain(|entry| !entry.options.once);
                snapshot
            }
            None => return 0,
        };
        self.listeners.remove_if(&event.kind, |_, slot| slot.is_empty());

        for entry in &to_run {
            (entry.handler)(event);
        }
        to_run.len()
    }

    /// Number of listeners attached for `kind`
    pub fn listener_count(&self, kind: &str) -> usize {
        self.listeners.get(kind).map(|slot| slot.len()).unwrap_or(0)
    }

    /// Number of listeners attached across all kinds
    pub fn total_listeners(&self) -> usize {
        self.listeners.iter().map(|slot| slot.len()).sum()
    }
}

impl EventTarget for Node {
    fn target_id(&self) -> NodeId {
        self.id
    }

    fn add_event_listener(&self, kind: &str, handler: Handler, options: &ListenerOptions) {
        let mut slot = self.listeners.entry(kind.to_string()).or_default();
        let duplicate = slot.iter().any(|entry| {
            same_handler(&entry.handler, &handler) && entry.options.capture == options.capture
        });
        if !duplicate {
            slot.push(ListenerEntry {
                handler,
                options: *options,
            });
        }
    }

    fn remove_event_listener(
        &self,
        kind: &str,
        handler: &Handler,
        options: &ListenerOptions,
    ) -> Result<()> {
        if let Some(mut slot) = self.listeners.get_mut(kind) {
            slot.retain(|entry| {
                !(same_handler(&entry.handler, handler) && entry.options.capture == options.capture)
            });
        }
        self.listeners.remove_if(kind, |_, slot| slot.is_empty());
        Ok(())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("listeners", &self.total_listeners())
            .finish()
    }
}
