//! Document - the in-memory page a content script lives in
//!
//! This handles:
//! - Node allocation and lookup (id → node)
//! - The global `window` target where page-level errors are dispatched
//! - Construction of observers and delivery of their records
//! - The current page location
//!
//! The document keeps only weak references to the observers it hands
//! out. Whoever created an observer owns it; once it is dropped the
//! document forgets it on the next notification.

use ahash::RandomState;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use url::Url;
use uuid::Uuid;

use crate::error::{DomError, Result};
use crate::node::Node;
use crate::observer::{Observer, ObserverCallback, ObserverFactory, PageObserver};
use crate::types::{Event, NodeId, ObserverKind, ObserverOptions, ObserverRecord};

/// Id of the window node in every document
pub const WINDOW_ID: NodeId = 0;

/// Source of the current page location
pub trait Location: Send + Sync {
    fn href(&self) -> String;
}

/// In-memory page
pub struct Document {
    id: Uuid,
    url: RwLock<Url>,
    window: Arc<Node>,
    nodes: DashMap<NodeId, Arc<Node>, RandomState>,
    next_node_id: AtomicU32,
    observers: DashMap<u64, Weak<PageObserver>, RandomState>,
    next_observer_id: AtomicU64,
}

impl Document {
    /// Create a document at `url` with just the window node in it
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        let window = Arc::new(Node::new(WINDOW_ID, "#window"));
        let nodes = DashMap::with_hasher(RandomState::new());
        nodes.insert(WINDOW_ID, window.clone());

        Ok(Self {
            id: Uuid::new_v4(),
            url: RwLock::new(url),
            window,
            nodes,
            next_node_id: AtomicU32::new(WINDOW_ID + 1),
            observers: DashMap::with_hasher(RandomState::new()),
            next_observer_id: AtomicU64::new(1),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current page URL
    pub fn url(&self) -> Url {
        self.url
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Move the document to a new location
    pub fn navigate(&self, url: &str) -> Result<()> {
        let url = Url::parse(url)?;
        tracing::debug!("[Document] Navigating to {}", url);
        *self
            .url
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = url;
        Ok(())
    }

    /// The global target
    pub fn window(&self) -> Arc<Node> {
        self.window.clone()
    }

    /// Allocate a new element node
    pub fn create_element(&self, tag: impl Into<String>) -> Arc<Node> {
        let id = self.next_node_id.fetch_add(1, Ordering::SeqCst);
        let node = Arc::new(Node::new(id, tag));
        self.nodes.insert(id, node.clone());
        node
    }

    /// Look up a node by id
    pub fn node(&self, id: NodeId) -> Result<Arc<Node>> {
        self.nodes
            .get(&id)
            .map(|node| node.value().clone())
            .ok_or(DomError::NodeNotFound(id))
    }

    /// Drop a node from the document. The window cannot be removed.
    pub fn remove_node(&self, id: NodeId) -> Option<Arc<Node>> {
        if id == WINDOW_ID {
            return None;
        }
        self.nodes.remove(&id).map(|(_, node)| node)
    }

    /// Total number of nodes, window included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Dispatch `event` on its target node
    pub fn dispatch(&self, event: &Event) -> Result<usize> {
        Ok(self.node(event.target)?.dispatch(event))
    }

    /// Deliver one record to every live observer of `kind` watching `target`
    ///
    /// Returns the number of observers whose callback ran.
    pub fn notify(
        &self,
        kind: ObserverKind,
        target: NodeId,
        change: impl Into<String>,
        detail: Value,
    ) -> usize {
        let record = ObserverRecord {
            kind,
            target,
            change: change.into(),
            detail,
        };

        // Collect live observers first; callbacks run with no table lock held
        let mut live = Vec::new();
        self.observers.retain(|_, weak| match weak.upgrade() {
            Some(observer) => {
                live.push(observer);
                true
            }
            None => false,
        });

        live.iter().filter(|observer| observer.deliver(&record)).count()
    }

    /// Number of observers still alive
    pub fn live_observer_count(&self) -> usize {
        self.observers
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }
}

impl ObserverFactory for Document {
    fn create(
        &self,
        kind: ObserverKind,
        callback: ObserverCallback,
        options: ObserverOptions,
    ) -> Result<Arc<dyn Observer>> {
        let observer = Arc::new(PageObserver::new(kind, callback, options)?);
        let id = self.next_observer_id.fetch_add(1, Ordering::SeqCst);
        self.observers.insert(id, Arc::downgrade(&observer));
        Ok(observer)
    }
}

impl Location for Document {
    fn href(&self) -> String {
        self.url().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::observer_callback;
    use crate::target::{handler, EventTarget};
    use crate::types::ListenerOptions;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_new_document_has_window() {
        let doc = Document::new("https://example.com/page").unwrap();
        assert_eq!(doc.node_count(), 1);
        assert_eq!(doc.window().id(), WINDOW_ID);
        assert_eq!(doc.href(), "https://example.com/page");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            Document::new("not a url"),
            Err(DomError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_create_and_remove_nodes() {
        let doc = Document::new("https://example.com").unwrap();
        let a = doc.create_element("div");
        let b = doc.create_element("span");

        assert_ne!(a.id(), b.id());
        assert_eq!(doc.node(b.id()).unwrap().tag(), "span");
        assert!(doc.remove_node(a.id()).is_some());
        assert!(matches!(doc.node(a.id()), Err(DomError::NodeNotFound(_))));
        assert!(doc.remove_node(WINDOW_ID).is_none());
    }

    #[test]
    fn test_dispatch_on_window() {
        let doc = Document::new("https://example.com").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_ref = hits.clone();

        doc.window().add_event_listener(
            "error",
            handler(move |_| {
                hits_ref.fetch_add(1, Ordering::SeqCst);
            }),
            &ListenerOptions::default(),
        );

        let ran = doc.dispatch(&Event::new("error", WINDOW_ID)).unwrap();
        assert_eq!(ran, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notify_reaches_observers_and_forgets_dropped_ones() {
        let doc = Document::new("https://example.com").unwrap();
        let list = doc.create_element("ul");
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_ref = seen.clone();

        let observer = doc
            .create(
                ObserverKind::Mutation,
                observer_callback(move |records| {
                    seen_ref.fetch_add(records.len(), Ordering::SeqCst);
                }),
                ObserverOptions::child_list_subtree(),
            )
            .unwrap();
        observer.observe(list.id()).unwrap();

        let reached = doc.notify(ObserverKind::Mutation, list.id(), "childList", json!({ "added": 3 }));
        assert_eq!(reached, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        drop(observer);
        assert_eq!(doc.notify(ObserverKind::Mutation, list.id(), "childList", Value::Null), 0);
        assert_eq!(doc.live_observer_count(), 0);
    }

    #[test]
    fn test_navigate_updates_location() {
        let doc = Document::new("https://example.com/a").unwrap();
        doc.navigate("https://example.com/b?q=1").unwrap();
        assert_eq!(doc.href(), "https://example.com/b?q=1");
        assert!(doc.navigate("::").is_err());
    }
}
