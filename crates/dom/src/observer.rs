//! Observers - callback objects watching nodes for changes
//!
//! The trait is what the content runtime tracks and tears down. The
//! factory is how it gets new ones without knowing which host it runs in.
//! `PageObserver` is the document's own implementation.

use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DomError, Result};
use crate::types::{NodeId, ObserverKind, ObserverOptions, ObserverRecord};

/// Callback receiving a batch of observer records
pub type ObserverCallback = Arc<dyn Fn(&[ObserverRecord]) + Send + Sync>;

/// Build an observer callback from a plain closure
pub fn observer_callback<F>(f: F) -> ObserverCallback
where
    F: Fn(&[ObserverRecord]) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// An observer-pattern object
pub trait Observer: Send + Sync {
    fn kind(&self) -> ObserverKind;

    /// Start watching `target`
    fn observe(&self, target: NodeId) -> Result<()>;

    /// Stop watching `target`. No-op if it was never watched.
    fn unobserve(&self, target: NodeId);

    /// Stop watching everything. Hosts may fail here.
    fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Constructs observers of a requested kind
pub trait ObserverFactory: Send + Sync {
    fn create(
        &self,
        kind: ObserverKind,
        callback: ObserverCallback,
        options: ObserverOptions,
    ) -> Result<Arc<dyn Observer>>;
}

/// Validate options for a given observer kind at construction time
pub fn validate_options(kind: ObserverKind, options: &ObserverOptions) -> Result<()> {
    if kind == ObserverKind::Intersection {
        if let Some(bad) = options
            .thresholds
            .iter()
            .find(|t| !(0.0..=1.0).contains(*t))
        {
            return Err(DomError::InvalidObserverOptions(format!(
                "threshold {} is outside [0, 1]",
                bad
            )));
        }
    }
    Ok(())
}

/// Observer implementation used by `Document`
pub struct PageObserver {
    kind: ObserverKind,
    options: ObserverOptions,
    callback: ObserverCallback,
    targets: DashSet<NodeId>,
    connected: AtomicBool,
}

impl PageObserver {
    pub fn new(
        kind: ObserverKind,
        callback: ObserverCallback,
        options: ObserverOptions,
    ) -> Result<Self> {
        validate_options(kind, &options)?;
        Ok(Self {
            kind,
            options,
            callback,
            targets: DashSet::new(),
            connected: AtomicBool::new(true),
        })
    }

    pub fn options(&self) -> &ObserverOptions {
        &self.options
    }

    pub fn is_watching(&self, target: NodeId) -> bool {
        self.targets.contains(&target)
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Hand `records` to the callback if this observer is live and watching
    /// the record target. Returns whether the callback ran.
    pub fn deliver(&self, record: &ObserverRecord) -> bool {
        if !self.is_connected() || record.kind != self.kind || !self.is_watching(record.target) {
            return false;
        }
        (self.callback)(std::slice::from_ref(record));
        true
    }
}

impl Observer for PageObserver {
    fn kind(&self) -> ObserverKind {
        self.kind
    }

    fn observe(&self, target: NodeId) -> Result<()> {
        if self.kind == ObserverKind::Mutation && !self.options.watches_mutations() {
            return Err(DomError::InvalidObserverOptions(
                "one of childList, attributes or characterData must be set".to_string(),
            ));
        }
        // Observing again after disconnect revives the observer, like the DOM does
        self.connected.store(true, Ordering::SeqCst);
        self.targets.insert(target);
        Ok(())
    }

    fn unobserve(&self, target: NodeId) {
        self.targets.remove(&target);
    }

    fn disconnect(&self) -> Result<()> {
        self.targets.clear();
        self.connected.store(false, Ordering::SeqCst);
        tracing::trace!("[PageObserver] {} observer disconnected", self.kind);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;

    fn record(kind: ObserverKind, target: NodeId) -> ObserverRecord {
        ObserverRecord {
            kind,
            target,
            change: "childList".to_string(),
            detail: Value::Null,
        }
    }

    #[test]
    fn test_deliver_only_to_watched_targets() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_ref = hits.clone();
        let observer = PageObserver::new(
            ObserverKind::Mutation,
            observer_callback(move |records| {
                hits_ref.fetch_add(records.len(), Ordering::SeqCst);
            }),
            ObserverOptions::child_list_subtree(),
        )
        .unwrap();

        observer.observe(7).unwrap();
        assert!(observer.deliver(&record(ObserverKind::Mutation, 7)));
        assert!(!observer.deliver(&record(ObserverKind::Mutation, 8)));
        assert!(!observer.deliver(&record(ObserverKind::Resize, 7)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let observer = PageObserver::new(
            ObserverKind::Mutation,
            observer_callback(|_| {}),
            ObserverOptions::child_list_subtree(),
        )
        .unwrap();

        observer.observe(1).unwrap();
        observer.disconnect().unwrap();

        assert!(!observer.is_connected());
        assert_eq!(observer.target_count(), 0);
        assert!(!observer.deliver(&record(ObserverKind::Mutation, 1)));
    }

    #[test]
    fn test_mutation_observer_needs_something_to_watch() {
        let observer = PageObserver::new(
            ObserverKind::Mutation,
            observer_callback(|_| {}),
            ObserverOptions::default(),
        )
        .unwrap();

        assert!(matches!(
            observer.observe(1),
            Err(DomError::InvalidObserverOptions(_))
        ));
    }

    #[test]
    fn test_intersection_threshold_range() {
        let bad = ObserverOptions {
            thresholds: vec![0.0, 1.5],
            ..ObserverOptions::default()
        };
        assert!(PageObserver::new(ObserverKind::Intersection, observer_callback(|_| {}), bad).is_err());

        let good = ObserverOptions {
            thresholds: vec![0.0, 0.5, 1.0],
            ..ObserverOptions::default()
        };
        assert!(PageObserver::new(ObserverKind::Intersection, observer_callback(|_| {}), good).is_ok());
    }
}
