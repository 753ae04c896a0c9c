//! Resource Registry - single point of registration and teardown
//!
//! A long-lived content script creates listeners, observers and timers
//! all over the place. Every one of them goes through here, so that one
//! `release_all` call can take the whole lot down again.
//!
//! Design decisions:
//! 1. Identity is `Arc` pointer identity. Owners are keyed by address,
//!    handlers and cleanups are compared with `Arc::ptr_eq`.
//! 2. Collections are drained BEFORE teardown callbacks run. A callback
//!    that re-enters the registry sees empty tables, never a held lock.
//! 3. Teardown is best-effort. Every item gets its own error and panic
//!    boundary; a failure is logged and the next item proceeds.
//! 4. Timers are Tokio tasks. A one-shot timer drops its own tracking
//!    entry the moment it fires; a missing entry means "cancelled", and
//!    the callback is skipped.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use dom::{
    same_handler, Event, EventTarget, Handler, ListenerOptions, Observer, ObserverCallback,
    ObserverFactory, ObserverKind, ObserverOptions,
};

use crate::error::BoxError;

/// Callback run during bulk-release
pub type Cleanup = Arc<dyn Fn() -> Result<(), BoxError> + Send + Sync>;

/// Build a cleanup callback from a plain closure
pub fn cleanup<F>(f: F) -> Cleanup
where
    F: Fn() -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handle to a scheduled one-shot or repeating timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Identity of an owner: the address of the target object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct OwnerKey(usize);

impl OwnerKey {
    fn of(owner: &dyn EventTarget) -> Self {
        Self(std::ptr::from_ref(owner).cast::<()>() as usize)
    }
}

/// One `register_listener` call
struct ListenerRecord {
    id: u64,
    kind: String,
    wrapped: Handler,
    original: Handler,
    options: ListenerOptions,
    owner: Arc<dyn EventTarget>,
}

impl ListenerRecord {
    fn matches(&self, kind: &str, handler: &Handler) -> bool {
        self.kind == kind
            && (same_handler(&self.original, handler) || same_handler(&self.wrapped, handler))
    }

    fn detach(&self) -> dom::Result<()> {
        self.owner
            .remove_event_listener(&self.kind, &self.wrapped, &self.options)
    }
}

/// Cardinality of every tracked collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub listener_owners: usize,
    pub observers: usize,
    pub timeouts: usize,
    pub intervals: usize,
    pub cleanups: usize,
}

impl UsageSnapshot {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// What a `release_all` call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReport {
    pub listeners: usize,
    pub observers: usize,
    pub timeouts: usize,
    pub intervals: usize,
    pub cleanups: usize,
    /// Items whose teardown failed or panicked
    pub failures: usize,
}

impl ReleaseReport {
    pub fn total(&self) -> usize {
        self.listeners + self.observers + self.timeouts + self.intervals + self.cleanups
    }
}

type ListenerTable = DashMap<OwnerKey, Vec<ListenerRecord>>;
type TimerTable = DashMap<TimerHandle, JoinHandle<()>>;

/// Tracks listeners, observers, timers and cleanup callbacks
pub struct ResourceRegistry {
    factory: Arc<dyn ObserverFactory>,
    debug: bool,

    next_id: AtomicU64,

    listeners: Arc<ListenerTable>,
    observers: DashMap<usize, Arc<dyn Observer>>,
    timeouts: Arc<TimerTable>,
    intervals: Arc<TimerTable>,
    /// Keyed by registration order so cleanups run first-in, first-out
    cleanups: DashMap<u64, Cleanup>,

    /// Non-owning side table. Never iterated by `release_all`.
    observed: DashMap<OwnerKey, Weak<dyn EventTarget>>,
}

impl ResourceRegistry {
    pub fn new(factory: Arc<dyn ObserverFactory>) -> Self {
        Self::with_debug(factory, false)
    }

    /// Create a registry that emits diagnostic notes
    pub fn with_debug(factory: Arc<dyn ObserverFactory>, debug: bool) -> Self {
        Self {
            factory,
            debug,
            next_id: AtomicU64::new(1),
            listeners: Arc::new(DashMap::new()),
            observers: DashMap::new(),
            timeouts: Arc::new(DashMap::new()),
            intervals: Arc::new(DashMap::new()),
            cleanups: DashMap::new(),
            observed: DashMap::new(),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Attach `handler` to `owner` for `kind` and track the registration
    ///
    /// Returns the handler actually attached. Either it or the original
    /// identifies this registration in `unregister_listener`. Registering
    /// the same handler twice yields two independent records. A `once`
    /// registration stops being tracked when it fires.
    pub fn register_listener(
        &self,
        owner: Arc<dyn EventTarget>,
        kind: &str,
        handler: Handler,
        options: ListenerOptions,
    ) -> Handler {
        let id = self.next_id();
        let key = OwnerKey::of(&*owner);
        let target = owner.target_id();
        let original = handler.clone();

        let wrapped: Handler = if options.once {
            let table = Arc::downgrade(&self.listeners);
            Arc::new(move |event: &Event| {
                // The host already detached it; only the record is left
                if let Some(listeners) = table.upgrade() {
                    forget_listener(&listeners, key, id);
                }
                handler(event)
            })
        } else {
            Arc::new(move |event: &Event| handler(event))
        };

        // Tracked before attaching, so a `once` that fires right away finds its record
        self.listeners.entry(key).or_default().push(ListenerRecord {
            id,
            kind: kind.to_string(),
            wrapped: wrapped.clone(),
            original,
            options,
            owner: owner.clone(),
        });
        owner.add_event_listener(kind, wrapped.clone(), &options);

        if self.debug {
            tracing::debug!("[ResourceRegistry] Listener '{}' added on node {}", kind, target);
        }
        wrapped
    }

    /// Detach the registration of `handler` (original or wrapped) for `kind`
    ///
    /// Returns whether a registration was found. Not finding one is fine.
    pub fn unregister_listener(&self, owner: &dyn EventTarget, kind: &str, handler: &Handler) -> bool {
        let key = OwnerKey::of(owner);

        let record = match self.listeners.get_mut(&key) {
            Some(mut records) => match records.iter().position(|r| r.matches(kind, handler)) {
                Some(pos) => records.remove(pos),
                None => return false,
            },
            None => return false,
        };
        // No residual empty sets
        self.listeners.remove_if(&key, |_, records| records.is_empty());

        if let Err(e) = record.detach() {
            tracing::warn!(
                "[ResourceRegistry] Failed to detach '{}' listener: {}",
                record.kind,
                e
            );
        }
        true
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Construct and track an observer. The caller starts observation.
    pub fn create_observer(
        &self,
        kind: ObserverKind,
        callback: ObserverCallback,
        options: ObserverOptions,
    ) -> dom::Result<Arc<dyn Observer>> {
        let observer = self.factory.create(kind, callback, options)?;
        let key = Arc::as_ptr(&observer).cast::<()>() as usize;
        self.observers.insert(key, observer.clone());

        if self.debug {
            tracing::debug!("[ResourceRegistry] {} observer created", kind);
        }
        Ok(observer)
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Run `callback` once after `delay`
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn schedule_once<F>(&self, callback: F, delay: Duration) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = TimerHandle(self.next_id());
        let table = Arc::downgrade(&self.timeouts);

        // The entry lock is held while spawning, so the task can never
        // look for its entry before it exists.
        if let Entry::Vacant(slot) = self.timeouts.entry(handle) {
            slot.insert(tokio::spawn(async move {
                tokio::time::sleep(delay).await;

                let still_tracked = table
                    .upgrade()
                    .map(|timeouts| timeouts.remove(&handle).is_some())
                    .unwrap_or(false);
                if still_tracked {
                    callback();
                }
            }));
        }
        handle
    }

    /// Cancel a one-shot timer. No-op if it already fired or was cancelled.
    pub fn cancel_once(&self, handle: TimerHandle) -> bool {
        cancel_timer(&self.timeouts, handle)
    }

    /// Run `callback` every `interval`, first run one interval from now
    ///
    /// Stays tracked until cancelled or released.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn schedule_repeating<F>(&self, mut callback: F, interval: Duration) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        let handle = TimerHandle(self.next_id());
        let table = Arc::downgrade(&self.intervals);
        // tokio refuses a zero period
        let period = interval.max(Duration::from_millis(1));

        if let Entry::Vacant(slot) = self.intervals.entry(handle) {
            slot.insert(tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let tracked = table
                        .upgrade()
                        .map(|intervals| intervals.contains_key(&handle))
                        .unwrap_or(false);
                    if !tracked {
                        break;
                    }
                    callback();
                }
            }));
        }
        handle
    }

    /// Cancel a repeating timer. No-op if it is not tracked.
    pub fn cancel_repeating(&self, handle: TimerHandle) -> bool {
        cancel_timer(&self.intervals, handle)
    }

    // ------------------------------------------------------------------
    // Cleanup callbacks
    // ------------------------------------------------------------------

    /// Run `callback` during `release_all`. Adding the same callback twice
    /// keeps a single entry.
    pub fn add_cleanup(&self, callback: Cleanup) {
        if self
            .cleanups
            .iter()
            .any(|entry| Arc::ptr_eq(entry.value(), &callback))
        {
            return;
        }
        self.cleanups.insert(self.next_id(), callback);
    }

    pub fn remove_cleanup(&self, callback: &Cleanup) -> bool {
        let before = self.cleanups.len();
        self.cleanups.retain(|_, existing| !Arc::ptr_eq(existing, callback));
        self.cleanups.len() != before
    }

    // ------------------------------------------------------------------
    // Weak side table
    // ------------------------------------------------------------------

    /// Remember `owner` without keeping it alive. Returns true if it was
    /// not already marked.
    pub fn mark_observed(&self, owner: &Arc<dyn EventTarget>) -> bool {
        self.observed.retain(|_, weak| weak.strong_count() > 0);

        match self.observed.entry(OwnerKey::of(&**owner)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::downgrade(owner));
                true
            }
        }
    }

    pub fn is_observed(&self, owner: &dyn EventTarget) -> bool {
        self.observed
            .get(&OwnerKey::of(owner))
            .map(|weak| weak.strong_count() > 0)
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Tear down everything tracked
    ///
    /// Order: listeners, observers, one-shot timers, repeating timers,
    /// cleanup callbacks. Per-item failures are logged and skipped. Safe to
    /// call any number of times.
    pub fn release_all(&self) -> ReleaseReport {
        let mut report = ReleaseReport::default();

        for (_, records) in drain(&*self.listeners) {
            for record in records {
                report.listeners += 1;
                if !contain("detach listener", || record.detach()) {
                    report.failures += 1;
                }
            }
        }

        for (_, observer) in drain(&self.observers) {
            report.observers += 1;
            if !contain("disconnect observer", || observer.disconnect()) {
                report.failures += 1;
            }
        }

        for (_, task) in drain(&*self.timeouts) {
            report.timeouts += 1;
            task.abort();
        }

        for (_, task) in drain(&*self.intervals) {
            report.intervals += 1;
            task.abort();
        }

        let mut cleanups = drain(&self.cleanups);
        cleanups.sort_by_key(|(seq, _)| *seq);
        for (_, callback) in cleanups {
            report.cleanups += 1;
            if !contain("run cleanup", || callback()) {
                report.failures += 1;
            }
        }

        if self.debug && report.total() > 0 {
            tracing::debug!(
                "[ResourceRegistry] Released {} resources ({} failures)",
                report.total(),
                report.failures
            );
        }
        report
    }

    /// Current size of every tracked collection
    pub fn usage_snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            listener_owners: self.listeners.len(),
            observers: self.observers.len(),
            timeouts: self.timeouts.len(),
            intervals: self.intervals.len(),
            cleanups: self.cleanups.len(),
        }
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        // Timers outliving their registry would fire into a dead context
        for (_, task) in drain(&*self.timeouts) {
            task.abort();
        }
        for (_, task) in drain(&*self.intervals) {
            task.abort();
        }
    }
}

/// Drop record `id` of `key`, and the key itself once it has no records
fn forget_listener(listeners: &ListenerTable, key: OwnerKey, id: u64) {
    if let Some(mut records) = listeners.get_mut(&key) {
        records.retain(|record| record.id != id);
    }
    listeners.remove_if(&key, |_, records| records.is_empty());
}

fn cancel_timer(table: &TimerTable, handle: TimerHandle) -> bool {
    match table.remove(&handle) {
        Some((_, task)) => {
            task.abort();
            true
        }
        None => false,
    }
}

/// Remove and return every entry of `map`
fn drain<K, V>(map: &DashMap<K, V>) -> Vec<(K, V)>
where
    K: Eq + Hash + Clone,
{
    let keys: Vec<K> = map.iter().map(|entry| entry.key().clone()).collect();
    keys.into_iter().filter_map(|key| map.remove(&key)).collect()
}

/// Run one teardown step, logging instead of propagating errors and panics
fn contain<E, F>(what: &str, step: F) -> bool
where
    E: std::fmt::Display,
    F: FnOnce() -> Result<(), E>,
{
    match catch_unwind(AssertUnwindSafe(step)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!("[ResourceRegistry] Failed to {}: {}", what, e);
            false
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::warn!("[ResourceRegistry] Panicked trying to {}: {}", what, message);
            false
        }
    }
}
