//! Content Session - the explicit context of one page injection
//!
//! Everything a content script would otherwise keep in module-level
//! variables lives here: whether it is active, which selectors it works
//! with, and the registry, relay and guard it uses.
//!
//! Lifecycle:
//! ```text
//! new ─▶ init ─▶ activate ⇄ deactivate ─▶ teardown
//!          ▲                 │ pagehide
//!          └──── re-init ────┘
//! ```
//! The page going away (`pagehide` on the window) acts like `deactivate`:
//! every tracked resource is released even if nobody calls `teardown`,
//! and a later `init` installs the relay and the unload hook again.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dom::{handler, Document, ListenerOptions};

use crate::config::ContentConfig;
use crate::error::{ContentError, Result};
use crate::events::{ContentEvent, EventBus};
use crate::guard::Guard;
use crate::registry::{ReleaseReport, ResourceRegistry};
use crate::relay::{ErrorRelay, ReportSink};

/// Window event fired when the page is being unloaded
pub const PAGEHIDE_EVENT: &str = "pagehide";

#[derive(Debug, Default)]
struct SessionState {
    initialized: bool,
    active: bool,
    torn_down: bool,
    selectors: Vec<String>,
}

impl SessionState {
    /// Back to the state `init` expects
    fn unload(&mut self) {
        self.initialized = false;
        self.active = false;
        self.selectors.clear();
    }
}

/// Shared with the unload hook, which runs synchronously inside dispatch.
/// Never held across an await.
type SharedState = Arc<RwLock<SessionState>>;

fn read(state: &RwLock<SessionState>) -> RwLockReadGuard<'_, SessionState> {
    state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(state: &RwLock<SessionState>) -> RwLockWriteGuard<'_, SessionState> {
    state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Release everything and announce it
fn release(registry: &ResourceRegistry, event_bus: &EventBus) -> ReleaseReport {
    let snapshot = registry.usage_snapshot();
    let report = registry.release_all();
    event_bus.publish(ContentEvent::Released { snapshot });
    report
}

/// One content script instance bound to one document
pub struct ContentSession {
    pub config: ContentConfig,
    pub event_bus: EventBus,

    document: Arc<Document>,
    registry: Arc<ResourceRegistry>,
    relay: Arc<ErrorRelay>,
    guard: Guard,

    state: SharedState,
}

impl ContentSession {
    pub fn new(config: ContentConfig, document: Arc<Document>, sink: Arc<dyn ReportSink>) -> Self {
        let event_bus = EventBus::new();
        let registry = Arc::new(ResourceRegistry::with_debug(document.clone(), config.debug));
        let relay = Arc::new(ErrorRelay::new(sink, document.clone()).with_events(event_bus.clone()));
        let guard = Guard::new(&config.guard).with_debug(config.debug);

        Self {
            config,
            event_bus,
            document,
            registry,
            relay,
            guard,
            state: Arc::new(RwLock::new(SessionState::default())),
        }
    }

    /// Install the error relay and the unload hook
    ///
    /// Calling it on an initialized session does nothing.
    pub async fn init(&self) -> Result<()> {
        let mut state = write(&self.state);
        if state.torn_down {
            return Err(ContentError::TornDown);
        }
        if state.initialized {
            return Ok(());
        }

        self.relay.install(&self.registry, self.document.window());

        let registry = Arc::downgrade(&self.registry);
        let shared = Arc::downgrade(&self.state);
        let event_bus = self.event_bus.clone();
        self.registry.register_listener(
            self.document.window(),
            PAGEHIDE_EVENT,
            handler(move |_| {
                if let Some(shared) = shared.upgrade() {
                    write(&shared).unload();
                }
                if let Some(registry) = registry.upgrade() {
                    release(&registry, &event_bus);
                }
                event_bus.publish(ContentEvent::Deactivated);
            }),
            ListenerOptions::once(),
        );

        state.initialized = true;
        drop(state);

        let url = self.document.url().to_string();
        if self.config.debug {
            tracing::info!("[ContentSession {}] Initialized on {}", self.config.session_id, url);
        }
        self.event_bus.publish(ContentEvent::Initialized { url });
        Ok(())
    }

    /// Start working with `selectors`
    pub async fn activate(&self, selectors: Vec<String>) -> Result<()> {
        let mut state = write(&self.state);
        if state.torn_down {
            return Err(ContentError::TornDown);
        }

        state.active = true;
        state.selectors = selectors.clone();
        drop(state);

        if self.config.debug {
            tracing::info!(
                "[ContentSession {}] Activated with {} selectors",
                self.config.session_id,
                selectors.len()
            );
        }
        self.event_bus.publish(ContentEvent::Activated { selectors });
        Ok(())
    }

    /// Stop working and release everything. `init` may be called again.
    pub async fn deactivate(&self) -> ReleaseReport {
        write(&self.state).unload();

        let report = release(&self.registry, &self.event_bus);
        self.event_bus.publish(ContentEvent::Deactivated);
        report
    }

    /// Final release. Only the first call does anything.
    pub async fn teardown(&self) -> Option<ReleaseReport> {
        {
            let mut state = write(&self.state);
            if state.torn_down {
                return None;
            }
            state.torn_down = true;
            state.unload();
        }

        let report = release(&self.registry, &self.event_bus);
        self.relay.flush().await;

        if self.config.debug {
            tracing::info!(
                "[ContentSession {}] Torn down, released {} resources",
                self.config.session_id,
                report.total()
            );
        }
        self.event_bus.publish(ContentEvent::TornDown);
        Some(report)
    }

    pub async fn is_active(&self) -> bool {
        read(&self.state).active
    }

    pub async fn is_torn_down(&self) -> bool {
        read(&self.state).torn_down
    }

    pub async fn selectors(&self) -> Vec<String> {
        read(&self.state).selectors.clone()
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn relay(&self) -> &Arc<ErrorRelay> {
        &self.relay
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }
}
