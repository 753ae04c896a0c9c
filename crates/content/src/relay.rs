//! Error Relay - forward page-level errors to the coordinator
//!
//! Two inbound triggers, both dispatched on the window target:
//! - `error`: an uncaught error (`detail.message`)
//! - `unhandledrejection`: an async failure nobody awaited (`detail.reason`)
//!
//! Each one becomes an `ErrorReport` that is sent fire-and-forget. There
//! is no retry and no queue: if the coordinator is gone, the failure is
//! logged locally and the report is dropped.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use dom::{handler, Event, EventTarget, Handler, ListenerOptions, Location};

use crate::error::RelayError;
use crate::events::{ContentEvent, EventBus};
use crate::registry::ResourceRegistry;

/// Discriminator marking reports from this content context
pub const REPORT_TYPE: &str = "CONTENT_SCRIPT_ERROR";

/// Window event carrying uncaught errors
pub const ERROR_EVENT: &str = "error";

/// Window event carrying unhandled async rejections
pub const REJECTION_EVENT: &str = "unhandledrejection";

/// Report sent to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(rename = "type")]
    pub report_type: String,
    pub error: String,
    /// Unix time in milliseconds
    pub timestamp: i64,
    pub url: String,
}

impl ErrorReport {
    pub fn new(error: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            report_type: REPORT_TYPE.to_string(),
            error: error.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            url: url.into(),
        }
    }
}

/// Outbound path to the coordinator
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn send(&self, report: ErrorReport) -> Result<(), RelayError>;
}

/// Sink backed by a Tokio channel; the coordinator holds the receiver
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ErrorReport>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ErrorReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ReportSink for ChannelSink {
    async fn send(&self, report: ErrorReport) -> Result<(), RelayError> {
        self.tx.send(report).map_err(|_| RelayError::Closed)
    }
}

/// Extract the message of an `error` event
pub fn error_message(event: &Event) -> String {
    event
        .detail
        .get("message")
        .and_then(Value::as_str)
        .filter(|message| !message.is_empty())
        .unwrap_or("Unknown error")
        .to_string()
}

/// Extract the message of an `unhandledrejection` event
pub fn rejection_message(event: &Event) -> String {
    let reason = match event.detail.get("reason") {
        Some(Value::String(reason)) => reason.clone(),
        Some(Value::Object(fields)) => match fields.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => Value::Object(fields.clone()).to_string(),
        },
        Some(Value::Null) | None => "undefined".to_string(),
        Some(other) => other.to_string(),
    };
    format!("Unhandled promise rejection: {}", reason)
}

/// Forwards errors to a `ReportSink`
pub struct ErrorRelay {
    sink: Arc<dyn ReportSink>,
    location: Arc<dyn Location>,
    events: Option<EventBus>,
    in_flight: Arc<DashMap<u64, JoinHandle<()>>>,
    next_id: AtomicU64,
    failures: Arc<AtomicU64>,
}

impl ErrorRelay {
    pub fn new(sink: Arc<dyn ReportSink>, location: Arc<dyn Location>) -> Self {
        Self {
            sink,
            location,
            events: None,
            in_flight: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Also publish every report on `events`
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Listen for page errors on `window`, through `registry` so that
    /// bulk-release detaches the listeners again
    pub fn install(
        self: &Arc<Self>,
        registry: &ResourceRegistry,
        window: Arc<dyn EventTarget>,
    ) -> (Handler, Handler) {
        let relay = self.clone();
        let on_error = registry.register_listener(
            window.clone(),
            ERROR_EVENT,
            handler(move |event| relay.report(error_message(event))),
            ListenerOptions::default(),
        );

        let relay = self.clone();
        let on_rejection = registry.register_listener(
            window,
            REJECTION_EVENT,
            handler(move |event| relay.report(rejection_message(event))),
            ListenerOptions::default(),
        );

        (on_error, on_rejection)
    }

    /// Send a report for `message` without waiting for delivery
    pub fn report(&self, message: impl Into<String>) {
        let report = ErrorReport::new(message, self.location.href());

        if let Some(events) = &self.events {
            events.publish(ContentEvent::ErrorReported {
                message: report.error.clone(),
            });
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("[ErrorRelay] No runtime, dropping report: {}", report.error);
                self.failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let sink = self.sink.clone();
        let failures = self.failures.clone();
        let in_flight = Arc::downgrade(&self.in_flight);

        if let Entry::Vacant(slot) = self.in_flight.entry(id) {
            slot.insert(runtime.spawn(async move {
                if let Err(e) = sink.send(report).await {
                    failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("[ErrorRelay] Failed to deliver error report: {}", e);
                }
                if let Some(in_flight) = in_flight.upgrade() {
                    in_flight.remove(&id);
                }
            }));
        }
    }

    /// Wait for every delivery started so far
    pub async fn flush(&self) {
        let ids: Vec<u64> = self.in_flight.iter().map(|entry| *entry.key()).collect();
        let pending: Vec<_> = ids
            .into_iter()
            .filter_map(|id| self.in_flight.remove(&id).map(|(_, task)| task))
            .collect();
        futures_util::future::join_all(pending).await;
    }

    /// Number of reports that could not be delivered
    pub fn failed_deliveries(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
