//! Event targets - anything listeners can be attached to
//!
//! Design: one small trait, implemented by every host object that accepts
//! listeners. Handlers are `Arc` closures so that identity is just pointer
//! equality; there is no other sane notion of "the same closure" in Rust.

use std::sync::Arc;

use crate::error::Result;
use crate::types::{Event, ListenerOptions, NodeId};

/// Event handler attached to a target
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Build a handler from a plain closure
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identity comparison for handlers
pub fn same_handler(a: &Handler, b: &Handler) -> bool {
    Arc::ptr_eq(a, b)
}

/// Something that accepts event listeners
///
/// Attaching never fails. Detaching may: a host can be torn down or
/// otherwise refuse, and callers doing bulk teardown must cope with it.
pub trait EventTarget: Send + Sync {
    /// Stable id of this target within its document
    fn target_id(&self) -> NodeId;

    /// Attach `handler` for `kind`. The listener is live on return.
    fn add_event_listener(&self, kind: &str, handler: Handler, options: &ListenerOptions);

    /// Detach `handler` for `kind`. Detaching an absent handler is `Ok(())`.
    fn remove_event_listener(
        &self,
        kind: &str,
        handler: &Handler,
        options: &ListenerOptions,
    ) -> Result<()>;
}
