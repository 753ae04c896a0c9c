//! In-memory Page Host
//!
//! The pieces of a web page a content script interacts with, without a
//! browser attached: nodes that accept event listeners, observers that
//! watch nodes, and a document that owns both and knows its location.
//!
//! ## Core Design
//!
//! ```text
//! Document ──owns──▶ Node (EventTarget) ──holds──▶ Handler (Arc<dyn Fn>)
//!     │
//!     └──weak──▶ PageObserver (Observer) ──calls──▶ ObserverCallback
//! ```
//!
//! Identity is pointer identity everywhere: handlers, observers and
//! targets are `Arc`s, and "the same one" means `Arc::ptr_eq`.

pub mod document;
pub mod error;
pub mod node;
pub mod observer;
pub mod target;
pub mod types;

pub use document::{Document, Location, WINDOW_ID};
pub use error::{DomError, Result};
pub use node::Node;
pub use observer::{observer_callback, Observer, ObserverCallback, ObserverFactory, PageObserver};
pub use target::{handler, same_handler, EventTarget, Handler};
pub use types::*;
