//! Content Script Runtime
//!
//! Resource bookkeeping for a script injected into a long-lived page.
//! Every listener, observer, timer and cleanup action goes through one
//! registry, and one call tears all of them down again.
//!
//! # Architecture
//!
//! 1. **Registry first**: `ResourceRegistry` is the only place resources
//!    are created and the only place they are released
//! 2. **Explicit context**: `ContentSession` owns the registry, relay and
//!    guard; there is no module-level state
//! 3. **Contain auxiliary failures**: teardown and error relaying log and
//!    move on, they never break the caller
//! 4. **Bound, don't hang**: `Guard` races async work against a timer and
//!    drops the loser

pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod registry;
pub mod relay;
pub mod session;

pub use config::{ContentConfig, GuardConfig};
pub use error::{BoxError, ContentError, RelayError, Result};
pub use events::{ContentEvent, EventBus};
pub use guard::{Guard, GuardError, Guarded};
pub use registry::{cleanup, Cleanup, ReleaseReport, ResourceRegistry, TimerHandle, UsageSnapshot};
pub use relay::{ChannelSink, ErrorRelay, ErrorReport, ReportSink};
pub use session::ContentSession;
