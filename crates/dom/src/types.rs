//! Core value types shared by targets, observers and the document
//!
//! Key design principles:
//! 1. Use u32 for node ids (4 bytes, plenty for any page)
//! 2. Event payloads are plain JSON - hosts decide what goes in them
//! 3. Everything here is cheap to clone and serde-friendly

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Node identifier, unique within a document
pub type NodeId = u32;

/// An event delivered to listeners of a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind, e.g. "click", "error", "unhandledrejection"
    pub kind: String,

    /// Node the event was dispatched on
    pub target: NodeId,

    /// Kind-specific payload
    #[serde(default)]
    pub detail: Value,
}

impl Event {
    pub fn new(kind: impl Into<String>, target: NodeId) -> Self {
        Self {
            kind: kind.into(),
            target,
            detail: Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Options used when attaching a listener
///
/// `capture` takes part in listener identity, the other flags do not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerOptions {
    pub capture: bool,
    pub once: bool,
    pub passive: bool,
}

impl ListenerOptions {
    pub fn once() -> Self {
        Self {
            once: true,
            ..Self::default()
        }
    }

    pub fn capture() -> Self {
        Self {
            capture: true,
            ..Self::default()
        }
    }
}

/// Observer flavours a host can construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserverKind {
    Mutation,
    Intersection,
    Resize,
}

impl ObserverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObserverKind::Mutation => "mutation",
            ObserverKind::Intersection => "intersection",
            ObserverKind::Resize => "resize",
        }
    }
}

impl std::fmt::Display for ObserverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer configuration
///
/// Mutation observers read the boolean flags, intersection observers read
/// `thresholds`. Resize observers take no options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObserverOptions {
    pub child_list: bool,
    pub attributes: bool,
    pub character_data: bool,
    pub subtree: bool,
    pub thresholds: Vec<f64>,
}

impl ObserverOptions {
    /// The usual "watch everything under this node" mutation setup
    pub fn child_list_subtree() -> Self {
        Self {
            child_list: true,
            subtree: true,
            ..Self::default()
        }
    }

    /// True if a mutation observer with these options would see anything
    pub fn watches_mutations(&self) -> bool {
        self.child_list || self.attributes || self.character_data
    }
}

/// A single change delivered to an observer callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverRecord {
    pub kind: ObserverKind,
    pub target: NodeId,
    /// Change flavour, e.g. "childList", "attributes", "entered"
    pub change: String,
    #[serde(default)]
    pub detail: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_listener_options_default_from_empty_json() {
        let opts: ListenerOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, ListenerOptions::default());

        let opts: ListenerOptions = serde_json::from_value(json!({ "once": true })).unwrap();
        assert!(opts.once);
        assert!(!opts.capture);
    }

    #[test]
    fn test_observer_options_camel_case() {
        let opts: ObserverOptions =
            serde_json::from_value(json!({ "childList": true, "subtree": true })).unwrap();
        assert_eq!(opts, ObserverOptions::child_list_subtree());
        assert!(opts.watches_mutations());
        assert!(!ObserverOptions::default().watches_mutations());
    }

    #[test]
    fn test_observer_kind_serializes_lowercase() {
        let value = serde_json::to_value(ObserverKind::Intersection).unwrap();
        assert_eq!(value, json!("intersection"));
        assert_eq!(ObserverKind::Resize.to_string(), "resize");
    }
}
