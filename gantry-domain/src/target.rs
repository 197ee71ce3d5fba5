//! Targets and the polymorphic event id.
//!
//! A running event is keyed by the target it guards, so uniqueness per
//! target falls out of the store's primary-key constraint. A terminated
//! event is re-keyed under an opaque token, freeing the target for the
//! next operation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// Target
// =============================================================================

/// Names the resource an event acts on, e.g. `("app", "my-app")` or
/// `("node", "10.0.0.3")`.
///
/// # Invariants
/// - Both components non-empty for a usable target (checked at
///   acquisition time via [`Target::is_valid`])
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Resource class, e.g. `"app"`
    pub name: String,
    /// Resource identity within the class, e.g. `"my-app"`
    pub value: String,
}

impl Target {
    /// Create a target from its two components.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    /// A target is valid when both components are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.value.is_empty()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.value)
    }
}

// =============================================================================
// EventId
// =============================================================================

/// Primary key of an event record.
///
/// The id is a sum of the two lifecycle phases: while the event runs it
/// IS the target pair, once terminated it is a fresh opaque token. Wire
/// form is untagged; a reader tries the target shape first and falls back
/// to the token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventId {
    /// Running record: the id is the guarded target itself.
    Target(Target),
    /// Historical record: globally unique token.
    Token(Uuid),
}

impl EventId {
    /// Whether this id keys a running record.
    pub fn is_running_id(&self) -> bool {
        matches!(self, EventId::Target(_))
    }

    /// The target, when this id is in the running phase.
    pub fn as_target(&self) -> Option<&Target> {
        match self {
            EventId::Target(t) => Some(t),
            EventId::Token(_) => None,
        }
    }
}

impl From<Target> for EventId {
    fn from(target: Target) -> Self {
        EventId::Target(target)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventId::Target(t) => write!(f, "{}", t),
            EventId::Token(id) => write!(f, "{}", id),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_validity() {
        assert!(Target::new("app", "my-app").is_valid());
        assert!(!Target::new("", "my-app").is_valid());
        assert!(!Target::new("app", "").is_valid());
        assert!(!Target::new("", "").is_valid());
    }

    #[test]
    fn test_target_display() {
        let target = Target::new("app", "my-app");
        assert_eq!(target.to_string(), "app(my-app)");
    }

    #[test]
    fn test_target_equality_is_componentwise() {
        assert_eq!(Target::new("app", "a"), Target::new("app", "a"));
        assert_ne!(Target::new("app", "a"), Target::new("node", "a"));
        assert_ne!(Target::new("app", "a"), Target::new("app", "b"));
    }

    #[test]
    fn test_id_roundtrip_target() {
        let id = EventId::Target(Target::new("app", "my-app"));
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#"{"name":"app","value":"my-app"}"#);

        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(back.is_running_id());
    }

    #[test]
    fn test_id_roundtrip_token() {
        let id = EventId::Token(Uuid::now_v7());
        let json = serde_json::to_string(&id).unwrap();

        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(!back.is_running_id());
        assert!(back.as_target().is_none());
    }
}
