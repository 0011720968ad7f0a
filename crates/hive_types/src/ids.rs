// Identifiers
//
// Contexts, pages and callbacks are never referenced by pointer across a
// context boundary. Everything is addressed by these small copyable ids.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Context / Page / Callback ids
// ─────────────────────────────────────────────────────────────────────────────

/// Identifier of an execution context (service or page).
///
/// A recycled page context keeps its id; the binding epoch tracked by the
/// context manager tells successive bindings apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub u32);

impl ContextId {
    /// The native mediator itself, used as the source of host-originated
    /// publishes. Never assigned to a real context.
    pub const HOST: ContextId = ContextId(0);
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == ContextId::HOST {
            return f.write_str("host");
        }
        write!(f, "ctx#{}", self.0)
    }
}

/// Identifier of a page inside one running app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u32);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page#{}", self.0)
    }
}

/// Callback id, unique per (owner context, direction) while outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(pub u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Kinds
// ─────────────────────────────────────────────────────────────────────────────

/// The two flavours of execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    /// Headless business-logic context, exactly one per running app
    Service,
    /// Rendering context bound to a visible page
    Page,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKind::Service => write!(f, "service"),
            ContextKind::Page => write!(f, "page"),
        }
    }
}

/// Which way an invoke travels. Callback ids are allocated per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// Answered by the host: a built-in native handler or a module API
    Native,
    /// Answered by another context, relayed through the mediator
    Forward,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&ContextId(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&CallbackId(42)).unwrap(), "42");
        let page: PageId = serde_json::from_str("3").unwrap();
        assert_eq!(page, PageId(3));
    }

    #[test]
    fn test_display() {
        assert_eq!(ContextId(2).to_string(), "ctx#2");
        assert_eq!(PageId(5).to_string(), "page#5");
        assert_eq!(ContextKind::Page.to_string(), "page");
    }
}
