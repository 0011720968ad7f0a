// Error taxonomy
//
// Failures never cross a context boundary as exceptions. They travel inside a
// Callback envelope as one of these tags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag carried in the `errMsg` field of a failed callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No handler exists for the invoked event
    EventNotDefined,
    /// The referenced capability module was never registered
    ModuleNotFound,
    /// Unknown or already-unloaded page / context
    TargetContextNotFound,
    /// Params could not be decoded into the handler's expected shape
    PayloadDecodeFailed,
    /// The pool or manager could not produce a context
    ContextCreationFailed,
    /// The target exists but is not bound to content yet
    ContextNotReady,
    /// A handler ran and reported its own failure
    HandlerFailed,
}

impl ErrorKind {
    /// The exact tag string used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EventNotDefined => "EventNotDefined",
            ErrorKind::ModuleNotFound => "ModuleNotFound",
            ErrorKind::TargetContextNotFound => "TargetContextNotFound",
            ErrorKind::PayloadDecodeFailed => "PayloadDecodeFailed",
            ErrorKind::ContextCreationFailed => "ContextCreationFailed",
            ErrorKind::ContextNotReady => "ContextNotReady",
            ErrorKind::HandlerFailed => "HandlerFailed",
        }
    }

    /// Parse a wire tag back into a kind.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "EventNotDefined" => ErrorKind::EventNotDefined,
            "ModuleNotFound" => ErrorKind::ModuleNotFound,
            "TargetContextNotFound" => ErrorKind::TargetContextNotFound,
            "PayloadDecodeFailed" => ErrorKind::PayloadDecodeFailed,
            "ContextCreationFailed" => ErrorKind::ContextCreationFailed,
            "ContextNotReady" => ErrorKind::ContextNotReady,
            "HandlerFailed" => ErrorKind::HandlerFailed,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call: the kind tag plus an optional human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    pub kind: ErrorKind,
    pub message: Option<String>,
}

impl CallError {
    /// A bare failure with no detail.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, message: None }
    }

    /// A failure with a detail message.
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub fn event_not_defined() -> Self {
        Self::new(ErrorKind::EventNotDefined)
    }

    pub fn target_not_found(message: impl Into<String>) -> Self {
        Self::with_message(ErrorKind::TargetContextNotFound, message)
    }

    pub fn decode(err: impl fmt::Display) -> Self {
        Self::with_message(ErrorKind::PayloadDecodeFailed, err.to_string())
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::with_message(ErrorKind::HandlerFailed, message)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind, message),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for CallError {}

impl From<ErrorKind> for CallError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Outcome of a single invoke.
pub type CallResult = Result<serde_json::Value, CallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for kind in [
            ErrorKind::EventNotDefined,
            ErrorKind::ModuleNotFound,
            ErrorKind::TargetContextNotFound,
            ErrorKind::PayloadDecodeFailed,
            ErrorKind::ContextCreationFailed,
            ErrorKind::ContextNotReady,
            ErrorKind::HandlerFailed,
        ] {
            assert_eq!(ErrorKind::from_tag(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::from_tag("ok"), None);
    }

    #[test]
    fn test_call_error_display() {
        assert_eq!(CallError::event_not_defined().to_string(), "EventNotDefined");
        assert_eq!(
            CallError::handler("disk full").to_string(),
            "HandlerFailed: disk full"
        );
    }
}
