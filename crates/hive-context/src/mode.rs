//! Context mode markers for the type-state pattern.
//!
//! Service and page contexts share the worker machinery but not the
//! operations: only page handles can be loaded with content and reset for
//! reuse.

use hive_types::ContextKind;

/// Sealed trait pattern to prevent external implementations of ContextMode.
mod private {
    pub trait Sealed {}
}

/// Marker trait for context modes.
///
/// This trait is sealed; only `ServiceMode` and `PageMode` implement it.
pub trait ContextMode: private::Sealed + Send + Sync + 'static {
    /// The runtime kind reported for contexts of this mode
    const KIND: ContextKind;
}

/// Headless business-logic context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceMode;

/// Rendering context bound to a page.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageMode;

impl private::Sealed for ServiceMode {}
impl private::Sealed for PageMode {}

impl ContextMode for ServiceMode {
    const KIND: ContextKind = ContextKind::Service;
}

impl ContextMode for PageMode {
    const KIND: ContextKind = ContextKind::Page;
}
