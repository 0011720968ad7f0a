//! Hive Runtime - The native mediator for running mini-apps
//!
//! This crate ties isolated contexts together:
//!
//! - `bridge`: request/response and broadcast routing between contexts
//! - `registry`: capability modules and their event-named API handlers
//! - `pool`: pre-warmed, recyclable page contexts
//! - `page`: per-page lifecycle state machine and navigation stack
//! - `app`: the per-app coordinator that owns all of the above

pub use hive_context;
pub use hive_types;

pub mod app;
pub mod bridge;
pub mod page;
pub mod pool;
pub mod registry;

pub use app::*;
pub use bridge::*;
pub use page::*;
pub use pool::*;
pub use registry::*;
