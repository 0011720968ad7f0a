//! Hive Types - Shared vocabulary for the mini-app host
//!
//! This crate contains the pure data structures exchanged between the
//! isolated execution contexts and the native mediator:
//!
//! - Stable identifiers for contexts, pages and callbacks
//! - The wire envelopes (Invoke / Callback / Publish)
//! - The error taxonomy carried inside failed callbacks

mod error;
mod ids;
mod message;

pub use error::*;
pub use ids::*;
pub use message::*;
