//! Hive Context Manager
//!
//! This crate provides the isolated execution contexts a mini-app runs in.
//! It follows a worker pattern: each context runs in its own OS thread
//! with its own current-thread tokio runtime and its own script engine.
//!
//! # Architecture
//!
//! - One service context per running app (business logic, headless)
//! - Zero or more page contexts (rendering), usually handed out by a pool
//! - No shared memory: the host talks to a context only through its command
//!   queue, and a context talks to the host only through the mediator link
//! - Within one context, commands run to completion in submission order
//!
//! The rendering engine itself is an external collaborator, reached through
//! [`ScriptEngine`]: `evaluate(script)` plus a one-shot [`ReadySignal`].

mod command;
mod engine;
mod error;
mod guest;
mod handle;
mod headless;
mod manager;
mod mode;
mod spawn;
mod worker;

pub use command::{Continuation, Inbound, MediatorLink, Outbound, OutboundBody, Task};
pub use engine::{EngineError, EngineFactory, EngineSpec, ReadySignal, ScriptEngine};
pub use error::ContextError;
pub use guest::{BRIDGE_GLOBAL, GuestScope, SubscriptionId, TimerId};
pub use handle::{ContextHandle, ContextSnapshot, Residue};
pub use headless::{HeadlessEngine, HeadlessFactory, JournalEntry, ScriptJournal};
pub use manager::{ContextLink, ContextManager, ContextState, ManagerStats};
pub use mode::{ContextMode, PageMode, ServiceMode};
