//! Messages crossing a context boundary.
//!
//! Inbound traffic arrives as `ContextCommand`s on the worker's queue.
//! Outbound traffic leaves through the `MediatorLink` as `Outbound` records,
//! stamped with the source context and its binding epoch.

use hive_types::{CallResult, CallbackEnvelope, CallbackId, ContextId, Message};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::guest::{GuestScope, TimerId};
use crate::handle::ContextSnapshot;

/// Work scheduled to run inside a context.
pub type Task = Box<dyn for<'a> FnOnce(&mut GuestScope<'a>) + Send + 'static>;

/// Resumption of a suspended invoke, run when its callback arrives.
pub type Continuation =
    Box<dyn for<'a> FnOnce(&mut GuestScope<'a>, &CallbackEnvelope) + Send + 'static>;

/// Sender half the host listens on for context-originated traffic.
pub type MediatorLink = mpsc::UnboundedSender<Outbound>;

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// A message delivered into a context by the router.
pub enum Inbound {
    /// A publish, or a forwarded invoke to answer with an exposed method
    Message(Message),
    /// Callback matching an invoke this context issued earlier
    Resume {
        continuation: Continuation,
        callback: CallbackEnvelope,
    },
}

impl std::fmt::Debug for Inbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Inbound::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Inbound::Resume { callback, .. } => {
                f.debug_struct("Resume").field("callback", callback).finish()
            }
        }
    }
}

/// Commands for the worker's queue.
pub(crate) enum ContextCommand {
    /// Deliver routed traffic.
    Deliver(Inbound),

    /// Run a task now.
    Run(Task),

    /// Run a task once the current binding has signalled ready.
    RunAfterReady(Task),

    /// Evaluate raw script.
    Evaluate {
        script: String,
        reply: oneshot::Sender<Result<Value, String>>,
    },

    /// Bind page content to the context and start evaluating it.
    Load {
        route: String,
        script: String,
        reply: oneshot::Sender<Result<(), String>>,
    },

    /// Clear all per-page state for reuse.
    Reset {
        reply: oneshot::Sender<Result<(), String>>,
    },

    /// Report the current binding state.
    Snapshot {
        reply: oneshot::Sender<Result<ContextSnapshot, String>>,
    },
}

/// Signals raised inside the worker itself (engine ready, timers).
pub(crate) enum WorkerSignal {
    Ready { epoch: u64 },
    Timer { id: TimerId, epoch: u64 },
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Context-originated traffic, addressed to the host.
pub struct Outbound {
    pub source: ContextId,
    /// Binding epoch at the time the record was produced
    pub epoch: u64,
    pub body: OutboundBody,
}

pub enum OutboundBody {
    /// Start a request/response exchange
    Invoke {
        event: String,
        payload: Value,
        continuation: Continuation,
    },
    /// Answer to a forwarded invoke this context received
    Reply {
        to: ContextId,
        callback_id: CallbackId,
        event: String,
        result: CallResult,
    },
    Publish {
        key: String,
        data: Value,
        target: Option<ContextId>,
    },
    /// First handler registered for a key
    Subscribe { key: String },
    /// Last handler removed for a key
    Unsubscribe { key: String },
    /// The engine finished first render for the current binding
    ContentReady,
}

impl OutboundBody {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            OutboundBody::Invoke { .. } => "invoke",
            OutboundBody::Reply { .. } => "reply",
            OutboundBody::Publish { .. } => "publish",
            OutboundBody::Subscribe { .. } => "subscribe",
            OutboundBody::Unsubscribe { .. } => "unsubscribe",
            OutboundBody::ContentReady => "content_ready",
        }
    }
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("source", &self.source)
            .field("epoch", &self.epoch)
            .field("body", &self.body.label())
            .finish()
    }
}
