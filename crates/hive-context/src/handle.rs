//! ContextHandle with type-state pattern.
//!
//! `ContextHandle<Mode>` uses the mode marker to enforce at compile time
//! which operations a context supports: only page handles can load content
//! and be reset for reuse.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread;

use hive_types::{ContextId, ContextKind};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::command::{ContextCommand, Inbound, Task};
use crate::error::ContextError;
use crate::guest::GuestScope;
use crate::manager::ContextState;
use crate::mode::{ContextMode, PageMode};

/// What is still attached to a context's current binding.
///
/// A freshly created context and a correctly recycled one report the same
/// residue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Residue {
    pub route: Option<String>,
    pub ready: bool,
    pub subscriptions: usize,
    pub methods: usize,
    pub timers: usize,
    pub bindings: usize,
    pub deferred: usize,
}

impl Residue {
    pub fn is_clean(&self) -> bool {
        *self == Residue::default()
    }
}

/// Point-in-time view of a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub id: ContextId,
    pub kind: ContextKind,
    pub epoch: u64,
    pub state: ContextState,
    pub residue: Residue,
}

/// Handle to a spawned context.
///
/// - `ContextHandle<ServiceMode>`: the app's service context
/// - `ContextHandle<PageMode>`: a page context (load, reset)
///
/// Dropping the handle terminates the context and joins its thread.
pub struct ContextHandle<Mode: ContextMode> {
    pub(crate) id: ContextId,
    /// Command sender
    pub(crate) cmd_tx: mpsc::UnboundedSender<ContextCommand>,
    /// Shutdown signal sender
    pub(crate) shutdown_tx: watch::Sender<bool>,
    /// Whether the context has terminated
    pub(crate) terminated: Arc<AtomicBool>,
    pub(crate) epoch: Arc<AtomicU64>,
    pub(crate) state: Arc<AtomicU8>,
    /// Thread join handle
    pub(crate) thread_handle: Mutex<Option<thread::JoinHandle<Result<(), ContextError>>>>,
    pub(crate) _mode: PhantomData<Mode>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared methods (available in all modes)
// ─────────────────────────────────────────────────────────────────────────────

impl<Mode: ContextMode> ContextHandle<Mode> {
    /// Helper to send a command and wait for reply.
    ///
    /// `on_err` maps a failure reported by the worker into the caller's
    /// error variant.
    async fn send_command<T, F>(
        &self,
        make_cmd: F,
        on_err: fn(String) -> ContextError,
    ) -> Result<T, ContextError>
    where
        F: FnOnce(oneshot::Sender<Result<T, String>>) -> ContextCommand,
    {
        if self.is_terminated() {
            return Err(ContextError::Terminated);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make_cmd(reply_tx))
            .map_err(|_| ContextError::ChannelClosed)?;

        reply_rx
            .await
            .map_err(|_| ContextError::ChannelClosed)?
            .map_err(on_err)
    }

    fn post(&self, cmd: ContextCommand) -> Result<(), ContextError> {
        if self.is_terminated() {
            return Err(ContextError::Terminated);
        }
        self.cmd_tx.send(cmd).map_err(|_| ContextError::ChannelClosed)
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn kind(&self) -> ContextKind {
        Mode::KIND
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Evaluate raw script in the context.
    pub async fn evaluate(&self, script: impl Into<String>) -> Result<Value, ContextError> {
        let script = script.into();
        self.send_command(
            |reply| ContextCommand::Evaluate { script, reply },
            ContextError::Script,
        )
        .await
    }

    /// Queue routed traffic. Does not wait for it to be handled.
    pub fn deliver(&self, inbound: Inbound) -> Result<(), ContextError> {
        self.post(ContextCommand::Deliver(inbound))
    }

    /// Queue a task without waiting for it.
    pub fn spawn_task(&self, task: Task) -> Result<(), ContextError> {
        self.post(ContextCommand::Run(task))
    }

    /// Queue a task that runs once the current binding is ready.
    pub fn run_after_ready(&self, task: Task) -> Result<(), ContextError> {
        self.post(ContextCommand::RunAfterReady(task))
    }

    /// Run a closure inside the context and wait for its result.
    pub async fn run<R, F>(&self, f: F) -> Result<R, ContextError>
    where
        F: for<'a> FnOnce(&mut GuestScope<'a>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.spawn_task(Box::new(move |scope: &mut GuestScope<'_>| {
            let _ = tx.send(f(scope));
        }))?;
        rx.await.map_err(|_| ContextError::ChannelClosed)
    }

    pub async fn snapshot(&self) -> Result<ContextSnapshot, ContextError> {
        self.send_command(
            |reply| ContextCommand::Snapshot { reply },
            ContextError::Script,
        )
        .await
    }

    /// Terminate the context.
    ///
    /// This signals the worker thread to shut down. Queued commands that
    /// have not started are discarded.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Wait for the context thread to finish.
    pub fn join(self) -> Result<(), ContextError> {
        if let Some(handle) = self.thread_handle.lock().take() {
            handle.join().map_err(|_| ContextError::ThreadPanic)??;
        }
        Ok(())
    }
}

impl<Mode: ContextMode> Drop for ContextHandle<Mode> {
    fn drop(&mut self) {
        self.terminate();
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl<Mode: ContextMode> std::fmt::Debug for ContextHandle<Mode> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("id", &self.id)
            .field("kind", &Mode::KIND)
            .field("epoch", &self.epoch())
            .field("state", &self.state())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Page mode methods
// ─────────────────────────────────────────────────────────────────────────────

impl ContextHandle<PageMode> {
    /// Bind page content and start evaluating it.
    ///
    /// Resolves once the script has been evaluated; first render completion
    /// is reported separately through the mediator.
    pub async fn load(
        &self,
        route: impl Into<String>,
        script: impl Into<String>,
    ) -> Result<(), ContextError> {
        let route = route.into();
        let script = script.into();
        self.send_command(
            |reply| ContextCommand::Load {
                route,
                script,
                reply,
            },
            ContextError::Script,
        )
        .await
    }

    /// Clear all per-page state so the context can host another page.
    pub async fn reset(&self) -> Result<(), ContextError> {
        self.send_command(
            |reply| ContextCommand::Reset { reply },
            ContextError::ResetFailed,
        )
        .await
    }
}
