//! Script engine seam.
//!
//! The engine that actually renders or runs script is external to the host.
//! The context worker only needs two things from it: evaluate a piece of
//! script, and tell the host once first render has completed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hive_types::{ContextId, ContextKind};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::command::WorkerSignal;

/// Errors reported by a script engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Script error: {0}")]
    Script(String),

    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}

/// What the engine is being created for.
#[derive(Debug, Clone, Copy)]
pub struct EngineSpec {
    pub context_id: ContextId,
    pub kind: ContextKind,
}

/// One isolated script engine instance.
///
/// Lives on the context's worker thread and is never shared, so it does not
/// need to be `Send`.
pub trait ScriptEngine {
    /// Evaluate script in the engine's global scope.
    fn evaluate(&mut self, script: &str) -> Result<Value, EngineError>;

    /// Drop all content and script state so the instance can be reused.
    fn clear(&mut self) -> Result<(), EngineError>;
}

/// Creates engines on the worker thread.
pub trait EngineFactory: Send + Sync + 'static {
    fn create(
        &self,
        spec: &EngineSpec,
        ready: ReadySignal,
    ) -> Result<Box<dyn ScriptEngine>, EngineError>;
}

/// The engine's "first render finished" notification.
///
/// May be fired from any thread and any number of times. The worker honors
/// only the first firing per binding: each firing is stamped with the
/// binding epoch current at the time, and stale or repeated firings are
/// ignored.
#[derive(Clone)]
pub struct ReadySignal {
    tx: mpsc::UnboundedSender<WorkerSignal>,
    epoch: Arc<AtomicU64>,
}

impl ReadySignal {
    pub(crate) fn new(tx: mpsc::UnboundedSender<WorkerSignal>, epoch: Arc<AtomicU64>) -> Self {
        Self { tx, epoch }
    }

    pub fn fire(&self) {
        let epoch = self.epoch.load(Ordering::SeqCst);
        if self.tx.send(WorkerSignal::Ready { epoch }).is_err() {
            tracing::trace!("ready signal fired after context shutdown");
        }
    }
}

impl std::fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadySignal")
            .field("epoch", &self.epoch.load(Ordering::SeqCst))
            .finish()
    }
}
