//! Worker loop for a context.
//!
//! Runs inside the context's dedicated thread. Commands and internal signals
//! are handled one at a time, each to completion, so everything running in a
//! context observes a consistent state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use hive_types::{ContextId, ContextKind};
use tokio::sync::{mpsc, oneshot, watch};

use crate::command::{ContextCommand, Inbound, MediatorLink, OutboundBody, WorkerSignal};
use crate::engine::{EngineFactory, EngineSpec, ReadySignal, ScriptEngine};
use crate::error::ContextError;
use crate::guest::{GuestScope, GuestState};
use crate::handle::ContextSnapshot;
use crate::manager::ContextState;

pub(crate) struct WorkerInit {
    pub id: ContextId,
    pub kind: ContextKind,
    pub factory: Arc<dyn EngineFactory>,
    pub outbound: MediatorLink,
    pub epoch: Arc<AtomicU64>,
    pub state: Arc<AtomicU8>,
}

struct Worker {
    guest: GuestState,
    engine: Box<dyn ScriptEngine>,
    state: Arc<AtomicU8>,
}

/// The main worker loop that runs inside the spawned thread.
pub(crate) async fn run_worker(
    init: WorkerInit,
    mut cmd_rx: mpsc::UnboundedReceiver<ContextCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
    init_tx: oneshot::Sender<Result<(), String>>,
) -> Result<(), ContextError> {
    let WorkerInit {
        id,
        kind,
        factory,
        outbound,
        epoch,
        state,
    } = init;

    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    let ready = ReadySignal::new(signal_tx.clone(), epoch.clone());
    let spec = EngineSpec {
        context_id: id,
        kind,
    };

    let engine = match factory.create(&spec, ready) {
        Ok(engine) => engine,
        Err(e) => {
            state.store(ContextState::Destroyed as u8, Ordering::SeqCst);
            let _ = init_tx.send(Err(e.to_string()));
            return Err(ContextError::CreationFailed(e.to_string()));
        }
    };

    let mut worker = Worker {
        guest: GuestState::new(id, kind, epoch, outbound, signal_tx),
        engine,
        state,
    };

    // A service context belongs to its app for its whole life.
    let initial = match kind {
        ContextKind::Service => ContextState::Bound,
        ContextKind::Page => ContextState::Unbound,
    };
    worker.set_state(initial);
    let _ = init_tx.send(Ok(()));
    tracing::debug!(context = %id, %kind, "context ready");

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::debug!(context = %id, "shutdown signal received");
                    break;
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => worker.handle_command(cmd),
                    None => {
                        tracing::debug!(context = %id, "command channel closed");
                        break;
                    }
                }
            }

            Some(signal) = signal_rx.recv() => {
                worker.handle_signal(signal);
            }
        }
    }

    worker.guest.cancel_timers();
    worker.set_state(ContextState::Destroyed);
    Ok(())
}

impl Worker {
    fn set_state(&self, state: ContextState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn scope(&mut self) -> GuestScope<'_> {
        GuestScope::new(&mut self.guest, &mut self.engine)
    }

    fn handle_command(&mut self, cmd: ContextCommand) {
        match cmd {
            ContextCommand::Deliver(Inbound::Message(message)) => {
                self.scope().deliver(message);
            }
            ContextCommand::Deliver(Inbound::Resume {
                continuation,
                callback,
            }) => {
                self.scope().resume(continuation, callback);
            }
            ContextCommand::Run(task) => {
                task(&mut self.scope());
            }
            ContextCommand::RunAfterReady(task) => {
                if self.guest.ready {
                    task(&mut self.scope());
                } else {
                    self.guest.deferred.push(task);
                }
            }
            ContextCommand::Evaluate { script, reply } => {
                let result = self.engine.evaluate(&script).map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            ContextCommand::Load {
                route,
                script,
                reply,
            } => {
                let _ = reply.send(self.load(route, &script));
            }
            ContextCommand::Reset { reply } => {
                let _ = reply.send(self.reset());
            }
            ContextCommand::Snapshot { reply } => {
                let snapshot = ContextSnapshot {
                    id: self.guest.id,
                    kind: self.guest.kind,
                    epoch: self.guest.epoch(),
                    state: ContextState::from_u8(self.state.load(Ordering::SeqCst)),
                    residue: self.guest.residue(),
                };
                let _ = reply.send(Ok(snapshot));
            }
        }
    }

    fn handle_signal(&mut self, signal: WorkerSignal) {
        match signal {
            WorkerSignal::Ready { epoch } => {
                if epoch != self.guest.epoch() {
                    tracing::trace!(context = %self.guest.id, epoch, "ignoring ready from a previous binding");
                    return;
                }
                if self.guest.ready || self.guest.route.is_none() {
                    return;
                }
                self.guest.ready = true;
                self.guest.emit(OutboundBody::ContentReady);

                let deferred = std::mem::take(&mut self.guest.deferred);
                for task in deferred {
                    task(&mut self.scope());
                }
            }
            WorkerSignal::Timer { id, epoch } => {
                if epoch != self.guest.epoch() {
                    return;
                }
                self.scope().run_timer(id);
            }
        }
    }

    fn load(&mut self, route: String, script: &str) -> Result<(), String> {
        if self.guest.kind != ContextKind::Page {
            return Err("only page contexts can load content".to_string());
        }
        tracing::debug!(context = %self.guest.id, route = %route, "loading content");
        self.guest.route = Some(route);
        self.set_state(ContextState::Bound);
        self.engine.evaluate(script).map(|_| ()).map_err(|e| e.to_string())
    }

    fn reset(&mut self) -> Result<(), String> {
        self.set_state(ContextState::Resetting);
        self.guest.clear_binding();

        if let Err(e) = self.engine.clear() {
            tracing::warn!(context = %self.guest.id, error = %e, "engine refused to clear");
            return Err(e.to_string());
        }

        let epoch = self.guest.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(ContextState::Unbound);
        tracing::debug!(context = %self.guest.id, epoch, "context reset");
        Ok(())
    }
}
