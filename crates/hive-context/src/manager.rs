//! Context Manager
//!
//! Creates and destroys contexts and keeps the directory the router uses to
//! reach a context by id.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;
use hive_types::{ContextId, ContextKind};
use serde::Serialize;

use crate::command::{ContextCommand, Inbound, MediatorLink, Task};
use crate::engine::EngineFactory;
use crate::error::ContextError;
use crate::handle::ContextHandle;
use crate::mode::{ContextMode, PageMode, ServiceMode};
use crate::spawn::spawn_context;

/// Lifecycle of a context as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ContextState {
    Creating = 0,
    /// Alive but not bound to any page
    #[serde(rename = "none")]
    Unbound = 1,
    Bound = 2,
    Resetting = 3,
    Destroyed = 4,
}

impl ContextState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ContextState::Creating,
            1 => ContextState::Unbound,
            2 => ContextState::Bound,
            3 => ContextState::Resetting,
            _ => ContextState::Destroyed,
        }
    }
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContextState::Creating => "creating",
            ContextState::Unbound => "none",
            ContextState::Bound => "bound",
            ContextState::Resetting => "resetting",
            ContextState::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Directory entry: enough to reach a context without owning it.
#[derive(Clone)]
pub struct ContextLink {
    id: ContextId,
    kind: ContextKind,
    commands: tokio::sync::mpsc::UnboundedSender<ContextCommand>,
    epoch: Arc<AtomicU64>,
    state: Arc<AtomicU8>,
}

impl ContextLink {
    fn of<Mode: ContextMode>(handle: &ContextHandle<Mode>) -> Self {
        Self {
            id: handle.id,
            kind: Mode::KIND,
            commands: handle.cmd_tx.clone(),
            epoch: handle.epoch.clone(),
            state: handle.state.clone(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn deliver(&self, inbound: Inbound) -> Result<(), ContextError> {
        self.post(ContextCommand::Deliver(inbound))
    }

    pub fn spawn_task(&self, task: Task) -> Result<(), ContextError> {
        self.post(ContextCommand::Run(task))
    }

    fn post(&self, cmd: ContextCommand) -> Result<(), ContextError> {
        if self.state() == ContextState::Destroyed {
            return Err(ContextError::Terminated);
        }
        self.commands
            .send(cmd)
            .map_err(|_| ContextError::ChannelClosed)
    }
}

impl std::fmt::Debug for ContextLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextLink")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

/// Counters for the manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub created: u64,
    pub destroyed: u64,
    pub live: usize,
}

/// Creates, tracks and destroys contexts.
pub struct ContextManager {
    factory: Arc<dyn EngineFactory>,
    outbound: MediatorLink,
    next_id: AtomicU32,
    directory: DashMap<ContextId, ContextLink>,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl ContextManager {
    /// `outbound` receives every message any context managed here emits.
    pub fn new(factory: Arc<dyn EngineFactory>, outbound: MediatorLink) -> Self {
        Self {
            factory,
            outbound,
            next_id: AtomicU32::new(1),
            directory: DashMap::new(),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
        }
    }

    pub async fn create_service(&self) -> Result<ContextHandle<ServiceMode>, ContextError> {
        self.create().await
    }

    pub async fn create_page(&self) -> Result<ContextHandle<PageMode>, ContextError> {
        self.create().await
    }

    async fn create<Mode: ContextMode>(&self) -> Result<ContextHandle<Mode>, ContextError> {
        let id = ContextId(self.next_id.fetch_add(1, Ordering::SeqCst));
        match spawn_context::<Mode>(id, self.factory.clone(), self.outbound.clone()).await {
            Ok(handle) => {
                self.directory.insert(id, ContextLink::of(&handle));
                self.created.fetch_add(1, Ordering::SeqCst);
                tracing::info!(context = %id, kind = %Mode::KIND, "context created");
                Ok(handle)
            }
            Err(e) => {
                tracing::warn!(context = %id, kind = %Mode::KIND, error = %e, "context creation failed");
                Err(e)
            }
        }
    }

    /// Tear a context down and wait for its thread to exit.
    pub async fn destroy<Mode: ContextMode>(&self, handle: ContextHandle<Mode>) {
        let id = handle.id();
        self.directory.remove(&id);
        handle.terminate();

        let joined = tokio::task::spawn_blocking(move || handle.join()).await;
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(context = %id, error = %e, "context exited with error"),
            Err(e) => tracing::warn!(context = %id, error = %e, "failed to join context"),
        }

        self.destroyed.fetch_add(1, Ordering::SeqCst);
        tracing::info!(context = %id, "context destroyed");
    }

    pub fn link(&self, id: ContextId) -> Option<ContextLink> {
        self.directory.get(&id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.directory.contains_key(&id)
    }

    pub fn live(&self) -> Vec<(ContextId, ContextKind, ContextState)> {
        let mut out: Vec<_> = self
            .directory
            .iter()
            .map(|entry| (entry.id(), entry.kind(), entry.state()))
            .collect();
        out.sort_by_key(|(id, _, _)| *id);
        out
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            created: self.created.load(Ordering::SeqCst),
            destroyed: self.destroyed.load(Ordering::SeqCst),
            live: self.directory.len(),
        }
    }
}
