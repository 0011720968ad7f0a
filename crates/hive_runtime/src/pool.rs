// Context Pool - pre-warmed, recyclable page contexts
//
// The pool owns every page context of an app. Pages refer to their context
// by id and borrow the handle through `get`. All mutation goes through
// `&mut self`, so the owner (the app coordinator task) serializes it.
//
// Entries move idle -> active -> (idle | destroyed). The counters satisfy
// `idle + active + destroyed == total_created` after every call.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use hive_context::{ContextError, ContextHandle, ContextManager, PageMode};
use hive_types::ContextId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────────────
// Config & Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle contexts `preload` refills toward
    pub target_idle: usize,
    /// Idle contexts kept at most; the oldest beyond this are destroyed
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target_idle: 2,
            max_idle: 4,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Context creation failed: {0}")]
    Creation(#[source] ContextError),

    #[error("Context {0} is not owned by the pool")]
    UnknownContext(ContextId),

    #[error("Context {0} is not active")]
    NotActive(ContextId),
}

// ─────────────────────────────────────────────────────────────────────────────
// Entries
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Idle,
    Active,
}

struct PoolEntry {
    handle: ContextHandle<PageMode>,
    status: EntryStatus,
    created_at: DateTime<Utc>,
    last_recycled_at: Option<DateTime<Utc>>,
}

/// Diagnostic view of one pool entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub context: ContextId,
    pub status: EntryStatus,
    pub epoch: u64,
    pub created_at: DateTime<Utc>,
    pub last_recycled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    pub destroyed: usize,
    pub total_created: usize,
    /// Background creations not yet completed
    pub in_flight: usize,
}

impl PoolStats {
    pub fn is_balanced(&self) -> bool {
        self.idle + self.active + self.destroyed == self.total_created
    }
}

/// Result of returning a context to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecycleOutcome {
    /// Reset succeeded. `evicted` lists idle contexts destroyed to respect
    /// `max_idle`, oldest first.
    Recycled { evicted: Vec<ContextId> },
    /// Reset failed and the context was destroyed
    Destroyed { reason: String },
}

/// A background creation finished.
pub struct PreloadDone {
    pub result: Result<ContextHandle<PageMode>, ContextError>,
}

impl std::fmt::Debug for PreloadDone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.result {
            Ok(handle) => write!(f, "PreloadDone(Ok({}))", handle.id()),
            Err(e) => write!(f, "PreloadDone(Err({e}))"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pool
// ─────────────────────────────────────────────────────────────────────────────

pub struct ContextPool {
    config: PoolConfig,
    contexts: Arc<ContextManager>,
    entries: HashMap<ContextId, PoolEntry>,
    /// Idle ids, oldest recycled at the front
    idle: VecDeque<ContextId>,
    in_flight: usize,
    destroyed: usize,
    total_created: usize,
}

impl ContextPool {
    pub fn new(contexts: Arc<ContextManager>, mut config: PoolConfig) -> Self {
        if config.max_idle < config.target_idle {
            tracing::warn!(
                target_idle = config.target_idle,
                max_idle = config.max_idle,
                "max_idle below target_idle, raising it"
            );
            config.max_idle = config.target_idle;
        }
        Self {
            config,
            contexts,
            entries: HashMap::new(),
            idle: VecDeque::new(),
            in_flight: 0,
            destroyed: 0,
            total_created: 0,
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Hand out a context for a page. Takes the most recently recycled idle
    /// context, or creates one inline when the idle set is empty.
    pub async fn acquire(&mut self) -> Result<ContextId, PoolError> {
        if let Some(id) = self.idle.pop_back() {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.status = EntryStatus::Active;
                tracing::debug!(context = %id, idle = self.idle.len(), "acquired idle context");
                return Ok(id);
            }
        }

        tracing::debug!("idle set empty, creating context inline");
        let handle = self
            .contexts
            .create_page()
            .await
            .map_err(PoolError::Creation)?;
        let id = handle.id();
        self.admit(handle, EntryStatus::Active);
        Ok(id)
    }

    /// Refill the idle set to `target_idle` and wait for it. Returns the
    /// number of contexts added.
    pub async fn preload(&mut self) -> Result<usize, PoolError> {
        let needed = self.shortfall();
        if needed == 0 {
            return Ok(0);
        }

        let contexts = self.contexts.clone();
        let results = join_all((0..needed).map(|_| contexts.create_page())).await;

        let mut added = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(handle) => {
                    self.admit(handle, EntryStatus::Idle);
                    added += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "preload creation failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::debug!(added, idle = self.idle.len(), "preload finished");
        match first_error {
            Some(e) if added == 0 => Err(PoolError::Creation(e)),
            _ => Ok(added),
        }
    }

    /// Start background creations toward `target_idle`. Each one reports
    /// through `done`; feed it back with [`ContextPool::complete`].
    pub fn schedule_preload(&mut self, done: mpsc::UnboundedSender<PreloadDone>) -> usize {
        let needed = self.shortfall();
        for _ in 0..needed {
            let contexts = self.contexts.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let result = contexts.create_page().await;
                if let Err(mpsc::error::SendError(PreloadDone { result: Ok(handle) })) =
                    done.send(PreloadDone { result })
                {
                    contexts.destroy(handle).await;
                }
            });
        }
        self.in_flight += needed;
        if needed > 0 {
            tracing::debug!(needed, "preload scheduled");
        }
        needed
    }

    /// Take in a background creation started by `schedule_preload`.
    pub async fn complete(&mut self, done: PreloadDone) -> Result<ContextId, PoolError> {
        self.in_flight = self.in_flight.saturating_sub(1);
        let handle = done.result.map_err(|e| {
            tracing::warn!(error = %e, "background preload failed");
            PoolError::Creation(e)
        })?;
        let id = handle.id();
        self.admit(handle, EntryStatus::Idle);
        self.enforce_capacity().await;
        Ok(id)
    }

    /// Reset an active context and return it to the idle set. A context
    /// whose reset fails is destroyed instead.
    pub async fn recycle(&mut self, id: ContextId) -> Result<RecycleOutcome, PoolError> {
        let entry = self.entries.get(&id).ok_or(PoolError::UnknownContext(id))?;
        if entry.status != EntryStatus::Active {
            return Err(PoolError::NotActive(id));
        }

        let reset = entry.handle.reset().await;
        if let Err(e) = reset {
            tracing::warn!(context = %id, error = %e, "reset failed, destroying context");
            self.destroy_entry(id).await;
            return Ok(RecycleOutcome::Destroyed {
                reason: e.to_string(),
            });
        }

        if let Some(entry) = self.entries.get_mut(&id) {
            entry.status = EntryStatus::Idle;
            entry.last_recycled_at = Some(Utc::now());
        }
        self.idle.push_back(id);
        let evicted = self.enforce_capacity().await;

        tracing::debug!(context = %id, idle = self.idle.len(), "context recycled");
        Ok(RecycleOutcome::Recycled { evicted })
    }

    /// Destroy a context without trying to reuse it.
    pub async fn discard(&mut self, id: ContextId) -> Result<(), PoolError> {
        if !self.entries.contains_key(&id) {
            return Err(PoolError::UnknownContext(id));
        }
        self.idle.retain(|idle| *idle != id);
        self.destroy_entry(id).await;
        Ok(())
    }

    pub fn get(&self, id: ContextId) -> Option<&ContextHandle<PageMode>> {
        self.entries.get(&id).map(|entry| &entry.handle)
    }

    pub fn status(&self, id: ContextId) -> Option<EntryStatus> {
        self.entries.get(&id).map(|entry| entry.status)
    }

    pub fn entries(&self) -> Vec<EntryInfo> {
        let mut out: Vec<EntryInfo> = self
            .entries
            .iter()
            .map(|(id, entry)| EntryInfo {
                context: *id,
                status: entry.status,
                epoch: entry.handle.epoch(),
                created_at: entry.created_at,
                last_recycled_at: entry.last_recycled_at,
            })
            .collect();
        out.sort_by_key(|info| info.context);
        out
    }

    pub fn stats(&self) -> PoolStats {
        let active = self
            .entries
            .values()
            .filter(|entry| entry.status == EntryStatus::Active)
            .count();
        PoolStats {
            idle: self.idle.len(),
            active,
            destroyed: self.destroyed,
            total_created: self.total_created,
            in_flight: self.in_flight,
        }
    }

    /// Destroy every context, idle or active. Returns how many were destroyed.
    pub async fn drain(&mut self) -> usize {
        let ids: Vec<ContextId> = self.entries.keys().copied().collect();
        self.idle.clear();
        for id in &ids {
            self.destroy_entry(*id).await;
        }
        tracing::info!(destroyed = ids.len(), "pool drained");
        ids.len()
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn shortfall(&self) -> usize {
        self.config
            .target_idle
            .saturating_sub(self.idle.len() + self.in_flight)
    }

    fn admit(&mut self, handle: ContextHandle<PageMode>, status: EntryStatus) {
        let id = handle.id();
        self.entries.insert(
            id,
            PoolEntry {
                handle,
                status,
                created_at: Utc::now(),
                last_recycled_at: None,
            },
        );
        if status == EntryStatus::Idle {
            self.idle.push_back(id);
        }
        self.total_created += 1;
    }

    async fn enforce_capacity(&mut self) -> Vec<ContextId> {
        let mut evicted = Vec::new();
        while self.idle.len() > self.config.max_idle {
            let Some(oldest) = self.idle.pop_front() else {
                break;
            };
            tracing::debug!(context = %oldest, "idle set over capacity, evicting");
            self.destroy_entry(oldest).await;
            evicted.push(oldest);
        }
        evicted
    }

    async fn destroy_entry(&mut self, id: ContextId) {
        if let Some(entry) = self.entries.remove(&id) {
            self.contexts.destroy(entry.handle).await;
            self.destroyed += 1;
        }
    }
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_context::{ContextState, GuestScope, HeadlessFactory};
    use serde_json::json;
    use std::time::Duration;

    fn pool_with(config: PoolConfig) -> (ContextPool, Arc<HeadlessFactory>) {
        let factory = Arc::new(HeadlessFactory::new());
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let contexts = Arc::new(ContextManager::new(factory.clone(), out_tx));
        (ContextPool::new(contexts, config), factory)
    }

    #[tokio::test]
    async fn test_acquire_on_empty_pool_creates_inline() {
        let (mut pool, factory) = pool_with(PoolConfig::default());

        let id = pool.acquire().await.unwrap();
        assert_eq!(factory.created(), 1);
        assert_eq!(pool.status(id), Some(EntryStatus::Active));
        let stats = pool.stats();
        assert_eq!((stats.idle, stats.active, stats.total_created), (0, 1, 1));
        assert!(stats.is_balanced());

        assert_eq!(pool.preload().await.unwrap(), 2);
        assert_eq!(pool.stats().idle, 2);
        assert_eq!(pool.preload().await.unwrap(), 0);
        assert!(pool.stats().is_balanced());
    }

    #[tokio::test]
    async fn test_acquire_prefers_idle_contexts() {
        let (mut pool, factory) = pool_with(PoolConfig::default());
        pool.preload().await.unwrap();

        let id = pool.acquire().await.unwrap();
        assert_eq!(factory.created(), 2);
        assert_eq!(pool.status(id), Some(EntryStatus::Active));
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_recycled_context_matches_fresh_one() {
        let (mut pool, _factory) = pool_with(PoolConfig::default());
        let id = pool.acquire().await.unwrap();
        let fresh = pool.get(id).unwrap().snapshot().await.unwrap();

        let handle = pool.get(id).unwrap();
        handle.load("pages/index", "render()").await.unwrap();
        handle
            .run(|scope: &mut GuestScope<'_>| {
                scope.bind("storage", json!({"k": 1}));
                scope.subscribe("cart", |_s, _d| {});
                scope.set_timeout(Duration::from_secs(60), |_s| {});
            })
            .await
            .unwrap();
        assert!(!handle.snapshot().await.unwrap().residue.is_clean());

        let outcome = pool.recycle(id).await.unwrap();
        assert_eq!(outcome, RecycleOutcome::Recycled { evicted: vec![] });
        assert_eq!(pool.status(id), Some(EntryStatus::Idle));

        let recycled = pool.get(id).unwrap().snapshot().await.unwrap();
        assert_eq!(recycled.residue, fresh.residue);
        assert_eq!(recycled.state, ContextState::Unbound);
        assert_eq!(recycled.epoch, fresh.epoch + 1);
        assert!(pool.stats().is_balanced());
    }

    #[tokio::test]
    async fn test_recycle_evicts_oldest_over_capacity() {
        let (mut pool, _factory) = pool_with(PoolConfig {
            target_idle: 1,
            max_idle: 1,
        });
        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();

        pool.recycle(first).await.unwrap();
        let outcome = pool.recycle(second).await.unwrap();
        assert_eq!(
            outcome,
            RecycleOutcome::Recycled {
                evicted: vec![first]
            }
        );
        assert!(pool.get(first).is_none());
        assert_eq!(pool.status(second), Some(EntryStatus::Idle));

        let stats = pool.stats();
        assert_eq!((stats.idle, stats.destroyed, stats.total_created), (1, 1, 2));
        assert!(stats.is_balanced());
    }

    #[tokio::test]
    async fn test_failed_reset_destroys_context() {
        let (mut pool, factory) = pool_with(PoolConfig::default());
        let id = pool.acquire().await.unwrap();

        factory.set_fail_clear(true);
        let outcome = pool.recycle(id).await.unwrap();
        assert!(matches!(outcome, RecycleOutcome::Destroyed { .. }));
        assert!(pool.get(id).is_none());

        let stats = pool.stats();
        assert_eq!((stats.idle, stats.active, stats.destroyed), (0, 0, 1));
        assert!(stats.is_balanced());
    }

    #[tokio::test]
    async fn test_recycle_rejects_unknown_and_idle() {
        let (mut pool, _factory) = pool_with(PoolConfig::default());
        pool.preload().await.unwrap();
        let idle = pool.entries()[0].context;

        assert!(matches!(
            pool.recycle(idle).await,
            Err(PoolError::NotActive(_))
        ));
        assert!(matches!(
            pool.recycle(ContextId(99)).await,
            Err(PoolError::UnknownContext(_))
        ));
    }

    #[tokio::test]
    async fn test_creation_failure_is_reported() {
        let (mut pool, factory) = pool_with(PoolConfig::default());
        factory.set_fail_create(true);

        assert!(matches!(pool.acquire().await, Err(PoolError::Creation(_))));
        assert!(matches!(pool.preload().await, Err(PoolError::Creation(_))));
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[tokio::test]
    async fn test_background_preload_completes() {
        let (mut pool, _factory) = pool_with(PoolConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert_eq!(pool.schedule_preload(tx.clone()), 2);
        assert_eq!(pool.stats().in_flight, 2);
        // already covered by the in-flight creations
        assert_eq!(pool.schedule_preload(tx), 0);

        for _ in 0..2 {
            let done = rx.recv().await.unwrap();
            pool.complete(done).await.unwrap();
        }
        let stats = pool.stats();
        assert_eq!((stats.idle, stats.in_flight, stats.total_created), (2, 0, 2));
    }

    #[tokio::test]
    async fn test_drain_destroys_everything() {
        let (mut pool, _factory) = pool_with(PoolConfig::default());
        pool.preload().await.unwrap();
        pool.acquire().await.unwrap();

        assert_eq!(pool.drain().await, 2);
        let stats = pool.stats();
        assert_eq!((stats.idle, stats.active, stats.destroyed), (0, 0, 2));
        assert!(stats.is_balanced());
    }
}
