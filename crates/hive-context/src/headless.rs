//! Headless script engine.
//!
//! Stands in for a real rendering engine when the host runs without a
//! display (CLI, tests). It renders nothing: it records every script it is
//! asked to evaluate and, by default, reports first render as soon as page
//! content has been evaluated.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use hive_types::{ContextId, ContextKind};
use parking_lot::Mutex;
use serde_json::Value;

use crate::engine::{EngineError, EngineFactory, EngineSpec, ReadySignal, ScriptEngine};
use crate::guest::BRIDGE_GLOBAL;

/// One evaluated script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub context: ContextId,
    pub script: String,
}

/// Shared record of everything evaluated by headless engines.
#[derive(Debug, Clone, Default)]
pub struct ScriptJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl ScriptJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, context: ContextId, script: &str) {
        self.entries.lock().push(JournalEntry {
            context,
            script: script.to_string(),
        });
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    pub fn scripts_for(&self, context: ContextId) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.context == context)
            .map(|e| e.script.clone())
            .collect()
    }

    /// Has `context` evaluated a script containing `needle`?
    pub fn contains(&self, context: ContextId, needle: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.context == context && e.script.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Engine that evaluates nothing and records everything.
pub struct HeadlessEngine {
    id: ContextId,
    kind: ContextKind,
    journal: ScriptJournal,
    ready: ReadySignal,
    auto_ready: bool,
    fail_clear: Arc<AtomicBool>,
    content: Vec<String>,
}

impl HeadlessEngine {
    /// Scripts evaluated since the last clear, bridge traffic excluded.
    pub fn content(&self) -> &[String] {
        &self.content
    }
}

impl ScriptEngine for HeadlessEngine {
    fn evaluate(&mut self, script: &str) -> Result<Value, EngineError> {
        self.journal.record(self.id, script);
        if script.starts_with(BRIDGE_GLOBAL) {
            return Ok(Value::Null);
        }

        self.content.push(script.to_string());
        if self.auto_ready && self.kind == ContextKind::Page {
            self.ready.fire();
        }
        Ok(Value::Null)
    }

    fn clear(&mut self) -> Result<(), EngineError> {
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable(format!(
                "{} could not be cleared",
                self.id
            )));
        }
        self.content.clear();
        Ok(())
    }
}

/// Factory for [`HeadlessEngine`]s.
///
/// Failure switches let callers exercise creation and reset failures.
pub struct HeadlessFactory {
    journal: ScriptJournal,
    auto_ready: bool,
    fail_create: AtomicBool,
    fail_clear: Arc<AtomicBool>,
    created: AtomicUsize,
}

impl Default for HeadlessFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessFactory {
    pub fn new() -> Self {
        Self {
            journal: ScriptJournal::new(),
            auto_ready: true,
            fail_create: AtomicBool::new(false),
            fail_clear: Arc::new(AtomicBool::new(false)),
            created: AtomicUsize::new(0),
        }
    }

    /// Never report first render on its own; the page must call
    /// `signal_ready` itself.
    pub fn manual_ready(mut self) -> Self {
        self.auto_ready = false;
        self
    }

    pub fn journal(&self) -> ScriptJournal {
        self.journal.clone()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_clear(&self, fail: bool) {
        self.fail_clear.store(fail, Ordering::SeqCst);
    }

    /// Number of engines successfully created.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl EngineFactory for HeadlessFactory {
    fn create(
        &self,
        spec: &EngineSpec,
        ready: ReadySignal,
    ) -> Result<Box<dyn ScriptEngine>, EngineError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("engine creation disabled".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(HeadlessEngine {
            id: spec.context_id,
            kind: spec.kind,
            journal: self.journal.clone(),
            ready,
            auto_ready: self.auto_ready,
            fail_clear: self.fail_clear.clone(),
            content: Vec::new(),
        }))
    }
}
