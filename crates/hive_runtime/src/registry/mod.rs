//! Module & API Registry
//!
//! Capability modules plug event-named handlers into one flat dispatch
//! table. The table is built once when an app launches and is read-only
//! afterwards.
//!
//! # Collisions
//!
//! With the default `RegistryPolicy::LastWins` a later module registering an
//! event that already exists takes it over (logged as a warning).
//! `RegistryPolicy::Strict` rejects the second registration instead.
//!
//! # Lifecycle fan-out
//!
//! `notify` runs the matching hook on every module in registration order.
//! A hook that fails or panics is recorded in the returned `HookReport` and
//! does not stop the remaining modules.

mod api;
mod module;

pub use api::*;
pub use module::*;

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use hive_types::{CallError, CallResult, ErrorKind};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Policy & Errors
// ─────────────────────────────────────────────────────────────────────────────

/// How an event name registered by two modules is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryPolicy {
    /// The later registration replaces the earlier one
    #[default]
    LastWins,
    /// A second registration of the same event is an error
    Strict,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Module already registered: {0}")]
    DuplicateModule(String),

    #[error("Event '{event}' from module '{incoming}' is already provided by '{existing}'")]
    DuplicateApi {
        event: String,
        existing: String,
        incoming: String,
    },
}

/// Outcome of one lifecycle fan-out.
#[derive(Debug, Clone)]
pub struct HookReport {
    pub event: LifecycleEvent,
    /// Number of modules whose hook was invoked
    pub invoked: usize,
    pub failures: Vec<HookFailure>,
}

impl HookReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct HookFailure {
    pub module: String,
    pub error: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

struct ApiEntry {
    module: String,
    handler: Arc<dyn ApiHandler>,
}

/// Flat event → handler table plus the modules that contributed it.
pub struct ModuleRegistry {
    policy: RegistryPolicy,
    modules: Vec<Arc<dyn Module>>,
    table: HashMap<String, ApiEntry>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new(RegistryPolicy::default())
    }
}

impl ModuleRegistry {
    pub fn new(policy: RegistryPolicy) -> Self {
        Self {
            policy,
            modules: Vec::new(),
            table: HashMap::new(),
        }
    }

    /// Instantiate every factory for `app` and register the results in order.
    pub fn build(
        policy: RegistryPolicy,
        factories: &[ModuleFactory],
        app: &AppInfo,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new(policy);
        for factory in factories {
            registry.register(factory(app))?;
        }
        tracing::debug!(
            app = %app.app_id,
            modules = registry.modules.len(),
            events = registry.table.len(),
            "module registry built"
        );
        Ok(registry)
    }

    pub fn policy(&self) -> RegistryPolicy {
        self.policy
    }

    /// Register a module and merge its API map into the table.
    pub fn register(&mut self, module: Arc<dyn Module>) -> Result<(), RegistryError> {
        let name = module.name().to_string();
        if self.has_module(&name) {
            return Err(RegistryError::DuplicateModule(name));
        }

        let entries = module.api_map().into_entries();

        if self.policy == RegistryPolicy::Strict {
            if let Some((event, existing)) = entries
                .iter()
                .find_map(|(event, _)| self.table.get(event).map(|e| (event, &e.module)))
            {
                return Err(RegistryError::DuplicateApi {
                    event: event.clone(),
                    existing: existing.clone(),
                    incoming: name,
                });
            }
        }

        for (event, handler) in entries {
            let entry = ApiEntry {
                module: name.clone(),
                handler,
            };
            if let Some(previous) = self.table.insert(event.clone(), entry) {
                tracing::warn!(
                    event = %event,
                    previous = %previous.module,
                    module = %name,
                    "API event registered twice, later registration wins"
                );
            }
        }

        tracing::debug!(module = %name, "module registered");
        self.modules.push(module);
        Ok(())
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.iter().any(|m| m.name() == name)
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Which module currently owns `event`.
    pub fn owner_of(&self, event: &str) -> Option<&str> {
        self.table.get(event).map(|e| e.module.as_str())
    }

    /// All registered event names, sorted.
    pub fn events(&self) -> Vec<&str> {
        let mut events: Vec<&str> = self.table.keys().map(String::as_str).collect();
        events.sort_unstable();
        events
    }

    pub fn contains(&self, event: &str) -> bool {
        self.table.contains_key(event)
    }

    /// Look up the handler for `event`.
    ///
    /// `module.api` events whose module was never registered are reported
    /// as `ModuleNotFound`; anything else missing is `EventNotDefined`.
    pub fn resolve(&self, event: &str) -> Result<Arc<dyn ApiHandler>, CallError> {
        if let Some(entry) = self.table.get(event) {
            return Ok(entry.handler.clone());
        }

        match event.split_once('.') {
            Some((module, _)) if !module.is_empty() && !self.has_module(module) => {
                Err(CallError::with_message(
                    ErrorKind::ModuleNotFound,
                    format!("module '{module}' is not registered"),
                ))
            }
            _ => Err(CallError::event_not_defined()),
        }
    }

    /// Dispatch a call to its handler.
    pub async fn dispatch(&self, call: ApiCall) -> CallResult {
        let handler = self.resolve(&call.event)?;
        tracing::trace!(event = %call.event, caller = %call.caller, "dispatching API call");
        handler.handle(call).await
    }

    /// Run the hook for `notice.event` on every module, in registration order.
    pub async fn notify(&self, notice: &LifecycleNotice) -> HookReport {
        let mut report = HookReport {
            event: notice.event,
            invoked: 0,
            failures: Vec::new(),
        };

        for module in &self.modules {
            let hook = match notice.event {
                LifecycleEvent::Launch => module.on_launch(notice),
                LifecycleEvent::Show => module.on_show(notice),
                LifecycleEvent::Hide => module.on_hide(notice),
                LifecycleEvent::Unload => module.on_unload(notice),
                LifecycleEvent::Exit => module.on_exit(notice),
            };
            report.invoked += 1;

            let error = match AssertUnwindSafe(hook).catch_unwind().await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("hook panicked: {}", panic_message(panic.as_ref())),
            };

            tracing::warn!(
                module = %module.name(),
                event = %notice.event,
                error = %error,
                "lifecycle hook failed"
            );
            report.failures.push(HookFailure {
                module: module.name().to_string(),
                error,
            });
        }

        report
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
