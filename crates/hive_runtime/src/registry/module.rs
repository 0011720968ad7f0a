// Capability modules
//
// A module is a pluggable unit contributing event-named API handlers and
// optional lifecycle hooks. One instance is created per running app.

use std::sync::Arc;

use async_trait::async_trait;
use hive_types::{ContextId, PageId};
use serde::Serialize;

use super::api::ApiMap;

// ─────────────────────────────────────────────────────────────────────────────
// Module Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors a lifecycle hook can report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModuleError {
    #[error("Hook failed: {0}")]
    HookFailed(String),
}

pub type ModuleResult<T> = Result<T, ModuleError>;

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle notices
// ─────────────────────────────────────────────────────────────────────────────

/// App and page transitions modules can hook into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    Launch,
    Show,
    Hide,
    Unload,
    Exit,
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleEvent::Launch => "launch",
            LifecycleEvent::Show => "show",
            LifecycleEvent::Hide => "hide",
            LifecycleEvent::Unload => "unload",
            LifecycleEvent::Exit => "exit",
        };
        f.write_str(s)
    }
}

/// What a hook is told about the transition.
///
/// `page` is `None` for app-level transitions (launch, exit, app show/hide).
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleNotice {
    pub event: LifecycleEvent,
    pub app_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextId>,
}

impl LifecycleNotice {
    pub fn app(event: LifecycleEvent, app_id: impl Into<String>) -> Self {
        Self {
            event,
            app_id: app_id.into(),
            page: None,
            route: None,
            context: None,
        }
    }

    pub fn page(
        event: LifecycleEvent,
        app_id: impl Into<String>,
        page: PageId,
        route: impl Into<String>,
        context: Option<ContextId>,
    ) -> Self {
        Self {
            event,
            app_id: app_id.into(),
            page: Some(page),
            route: Some(route.into()),
            context,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A capability module.
///
/// Only `name` and `api_map` are required; every hook defaults to a no-op.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Unique module name. Events named `<name>.<api>` belong to this module.
    fn name(&self) -> &str;

    /// The event-named handlers this module contributes.
    fn api_map(&self) -> ApiMap;

    async fn on_launch(&self, _notice: &LifecycleNotice) -> ModuleResult<()> {
        Ok(())
    }

    async fn on_show(&self, _notice: &LifecycleNotice) -> ModuleResult<()> {
        Ok(())
    }

    async fn on_hide(&self, _notice: &LifecycleNotice) -> ModuleResult<()> {
        Ok(())
    }

    async fn on_unload(&self, _notice: &LifecycleNotice) -> ModuleResult<()> {
        Ok(())
    }

    async fn on_exit(&self, _notice: &LifecycleNotice) -> ModuleResult<()> {
        Ok(())
    }
}

/// Identity of the running app a module instance is created for.
#[derive(Debug, Clone, Serialize)]
pub struct AppInfo {
    pub app_id: String,
    pub name: String,
    /// Unique per launch
    pub session: String,
}

/// Produces one module instance per running app.
pub type ModuleFactory = Arc<dyn Fn(&AppInfo) -> Arc<dyn Module> + Send + Sync>;
