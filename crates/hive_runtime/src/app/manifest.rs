// App manifest, host settings and coordinator errors

use std::collections::BTreeMap;

use hive_context::ContextError;
use hive_types::{CallError, ErrorKind};
use serde::{Deserialize, Serialize};

use crate::page::NavigationError;
use crate::pool::{PoolConfig, PoolError};
use crate::registry::{RegistryError, RegistryPolicy};

// ─────────────────────────────────────────────────────────────────────────────
// Manifest
// ─────────────────────────────────────────────────────────────────────────────

/// What the host needs to know about one mini-app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppManifest {
    pub app_id: String,
    #[serde(default)]
    pub name: String,
    /// Route opened at launch
    pub entry: String,
    /// Route → page script
    #[serde(default)]
    pub pages: BTreeMap<String, String>,
    /// Routes kept alive as persistent tab roots
    #[serde(default)]
    pub tabs: Vec<String>,
    /// Script evaluated in the service context at launch
    #[serde(default)]
    pub service_script: String,
}

impl AppManifest {
    pub fn new(app_id: impl Into<String>, entry: impl Into<String>) -> Self {
        let app_id = app_id.into();
        Self {
            name: app_id.clone(),
            app_id,
            entry: entry.into(),
            pages: BTreeMap::new(),
            tabs: Vec::new(),
            service_script: String::new(),
        }
    }

    pub fn with_page(mut self, route: impl Into<String>, script: impl Into<String>) -> Self {
        self.pages.insert(route.into(), script.into());
        self
    }

    pub fn with_tab(mut self, route: impl Into<String>) -> Self {
        self.tabs.push(route.into());
        self
    }

    pub fn with_service_script(mut self, script: impl Into<String>) -> Self {
        self.service_script = script.into();
        self
    }

    pub fn script_for(&self, route: &str) -> Option<&str> {
        self.pages.get(route).map(String::as_str)
    }

    /// The entry and every tab must name a declared page.
    pub fn validate(&self) -> Result<(), HostError> {
        if self.app_id.is_empty() {
            return Err(HostError::Manifest("app_id is empty".into()));
        }
        if !self.pages.contains_key(&self.entry) {
            return Err(HostError::Manifest(format!(
                "entry '{}' is not a declared page",
                self.entry
            )));
        }
        if let Some(tab) = self.tabs.iter().find(|tab| !self.pages.contains_key(*tab)) {
            return Err(HostError::Manifest(format!(
                "tab '{tab}' is not a declared page"
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Host-side knobs applied to every app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub pool: PoolConfig,
    pub policy: RegistryPolicy,
    /// Keep the idle set topped up after every navigation
    pub preload: bool,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            policy: RegistryPolicy::default(),
            preload: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error("App is not running")]
    Stopped,
}

impl HostError {
    /// The callback failure a context sees when its navigation fails.
    pub fn to_call_error(&self) -> CallError {
        let kind = match self {
            HostError::Pool(PoolError::Creation(_)) => ErrorKind::ContextCreationFailed,
            HostError::Context(ContextError::CreationFailed(_)) => ErrorKind::ContextCreationFailed,
            HostError::InvalidRequest(_) => ErrorKind::PayloadDecodeFailed,
            HostError::UnknownRoute(_) => ErrorKind::TargetContextNotFound,
            HostError::Navigation(NavigationError::UnknownPage(_)) => {
                ErrorKind::TargetContextNotFound
            }
            _ => ErrorKind::HandlerFailed,
        };
        CallError::with_message(kind, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_validation() {
        let ok = AppManifest::new("demo", "pages/index")
            .with_page("pages/index", "render()")
            .with_page("pages/me", "render()")
            .with_tab("pages/me");
        assert!(ok.validate().is_ok());

        let missing_entry = AppManifest::new("demo", "pages/nowhere");
        assert!(matches!(missing_entry.validate(), Err(HostError::Manifest(_))));

        let bad_tab = ok.clone().with_tab("pages/ghost");
        assert!(matches!(bad_tab.validate(), Err(HostError::Manifest(_))));
    }

    #[test]
    fn test_creation_failures_map_to_their_kind() {
        let err = HostError::Pool(PoolError::Creation(ContextError::CreationFailed("x".into())));
        assert_eq!(err.to_call_error().kind, ErrorKind::ContextCreationFailed);
        let err = HostError::UnknownRoute("pages/x".into());
        assert_eq!(err.to_call_error().kind, ErrorKind::TargetContextNotFound);
    }
}
