//! Multi-app Shell
//!
//! The shell owns the engine factory and module list shared by every app and
//! keeps one [`AppHandle`] per running app id. Each launch gets a fresh
//! session id.

use std::collections::HashMap;
use std::sync::Arc;

use hive_context::EngineFactory;
use hive_runtime::{AppHandle, AppHost, AppManifest, HostError, HostSettings, ModuleFactory};
use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::modules;

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("App already running: {0}")]
    AlreadyRunning(String),

    #[error("App not running: {0}")]
    NotRunning(String),

    #[error(transparent)]
    Host(#[from] HostError),
}

pub struct Shell {
    settings: HostSettings,
    factory: Arc<dyn EngineFactory>,
    modules: Vec<ModuleFactory>,
    apps: RwLock<HashMap<String, AppHandle>>,
}

impl Shell {
    /// A shell with the bundled modules.
    pub fn new(settings: HostSettings, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            settings,
            factory,
            modules: modules::bundled(),
            apps: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the module list used for apps launched from now on.
    pub fn with_modules(mut self, modules: Vec<ModuleFactory>) -> Self {
        self.modules = modules;
        self
    }

    pub fn settings(&self) -> HostSettings {
        self.settings
    }

    pub async fn launch(&self, manifest: AppManifest) -> Result<AppHandle, ShellError> {
        let app_id = manifest.app_id.clone();
        if self.app(&app_id).is_some() {
            return Err(ShellError::AlreadyRunning(app_id));
        }

        let session = Uuid::new_v4().to_string();
        let handle = AppHost::launch(
            manifest,
            self.settings,
            self.factory.clone(),
            &self.modules,
            session.clone(),
        )
        .await?;

        // A concurrent launch of the same id may have finished first.
        let raced = {
            let mut apps = self.apps.write();
            if apps.contains_key(&app_id) {
                true
            } else {
                apps.insert(app_id.clone(), handle.clone());
                false
            }
        };
        if raced {
            let _ = handle.exit().await;
            return Err(ShellError::AlreadyRunning(app_id));
        }
        info!(app = %app_id, session = %session, "app launched");
        Ok(handle)
    }

    /// Handle of a running app. Apps whose coordinator stopped are forgotten.
    pub fn app(&self, app_id: &str) -> Option<AppHandle> {
        let handle = self.apps.read().get(app_id).cloned()?;
        if handle.is_running() {
            return Some(handle);
        }
        self.apps.write().remove(app_id);
        None
    }

    /// Ids of the running apps, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .apps
            .read()
            .iter()
            .filter(|(_, handle)| handle.is_running())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn exit(&self, app_id: &str) -> Result<(), ShellError> {
        let handle = self
            .apps
            .write()
            .remove(app_id)
            .ok_or_else(|| ShellError::NotRunning(app_id.to_string()))?;
        handle.exit().await?;
        info!(app = %app_id, "app exited");
        Ok(())
    }

    /// Exit every running app.
    pub async fn shutdown(&self) {
        let handles: Vec<AppHandle> = self.apps.write().drain().map(|(_, h)| h).collect();
        let results = futures::future::join_all(handles.iter().map(|h| h.exit())).await;
        for (handle, result) in handles.iter().zip(results) {
            if let Err(e) = result {
                warn!(app = %handle.app_id(), error = %e, "app did not exit cleanly");
            }
        }
    }
}
