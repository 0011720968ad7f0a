// AppHandle - external control of a running app
//
// Every request becomes an `AppCommand` on the coordinator's queue and is
// answered through a oneshot, so callers never touch the pool or the page
// stack directly.

use std::sync::Arc;

use hive_context::ManagerStats;
use hive_types::{ContextId, PageId};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use crate::bridge::{Bridge, Navigation, NavigationKind, PendingSummary};
use crate::page::Page;
use crate::pool::PoolStats;

use super::manifest::HostError;

pub(crate) enum AppCommand {
    Navigate {
        navigation: Navigation,
        reply: oneshot::Sender<Result<PageId, HostError>>,
    },
    Reload {
        page: PageId,
        reply: oneshot::Sender<Result<PageId, HostError>>,
    },
    Show {
        reply: oneshot::Sender<Result<(), HostError>>,
    },
    Hide {
        reply: oneshot::Sender<Result<(), HostError>>,
    },
    Status {
        reply: oneshot::Sender<AppStatus>,
    },
    Exit {
        reply: oneshot::Sender<()>,
    },
}

/// Snapshot of a running app.
#[derive(Debug, Clone, Serialize)]
pub struct AppStatus {
    pub app_id: String,
    pub session: String,
    pub visible: bool,
    pub service: ContextId,
    pub pages: Vec<Page>,
    /// Navigation stack, bottom first
    pub stack: Vec<PageId>,
    pub pool: PoolStats,
    pub contexts: ManagerStats,
    pub pending: usize,
    /// Calls whose owner was recycled or destroyed; never resolved
    pub orphaned: Vec<PendingSummary>,
}

impl AppStatus {
    pub fn top(&self) -> Option<&Page> {
        let top = self.stack.last()?;
        self.pages.iter().find(|page| page.id == *top)
    }

    pub fn page(&self, id: PageId) -> Option<&Page> {
        self.pages.iter().find(|page| page.id == id)
    }
}

#[derive(Clone)]
pub struct AppHandle {
    app_id: String,
    session: String,
    service: ContextId,
    commands: mpsc::UnboundedSender<AppCommand>,
    bridge: Arc<Bridge>,
}

impl AppHandle {
    pub(crate) fn new(
        app_id: String,
        session: String,
        service: ContextId,
        commands: mpsc::UnboundedSender<AppCommand>,
        bridge: Arc<Bridge>,
    ) -> Self {
        Self {
            app_id,
            session,
            service,
            commands,
            bridge,
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// The app's service context.
    pub fn service(&self) -> ContextId {
        self.service
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> AppCommand,
    ) -> Result<T, HostError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| HostError::Stopped)?;
        rx.await.map_err(|_| HostError::Stopped)
    }

    // ── Navigation ──────────────────────────────────────────────────────────

    pub async fn navigate(&self, navigation: Navigation) -> Result<PageId, HostError> {
        self.request(|reply| AppCommand::Navigate { navigation, reply })
            .await?
    }

    async fn navigate_url(&self, kind: NavigationKind, url: &str) -> Result<PageId, HostError> {
        let navigation = Navigation::decode(kind, &json!({ "url": url }))
            .map_err(|e| HostError::InvalidRequest(e.to_string()))?;
        self.navigate(navigation).await
    }

    pub async fn navigate_to(&self, url: &str) -> Result<PageId, HostError> {
        self.navigate_url(NavigationKind::NavigateTo, url).await
    }

    pub async fn redirect_to(&self, url: &str) -> Result<PageId, HostError> {
        self.navigate_url(NavigationKind::RedirectTo, url).await
    }

    pub async fn switch_tab(&self, url: &str) -> Result<PageId, HostError> {
        self.navigate_url(NavigationKind::SwitchTab, url).await
    }

    pub async fn relaunch(&self, url: &str) -> Result<PageId, HostError> {
        self.navigate_url(NavigationKind::ReLaunch, url).await
    }

    pub async fn navigate_back(&self, delta: usize) -> Result<PageId, HostError> {
        self.navigate(Navigation::Back { delta }).await
    }

    /// Load a failed page again.
    pub async fn reload(&self, page: PageId) -> Result<PageId, HostError> {
        self.request(|reply| AppCommand::Reload { page, reply })
            .await?
    }

    // ── App lifecycle ───────────────────────────────────────────────────────

    /// Bring the app to the foreground.
    pub async fn show(&self) -> Result<(), HostError> {
        self.request(|reply| AppCommand::Show { reply }).await?
    }

    /// Send the app to the background.
    pub async fn hide(&self) -> Result<(), HostError> {
        self.request(|reply| AppCommand::Hide { reply }).await?
    }

    pub async fn status(&self) -> Result<AppStatus, HostError> {
        self.request(|reply| AppCommand::Status { reply }).await
    }

    /// Unload every page, notify modules and destroy all contexts.
    pub async fn exit(&self) -> Result<(), HostError> {
        self.request(|reply| AppCommand::Exit { reply }).await
    }
}

impl std::fmt::Debug for AppHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppHandle")
            .field("app_id", &self.app_id)
            .field("session", &self.session)
            .field("service", &self.service)
            .finish()
    }
}
