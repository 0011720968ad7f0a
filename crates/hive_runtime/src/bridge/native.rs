// Built-in native handlers
//
// Navigation events are answered by the host itself. The router decodes
// them and hands them to the app coordinator, which owns the page stack.

use hive_types::{CallError, CallResult, ContextId};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::oneshot;

/// The navigation events the host answers itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    NavigateTo,
    RedirectTo,
    NavigateBack,
    SwitchTab,
    ReLaunch,
}

impl NavigationKind {
    pub fn from_event(event: &str) -> Option<Self> {
        Some(match event {
            "navigateTo" => NavigationKind::NavigateTo,
            "redirectTo" => NavigationKind::RedirectTo,
            "navigateBack" => NavigationKind::NavigateBack,
            "switchTab" => NavigationKind::SwitchTab,
            "reLaunch" => NavigationKind::ReLaunch,
            _ => return None,
        })
    }

    pub fn event(&self) -> &'static str {
        match self {
            NavigationKind::NavigateTo => "navigateTo",
            NavigationKind::RedirectTo => "redirectTo",
            NavigationKind::NavigateBack => "navigateBack",
            NavigationKind::SwitchTab => "switchTab",
            NavigationKind::ReLaunch => "reLaunch",
        }
    }
}

/// A decoded navigation.
#[derive(Debug, Clone, PartialEq)]
pub enum Navigation {
    /// Push a new page
    To { route: String, query: Value },
    /// Replace the top page
    Redirect { route: String, query: Value },
    /// Pop `delta` pages
    Back { delta: usize },
    /// Show a tab root, creating it on first use
    SwitchTab { route: String },
    /// Unload everything and open `route`
    Relaunch { route: String, query: Value },
}

#[derive(Debug, Default, Deserialize)]
struct NavigateParams {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    delta: Option<usize>,
}

impl Navigation {
    /// Decode an invoke payload such as `{"url": "pages/detail?id=3"}`.
    pub fn decode(kind: NavigationKind, payload: &Value) -> Result<Self, CallError> {
        let params: NavigateParams = match payload {
            Value::Null => NavigateParams::default(),
            other => serde_json::from_value(other.clone()).map_err(CallError::decode)?,
        };

        let url = || -> Result<(String, Value), CallError> {
            match params.url.as_deref() {
                Some(url) if !url.is_empty() => Ok(split_url(url)),
                _ => Err(CallError::decode(format!("{} requires a url", kind.event()))),
            }
        };

        Ok(match kind {
            NavigationKind::NavigateBack => Navigation::Back {
                delta: params.delta.unwrap_or(1).max(1),
            },
            NavigationKind::NavigateTo => {
                let (route, query) = url()?;
                Navigation::To { route, query }
            }
            NavigationKind::RedirectTo => {
                let (route, query) = url()?;
                Navigation::Redirect { route, query }
            }
            NavigationKind::SwitchTab => Navigation::SwitchTab { route: url()?.0 },
            NavigationKind::ReLaunch => {
                let (route, query) = url()?;
                Navigation::Relaunch { route, query }
            }
        })
    }
}

/// Split `route?a=1&b=2` into the route and a query object of strings.
fn split_url(url: &str) -> (String, Value) {
    let (route, query) = match url.split_once('?') {
        Some((route, query)) => (route, query),
        None => (url, ""),
    };

    let mut map = Map::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        map.insert(key.to_string(), Value::String(value.to_string()));
    }

    (route.trim_start_matches('/').to_string(), Value::Object(map))
}

/// A navigation handed to the app coordinator.
pub struct NavigationRequest {
    pub navigation: Navigation,
    /// Context that asked, `None` for host-initiated navigation
    pub caller: Option<ContextId>,
    /// Resolves with `{"pageId": ...}` on success
    pub reply: oneshot::Sender<CallResult>,
}

impl std::fmt::Debug for NavigationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationRequest")
            .field("navigation", &self.navigation)
            .field("caller", &self.caller)
            .finish()
    }
}
