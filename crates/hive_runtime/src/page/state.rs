// Page state machine
//
//   created -> loading -> ready -> (hidden <-> visible) -> unloading -> destroyed
//
// `failed` is reachable from created/loading/ready and only leaves through an
// explicit reload (back to loading) or destruction.

use hive_types::PageId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageState {
    Created,
    Loading,
    Ready,
    Hidden,
    Visible,
    Unloading,
    Destroyed,
    Failed,
}

impl PageState {
    pub fn can_transition(self, to: PageState) -> bool {
        use PageState::*;
        matches!(
            (self, to),
            (Created, Loading)
                | (Created, Failed)
                | (Loading, Ready)
                | (Loading, Failed)
                | (Ready, Visible)
                | (Ready, Hidden)
                | (Ready, Unloading)
                | (Ready, Failed)
                | (Visible, Hidden)
                | (Hidden, Visible)
                | (Hidden, Unloading)
                | (Unloading, Destroyed)
                | (Failed, Loading)
                | (Failed, Destroyed)
        )
    }

    /// Whether the page holds a context that has started evaluating content.
    pub fn is_mounted(self) -> bool {
        matches!(
            self,
            PageState::Loading | PageState::Ready | PageState::Hidden | PageState::Visible
        )
    }
}

impl std::fmt::Display for PageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PageState::Created => "created",
            PageState::Loading => "loading",
            PageState::Ready => "ready",
            PageState::Hidden => "hidden",
            PageState::Visible => "visible",
            PageState::Unloading => "unloading",
            PageState::Destroyed => "destroyed",
            PageState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{page}: cannot go from {from} to {to}")]
pub struct TransitionError {
    pub page: PageId,
    pub from: PageState,
    pub to: PageState,
}

/// Lifecycle notices a page emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Load,
    Ready,
    Show,
    Hide,
    Unload,
}

impl NoticeKind {
    /// The notice a transition emits, if any.
    ///
    /// `ready -> hidden` is silent: the page was never shown, so there is
    /// nothing to hide.
    pub fn for_transition(from: PageState, to: PageState) -> Option<Self> {
        match (from, to) {
            (_, PageState::Loading) => Some(NoticeKind::Load),
            (PageState::Loading, PageState::Ready) => Some(NoticeKind::Ready),
            (_, PageState::Visible) => Some(NoticeKind::Show),
            (PageState::Visible, PageState::Hidden) => Some(NoticeKind::Hide),
            (_, PageState::Unloading) => Some(NoticeKind::Unload),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::Load => "load",
            NoticeKind::Ready => "ready",
            NoticeKind::Show => "show",
            NoticeKind::Hide => "hide",
            NoticeKind::Unload => "unload",
        }
    }
}

impl std::fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
