// Page Lifecycle Controller
//
// Owns the page arena, the navigation stack and the persistent tab roots.
// It never touches contexts itself: navigation methods return a plan and
// transition methods return the notices to fan out. The app coordinator
// acquires, loads and recycles contexts around them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hive_types::{ContextId, PageId};
use serde::Serialize;
use serde_json::Value;

use super::state::{NoticeKind, PageState, TransitionError};

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub id: PageId,
    pub route: String,
    pub query: Value,
    /// Bound context, set once loading starts
    pub context: Option<ContextId>,
    pub state: PageState,
    /// Persistent tab root: hidden instead of unloaded when navigated away from
    pub tab_root: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A lifecycle notice ready to be fanned out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageNotice {
    pub kind: NoticeKind,
    pub page: PageId,
    pub route: String,
    pub context: Option<ContextId>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    #[error("No page to go back to")]
    NothingToPop,

    #[error("'{0}' is not a tab route")]
    NotATab(String),

    #[error("'{0}' is a tab route, use switchTab")]
    TabRoute(String),

    #[error("Unknown page: {0}")]
    UnknownPage(PageId),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// What a navigation asks the coordinator to do, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationPlan {
    /// Pages that stay mounted but leave the screen
    pub hide: Vec<PageId>,
    /// Pages to unload and recycle, top of the stack first
    pub unload: Vec<PageId>,
    /// New page to acquire a context for and load
    pub open: Option<PageId>,
    /// Existing page that becomes the top
    pub show: Option<PageId>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

pub struct PageController {
    next_id: u32,
    pages: HashMap<PageId, Page>,
    /// Navigation stack, bottom first
    stack: Vec<PageId>,
    tab_routes: Vec<String>,
    tabs: HashMap<String, PageId>,
    app_visible: bool,
}

impl PageController {
    pub fn new(tab_routes: Vec<String>) -> Self {
        Self {
            next_id: 1,
            pages: HashMap::new(),
            stack: Vec::new(),
            tab_routes,
            tabs: HashMap::new(),
            app_visible: true,
        }
    }

    pub fn is_tab(&self, route: &str) -> bool {
        self.tab_routes.iter().any(|tab| tab == route)
    }

    pub fn page(&self, id: PageId) -> Option<&Page> {
        self.pages.get(&id)
    }

    /// Every live page, by id.
    pub fn pages(&self) -> Vec<Page> {
        let mut pages: Vec<Page> = self.pages.values().cloned().collect();
        pages.sort_by_key(|page| page.id);
        pages
    }

    pub fn stack(&self) -> &[PageId] {
        &self.stack
    }

    pub fn top(&self) -> Option<PageId> {
        self.stack.last().copied()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn find_by_context(&self, context: ContextId) -> Option<PageId> {
        self.pages
            .values()
            .find(|page| page.context == Some(context))
            .map(|page| page.id)
    }

    pub fn is_app_visible(&self) -> bool {
        self.app_visible
    }

    // ── Transitions ─────────────────────────────────────────────────────────

    fn transition(&mut self, id: PageId, to: PageState) -> Result<Option<PageNotice>, NavigationError> {
        let page = self
            .pages
            .get_mut(&id)
            .ok_or(NavigationError::UnknownPage(id))?;
        let from = page.state;
        if !from.can_transition(to) {
            return Err(TransitionError { page: id, from, to }.into());
        }
        page.state = to;
        tracing::trace!(page = %id, route = %page.route, %from, %to, "page transition");

        Ok(NoticeKind::for_transition(from, to).map(|kind| PageNotice {
            kind,
            page: id,
            route: page.route.clone(),
            context: page.context,
        }))
    }

    /// Bind `context` and start loading. Valid from `created` and, as a
    /// reload, from `failed`.
    pub fn begin_load(&mut self, id: PageId, context: ContextId) -> Result<Vec<PageNotice>, NavigationError> {
        let page = self
            .pages
            .get_mut(&id)
            .ok_or(NavigationError::UnknownPage(id))?;
        if !page.state.can_transition(PageState::Loading) {
            return Err(TransitionError {
                page: id,
                from: page.state,
                to: PageState::Loading,
            }
            .into());
        }
        page.context = Some(context);
        page.failure = None;
        Ok(self.transition(id, PageState::Loading)?.into_iter().collect())
    }

    /// First render finished in `context`. The page becomes ready, then
    /// visible if it is on top of a visible app, else hidden.
    ///
    /// Signals for pages that are not loading are ignored.
    pub fn content_ready(&mut self, context: ContextId) -> Result<Vec<PageNotice>, NavigationError> {
        let Some(id) = self.find_by_context(context) else {
            tracing::debug!(context = %context, "content ready for a context with no page");
            return Ok(Vec::new());
        };
        if self.pages.get(&id).map(|page| page.state) != Some(PageState::Loading) {
            return Ok(Vec::new());
        }

        let mut notices: Vec<PageNotice> = self.transition(id, PageState::Ready)?.into_iter().collect();
        let next = if self.app_visible && self.top() == Some(id) {
            PageState::Visible
        } else {
            PageState::Hidden
        };
        notices.extend(self.transition(id, next)?);
        Ok(notices)
    }

    /// Put a page on screen. Loading pages show themselves once ready.
    pub fn show(&mut self, id: PageId) -> Result<Vec<PageNotice>, NavigationError> {
        let state = self.state_of(id)?;
        match state {
            PageState::Ready | PageState::Hidden if self.app_visible => {
                Ok(self.transition(id, PageState::Visible)?.into_iter().collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    pub fn hide(&mut self, id: PageId) -> Result<Vec<PageNotice>, NavigationError> {
        match self.state_of(id)? {
            PageState::Visible | PageState::Ready => {
                Ok(self.transition(id, PageState::Hidden)?.into_iter().collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Start unloading. A visible page is hidden first; a page that never
    /// became ready is marked failed instead.
    pub fn begin_unload(&mut self, id: PageId) -> Result<Vec<PageNotice>, NavigationError> {
        let mut notices = Vec::new();
        match self.state_of(id)? {
            PageState::Visible => {
                notices.extend(self.transition(id, PageState::Hidden)?);
                notices.extend(self.transition(id, PageState::Unloading)?);
            }
            PageState::Ready | PageState::Hidden => {
                notices.extend(self.transition(id, PageState::Unloading)?);
            }
            PageState::Created | PageState::Loading => {
                self.fail(id, "navigated away before ready")?;
            }
            PageState::Failed => {}
            from => {
                return Err(TransitionError {
                    page: id,
                    from,
                    to: PageState::Unloading,
                }
                .into());
            }
        }
        Ok(notices)
    }

    /// Finish unloading and drop the page. Returns the context it held.
    pub fn finish_unload(&mut self, id: PageId) -> Result<Option<ContextId>, NavigationError> {
        self.transition(id, PageState::Destroyed)?;
        let page = self
            .pages
            .remove(&id)
            .ok_or(NavigationError::UnknownPage(id))?;
        self.stack.retain(|p| *p != id);
        self.tabs.retain(|_, p| *p != id);
        tracing::debug!(page = %id, route = %page.route, "page destroyed");
        Ok(page.context)
    }

    pub fn fail(&mut self, id: PageId, reason: impl Into<String>) -> Result<(), NavigationError> {
        self.transition(id, PageState::Failed)?;
        let reason = reason.into();
        tracing::warn!(page = %id, reason = %reason, "page failed");
        if let Some(page) = self.pages.get_mut(&id) {
            page.failure = Some(reason);
        }
        Ok(())
    }

    /// Forget the context of a failed page, e.g. after it was discarded.
    pub fn release_context(&mut self, id: PageId) -> Option<ContextId> {
        self.pages.get_mut(&id).and_then(|page| page.context.take())
    }

    fn state_of(&self, id: PageId) -> Result<PageState, NavigationError> {
        self.pages
            .get(&id)
            .map(|page| page.state)
            .ok_or(NavigationError::UnknownPage(id))
    }

    // ── App visibility ──────────────────────────────────────────────────────

    pub fn hide_app(&mut self) -> Result<Vec<PageNotice>, NavigationError> {
        let notices = match self.top() {
            Some(top) => self.hide(top)?,
            None => Vec::new(),
        };
        self.app_visible = false;
        Ok(notices)
    }

    pub fn show_app(&mut self) -> Result<Vec<PageNotice>, NavigationError> {
        self.app_visible = true;
        match self.top() {
            Some(top) => self.show(top),
            None => Ok(Vec::new()),
        }
    }

    // ── Navigation ──────────────────────────────────────────────────────────

    fn create(&mut self, route: String, query: Value, tab_root: bool) -> PageId {
        let id = PageId(self.next_id);
        self.next_id += 1;
        self.pages.insert(
            id,
            Page {
                id,
                route,
                query,
                context: None,
                state: PageState::Created,
                tab_root,
                failure: None,
                created_at: Utc::now(),
            },
        );
        id
    }

    fn leave(&self, id: PageId, plan: &mut NavigationPlan) {
        match self.pages.get(&id) {
            Some(page) if page.tab_root => plan.hide.push(id),
            _ => plan.unload.push(id),
        }
    }

    /// Push a new page.
    pub fn navigate_to(&mut self, route: String, query: Value) -> Result<NavigationPlan, NavigationError> {
        if self.is_tab(&route) {
            return Err(NavigationError::TabRoute(route));
        }
        let mut plan = NavigationPlan::default();
        if let Some(top) = self.top() {
            plan.hide.push(top);
        }
        let id = self.create(route, query, false);
        self.stack.push(id);
        plan.open = Some(id);
        Ok(plan)
    }

    /// Replace the top page.
    pub fn redirect_to(&mut self, route: String, query: Value) -> Result<NavigationPlan, NavigationError> {
        if self.is_tab(&route) {
            return Err(NavigationError::TabRoute(route));
        }
        let mut plan = NavigationPlan::default();
        if let Some(top) = self.stack.pop() {
            self.leave(top, &mut plan);
        }
        let id = self.create(route, query, false);
        self.stack.push(id);
        plan.open = Some(id);
        Ok(plan)
    }

    /// Pop up to `delta` pages. The bottom page always stays.
    pub fn navigate_back(&mut self, delta: usize) -> Result<NavigationPlan, NavigationError> {
        if self.stack.len() <= 1 {
            return Err(NavigationError::NothingToPop);
        }
        let pops = delta.max(1).min(self.stack.len() - 1);
        let mut plan = NavigationPlan::default();
        for _ in 0..pops {
            if let Some(id) = self.stack.pop() {
                self.leave(id, &mut plan);
            }
        }
        plan.show = self.top();
        Ok(plan)
    }

    /// Show the tab root for `route`, creating it on first use. Everything
    /// stacked above the current tab is unloaded.
    pub fn switch_tab(&mut self, route: String) -> Result<NavigationPlan, NavigationError> {
        if !self.is_tab(&route) {
            return Err(NavigationError::NotATab(route));
        }
        let target = self.tabs.get(&route).copied();
        let mut plan = NavigationPlan::default();
        while let Some(id) = self.stack.pop() {
            if Some(id) != target {
                self.leave(id, &mut plan);
            }
        }

        match target {
            Some(id) => {
                self.stack.push(id);
                plan.show = Some(id);
            }
            None => {
                let id = self.create(route.clone(), Value::Object(Default::default()), true);
                self.tabs.insert(route, id);
                self.stack.push(id);
                plan.open = Some(id);
            }
        }
        Ok(plan)
    }

    /// Unload every page, tab roots included, and open `route`.
    pub fn relaunch(&mut self, route: String, query: Value) -> Result<NavigationPlan, NavigationError> {
        let mut plan = NavigationPlan {
            unload: self.take_all(),
            ..Default::default()
        };
        let tab_root = self.is_tab(&route);
        let id = self.create(route.clone(), query, tab_root);
        if tab_root {
            self.tabs.insert(route, id);
        }
        self.stack.push(id);
        plan.open = Some(id);
        Ok(plan)
    }

    /// Clear the stack and the tab roots. Returns every page, stack top
    /// first, then the hidden tab roots.
    pub fn take_all(&mut self) -> Vec<PageId> {
        let mut ids: Vec<PageId> = self.stack.drain(..).rev().collect();
        let mut rest: Vec<PageId> = self
            .pages
            .keys()
            .copied()
            .filter(|id| !ids.contains(id))
            .collect();
        rest.sort();
        ids.extend(rest);
        self.tabs.clear();
        ids
    }
}
