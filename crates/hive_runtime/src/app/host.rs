// AppHost - the per-app native mediator
//
// One coordinator task per running app. It owns the service context, the
// page pool and the page controller, and is the only place any of them is
// mutated. Everything reaches it as a message:
//
// - `AppCommand`s from `AppHandle`s
// - outbound records from contexts (routed through the bridge)
// - navigation requests raised by guest invokes
// - background preload completions

use std::sync::Arc;

use hive_context::{
    ContextHandle, ContextManager, EngineFactory, GuestScope, Outbound, ServiceMode,
};
use hive_types::{ContextId, PageId};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::bridge::{Bridge, Navigation, NavigationRequest, Routed};
use crate::page::{NavigationError, NavigationPlan, NoticeKind, PageController, PageNotice, PageState};
use crate::pool::{ContextPool, PreloadDone, RecycleOutcome};
use crate::registry::{AppInfo, LifecycleEvent, LifecycleNotice, ModuleFactory, ModuleRegistry};

use super::handle::{AppCommand, AppHandle, AppStatus};
use super::manifest::{AppManifest, HostError, HostSettings};

/// Publish key carrying page and app lifecycle notices.
pub const LIFECYCLE_KEY: &str = "lifecycle";

pub struct AppHost {
    manifest: AppManifest,
    info: AppInfo,
    settings: HostSettings,
    contexts: Arc<ContextManager>,
    registry: Arc<ModuleRegistry>,
    bridge: Arc<Bridge>,
    service: Option<ContextHandle<ServiceMode>>,
    service_id: ContextId,
    pool: ContextPool,
    pages: PageController,
    preload_tx: mpsc::UnboundedSender<PreloadDone>,
}

struct Inputs {
    commands: mpsc::UnboundedReceiver<AppCommand>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    navigation: mpsc::UnboundedReceiver<NavigationRequest>,
    preloads: mpsc::UnboundedReceiver<PreloadDone>,
}

impl AppHost {
    /// Start an app: service context, module registry, warm pool, entry page.
    ///
    /// Returns once the entry page has started loading.
    pub async fn launch(
        manifest: AppManifest,
        settings: HostSettings,
        factory: Arc<dyn EngineFactory>,
        modules: &[ModuleFactory],
        session: impl Into<String>,
    ) -> Result<AppHandle, HostError> {
        manifest.validate()?;
        let info = AppInfo {
            app_id: manifest.app_id.clone(),
            name: manifest.name.clone(),
            session: session.into(),
        };
        tracing::info!(app = %info.app_id, session = %info.session, "launching app");

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let contexts = Arc::new(ContextManager::new(factory, out_tx));
        let service = contexts.create_service().await?;
        let service_id = service.id();

        let registry = match ModuleRegistry::build(settings.policy, modules, &info) {
            Ok(registry) => Arc::new(registry),
            Err(e) => {
                contexts.destroy(service).await;
                return Err(e.into());
            }
        };

        let (nav_tx, nav_rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(Bridge::new(contexts.clone(), registry.clone(), nav_tx));
        bridge.set_service(service_id);

        let (preload_tx, preload_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let mut host = AppHost {
            pool: ContextPool::new(contexts.clone(), settings.pool),
            pages: PageController::new(manifest.tabs.clone()),
            manifest,
            info,
            settings,
            contexts,
            registry,
            bridge: bridge.clone(),
            service: Some(service),
            service_id,
            preload_tx,
        };

        if let Err(e) = host.start().await {
            tracing::error!(app = %host.info.app_id, error = %e, "launch failed");
            host.shutdown().await;
            return Err(e);
        }

        let handle = AppHandle::new(
            host.info.app_id.clone(),
            host.info.session.clone(),
            service_id,
            cmd_tx,
            bridge,
        );
        let inputs = Inputs {
            commands: cmd_rx,
            outbound: out_rx,
            navigation: nav_rx,
            preloads: preload_rx,
        };
        tokio::spawn(host.run(inputs));
        Ok(handle)
    }

    async fn start(&mut self) -> Result<(), HostError> {
        if self.settings.preload {
            if let Err(e) = self.pool.preload().await {
                tracing::warn!(app = %self.info.app_id, error = %e, "initial preload failed");
            }
        }

        if let Some(service) = &self.service {
            if !self.manifest.service_script.is_empty() {
                service.evaluate(self.manifest.service_script.clone()).await?;
            }
        }

        self.notify_app(LifecycleEvent::Launch).await;

        let entry = Navigation::Relaunch {
            route: self.manifest.entry.clone(),
            query: Value::Object(Default::default()),
        };
        self.navigate(entry).await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Run loop
    // ─────────────────────────────────────────────────────────────────────────

    async fn run(mut self, mut inputs: Inputs) {
        tracing::debug!(app = %self.info.app_id, "coordinator started");
        loop {
            tokio::select! {
                biased;

                cmd = inputs.commands.recv() => match cmd {
                    Some(AppCommand::Exit { reply }) => {
                        self.shutdown().await;
                        inputs.commands.close();
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        tracing::debug!(app = %self.info.app_id, "all handles dropped, exiting");
                        self.shutdown().await;
                        break;
                    }
                },

                Some(out) = inputs.outbound.recv() => self.handle_outbound(out).await,

                Some(request) = inputs.navigation.recv() => self.handle_navigation(request).await,

                Some(done) = inputs.preloads.recv() => {
                    if let Err(e) = self.pool.complete(done).await {
                        tracing::warn!(app = %self.info.app_id, error = %e, "preload failed");
                    }
                }
            }
        }
        tracing::info!(app = %self.info.app_id, "app stopped");
    }

    async fn handle_command(&mut self, cmd: AppCommand) {
        match cmd {
            AppCommand::Navigate { navigation, reply } => {
                let result = self.navigate(navigation).await;
                let _ = reply.send(result);
            }
            AppCommand::Reload { page, reply } => {
                let result = self.reload(page).await;
                let _ = reply.send(result);
            }
            AppCommand::Show { reply } => {
                let result = self.set_visible(true).await;
                let _ = reply.send(result);
            }
            AppCommand::Hide { reply } => {
                let result = self.set_visible(false).await;
                let _ = reply.send(result);
            }
            AppCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            AppCommand::Exit { reply } => {
                // handled by the run loop
                let _ = reply.send(());
            }
        }
    }

    async fn handle_outbound(&mut self, out: Outbound) {
        if let Routed::ContentReady { context, epoch } = self.bridge.route_outbound(out) {
            tracing::trace!(context = %context, epoch, "content ready");
            match self.pages.content_ready(context) {
                Ok(notices) => self.emit(notices).await,
                Err(e) => tracing::warn!(context = %context, error = %e, "unexpected ready signal"),
            }
        }
    }

    async fn handle_navigation(&mut self, request: NavigationRequest) {
        let caller = request.caller;
        let result = self
            .navigate(request.navigation)
            .await
            .map(|page| json!({ "pageId": page }))
            .map_err(|e| {
                tracing::debug!(caller = ?caller, error = %e, "navigation failed");
                e.to_call_error()
            });
        let _ = request.reply.send(result);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Navigation
    // ─────────────────────────────────────────────────────────────────────────

    fn check_route(&self, route: &str) -> Result<(), HostError> {
        match self.manifest.script_for(route) {
            Some(_) => Ok(()),
            None => Err(HostError::UnknownRoute(route.to_string())),
        }
    }

    async fn navigate(&mut self, navigation: Navigation) -> Result<PageId, HostError> {
        tracing::debug!(app = %self.info.app_id, navigation = ?navigation, "navigating");
        let plan = match navigation {
            Navigation::To { route, query } => {
                self.check_route(&route)?;
                self.pages.navigate_to(route, query)?
            }
            Navigation::Redirect { route, query } => {
                self.check_route(&route)?;
                self.pages.redirect_to(route, query)?
            }
            Navigation::Back { delta } => self.pages.navigate_back(delta)?,
            Navigation::SwitchTab { route } => {
                self.check_route(&route)?;
                self.pages.switch_tab(route)?
            }
            Navigation::Relaunch { route, query } => {
                self.check_route(&route)?;
                self.pages.relaunch(route, query)?
            }
        };
        self.apply(plan).await
    }

    async fn apply(&mut self, plan: NavigationPlan) -> Result<PageId, HostError> {
        for id in &plan.hide {
            match self.pages.hide(*id) {
                Ok(notices) => self.emit(notices).await,
                Err(e) => tracing::warn!(page = %id, error = %e, "hide failed"),
            }
        }
        for id in &plan.unload {
            self.unload_page(*id, true).await;
        }

        let opened = match plan.open {
            Some(id) => self.open_page(id).await,
            None => Ok(()),
        };
        if let Some(id) = plan.show {
            let notices = self.pages.show(id)?;
            self.emit(notices).await;
        }

        if self.settings.preload {
            self.pool.schedule_preload(self.preload_tx.clone());
        }

        opened?;
        self.pages
            .top()
            .ok_or_else(|| NavigationError::NothingToPop.into())
    }

    async fn reload(&mut self, id: PageId) -> Result<PageId, HostError> {
        let state = self
            .pages
            .page(id)
            .map(|page| page.state)
            .ok_or(NavigationError::UnknownPage(id))?;
        if state != PageState::Failed {
            return Err(NavigationError::Transition(crate::page::TransitionError {
                page: id,
                from: state,
                to: PageState::Loading,
            })
            .into());
        }
        if let Some(context) = self.pages.release_context(id) {
            self.release_context(context, true).await;
        }
        self.open_page(id).await?;
        Ok(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Page mounting
    // ─────────────────────────────────────────────────────────────────────────

    /// Acquire a context for `id` and start loading its content.
    async fn open_page(&mut self, id: PageId) -> Result<(), HostError> {
        let (route, query) = match self.pages.page(id) {
            Some(page) => (page.route.clone(), page.query.clone()),
            None => return Err(NavigationError::UnknownPage(id).into()),
        };
        let Some(script) = self.manifest.script_for(&route).map(str::to_string) else {
            self.pages.fail(id, "unknown route")?;
            return Err(HostError::UnknownRoute(route));
        };

        let context = match self.pool.acquire().await {
            Ok(context) => context,
            Err(e) => {
                tracing::error!(page = %id, route = %route, error = %e, "no context for page");
                self.pages.fail(id, e.to_string())?;
                return Err(e.into());
            }
        };

        let notices = self.pages.begin_load(id, context)?;
        self.bridge.bind_page(id, context);
        self.emit(notices).await;

        let loaded = match self.pool.get(context) {
            Some(handle) => {
                let bound = handle.run(move |scope: &mut GuestScope<'_>| {
                    scope.bind("query", query);
                });
                match bound.await {
                    Ok(()) => handle.load(route.clone(), script).await,
                    Err(e) => Err(e),
                }
            }
            None => Err(hive_context::ContextError::Terminated),
        };

        if let Err(e) = loaded {
            tracing::warn!(page = %id, route = %route, error = %e, "page failed to load");
            self.pages.fail(id, e.to_string())?;
            self.bridge.unbind_page(id);
            if let Some(context) = self.pages.release_context(id) {
                self.release_context(context, true).await;
            }
            return Err(e.into());
        }

        tracing::debug!(page = %id, route = %route, context = %context, "page loading");
        Ok(())
    }

    /// Unload a page and give its context back to the pool (or destroy it).
    async fn unload_page(&mut self, id: PageId, recycle: bool) {
        match self.pages.begin_unload(id) {
            Ok(notices) => self.emit(notices).await,
            Err(e) => {
                tracing::warn!(page = %id, error = %e, "cannot unload page");
                return;
            }
        }
        self.bridge.unbind_page(id);
        match self.pages.finish_unload(id) {
            Ok(Some(context)) => self.release_context(context, recycle).await,
            Ok(None) => {}
            Err(e) => tracing::warn!(page = %id, error = %e, "failed to finish unload"),
        }
    }

    async fn release_context(&mut self, context: ContextId, recycle: bool) {
        self.bridge.detach_context(context);
        if !recycle {
            if let Err(e) = self.pool.discard(context).await {
                tracing::debug!(context = %context, error = %e, "discard skipped");
            }
            return;
        }

        match self.pool.recycle(context).await {
            Ok(RecycleOutcome::Recycled { evicted }) => {
                for evicted in evicted {
                    self.bridge.detach_context(evicted);
                }
            }
            Ok(RecycleOutcome::Destroyed { reason }) => {
                tracing::warn!(context = %context, reason = %reason, "context destroyed instead of recycled");
            }
            Err(e) => tracing::debug!(context = %context, error = %e, "recycle skipped"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Notices
    // ─────────────────────────────────────────────────────────────────────────

    async fn emit(&self, notices: Vec<PageNotice>) {
        for notice in notices {
            tracing::debug!(
                app = %self.info.app_id,
                page = %notice.page,
                route = %notice.route,
                notice = %notice.kind,
                "page lifecycle"
            );
            self.bridge.publish(
                ContextId::HOST,
                LIFECYCLE_KEY,
                json!({
                    "event": notice.kind,
                    "pageId": notice.page,
                    "route": notice.route,
                }),
                None,
            );

            let event = match notice.kind {
                NoticeKind::Show => LifecycleEvent::Show,
                NoticeKind::Hide => LifecycleEvent::Hide,
                NoticeKind::Unload => LifecycleEvent::Unload,
                NoticeKind::Load | NoticeKind::Ready => continue,
            };
            let module_notice = LifecycleNotice::page(
                event,
                self.info.app_id.clone(),
                notice.page,
                notice.route,
                notice.context,
            );
            let report = self.registry.notify(&module_notice).await;
            for failure in &report.failures {
                tracing::warn!(module = %failure.module, event = %event, error = %failure.error, "lifecycle hook failed");
            }
        }
    }

    async fn notify_app(&self, event: LifecycleEvent) {
        self.bridge.publish(
            ContextId::HOST,
            LIFECYCLE_KEY,
            json!({ "event": event, "appId": self.info.app_id }),
            None,
        );
        let report = self
            .registry
            .notify(&LifecycleNotice::app(event, self.info.app_id.clone()))
            .await;
        for failure in &report.failures {
            tracing::warn!(module = %failure.module, event = %event, error = %failure.error, "lifecycle hook failed");
        }
    }

    async fn set_visible(&mut self, visible: bool) -> Result<(), HostError> {
        if visible == self.pages.is_app_visible() {
            return Ok(());
        }
        if visible {
            self.notify_app(LifecycleEvent::Show).await;
            let notices = self.pages.show_app()?;
            self.emit(notices).await;
        } else {
            let notices = self.pages.hide_app()?;
            self.emit(notices).await;
            self.notify_app(LifecycleEvent::Hide).await;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status & shutdown
    // ─────────────────────────────────────────────────────────────────────────

    fn status(&self) -> AppStatus {
        AppStatus {
            app_id: self.info.app_id.clone(),
            session: self.info.session.clone(),
            visible: self.pages.is_app_visible(),
            service: self.service_id,
            pages: self.pages.pages(),
            stack: self.pages.stack().to_vec(),
            pool: self.pool.stats(),
            contexts: self.contexts.stats(),
            pending: self.bridge.pending_count(),
            orphaned: self.bridge.orphaned_calls(),
        }
    }

    async fn shutdown(&mut self) {
        for id in self.pages.take_all() {
            self.unload_page(id, false).await;
        }
        self.notify_app(LifecycleEvent::Exit).await;

        self.pool.drain().await;
        if let Some(service) = self.service.take() {
            self.bridge.detach_context(service.id());
            self.contexts.destroy(service).await;
        }
        tracing::info!(
            app = %self.info.app_id,
            orphaned = self.bridge.pending_count(),
            "app exited"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::registry::{ApiMap, Module, ModuleResult};
    use hive_context::HeadlessFactory;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Module for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn api_map(&self) -> ApiMap {
            ApiMap::new()
        }

        async fn on_launch(&self, _notice: &LifecycleNotice) -> ModuleResult<()> {
            self.seen.lock().unwrap().push("launch".into());
            Ok(())
        }

        async fn on_show(&self, notice: &LifecycleNotice) -> ModuleResult<()> {
            self.record("show", notice);
            Ok(())
        }

        async fn on_hide(&self, notice: &LifecycleNotice) -> ModuleResult<()> {
            self.record("hide", notice);
            Ok(())
        }

        async fn on_unload(&self, notice: &LifecycleNotice) -> ModuleResult<()> {
            self.record("unload", notice);
            Ok(())
        }

        async fn on_exit(&self, _notice: &LifecycleNotice) -> ModuleResult<()> {
            self.seen.lock().unwrap().push("exit".into());
            Ok(())
        }
    }

    impl Recorder {
        fn record(&self, what: &str, notice: &LifecycleNotice) {
            let entry = match &notice.route {
                Some(route) => format!("{what}:{route}"),
                None => what.to_string(),
            };
            self.seen.lock().unwrap().push(entry);
        }
    }

    fn manifest() -> AppManifest {
        AppManifest::new("demo", "pages/index")
            .with_page("pages/index", "render('index')")
            .with_page("pages/detail", "render('detail')")
            .with_page("pages/me", "render('me')")
            .with_tab("pages/index")
            .with_tab("pages/me")
            .with_service_script("app()")
    }

    async fn launch(seen: Arc<Mutex<Vec<String>>>) -> (AppHandle, Arc<HeadlessFactory>) {
        let factory = Arc::new(HeadlessFactory::new());
        let recorder: ModuleFactory = Arc::new(move |_app: &AppInfo| {
            Arc::new(Recorder { seen: seen.clone() }) as Arc<dyn Module>
        });
        let handle = AppHost::launch(
            manifest(),
            HostSettings::default(),
            factory.clone(),
            &[recorder],
            "session-1",
        )
        .await
        .unwrap();
        (handle, factory)
    }

    async fn wait_for_state(app: &AppHandle, page: PageId, state: PageState) -> AppStatus {
        for _ in 0..200 {
            let status = app.status().await.unwrap();
            if status.page(page).map(|p| p.state) == Some(state) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{page} never reached {state}");
    }

    #[tokio::test]
    async fn test_launch_opens_entry_page() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (app, factory) = launch(seen.clone()).await;

        let status = app.status().await.unwrap();
        let entry = status.stack[0];
        let status = wait_for_state(&app, entry, PageState::Visible).await;
        let page = status.top().unwrap();
        assert_eq!(page.route, "pages/index");
        assert!(page.tab_root);

        let journal = factory.journal();
        assert!(journal.contains(app.service(), "app()"));
        assert!(journal.contains(page.context.unwrap(), "render('index')"));
        assert_eq!(
            seen.lock().unwrap().clone(),
            vec!["launch".to_string(), "show:pages/index".to_string()]
        );

        app.exit().await.unwrap();
    }

    #[tokio::test]
    async fn test_push_and_back_recycle_contexts() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (app, _factory) = launch(seen.clone()).await;
        let entry = app.status().await.unwrap().stack[0];
        wait_for_state(&app, entry, PageState::Visible).await;

        let detail = app.navigate_to("pages/detail?id=7").await.unwrap();
        let status = wait_for_state(&app, detail, PageState::Visible).await;
        assert_eq!(status.page(detail).unwrap().query, json!({"id": "7"}));
        assert_eq!(status.page(entry).unwrap().state, PageState::Hidden);

        let top = app.navigate_back(1).await.unwrap();
        assert_eq!(top, entry);
        let status = wait_for_state(&app, entry, PageState::Visible).await;
        assert!(status.page(detail).is_none());
        assert!(status.pool.is_balanced());
        assert_eq!(status.pool.destroyed, 0);

        assert_eq!(
            seen.lock().unwrap().clone(),
            vec![
                "launch",
                "show:pages/index",
                "hide:pages/index",
                "show:pages/detail",
                "hide:pages/detail",
                "unload:pages/detail",
                "show:pages/index",
            ]
        );
        app.exit().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_route_and_bad_back() {
        let (app, _factory) = launch(Arc::new(Mutex::new(Vec::new()))).await;

        assert!(matches!(
            app.navigate_to("pages/missing").await,
            Err(HostError::UnknownRoute(_))
        ));
        assert!(matches!(
            app.navigate_back(1).await,
            Err(HostError::Navigation(NavigationError::NothingToPop))
        ));
        assert!(matches!(
            app.navigate_to("pages/me").await,
            Err(HostError::Navigation(NavigationError::TabRoute(_)))
        ));
        app.exit().await.unwrap();
    }

    #[tokio::test]
    async fn test_guest_navigation_replies_with_page_id() {
        let (app, _factory) = launch(Arc::new(Mutex::new(Vec::new()))).await;
        let entry = app.status().await.unwrap().stack[0];
        let status = wait_for_state(&app, entry, PageState::Visible).await;
        let context = status.page(entry).unwrap().context.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = app.bridge().contexts().link(context).unwrap();
        link.spawn_task(Box::new(move |scope: &mut GuestScope<'_>| {
            scope.invoke("navigateTo", json!({"url": "pages/detail"}), move |_s, cb| {
                let _ = tx.send(cb.clone());
            });
        }))
        .unwrap();

        let callback = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(callback.is_ok());
        let page = PageId(callback.data["pageId"].as_u64().unwrap() as u32);
        let status = app.status().await.unwrap();
        assert_eq!(status.stack.last(), Some(&page));
        app.exit().await.unwrap();
    }

    #[tokio::test]
    async fn test_app_hide_and_show() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (app, _factory) = launch(seen.clone()).await;
        let entry = app.status().await.unwrap().stack[0];
        wait_for_state(&app, entry, PageState::Visible).await;

        app.hide().await.unwrap();
        app.hide().await.unwrap();
        assert!(!app.status().await.unwrap().visible);
        app.show().await.unwrap();
        wait_for_state(&app, entry, PageState::Visible).await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            &seen[1..],
            &["show:pages/index", "hide:pages/index", "hide", "show", "show:pages/index"]
        );
        app.exit().await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_destroys_everything() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (app, _factory) = launch(seen.clone()).await;
        let bridge = app.bridge().clone();

        app.exit().await.unwrap();
        assert!(matches!(app.status().await, Err(HostError::Stopped)));
        assert_eq!(bridge.contexts().stats().live, 0);
        assert_eq!(seen.lock().unwrap().last().map(String::as_str), Some("exit"));
    }

    #[tokio::test]
    async fn test_failed_page_can_be_reloaded() {
        let factory = Arc::new(HeadlessFactory::new());
        let settings = HostSettings {
            preload: false,
            pool: PoolConfig {
                target_idle: 0,
                max_idle: 4,
            },
            ..Default::default()
        };
        let app = AppHost::launch(manifest(), settings, factory.clone(), &[], "s")
            .await
            .unwrap();
        let entry = app.status().await.unwrap().stack[0];
        wait_for_state(&app, entry, PageState::Visible).await;

        factory.set_fail_create(true);
        let err = app.navigate_to("pages/detail").await.unwrap_err();
        assert_eq!(
            err.to_call_error().kind,
            hive_types::ErrorKind::ContextCreationFailed
        );

        let status = app.status().await.unwrap();
        let failed = status.top().unwrap();
        assert_eq!(failed.state, PageState::Failed);
        assert!(failed.failure.is_some());
        let failed = failed.id;

        factory.set_fail_create(false);
        assert_eq!(app.reload(failed).await.unwrap(), failed);
        wait_for_state(&app, failed, PageState::Visible).await;
        assert!(app.reload(failed).await.is_err());
        app.exit().await.unwrap();
    }
}
