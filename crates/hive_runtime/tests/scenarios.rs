//! End-to-end behaviour of a launched app: routing failures, pool warm-up,
//! orphaned calls on unload and API name collisions.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hive_runtime::hive_context::{ContextManager, GuestScope, HeadlessFactory};
use hive_runtime::hive_types::{CallbackEnvelope, ContextId, PageId};
use hive_runtime::{
    ApiCall, ApiMap, AppHandle, AppHost, AppInfo, AppManifest, AppStatus, ContextPool,
    HostSettings, Module, ModuleFactory, PageState, PoolConfig, handler_fn,
};
use serde_json::{Value, json};
use tokio::sync::{Semaphore, mpsc};

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

struct StaticModule {
    name: &'static str,
    map: ApiMap,
}

#[async_trait::async_trait]
impl Module for StaticModule {
    fn name(&self) -> &str {
        self.name
    }

    fn api_map(&self) -> ApiMap {
        self.map.clone()
    }
}

fn module(name: &'static str, map: ApiMap) -> ModuleFactory {
    Arc::new(move |_app: &AppInfo| {
        Arc::new(StaticModule {
            name,
            map: map.clone(),
        }) as Arc<dyn Module>
    })
}

fn manifest() -> AppManifest {
    AppManifest::new("scenarios", "pages/index")
        .with_page("pages/index", "render('index')")
        .with_page("pages/detail", "render('detail')")
}

async fn launch(modules: &[ModuleFactory]) -> (AppHandle, Arc<HeadlessFactory>) {
    let factory = Arc::new(HeadlessFactory::new());
    let app = AppHost::launch(
        manifest(),
        HostSettings::default(),
        factory.clone(),
        modules,
        "scenario",
    )
    .await
    .unwrap();
    (app, factory)
}

async fn wait_for(app: &AppHandle, mut check: impl FnMut(&AppStatus) -> bool) -> AppStatus {
    for _ in 0..200 {
        let status = app.status().await.unwrap();
        if check(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("app never reached the expected state");
}

async fn visible_page(app: &AppHandle, page: PageId) -> ContextId {
    let status = wait_for(app, |s| {
        s.page(page).map(|p| p.state) == Some(PageState::Visible)
    })
    .await;
    status.page(page).unwrap().context.unwrap()
}

/// Issue an invoke from inside `context`, reporting its callback on the
/// returned channel.
fn invoke_from(
    app: &AppHandle,
    context: ContextId,
    event: &'static str,
    payload: Value,
) -> mpsc::UnboundedReceiver<CallbackEnvelope> {
    let (tx, rx) = mpsc::unbounded_channel();
    let link = app.bridge().contexts().link(context).unwrap();
    link.spawn_task(Box::new(move |scope: &mut GuestScope<'_>| {
        scope.invoke(event, payload, move |_s, callback| {
            let _ = tx.send(callback.clone());
        });
    }))
    .unwrap();
    rx
}

async fn next_callback(rx: &mut mpsc::UnboundedReceiver<CallbackEnvelope>) -> CallbackEnvelope {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no callback delivered")
        .expect("callback channel closed")
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unhandled_invoke_reports_event_not_defined() {
    let (app, factory) = launch(&[]).await;
    let entry = app.status().await.unwrap().stack[0];
    let context = visible_page(&app, entry).await;

    let mut rx = invoke_from(&app, context, "getValue", json!({}));
    let callback = next_callback(&mut rx).await;

    assert_eq!(callback.err_msg, "EventNotDefined");
    assert_eq!(callback.data, Value::Null);
    // the page's script side saw the same envelope
    assert!(factory.journal().contains(context, "\"errMsg\":\"EventNotDefined\""));

    app.exit().await.unwrap();
}

#[tokio::test]
async fn test_acquire_on_empty_pool_then_preload_restores_target() {
    let factory = Arc::new(HeadlessFactory::new());
    let (out_tx, _out_rx) = mpsc::unbounded_channel();
    let contexts = Arc::new(ContextManager::new(factory.clone(), out_tx));
    let mut pool = ContextPool::new(
        contexts,
        PoolConfig {
            target_idle: 2,
            max_idle: 4,
        },
    );

    let acquired = pool.acquire().await.unwrap();
    assert!(pool.get(acquired).is_some());
    assert_eq!(factory.created(), 1);
    assert_eq!(pool.stats().idle, 0);

    pool.preload().await.unwrap();
    let stats = pool.stats();
    assert_eq!(stats.idle, 2);
    assert_eq!(stats.active, 1);
    assert!(stats.is_balanced());
}

#[tokio::test]
async fn test_unloading_page_orphans_its_pending_calls() {
    let gate = Arc::new(Semaphore::new(0));
    let held = gate.clone();
    let slow = ApiMap::new().with(
        "slow.wait",
        handler_fn(move |_call: ApiCall| {
            let gate = held.clone();
            async move {
                let _permit = gate.acquire().await;
                Ok(json!("late"))
            }
        }),
    );
    let (app, _factory) = launch(&[module("slow", slow)]).await;
    let entry = app.status().await.unwrap().stack[0];
    visible_page(&app, entry).await;

    let detail = app.navigate_to("pages/detail").await.unwrap();
    let context = visible_page(&app, detail).await;
    let epoch = app.bridge().contexts().link(context).unwrap().epoch();

    let mut first = invoke_from(&app, context, "slow.wait", Value::Null);
    let mut second = invoke_from(&app, context, "slow.wait", Value::Null);
    wait_for(&app, |s| s.pending == 2).await;

    app.navigate_back(1).await.unwrap();
    let status = wait_for(&app, |s| s.page(detail).is_none()).await;

    // both calls outlive their page
    assert_eq!(status.orphaned.len(), 2);
    assert!(status.orphaned.iter().all(|call| call.owner == context));

    // and the context went back to the pool, reset
    let link = app.bridge().contexts().link(context).unwrap();
    assert_eq!(link.epoch(), epoch + 1);
    assert_eq!(status.pool.destroyed, 0);
    assert!(status.pool.is_balanced());

    gate.add_permits(2);
    wait_for(&app, |s| s.pending == 0).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(first.try_recv().is_err());
    assert!(second.try_recv().is_err());

    app.exit().await.unwrap();
}

#[tokio::test]
async fn test_colliding_api_goes_to_later_module() {
    let first_calls = Arc::new(AtomicUsize::new(0));
    let counter = first_calls.clone();
    let first = ApiMap::new().with_fn("foo", move |_call: ApiCall| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(json!("first")) }
    });
    let second = ApiMap::new().with_fn("foo", |_call: ApiCall| async move { Ok(json!("second")) });

    let (app, _factory) = launch(&[module("first", first), module("second", second)]).await;
    assert_eq!(app.bridge().registry().owner_of("foo"), Some("second"));

    let entry = app.status().await.unwrap().stack[0];
    let context = visible_page(&app, entry).await;
    let mut rx = invoke_from(&app, context, "foo", Value::Null);
    let callback = next_callback(&mut rx).await;

    assert!(callback.is_ok());
    assert_eq!(callback.data, json!("second"));
    assert_eq!(first_calls.load(Ordering::SeqCst), 0);

    app.exit().await.unwrap();
}

#[tokio::test]
async fn test_service_and_page_talk_through_the_host() {
    let (app, _factory) = launch(&[]).await;
    let service = app.service();
    app.bridge()
        .contexts()
        .link(service)
        .unwrap()
        .spawn_task(Box::new(|scope: &mut GuestScope<'_>| {
            scope.expose("greet", |_s, params| {
                Ok(json!(format!("hello {}", params["name"].as_str().unwrap_or("?"))))
            });
        }))
        .unwrap();

    let entry = app.status().await.unwrap().stack[0];
    let context = visible_page(&app, entry).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let link = app.bridge().contexts().link(context).unwrap();
    link.spawn_task(Box::new(move |scope: &mut GuestScope<'_>| {
        scope.call_service("greet", json!({"name": "page"}), move |_s, callback| {
            let _ = tx.send(callback.clone());
        });
    }))
    .unwrap();

    let callback = next_callback(&mut rx).await;
    assert_eq!(callback.data, json!("hello page"));
    assert_eq!(callback.event, "callbackServiceMethod");

    app.exit().await.unwrap();
}
