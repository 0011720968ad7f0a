//! Bridge Router
//!
//! Routes Invoke / Callback / Publish traffic between the service context,
//! the page contexts and the host. Contexts never talk to each other
//! directly: everything they emit reaches the router through the mediator
//! link, and everything they receive is delivered through the context
//! directory.
//!
//! # Invoke routing
//!
//! An invoke is resolved by static lookup, in order:
//! 1. `invokeServiceMethod` / `invokeWebViewMethod`: forwarded to the target
//!    context, which answers with an exposed method
//! 2. built-in navigation events, answered by the app coordinator
//! 3. capability module APIs from the registry
//!
//! Whatever happens, the caller gets exactly one callback for the id, or
//! none at all if the caller was recycled or destroyed in the meantime.

mod native;
mod pending;
mod subscriptions;

pub use native::*;
pub use pending::{PendingCall, PendingSummary};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use hive_context::{
    ContextError, ContextManager, ContextState, Continuation, GuestScope, Inbound, Outbound,
    OutboundBody, SubscriptionId,
};
use hive_types::{
    CallDirection, CallError, CallResult, CallbackEnvelope, CallbackId, ContextId, ErrorKind,
    ForwardRequest, INVOKE_SERVICE_METHOD, InvokeEnvelope, Message, PageId, is_forward_event,
    reply_event_for,
};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::registry::{ApiCall, ModuleRegistry, panic_message};
use pending::PendingCalls;
use subscriptions::SubscriptionTable;

// ─────────────────────────────────────────────────────────────────────────────
// Bridge Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Unknown context: {0}")]
    UnknownContext(ContextId),

    #[error("Context dropped the request")]
    Dropped,

    #[error(transparent)]
    Context(#[from] ContextError),
}

/// What routing an outbound record left for the coordinator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Handled,
    /// Emitted by a binding that has since been reset or destroyed
    Stale,
    /// First render finished for the context's current binding
    ContentReady { context: ContextId, epoch: u64 },
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge
// ─────────────────────────────────────────────────────────────────────────────

pub struct Bridge {
    contexts: Arc<ContextManager>,
    registry: Arc<ModuleRegistry>,
    pending: PendingCalls,
    subscriptions: SubscriptionTable,
    pages: DashMap<PageId, ContextId>,
    service: RwLock<Option<ContextId>>,
    navigation: mpsc::UnboundedSender<NavigationRequest>,
}

impl Bridge {
    pub fn new(
        contexts: Arc<ContextManager>,
        registry: Arc<ModuleRegistry>,
        navigation: mpsc::UnboundedSender<NavigationRequest>,
    ) -> Self {
        Self {
            contexts,
            registry,
            pending: PendingCalls::default(),
            subscriptions: SubscriptionTable::default(),
            pages: DashMap::new(),
            service: RwLock::new(None),
            navigation,
        }
    }

    pub fn contexts(&self) -> &Arc<ContextManager> {
        &self.contexts
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    // ── Addressing ──────────────────────────────────────────────────────────

    pub fn set_service(&self, context: ContextId) {
        *self.service.write() = Some(context);
    }

    pub fn service(&self) -> Option<ContextId> {
        *self.service.read()
    }

    /// Make `page` addressable through `invokeWebViewMethod`.
    pub fn bind_page(&self, page: PageId, context: ContextId) {
        self.pages.insert(page, context);
    }

    pub fn unbind_page(&self, page: PageId) -> Option<ContextId> {
        self.pages.remove(&page).map(|(_, context)| context)
    }

    pub fn page_context(&self, page: PageId) -> Option<ContextId> {
        self.pages.get(&page).map(|entry| *entry.value())
    }

    pub fn page_of(&self, context: ContextId) -> Option<PageId> {
        self.pages
            .iter()
            .find(|entry| *entry.value() == context)
            .map(|entry| *entry.key())
    }

    /// Forget everything the router holds for `context`: its subscriptions
    /// and any page bound to it. Forwarded calls it was expected to answer
    /// fail with `TargetContextNotFound`; calls it issued itself are left
    /// alone. Returns the number of subscriptions dropped.
    pub fn detach_context(&self, context: ContextId) -> usize {
        self.pages.retain(|_, bound| *bound != context);
        let removed = self.subscriptions.remove_context(context);

        let stranded = self.pending.summaries(|call| {
            call.direction == CallDirection::Forward && call.responder == Some(context)
        });
        for call in &stranded {
            let err = CallError::target_not_found(format!("{context} went away before answering"));
            self.fail(call.owner, CallDirection::Forward, call.id, &call.event, err);
        }

        tracing::debug!(
            context = %context,
            subscriptions = removed,
            stranded = stranded.len(),
            "context detached from router"
        );
        removed
    }

    // ── Invoke ──────────────────────────────────────────────────────────────

    /// Invoke `event` on behalf of `from`'s current binding.
    pub fn invoke(
        self: &Arc<Self>,
        from: ContextId,
        event: impl Into<String>,
        payload: Value,
        continuation: Continuation,
    ) -> CallbackId {
        let epoch = self
            .contexts
            .link(from)
            .map(|link| link.epoch())
            .unwrap_or_default();
        self.invoke_at(from, epoch, event, payload, continuation)
    }

    /// Invoke `event` on behalf of `from` as it was at binding `epoch`.
    pub fn invoke_at(
        self: &Arc<Self>,
        from: ContextId,
        epoch: u64,
        event: impl Into<String>,
        payload: Value,
        continuation: Continuation,
    ) -> CallbackId {
        let event = event.into();
        let direction = if is_forward_event(&event) {
            CallDirection::Forward
        } else {
            CallDirection::Native
        };

        let id = self.pending.allocate(from, direction);
        self.pending.insert(PendingCall {
            id,
            owner: from,
            direction,
            epoch,
            event: event.clone(),
            responder: None,
            issued_at: Utc::now(),
            continuation,
        });

        let envelope = InvokeEnvelope::new(event.clone(), id, &payload);
        tracing::trace!(
            from = %from,
            callback_id = %id,
            event = %envelope.event,
            params = %envelope.params,
            "invoke"
        );

        match direction {
            CallDirection::Forward => self.route_forward(from, id, &event, payload),
            CallDirection::Native => self.route_native(from, id, event, payload),
        }
        id
    }

    fn route_forward(&self, from: ContextId, id: CallbackId, event: &str, payload: Value) {
        let request: ForwardRequest = match serde_json::from_value(payload.clone()) {
            Ok(request) => request,
            Err(e) => return self.fail(from, CallDirection::Forward, id, event, CallError::decode(e)),
        };

        let target = if event == INVOKE_SERVICE_METHOD {
            self.service()
                .ok_or_else(|| CallError::target_not_found("service context is not running"))
        } else {
            match request.page {
                Some(page) => self
                    .page_context(page)
                    .ok_or_else(|| CallError::target_not_found(format!("{page} is not mounted"))),
                None => Err(CallError::decode("webviewId is required")),
            }
        };
        let target = match target {
            Ok(target) => target,
            Err(e) => return self.fail(from, CallDirection::Forward, id, event, e),
        };

        let Some(link) = self.contexts.link(target) else {
            let err = CallError::target_not_found(format!("{target} no longer exists"));
            return self.fail(from, CallDirection::Forward, id, event, err);
        };
        if link.state() != ContextState::Bound {
            let err = CallError::with_message(
                ErrorKind::ContextNotReady,
                format!("{target} is {}", link.state()),
            );
            return self.fail(from, CallDirection::Forward, id, event, err);
        }

        self.pending
            .set_responder(from, CallDirection::Forward, id, target);
        tracing::debug!(from = %from, to = %target, method = %request.method, "forwarding call");

        let message = Message::invoke(from, target, event, id, payload);
        if let Err(e) = link.deliver(Inbound::Message(message)) {
            let err = CallError::target_not_found(e.to_string());
            self.fail(from, CallDirection::Forward, id, event, err);
        }
    }

    fn route_native(self: &Arc<Self>, from: ContextId, id: CallbackId, event: String, payload: Value) {
        if let Some(kind) = NavigationKind::from_event(&event) {
            let navigation = match Navigation::decode(kind, &payload) {
                Ok(navigation) => navigation,
                Err(e) => return self.fail(from, CallDirection::Native, id, &event, e),
            };

            let (reply, rx) = oneshot::channel();
            let request = NavigationRequest {
                navigation,
                caller: Some(from),
                reply,
            };
            if self.navigation.send(request).is_err() {
                let err = CallError::handler("app is not running");
                return self.fail(from, CallDirection::Native, id, &event, err);
            }

            let bridge = self.clone();
            tokio::spawn(async move {
                let result = rx
                    .await
                    .unwrap_or_else(|_| Err(CallError::handler("navigation was dropped")));
                bridge.resolve(from, CallDirection::Native, id, &event, result);
            });
            return;
        }

        let call = ApiCall {
            event: event.clone(),
            caller: from,
            service: self.service(),
            bridge: self.clone(),
            args: payload,
        };
        let bridge = self.clone();
        tokio::spawn(async move {
            let dispatch = bridge.registry.dispatch(call);
            let result = match AssertUnwindSafe(dispatch).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(event = %event, error = %message, "API handler panicked");
                    Err(CallError::handler(format!("handler panicked: {message}")))
                }
            };
            bridge.resolve(from, CallDirection::Native, id, &event, result);
        });
    }

    fn resolve(
        &self,
        owner: ContextId,
        direction: CallDirection,
        id: CallbackId,
        event: &str,
        result: CallResult,
    ) {
        let envelope = CallbackEnvelope::from_result(id, reply_event_for(event), result);
        self.on_callback(owner, direction, envelope);
    }

    fn fail(
        &self,
        owner: ContextId,
        direction: CallDirection,
        id: CallbackId,
        event: &str,
        error: CallError,
    ) {
        tracing::debug!(owner = %owner, callback_id = %id, event = %event, error = %error, "invoke failed");
        self.resolve(owner, direction, id, event, Err(error));
    }

    // ── Callback ────────────────────────────────────────────────────────────

    /// Resolve a pending call. Returns whether a continuation was scheduled.
    ///
    /// Callbacks for unknown ids (already resolved, never issued) and for
    /// owners that were recycled or destroyed since the invoke are dropped.
    pub fn on_callback(
        &self,
        owner: ContextId,
        direction: CallDirection,
        envelope: CallbackEnvelope,
    ) -> bool {
        let Some(call) = self.pending.take(owner, direction, envelope.id) else {
            tracing::debug!(owner = %owner, callback_id = %envelope.id, "no pending call, dropping callback");
            return false;
        };

        let link = match self.contexts.link(owner) {
            Some(link) if link.epoch() == call.epoch => link,
            _ => {
                tracing::debug!(
                    owner = %owner,
                    callback_id = %envelope.id,
                    event = %call.event,
                    "owner was recycled or destroyed, dropping callback"
                );
                return false;
            }
        };

        match link.deliver(Inbound::Resume {
            continuation: call.continuation,
            callback: envelope,
        }) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(owner = %owner, error = %e, "failed to deliver callback");
                false
            }
        }
    }

    /// A forwarded call was answered by `responder`.
    pub fn on_reply(
        &self,
        responder: ContextId,
        to: ContextId,
        callback_id: CallbackId,
        event: &str,
        result: CallResult,
    ) -> bool {
        match self.pending.responder(to, CallDirection::Forward, callback_id) {
            Some(expected) if expected == responder => {}
            Some(expected) => {
                tracing::warn!(
                    from = %responder,
                    expected = %expected,
                    callback_id = %callback_id,
                    "reply from unexpected context, ignoring"
                );
                return false;
            }
            None => {
                tracing::debug!(to = %to, callback_id = %callback_id, "no forwarded call awaiting reply");
                return false;
            }
        }

        let envelope = CallbackEnvelope::from_result(callback_id, event, result);
        self.on_callback(to, CallDirection::Forward, envelope)
    }

    // ── Publish / Subscribe ─────────────────────────────────────────────────

    /// Deliver `data` to every context subscribed to `key`, or only to
    /// `target` if given. Returns the number of contexts reached; a publish
    /// nobody listens to is dropped.
    pub fn publish(
        &self,
        from: ContextId,
        key: &str,
        data: Value,
        target: Option<ContextId>,
    ) -> usize {
        let mut delivered = 0;
        for context in self.subscriptions.subscribers(key) {
            if target.is_some_and(|t| t != context) {
                continue;
            }
            let Some(link) = self.contexts.link(context) else {
                continue;
            };
            let message = Message::publish(from, key, data.clone(), target);
            if link.deliver(Inbound::Message(message)).is_ok() {
                delivered += 1;
            }
        }

        if delivered == 0 {
            tracing::trace!(key = %key, from = %from, "publish had no recipients");
        }
        delivered
    }

    /// Register a native handler for `key` inside `context`.
    pub async fn subscribe<F>(
        &self,
        context: ContextId,
        key: impl Into<String>,
        handler: F,
    ) -> Result<SubscriptionId, BridgeError>
    where
        F: for<'a> Fn(&mut GuestScope<'a>, &Value) + Send + 'static,
    {
        let key = key.into();
        let link = self
            .contexts
            .link(context)
            .ok_or(BridgeError::UnknownContext(context))?;
        self.subscriptions.add(context, &key);

        let (tx, rx) = oneshot::channel();
        link.spawn_task(Box::new(move |scope: &mut GuestScope<'_>| {
            let _ = tx.send(scope.subscribe(key, handler));
        }))?;
        rx.await.map_err(|_| BridgeError::Dropped)
    }

    /// Remove a handler registered with [`Bridge::subscribe`].
    pub async fn unsubscribe(
        &self,
        context: ContextId,
        subscription: SubscriptionId,
    ) -> Result<bool, BridgeError> {
        let link = self
            .contexts
            .link(context)
            .ok_or(BridgeError::UnknownContext(context))?;

        let (tx, rx) = oneshot::channel();
        link.spawn_task(Box::new(move |scope: &mut GuestScope<'_>| {
            let _ = tx.send(scope.unsubscribe(subscription));
        }))?;
        rx.await.map_err(|_| BridgeError::Dropped)
    }

    pub fn subscribers(&self, key: &str) -> Vec<ContextId> {
        self.subscriptions.subscribers(key)
    }

    pub fn subscriptions_of(&self, context: ContextId) -> Vec<String> {
        self.subscriptions.keys_for(context)
    }

    // ── Mediator link ───────────────────────────────────────────────────────

    /// Route one record a context emitted.
    pub fn route_outbound(self: &Arc<Self>, out: Outbound) -> Routed {
        let fresh = self
            .contexts
            .link(out.source)
            .is_some_and(|link| link.epoch() == out.epoch);

        match out.body {
            OutboundBody::Unsubscribe { key } => {
                self.subscriptions.remove(out.source, &key);
                Routed::Handled
            }
            OutboundBody::Reply {
                to,
                callback_id,
                event,
                result,
            } => {
                self.on_reply(out.source, to, callback_id, &event, result);
                Routed::Handled
            }
            body if !fresh => {
                tracing::trace!(source = %out.source, epoch = out.epoch, kind = body.label(), "dropping stale outbound");
                Routed::Stale
            }
            OutboundBody::Invoke {
                event,
                payload,
                continuation,
            } => {
                self.invoke_at(out.source, out.epoch, event, payload, continuation);
                Routed::Handled
            }
            OutboundBody::Publish { key, data, target } => {
                self.publish(out.source, &key, data, target);
                Routed::Handled
            }
            OutboundBody::Subscribe { key } => {
                self.subscriptions.add(out.source, &key);
                Routed::Handled
            }
            OutboundBody::ContentReady => Routed::ContentReady {
                context: out.source,
                epoch: out.epoch,
            },
        }
    }

    // ── Diagnostics ─────────────────────────────────────────────────────────

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_calls(&self) -> Vec<PendingSummary> {
        self.pending.summaries(|_| true)
    }

    /// Calls whose owner has been recycled or destroyed since they were
    /// issued. They will never be resolved.
    pub fn orphaned_calls(&self) -> Vec<PendingSummary> {
        self.pending.summaries(|call| match self.contexts.link(call.owner) {
            Some(link) => link.epoch() != call.epoch,
            None => true,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry::{ApiHandler, ApiMap, ApiResult, Module, handler_fn};
    use hive_context::HeadlessFactory;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// A bridge with no pump behind it, for handler-level tests.
    pub(crate) async fn test_bridge() -> Arc<Bridge> {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let contexts = Arc::new(ContextManager::new(Arc::new(HeadlessFactory::new()), out_tx));
        let (nav_tx, _nav_rx) = mpsc::unbounded_channel();
        Arc::new(Bridge::new(contexts, Arc::new(ModuleRegistry::default()), nav_tx))
    }

    struct Harness {
        bridge: Arc<Bridge>,
        contexts: Arc<ContextManager>,
        nav_rx: mpsc::UnboundedReceiver<NavigationRequest>,
    }

    /// Bridge plus a task pumping context output back into it.
    fn harness(registry: ModuleRegistry) -> Harness {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let contexts = Arc::new(ContextManager::new(Arc::new(HeadlessFactory::new()), out_tx));
        let (nav_tx, nav_rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(Bridge::new(contexts.clone(), Arc::new(registry), nav_tx));

        let pump = bridge.clone();
        tokio::spawn(async move {
            while let Some(out) = out_rx.recv().await {
                pump.route_outbound(out);
            }
        });

        Harness {
            bridge,
            contexts,
            nav_rx,
        }
    }

    struct TestModule {
        name: &'static str,
        map: ApiMap,
    }

    #[async_trait::async_trait]
    impl Module for TestModule {
        fn name(&self) -> &str {
            self.name
        }

        fn api_map(&self) -> ApiMap {
            self.map.clone()
        }
    }

    struct Exploding;

    #[async_trait::async_trait]
    impl ApiHandler for Exploding {
        async fn handle(&self, _call: ApiCall) -> ApiResult<Value> {
            panic!("kaboom")
        }
    }

    fn capture() -> (Continuation, mpsc::UnboundedReceiver<CallbackEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let continuation: Continuation =
            Box::new(move |_scope: &mut GuestScope<'_>, envelope: &CallbackEnvelope| {
                let _ = tx.send(envelope.clone());
            });
        (continuation, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<CallbackEnvelope>) -> CallbackEnvelope {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for callback")
            .expect("callback channel closed")
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_unknown_event_fails_with_event_not_defined() {
        let h = harness(ModuleRegistry::default());
        let page = h.contexts.create_page().await.unwrap();

        let (continuation, mut rx) = capture();
        h.bridge.invoke(page.id(), "getValue", json!({}), continuation);

        let callback = recv(&mut rx).await;
        assert_eq!(callback.err_msg, "EventNotDefined");
        assert_eq!(callback.data, Value::Null);
        assert_eq!(callback.event, "getValue");
        assert_eq!(h.bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_module_api_reaches_handler() {
        let mut registry = ModuleRegistry::default();
        let map = ApiMap::new().with_fn("echo.say", |call: ApiCall| async move {
            Ok(json!({"heard": call.args, "from": call.caller}))
        });
        registry
            .register(Arc::new(TestModule { name: "echo", map }))
            .unwrap();
        let h = harness(registry);
        let page = h.contexts.create_page().await.unwrap();

        let (continuation, mut rx) = capture();
        h.bridge.invoke(page.id(), "echo.say", json!("hi"), continuation);

        let callback = recv(&mut rx).await;
        assert!(callback.is_ok());
        assert_eq!(callback.data, json!({"heard": "hi", "from": page.id()}));
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_handler_failed() {
        let mut registry = ModuleRegistry::default();
        let map = ApiMap::new().with("boom.now", Arc::new(Exploding));
        registry
            .register(Arc::new(TestModule { name: "boom", map }))
            .unwrap();
        let h = harness(registry);
        let page = h.contexts.create_page().await.unwrap();

        let (continuation, mut rx) = capture();
        h.bridge.invoke(page.id(), "boom.now", Value::Null, continuation);

        let callback = recv(&mut rx).await;
        assert_eq!(callback.error_kind(), Some(ErrorKind::HandlerFailed));
        assert!(callback.data["message"].as_str().unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_page_calls_service_method() {
        let h = harness(ModuleRegistry::default());
        let service = h.contexts.create_service().await.unwrap();
        h.bridge.set_service(service.id());
        service
            .run(|scope| {
                scope.expose("sum", |_s, params| {
                    let a = params["a"].as_i64().unwrap_or(0);
                    let b = params["b"].as_i64().unwrap_or(0);
                    Ok(json!(a + b))
                })
            })
            .await
            .unwrap();

        let page = h.contexts.create_page().await.unwrap();
        page.load("pages/index", "render()").await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        page.run(move |scope| {
            scope.call_service("sum", json!({"a": 2, "b": 3}), move |_s, envelope| {
                let _ = tx.send(envelope.clone());
            })
        })
        .await
        .unwrap();

        let callback = recv(&mut rx).await;
        assert!(callback.is_ok());
        assert_eq!(callback.data, json!(5));
        assert_eq!(callback.event, "callbackServiceMethod");
    }

    #[tokio::test]
    async fn test_service_calls_page_method() {
        let h = harness(ModuleRegistry::default());
        let service = h.contexts.create_service().await.unwrap();
        h.bridge.set_service(service.id());

        let page = h.contexts.create_page().await.unwrap();
        page.load("pages/list", "render()").await.unwrap();
        page.run(|scope| scope.expose("route", |s, _| Ok(json!(s.route()))))
            .await
            .unwrap();
        h.bridge.bind_page(PageId(3), page.id());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let reply = tx.clone();
        service
            .run(move |scope| {
                scope.call_page(PageId(3), "route", Value::Null, move |_s, envelope| {
                    let _ = reply.send(envelope.clone());
                });
                scope.call_page(PageId(42), "route", Value::Null, move |_s, envelope| {
                    let _ = tx.send(envelope.clone());
                });
            })
            .await
            .unwrap();

        let mut callbacks = vec![recv(&mut rx).await, recv(&mut rx).await];
        callbacks.sort_by_key(|c| c.id);
        assert_eq!(callbacks[0].data, json!("pages/list"));
        assert_eq!(callbacks[0].event, "callbackWebViewMethod");
        assert_eq!(
            callbacks[1].error_kind(),
            Some(ErrorKind::TargetContextNotFound)
        );
    }

    #[tokio::test]
    async fn test_forward_to_unbound_context_is_not_ready() {
        let h = harness(ModuleRegistry::default());
        let service = h.contexts.create_service().await.unwrap();
        let idle = h.contexts.create_page().await.unwrap();
        h.bridge.bind_page(PageId(1), idle.id());

        let (continuation, mut rx) = capture();
        let payload = json!({"method": "refresh", "webviewId": 1});
        h.bridge
            .invoke(service.id(), "invokeWebViewMethod", payload, continuation);
        let callback = recv(&mut rx).await;
        assert_eq!(callback.error_kind(), Some(ErrorKind::ContextNotReady));

        let (continuation, mut rx) = capture();
        h.bridge
            .invoke(service.id(), "invokeServiceMethod", json!([1, 2]), continuation);
        let callback = recv(&mut rx).await;
        assert_eq!(callback.error_kind(), Some(ErrorKind::PayloadDecodeFailed));
    }

    #[tokio::test]
    async fn test_ids_are_per_direction_and_never_reused() {
        let h = harness(ModuleRegistry::default());
        let page = h.contexts.create_page().await.unwrap();

        let (c1, mut rx1) = capture();
        let (c2, mut rx2) = capture();
        let (c3, mut rx3) = capture();
        let first = h.bridge.invoke(page.id(), "a", Value::Null, c1);
        let second = h.bridge.invoke(page.id(), "b", Value::Null, c2);
        let forward = h
            .bridge
            .invoke(page.id(), "invokeServiceMethod", json!({"method": "x"}), c3);

        assert_eq!(first, CallbackId(1));
        assert_eq!(second, CallbackId(2));
        assert_eq!(forward, CallbackId(1));

        recv(&mut rx1).await;
        recv(&mut rx2).await;
        recv(&mut rx3).await;

        let (c4, mut rx4) = capture();
        assert_eq!(h.bridge.invoke(page.id(), "c", Value::Null, c4), CallbackId(3));
        recv(&mut rx4).await;
    }

    #[tokio::test]
    async fn test_navigation_is_answered_once() {
        let mut h = harness(ModuleRegistry::default());
        let page = h.contexts.create_page().await.unwrap();

        let (continuation, mut rx) = capture();
        let id = h.bridge.invoke(
            page.id(),
            "navigateTo",
            json!({"url": "pages/detail?id=9"}),
            continuation,
        );

        let request = h.nav_rx.recv().await.unwrap();
        assert_eq!(request.caller, Some(page.id()));
        assert!(matches!(request.navigation, Navigation::To { ref route, .. } if route == "pages/detail"));
        request.reply.send(Ok(json!({"pageId": 2}))).unwrap();

        let callback = recv(&mut rx).await;
        assert_eq!(callback.id, id);
        assert_eq!(callback.data, json!({"pageId": 2}));

        // A second callback for the same id has nothing to resolve.
        let duplicate = CallbackEnvelope::success(id, "navigateTo", Value::Null);
        assert!(!h.bridge.on_callback(page.id(), CallDirection::Native, duplicate));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recycled_owner_never_sees_late_callbacks() {
        let gate = Arc::new(Semaphore::new(0));
        let held = gate.clone();
        let map = ApiMap::new().with(
            "slow.wait",
            handler_fn(move |_call| {
                let gate = held.clone();
                async move {
                    let _permit = gate.acquire().await;
                    Ok(json!("late"))
                }
            }),
        );
        let mut registry = ModuleRegistry::default();
        registry
            .register(Arc::new(TestModule { name: "slow", map }))
            .unwrap();
        let h = harness(registry);
        let page = h.contexts.create_page().await.unwrap();
        page.load("pages/a", "render()").await.unwrap();

        let (c1, mut rx1) = capture();
        let (c2, mut rx2) = capture();
        h.bridge.invoke(page.id(), "slow.wait", Value::Null, c1);
        h.bridge.invoke(page.id(), "slow.wait", Value::Null, c2);
        assert_eq!(h.bridge.pending_count(), 2);
        assert!(h.bridge.orphaned_calls().is_empty());

        page.reset().await.unwrap();
        assert_eq!(h.bridge.orphaned_calls().len(), 2);

        gate.add_permits(2);
        let bridge = h.bridge.clone();
        wait_until(|| bridge.pending_count() == 0).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_reaches_only_subscribers() {
        let h = harness(ModuleRegistry::default());
        let a = h.contexts.create_page().await.unwrap();
        let b = h.contexts.create_page().await.unwrap();

        let subscription = h
            .bridge
            .subscribe(a.id(), "cart", |scope, data| {
                scope.bind("cart", data.clone());
            })
            .await
            .unwrap();

        assert_eq!(h.bridge.publish(ContextId::HOST, "cart", json!(3), None), 1);
        assert_eq!(
            h.bridge
                .publish(ContextId::HOST, "cart", json!(4), Some(b.id())),
            0
        );
        assert_eq!(h.bridge.publish(ContextId::HOST, "other", json!(5), None), 0);

        let seen = a.run(|scope| scope.binding("cart").cloned()).await.unwrap();
        assert_eq!(seen, Some(json!(3)));

        assert!(h.bridge.unsubscribe(a.id(), subscription).await.unwrap());
        let bridge = h.bridge.clone();
        wait_until(|| bridge.subscribers("cart").is_empty()).await;
    }

    #[tokio::test]
    async fn test_detach_drops_subscriptions_and_page_binding() {
        let h = harness(ModuleRegistry::default());
        let page = h.contexts.create_page().await.unwrap();
        h.bridge.bind_page(PageId(1), page.id());
        h.bridge
            .subscribe(page.id(), "lifecycle", |_s, _d| {})
            .await
            .unwrap();
        // let the pump see the Subscribe record first
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.bridge.detach_context(page.id()), 1);
        assert_eq!(h.bridge.page_context(PageId(1)), None);
        assert!(h.bridge.subscriptions_of(page.id()).is_empty());
    }

    #[tokio::test]
    async fn test_detached_responder_fails_queued_forward() {
        let h = harness(ModuleRegistry::default());
        let service = h.contexts.create_service().await.unwrap();
        h.bridge.set_service(service.id());
        service
            .run(|scope| scope.expose("sum", |_s, _params| Ok(json!(5))))
            .await
            .unwrap();

        // park the service worker so the forwarded invoke stays queued
        let (release, parked) = std::sync::mpsc::channel::<()>();
        h.contexts
            .link(service.id())
            .unwrap()
            .spawn_task(Box::new(move |_scope: &mut GuestScope<'_>| {
                let _ = parked.recv();
            }))
            .unwrap();

        let page = h.contexts.create_page().await.unwrap();
        let (continuation, mut rx) = capture();
        let id = h.bridge.invoke(
            page.id(),
            "invokeServiceMethod",
            json!({"method": "sum"}),
            continuation,
        );
        assert_eq!(h.bridge.pending_calls()[0].responder, Some(service.id()));

        h.bridge.detach_context(service.id());
        let callback = recv(&mut rx).await;
        assert_eq!(callback.id, id);
        assert_eq!(callback.event, "callbackServiceMethod");
        assert_eq!(
            callback.error_kind(),
            Some(ErrorKind::TargetContextNotFound)
        );
        assert_eq!(h.bridge.pending_count(), 0);

        // the late reply finds nothing to resolve
        release.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert!(h.bridge.orphaned_calls().is_empty());
    }
}
