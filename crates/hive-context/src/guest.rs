//! The API a context sees from the inside.
//!
//! Everything that runs on a context's worker thread (tasks, continuations,
//! subscription handlers, exposed methods, timers) gets a `GuestScope`. The
//! scope owns nothing; it borrows the worker's `GuestState` and engine for
//! the duration of one callback.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hive_types::{
    CallError, CallResult, CallbackEnvelope, ContextId, ContextKind, ErrorKind, ForwardRequest,
    INVOKE_SERVICE_METHOD, INVOKE_WEBVIEW_METHOD, Message, MessageKind, PageId, WireMessage,
    reply_event_for,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::command::{MediatorLink, Outbound, OutboundBody, Task, WorkerSignal};
use crate::engine::ScriptEngine;
use crate::error::ContextError;
use crate::handle::Residue;

/// Name of the script-side global that receives mirrored envelopes.
pub const BRIDGE_GLOBAL: &str = "HiveBridge";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

type SubscriptionHandler = Rc<dyn for<'a> Fn(&mut GuestScope<'a>, &Value)>;
type MethodHandler = Rc<dyn for<'a> Fn(&mut GuestScope<'a>, Value) -> CallResult>;
type TimerCallback = Box<dyn for<'a> FnOnce(&mut GuestScope<'a>)>;

struct PendingTimer {
    abort: AbortHandle,
    callback: TimerCallback,
}

/// Per-binding state owned by the worker.
pub(crate) struct GuestState {
    pub(crate) id: ContextId,
    pub(crate) kind: ContextKind,
    pub(crate) epoch: Arc<AtomicU64>,
    outbound: MediatorLink,
    signals: mpsc::UnboundedSender<WorkerSignal>,
    subscriptions: BTreeMap<String, Vec<(SubscriptionId, SubscriptionHandler)>>,
    methods: HashMap<String, MethodHandler>,
    timers: HashMap<TimerId, PendingTimer>,
    bindings: HashMap<String, Value>,
    pub(crate) deferred: Vec<Task>,
    pub(crate) ready: bool,
    pub(crate) route: Option<String>,
    next_subscription: u64,
    next_timer: u64,
}

impl GuestState {
    pub(crate) fn new(
        id: ContextId,
        kind: ContextKind,
        epoch: Arc<AtomicU64>,
        outbound: MediatorLink,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> Self {
        Self {
            id,
            kind,
            epoch,
            outbound,
            signals,
            subscriptions: BTreeMap::new(),
            methods: HashMap::new(),
            timers: HashMap::new(),
            bindings: HashMap::new(),
            deferred: Vec::new(),
            ready: false,
            route: None,
            next_subscription: 1,
            next_timer: 1,
        }
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn emit(&self, body: OutboundBody) {
        let label = body.label();
        let record = Outbound {
            source: self.id,
            epoch: self.epoch(),
            body,
        };
        if self.outbound.send(record).is_err() {
            tracing::debug!(context = %self.id, kind = label, "mediator gone, dropping outbound");
        }
    }

    pub(crate) fn cancel_timers(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort.abort();
        }
    }

    /// Drop everything tied to the current binding.
    ///
    /// Interest in each subscribed key is withdrawn through the mediator so
    /// the router stops delivering to this context.
    pub(crate) fn clear_binding(&mut self) {
        self.cancel_timers();
        let keys: Vec<String> = std::mem::take(&mut self.subscriptions).into_keys().collect();
        for key in keys {
            self.emit(OutboundBody::Unsubscribe { key });
        }
        self.methods.clear();
        self.bindings.clear();
        self.deferred.clear();
        self.ready = false;
        self.route = None;
    }

    pub(crate) fn residue(&self) -> Residue {
        Residue {
            route: self.route.clone(),
            ready: self.ready,
            subscriptions: self.subscriptions.values().map(Vec::len).sum(),
            methods: self.methods.len(),
            timers: self.timers.len(),
            bindings: self.bindings.len(),
            deferred: self.deferred.len(),
        }
    }

    pub(crate) fn take_timer(&mut self, id: TimerId) -> Option<TimerCallback> {
        self.timers.remove(&id).map(|timer| timer.callback)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GuestScope
// ─────────────────────────────────────────────────────────────────────────────

/// Borrowed view of a context, handed to everything that runs inside it.
pub struct GuestScope<'a> {
    state: &'a mut GuestState,
    engine: &'a mut Box<dyn ScriptEngine>,
}

impl<'a> GuestScope<'a> {
    pub(crate) fn new(state: &'a mut GuestState, engine: &'a mut Box<dyn ScriptEngine>) -> Self {
        Self { state, engine }
    }

    pub fn id(&self) -> ContextId {
        self.state.id
    }

    pub fn kind(&self) -> ContextKind {
        self.state.kind
    }

    /// Binding epoch; bumped every time the context is reset.
    pub fn epoch(&self) -> u64 {
        self.state.epoch()
    }

    /// Route of the page currently bound, if any.
    pub fn route(&self) -> Option<&str> {
        self.state.route.as_deref()
    }

    pub fn is_ready(&self) -> bool {
        self.state.ready
    }

    pub fn evaluate(&mut self, script: &str) -> Result<Value, ContextError> {
        self.engine
            .evaluate(script)
            .map_err(|e| ContextError::Script(e.to_string()))
    }

    // ── Messaging ───────────────────────────────────────────────────────────

    /// Invoke `event` and resume with `continuation` when the callback arrives.
    pub fn invoke<F>(&mut self, event: impl Into<String>, payload: Value, continuation: F)
    where
        F: for<'b> FnOnce(&mut GuestScope<'b>, &CallbackEnvelope) + Send + 'static,
    {
        self.state.emit(OutboundBody::Invoke {
            event: event.into(),
            payload,
            continuation: Box::new(continuation),
        });
    }

    /// Call a method exposed by the app's service context.
    pub fn call_service<F>(&mut self, method: impl Into<String>, params: Value, continuation: F)
    where
        F: for<'b> FnOnce(&mut GuestScope<'b>, &CallbackEnvelope) + Send + 'static,
    {
        let payload = json!({ "method": method.into(), "params": params });
        self.invoke(INVOKE_SERVICE_METHOD, payload, continuation);
    }

    /// Call a method exposed by a specific page.
    pub fn call_page<F>(
        &mut self,
        page: PageId,
        method: impl Into<String>,
        params: Value,
        continuation: F,
    ) where
        F: for<'b> FnOnce(&mut GuestScope<'b>, &CallbackEnvelope) + Send + 'static,
    {
        let payload = json!({ "method": method.into(), "params": params, "webviewId": page });
        self.invoke(INVOKE_WEBVIEW_METHOD, payload, continuation);
    }

    pub fn publish(&mut self, key: impl Into<String>, data: Value) {
        self.state.emit(OutboundBody::Publish {
            key: key.into(),
            data,
            target: None,
        });
    }

    /// Publish to a single context, which still has to be subscribed.
    pub fn publish_to(&mut self, key: impl Into<String>, data: Value, target: ContextId) {
        self.state.emit(OutboundBody::Publish {
            key: key.into(),
            data,
            target: Some(target),
        });
    }

    /// Register a handler for `key`. Handlers for the same key run in
    /// registration order.
    pub fn subscribe<F>(&mut self, key: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: for<'b> Fn(&mut GuestScope<'b>, &Value) + 'static,
    {
        let key = key.into();
        let id = SubscriptionId(self.state.next_subscription);
        self.state.next_subscription += 1;

        let handlers = self.state.subscriptions.entry(key.clone()).or_default();
        let first = handlers.is_empty();
        handlers.push((id, Rc::new(handler)));
        if first {
            self.state.emit(OutboundBody::Subscribe { key });
        }
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let Some(key) = self
            .state
            .subscriptions
            .iter()
            .find(|(_, handlers)| handlers.iter().any(|(sid, _)| *sid == id))
            .map(|(key, _)| key.clone())
        else {
            return false;
        };

        let now_empty = match self.state.subscriptions.get_mut(&key) {
            Some(handlers) => {
                handlers.retain(|(sid, _)| *sid != id);
                handlers.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.state.subscriptions.remove(&key);
            self.state.emit(OutboundBody::Unsubscribe { key });
        }
        true
    }

    /// Expose a method that other contexts can reach through
    /// `invokeServiceMethod` / `invokeWebViewMethod`.
    pub fn expose<F>(&mut self, method: impl Into<String>, handler: F)
    where
        F: for<'b> Fn(&mut GuestScope<'b>, Value) -> CallResult + 'static,
    {
        self.state.methods.insert(method.into(), Rc::new(handler));
    }

    // ── Timers ──────────────────────────────────────────────────────────────

    /// Run `callback` after `delay`, unless the binding is reset first.
    pub fn set_timeout<F>(&mut self, delay: Duration, callback: F) -> TimerId
    where
        F: for<'b> FnOnce(&mut GuestScope<'b>) + 'static,
    {
        let id = TimerId(self.state.next_timer);
        self.state.next_timer += 1;

        let epoch = self.state.epoch();
        let signals = self.state.signals.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signals.send(WorkerSignal::Timer { id, epoch });
        });

        self.state.timers.insert(
            id,
            PendingTimer {
                abort: task.abort_handle(),
                callback: Box::new(callback),
            },
        );
        id
    }

    pub fn clear_timeout(&mut self, id: TimerId) -> bool {
        match self.state.timers.remove(&id) {
            Some(timer) => {
                timer.abort.abort();
                true
            }
            None => false,
        }
    }

    // ── Per-binding values ──────────────────────────────────────────────────

    /// Attach a value to the current binding. Cleared on reset.
    pub fn bind(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.state.bindings.insert(key.into(), value)
    }

    pub fn binding(&self, key: &str) -> Option<&Value> {
        self.state.bindings.get(key)
    }

    pub fn unbind(&mut self, key: &str) -> Option<Value> {
        self.state.bindings.remove(key)
    }

    // ── Readiness ───────────────────────────────────────────────────────────

    /// Report first render from inside the context.
    pub fn signal_ready(&mut self) {
        let epoch = self.state.epoch();
        let _ = self.state.signals.send(WorkerSignal::Ready { epoch });
    }

    /// Run `task` once first render has completed (immediately if it has).
    pub fn after_ready<F>(&mut self, task: F)
    where
        F: for<'b> FnOnce(&mut GuestScope<'b>) + Send + 'static,
    {
        if self.state.ready {
            task(self);
        } else {
            self.state.deferred.push(Box::new(task));
        }
    }

    // ── Delivery (worker side) ──────────────────────────────────────────────

    pub(crate) fn deliver(&mut self, message: Message) {
        self.mirror(&message.to_wire());
        match message.kind {
            MessageKind::Publish => self.dispatch_publish(&message.event, &message.payload),
            MessageKind::Invoke => self.answer(message),
            MessageKind::Callback => {
                tracing::warn!(context = %self.state.id, event = %message.event, "bare callback without continuation");
            }
        }
    }

    pub(crate) fn resume(&mut self, continuation: crate::Continuation, callback: CallbackEnvelope) {
        self.mirror(&WireMessage::Callback(callback.clone()));
        continuation(self, &callback);
    }

    fn dispatch_publish(&mut self, key: &str, data: &Value) {
        let handlers: Vec<SubscriptionHandler> = match self.state.subscriptions.get(key) {
            Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
            None => return,
        };
        for handler in handlers {
            handler(self, data);
        }
    }

    fn answer(&mut self, message: Message) {
        let Some(callback_id) = message.callback_id else {
            tracing::warn!(context = %self.state.id, event = %message.event, "forwarded invoke without callback id");
            return;
        };

        let result = match serde_json::from_value::<ForwardRequest>(message.payload) {
            Ok(request) => match self.state.methods.get(&request.method).cloned() {
                Some(handler) => handler(self, request.params),
                None => Err(CallError::with_message(
                    ErrorKind::EventNotDefined,
                    format!("method '{}' is not exposed", request.method),
                )),
            },
            Err(e) => Err(CallError::decode(e)),
        };

        self.state.emit(OutboundBody::Reply {
            to: message.source,
            callback_id,
            event: reply_event_for(&message.event).to_string(),
            result,
        });
    }

    /// Mirror an envelope into script through the bridge global.
    fn mirror(&mut self, wire: &WireMessage) {
        let encoded = match serde_json::to_string(wire) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(context = %self.state.id, error = %e, "failed to encode envelope");
                return;
            }
        };
        let script = format!("{BRIDGE_GLOBAL}.receive({encoded})");
        if let Err(e) = self.engine.evaluate(&script) {
            tracing::debug!(context = %self.state.id, error = %e, "script bridge rejected envelope");
        }
    }

    pub(crate) fn run_timer(&mut self, id: TimerId) {
        if let Some(callback) = self.state.take_timer(id) {
            callback(self);
        }
    }
}
