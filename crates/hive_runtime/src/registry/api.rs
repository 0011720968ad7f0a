// API handlers
//
// Every capability API, whatever module it comes from, is reached through the
// same interface: one async `handle(call) -> Result` method.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use hive_types::{CallError, ContextId};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::bridge::Bridge;

pub type ApiResult<T> = Result<T, CallError>;

// ─────────────────────────────────────────────────────────────────────────────
// ApiCall
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a handler receives for one dispatch.
#[derive(Clone)]
pub struct ApiCall {
    /// The event name that was invoked
    pub event: String,
    /// Context that issued the invoke
    pub caller: ContextId,
    /// The app's service context, if it is running
    pub service: Option<ContextId>,
    /// Router handle, for handlers that publish or reach other contexts
    pub bridge: Arc<Bridge>,
    /// Decoded invoke payload
    pub args: Value,
}

impl ApiCall {
    /// Decode the args into the handler's expected shape.
    pub fn params<T: DeserializeOwned>(&self) -> ApiResult<T> {
        serde_json::from_value(self.args.clone()).map_err(CallError::decode)
    }

    /// A single string field of the args.
    pub fn str_arg(&self, key: &str) -> ApiResult<&str> {
        self.args
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| CallError::decode(format!("missing string field '{key}'")))
    }
}

impl std::fmt::Debug for ApiCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCall")
            .field("event", &self.event)
            .field("caller", &self.caller)
            .field("service", &self.service)
            .field("args", &self.args)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for API handlers
#[async_trait]
pub trait ApiHandler: Send + Sync + 'static {
    async fn handle(&self, call: ApiCall) -> ApiResult<Value>;
}

/// Function-based handler (for simple APIs)
pub struct FnHandler<F, Fut> {
    func: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(ApiCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<Value>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _fut: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> ApiHandler for FnHandler<F, Fut>
where
    F: Fn(ApiCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<Value>> + Send + 'static,
{
    async fn handle(&self, call: ApiCall) -> ApiResult<Value> {
        (self.func)(call).await
    }
}

/// Wrap an async closure as a shared handler.
pub fn handler_fn<F, Fut>(func: F) -> Arc<dyn ApiHandler>
where
    F: Fn(ApiCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<Value>> + Send + 'static,
{
    Arc::new(FnHandler::new(func))
}

// ─────────────────────────────────────────────────────────────────────────────
// ApiMap
// ─────────────────────────────────────────────────────────────────────────────

/// A module's event → handler map, in declaration order.
#[derive(Default, Clone)]
pub struct ApiMap {
    entries: Vec<(String, Arc<dyn ApiHandler>)>,
}

impl ApiMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler. A later entry for the same event replaces the earlier.
    pub fn with(mut self, event: impl Into<String>, handler: Arc<dyn ApiHandler>) -> Self {
        self.insert(event, handler);
        self
    }

    /// Add an async closure handler.
    pub fn with_fn<F, Fut>(self, event: impl Into<String>, func: F) -> Self
    where
        F: Fn(ApiCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResult<Value>> + Send + 'static,
    {
        self.with(event, handler_fn(func))
    }

    pub fn insert(&mut self, event: impl Into<String>, handler: Arc<dyn ApiHandler>) {
        let event = event.into();
        self.entries.retain(|(e, _)| *e != event);
        self.entries.push((event, handler));
    }

    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(e, _)| e.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, Arc<dyn ApiHandler>)> {
        self.entries
    }
}
