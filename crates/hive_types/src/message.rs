// Wire Protocol
//
// Envelopes exchanged between contexts and the native mediator. Field names
// follow the script-side bridge (`callbackId`, `errMsg`, `targetContextId`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CallError, CallResult, ErrorKind};
use crate::ids::{CallbackId, ContextId, PageId};

// ─────────────────────────────────────────────────────────────────────────────
// Reserved events
// ─────────────────────────────────────────────────────────────────────────────

/// Page → Service forwarded call.
pub const INVOKE_SERVICE_METHOD: &str = "invokeServiceMethod";
/// Reply to `invokeServiceMethod`.
pub const CALLBACK_SERVICE_METHOD: &str = "callbackServiceMethod";
/// Service → specific Page forwarded call.
pub const INVOKE_WEBVIEW_METHOD: &str = "invokeWebViewMethod";
/// Reply to `invokeWebViewMethod`.
pub const CALLBACK_WEBVIEW_METHOD: &str = "callbackWebViewMethod";

/// Success marker used in `errMsg`.
pub const OK: &str = "ok";

/// Is this one of the forwarding events relayed between contexts?
pub fn is_forward_event(event: &str) -> bool {
    event == INVOKE_SERVICE_METHOD || event == INVOKE_WEBVIEW_METHOD
}

/// The reply event name paired with a forwarding event.
pub fn reply_event_for(event: &str) -> &str {
    match event {
        INVOKE_SERVICE_METHOD => CALLBACK_SERVICE_METHOD,
        INVOKE_WEBVIEW_METHOD => CALLBACK_WEBVIEW_METHOD,
        other => other,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelopes
// ─────────────────────────────────────────────────────────────────────────────

/// Request expecting exactly one matching callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeEnvelope {
    pub event: String,
    #[serde(rename = "callbackId")]
    pub callback_id: CallbackId,
    /// JSON-encoded payload
    pub params: String,
}

impl InvokeEnvelope {
    /// Serialize the payload into the envelope.
    pub fn new(event: impl Into<String>, callback_id: CallbackId, payload: &Value) -> Self {
        Self {
            event: event.into(),
            callback_id,
            params: payload.to_string(),
        }
    }

    /// Decode the params string.
    pub fn payload(&self) -> Result<Value, CallError> {
        serde_json::from_str(&self.params).map_err(CallError::decode)
    }
}

/// One-time response to an invoke, matched by callback id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEnvelope {
    pub id: CallbackId,
    pub event: String,
    #[serde(rename = "errMsg")]
    pub err_msg: String,
    pub data: Value,
}

impl CallbackEnvelope {
    /// Successful callback.
    pub fn success(id: CallbackId, event: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            event: event.into(),
            err_msg: OK.to_string(),
            data,
        }
    }

    /// Failed callback. `errMsg` is the bare kind tag; any detail goes in `data`.
    pub fn failure(id: CallbackId, event: impl Into<String>, error: &CallError) -> Self {
        let data = match &error.message {
            Some(message) => serde_json::json!({ "message": message }),
            None => Value::Null,
        };
        Self {
            id,
            event: event.into(),
            err_msg: error.kind.as_str().to_string(),
            data,
        }
    }

    /// Build from a call outcome.
    pub fn from_result(id: CallbackId, event: impl Into<String>, result: CallResult) -> Self {
        match result {
            Ok(data) => Self::success(id, event, data),
            Err(error) => Self::failure(id, event, &error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err_msg == OK
    }

    /// The failure kind, if this callback reports one.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        ErrorKind::from_tag(&self.err_msg)
    }
}

/// Fire-and-forget notification keyed by `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishEnvelope {
    pub event: String,
    /// JSON-encoded payload
    pub params: String,
    #[serde(rename = "targetContextId", skip_serializing_if = "Option::is_none", default)]
    pub target_context_id: Option<ContextId>,
}

impl PublishEnvelope {
    pub fn new(event: impl Into<String>, data: &Value, target: Option<ContextId>) -> Self {
        Self {
            event: event.into(),
            params: data.to_string(),
            target_context_id: target,
        }
    }
}

/// Any envelope, tagged for mirroring into script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WireMessage {
    Invoke(InvokeEnvelope),
    Callback(CallbackEnvelope),
    Publish(PublishEnvelope),
}

// ─────────────────────────────────────────────────────────────────────────────
// Routed message
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Invoke,
    Callback,
    Publish,
}

/// A message as seen by the mediator: envelope content plus addressing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub event: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub callback_id: Option<CallbackId>,
    pub source: ContextId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<ContextId>,
}

impl Message {
    pub fn publish(
        source: ContextId,
        event: impl Into<String>,
        payload: Value,
        target: Option<ContextId>,
    ) -> Self {
        Self {
            kind: MessageKind::Publish,
            event: event.into(),
            payload,
            callback_id: None,
            source,
            target,
        }
    }

    pub fn invoke(
        source: ContextId,
        target: ContextId,
        event: impl Into<String>,
        callback_id: CallbackId,
        payload: Value,
    ) -> Self {
        Self {
            kind: MessageKind::Invoke,
            event: event.into(),
            payload,
            callback_id: Some(callback_id),
            source,
            target: Some(target),
        }
    }

    /// Render as the wire envelope a script-side bridge expects.
    pub fn to_wire(&self) -> WireMessage {
        match self.kind {
            MessageKind::Invoke => WireMessage::Invoke(InvokeEnvelope::new(
                self.event.clone(),
                self.callback_id.unwrap_or(CallbackId(0)),
                &self.payload,
            )),
            MessageKind::Callback => WireMessage::Callback(CallbackEnvelope::success(
                self.callback_id.unwrap_or(CallbackId(0)),
                self.event.clone(),
                self.payload.clone(),
            )),
            MessageKind::Publish => WireMessage::Publish(PublishEnvelope::new(
                self.event.clone(),
                &self.payload,
                self.target,
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Forwarding payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Payload of `invokeServiceMethod` / `invokeWebViewMethod`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardRequest {
    /// Method exposed by the target context
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Target page, required for `invokeWebViewMethod`
    #[serde(rename = "webviewId", skip_serializing_if = "Option::is_none", default)]
    pub page: Option<PageId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invoke_envelope_field_names() {
        let env = InvokeEnvelope::new("getValue", CallbackId(3), &json!({"k": 1}));
        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(wire["callbackId"], 3);
        assert_eq!(wire["params"], r#"{"k":1}"#);
        assert_eq!(env.payload().unwrap(), json!({"k": 1}));
    }

    #[test]
    fn test_failure_callback_carries_bare_tag() {
        let env = CallbackEnvelope::failure(
            CallbackId(1),
            "getValue",
            &CallError::event_not_defined(),
        );
        assert_eq!(env.err_msg, "EventNotDefined");
        assert_eq!(env.data, Value::Null);
        assert_eq!(env.error_kind(), Some(ErrorKind::EventNotDefined));
        assert!(!env.is_ok());

        let detailed = CallbackEnvelope::failure(CallbackId(2), "x", &CallError::handler("boom"));
        assert_eq!(detailed.data, json!({"message": "boom"}));
    }

    #[test]
    fn test_wire_message_tagging() {
        let msg = Message::publish(ContextId(1), "tick", json!(5), Some(ContextId(4)));
        let wire = serde_json::to_value(msg.to_wire()).unwrap();
        assert_eq!(wire["kind"], "publish");
        assert_eq!(wire["targetContextId"], 4);
        assert_eq!(wire["params"], "5");
    }

    #[test]
    fn test_forward_request_decoding() {
        let req: ForwardRequest =
            serde_json::from_value(json!({"method": "refresh", "webviewId": 2})).unwrap();
        assert_eq!(req.method, "refresh");
        assert_eq!(req.page, Some(PageId(2)));
        assert_eq!(req.params, Value::Null);
        assert_eq!(reply_event_for(INVOKE_SERVICE_METHOD), CALLBACK_SERVICE_METHOD);
        assert!(is_forward_event(INVOKE_WEBVIEW_METHOD));
        assert!(!is_forward_event("navigateTo"));
    }
}
