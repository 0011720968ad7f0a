// Pending calls
//
// One record per outstanding invoke, keyed by (owner, direction, id). A
// record is removed the moment a callback for it arrives, so a second
// callback with the same id finds nothing and is dropped.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hive_context::Continuation;
use hive_types::{CallDirection, CallbackId, ContextId};
use parking_lot::Mutex;
use serde::Serialize;

type CallKey = (ContextId, CallDirection, CallbackId);

/// An invoke waiting for its callback.
pub struct PendingCall {
    pub id: CallbackId,
    pub owner: ContextId,
    pub direction: CallDirection,
    /// Owner's binding epoch when the call was issued
    pub epoch: u64,
    pub event: String,
    /// Context expected to answer a forwarded call
    pub responder: Option<ContextId>,
    pub issued_at: DateTime<Utc>,
    pub(crate) continuation: Continuation,
}

impl PendingCall {
    fn key(&self) -> CallKey {
        (self.owner, self.direction, self.id)
    }

    fn summary(&self) -> PendingSummary {
        PendingSummary {
            id: self.id,
            owner: self.owner,
            direction: self.direction,
            epoch: self.epoch,
            event: self.event.clone(),
            responder: self.responder,
            issued_at: self.issued_at,
        }
    }
}

/// Diagnostic view of a pending call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingSummary {
    pub id: CallbackId,
    pub owner: ContextId,
    pub direction: CallDirection,
    pub epoch: u64,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responder: Option<ContextId>,
    pub issued_at: DateTime<Utc>,
}

#[derive(Default)]
pub(crate) struct PendingCalls {
    counters: Mutex<HashMap<(ContextId, CallDirection), u64>>,
    calls: Mutex<HashMap<CallKey, PendingCall>>,
}

impl PendingCalls {
    /// Next id for (owner, direction). Ids start at 1 and are never reused.
    pub fn allocate(&self, owner: ContextId, direction: CallDirection) -> CallbackId {
        let mut counters = self.counters.lock();
        let next = counters.entry((owner, direction)).or_insert(0);
        *next += 1;
        CallbackId(*next)
    }

    pub fn insert(&self, call: PendingCall) {
        let key = call.key();
        if self.calls.lock().insert(key, call).is_some() {
            tracing::error!(owner = %key.0, id = %key.2, "callback id reused while outstanding");
        }
    }

    pub fn take(
        &self,
        owner: ContextId,
        direction: CallDirection,
        id: CallbackId,
    ) -> Option<PendingCall> {
        self.calls.lock().remove(&(owner, direction, id))
    }

    pub fn responder(
        &self,
        owner: ContextId,
        direction: CallDirection,
        id: CallbackId,
    ) -> Option<ContextId> {
        self.calls
            .lock()
            .get(&(owner, direction, id))
            .and_then(|call| call.responder)
    }

    pub fn set_responder(
        &self,
        owner: ContextId,
        direction: CallDirection,
        id: CallbackId,
        responder: ContextId,
    ) {
        if let Some(call) = self.calls.lock().get_mut(&(owner, direction, id)) {
            call.responder = Some(responder);
        }
    }

    /// Summaries matching `filter`, oldest first.
    pub fn summaries(&self, filter: impl Fn(&PendingCall) -> bool) -> Vec<PendingSummary> {
        let mut out: Vec<PendingSummary> = self
            .calls
            .lock()
            .values()
            .filter(|call| filter(call))
            .map(PendingCall::summary)
            .collect();
        out.sort_by_key(|s| (s.issued_at, s.owner, s.id));
        out
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }
}
