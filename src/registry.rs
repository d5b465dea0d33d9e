//! Callback registry.
//!
//! Correlates host-originated calls with the editor's responses. Each call
//! gets a fresh [`CallId`] and a single-use response slot; the read loop
//! resolves the slot when the matching callback frame arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{HostError, Result};
use crate::wire::{CallId, CallbackResponse, Wire};

/// Outstanding host-originated calls for one connection.
pub struct CallbackRegistry {
    wire: Arc<dyn Wire>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<CallId, oneshot::Sender<CallbackResponse>>>,
}

/// The awaiting side of one issued call.
#[derive(Debug)]
pub struct PendingCall {
    id: CallId,
    slot: oneshot::Receiver<CallbackResponse>,
}

impl PendingCall {
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Waits for the response, giving up when `dying` fires.
    pub async fn wait(self, dying: &CancellationToken) -> Result<CallbackResponse> {
        tokio::select! {
            resp = self.slot => resp.map_err(|_| HostError::ShuttingDown),
            _ = dying.cancelled() => Err(HostError::ShuttingDown),
        }
    }

    /// The raw slot, for callers that interleave other waits with the
    /// response.
    pub fn into_slot(self) -> oneshot::Receiver<CallbackResponse> {
        self.slot
    }
}

impl CallbackRegistry {
    pub fn new(wire: Arc<dyn Wire>) -> Self {
        Self {
            wire,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<CallId, oneshot::Sender<CallbackResponse>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates an id, registers its slot and transmits the call.
    ///
    /// The slot is registered before the call is written so a fast response
    /// can never arrive for an unknown id. A failed write unregisters it.
    pub async fn issue(&self, kind: &str, args: Vec<Value>) -> Result<PendingCall> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);

        tracing::debug!(call_id = id, kind, "issue call");
        if let Err(e) = self.wire.issue_call(id, kind, args).await {
            self.pending().remove(&id);
            return Err(e);
        }
        Ok(PendingCall { id, slot: rx })
    }

    /// Delivers `response` to the caller waiting on `id`.
    ///
    /// An id with no pending call means the conversation is desynchronised.
    pub fn resolve(&self, id: CallId, response: CallbackResponse) -> Result<()> {
        let Some(slot) = self.pending().remove(&id) else {
            return Err(HostError::protocol(format!(
                "callback for unknown call id {id}"
            )));
        };
        tracing::debug!(call_id = id, error = %response.error, "resolve call");
        if slot.send(response).is_err() {
            tracing::debug!(call_id = id, "caller stopped waiting for response");
        }
        Ok(())
    }

    /// Drops every pending slot; their waiters observe a shutdown.
    pub fn abandon_all(&self) {
        let abandoned = std::mem::take(&mut *self.pending());
        if !abandoned.is_empty() {
            tracing::debug!(count = abandoned.len(), "abandoning pending calls");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// Records issued calls instead of writing them anywhere.
    #[derive(Default)]
    struct MockWire {
        issued: Mutex<Vec<(CallId, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Wire for MockWire {
        async fn issue_call(&self, id: CallId, kind: &str, _args: Vec<Value>) -> Result<()> {
            if self.fail {
                return Err(HostError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "closed",
                )));
            }
            self.issued.lock().unwrap().push((id, kind.to_string()));
            Ok(())
        }

        async fn send_response(&self, _reply: u64, _response: CallbackResponse) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_resolve_reaches_waiter() {
        let wire = Arc::new(MockWire::default());
        let registry = CallbackRegistry::new(wire.clone());
        let dying = CancellationToken::new();

        let mut calls = Vec::new();
        for _ in 0..7 {
            calls.push(registry.issue("expr", vec![json!("1")]).await.unwrap());
        }
        let seventh = calls.pop().unwrap();
        assert_eq!(seventh.id(), 7);

        registry.resolve(7, CallbackResponse::ok(json!("ok"))).unwrap();
        let resp = seventh.wait(&dying).await.unwrap();
        assert!(!resp.is_err());
        assert_eq!(resp.value, json!("ok"));
        assert_eq!(registry.pending_count(), 6);
    }

    #[tokio::test]
    async fn test_unknown_id_is_protocol_fault() {
        let registry = CallbackRegistry::new(Arc::new(MockWire::default()));
        let err = registry
            .resolve(42, CallbackResponse::ok(Value::Null))
            .unwrap_err();
        assert!(matches!(err, HostError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_second_resolve_is_protocol_fault() {
        let registry = CallbackRegistry::new(Arc::new(MockWire::default()));
        let call = registry.issue("ex", vec![]).await.unwrap();
        registry.resolve(call.id(), CallbackResponse::ok(Value::Null)).unwrap();
        assert!(registry
            .resolve(call.id(), CallbackResponse::ok(Value::Null))
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_write_unregisters() {
        let wire = Arc::new(MockWire {
            fail: true,
            ..Default::default()
        });
        let registry = CallbackRegistry::new(wire);
        assert!(registry.issue("ex", vec![]).await.is_err());
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_aborts_when_dying() {
        let registry = CallbackRegistry::new(Arc::new(MockWire::default()));
        let dying = CancellationToken::new();
        let call = registry.issue("ex", vec![]).await.unwrap();
        dying.cancel();
        assert!(matches!(
            call.wait(&dying).await,
            Err(HostError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_abandon_all_releases_waiters() {
        let registry = CallbackRegistry::new(Arc::new(MockWire::default()));
        let dying = CancellationToken::new();
        let call = registry.issue("ex", vec![]).await.unwrap();
        registry.abandon_all();
        assert!(matches!(
            call.wait(&dying).await,
            Err(HostError::ShuttingDown)
        ));
    }
}
