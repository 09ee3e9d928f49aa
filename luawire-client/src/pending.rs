//! Requests waiting for their reply.

use crate::error::ClientError;
use luawire_protocol::Reply;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

#[derive(Default)]
struct Slots {
    senders: HashMap<u64, oneshot::Sender<Reply>>,
    /// Set once the connection has failed; no new entries are accepted.
    closed: bool,
}

/// Correlation id → reply slot, for one connection.
///
/// Every entry is removed exactly once: by [`resolve`](Self::resolve) when
/// its reply arrives, by [`cancel_all`](Self::cancel_all) when the
/// connection dies, or when the caller drops its [`PendingReply`].
#[derive(Default)]
pub struct PendingTable {
    slots: Mutex<Slots>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a slot for `id`. Returns `None` if the table was already
    /// cancelled.
    pub fn register(self: &Arc<Self>, id: u64) -> Option<PendingReply> {
        let (tx, rx) = oneshot::channel();
        {
            let mut slots = self.slots.lock();
            if slots.closed {
                return None;
            }
            slots.senders.insert(id, tx);
        }
        Some(PendingReply {
            id,
            rx,
            table: Arc::clone(self),
        })
    }

    /// Delivers `reply` to the caller waiting on `id`.
    ///
    /// Returns `false` if nobody is waiting any more: the id is unknown,
    /// or the caller already gave up.
    pub fn resolve(&self, id: u64, reply: Reply) -> bool {
        let Some(tx) = self.slots.lock().senders.remove(&id) else {
            return false;
        };
        if tx.is_closed() {
            return false;
        }
        tx.send(reply).is_ok()
    }

    /// Removes the entry for `id` without resolving it.
    pub fn remove(&self, id: u64) -> bool {
        self.slots.lock().senders.remove(&id).is_some()
    }

    /// Cancels every waiting caller and refuses further registrations.
    /// Returns the number of callers cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut slots = self.slots.lock();
        slots.closed = true;
        let count = slots.senders.len();
        // Dropping a sender wakes its receiver with an error.
        slots.senders.clear();
        count
    }

    pub fn contains(&self, id: u64) -> bool {
        self.slots.lock().senders.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.slots.lock().closed
    }
}

/// The caller's side of a pending request. Resolves to the reply, or to
/// [`ClientError::Cancelled`] if the connection fails first.
///
/// Dropping it before completion removes the entry from the table.
pub struct PendingReply {
    id: u64,
    rx: oneshot::Receiver<Reply>,
    table: Arc<PendingTable>,
}

impl PendingReply {
    /// Correlation id of the request.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingReply {
    type Output = Result<Reply, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| ClientError::Cancelled { id }))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_delivers_reply() {
        let table = Arc::new(PendingTable::new());
        let pending = table.register(1).unwrap();
        assert!(table.contains(1));

        assert!(table.resolve(1, Reply::ok(1, 4)));
        assert!(!table.contains(1));

        let reply = pending.await.unwrap();
        assert_eq!(reply.result(), &json!(4));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_all_cancels_every_caller() {
        let table = Arc::new(PendingTable::new());
        let waiting: Vec<_> = (0..3).map(|id| table.register(id).unwrap()).collect();

        assert_eq!(table.cancel_all(), 3);
        assert!(table.is_empty());

        for (id, pending) in waiting.into_iter().enumerate() {
            assert!(matches!(
                pending.await,
                Err(ClientError::Cancelled { id: got }) if got == id as u64
            ));
        }
    }

    #[test]
    fn test_register_after_cancel_refused() {
        let table = Arc::new(PendingTable::new());
        table.cancel_all();
        assert!(table.is_closed());
        assert!(table.register(9).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_dropped_reply_leaves_table() {
        let table = Arc::new(PendingTable::new());
        let pending = table.register(5).unwrap();
        assert_eq!(table.len(), 1);

        drop(pending);
        assert!(table.is_empty());
        // A late reply for an abandoned id is ignored.
        assert!(!table.resolve(5, Reply::ok(5, 1)));
    }

    #[test]
    fn test_resolve_unknown_id() {
        let table = PendingTable::new();
        assert!(!table.resolve(42, Reply::ok(42, json!(null))));
    }

    #[tokio::test]
    async fn test_resolve_after_resolution_is_noop() {
        let table = Arc::new(PendingTable::new());
        let pending = table.register(2).unwrap();
        assert!(table.resolve(2, Reply::ok(2, "first")));
        assert!(!table.resolve(2, Reply::ok(2, "second")));
        assert_eq!(pending.await.unwrap().result(), &json!("first"));
    }
}
