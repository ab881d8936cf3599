use std::collections::HashMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use remotecc_protocol::{CLOSE_CLIENT_LAGGING, CLOSE_REASON_CLIENT_LAGGING, ServerMessage};

pub type ClientId = u64;

pub const DEFAULT_CLIENT_QUEUE: usize = 256;

/// What the connection task of one client should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Message(ServerMessage),
    /// Send a close frame and stop.
    Close { code: u16, reason: String },
}

/// Registry of connected clients and their outbound queues.
///
/// Every send is a `try_send` and nobody waits. A client whose queue fills up
/// is closed and dropped rather than left with a gap in its state stream; one
/// slot per queue is kept back so that close frame always fits.
pub struct ClientBroker {
    clients: HashMap<ClientId, mpsc::Sender<Outbound>>,
    next_id: ClientId,
    queue: usize,
}

impl ClientBroker {
    pub fn new(queue: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_id: 1,
            queue: queue.max(1),
        }
    }

    pub fn register(&mut self) -> (ClientId, mpsc::Receiver<Outbound>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = mpsc::channel(self.queue + 1);
        self.clients.insert(id, tx);
        (id, rx)
    }

    pub fn remove(&mut self, id: ClientId) -> bool {
        self.clients.remove(&id).is_some()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Returns false when the client is unknown or was dropped by this call.
    pub fn send(&mut self, id: ClientId, msg: Outbound) -> bool {
        let Some(tx) = self.clients.get(&id) else {
            return false;
        };
        if tx.capacity() <= 1 {
            warn!(client = id, "client queue full, closing lagging client");
            let _ = tx.try_send(Outbound::Close {
                code: CLOSE_CLIENT_LAGGING,
                reason: CLOSE_REASON_CLIENT_LAGGING.to_string(),
            });
            self.clients.remove(&id);
            return false;
        }
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(client = id, "client queue full, dropping client");
                self.clients.remove(&id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(client = id, "client queue closed, removing");
                self.clients.remove(&id);
                false
            }
        }
    }

    pub fn broadcast(&mut self, msg: ServerMessage) {
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            self.send(id, Outbound::Message(msg.clone()));
        }
    }

    /// Ask every client to close and forget them all.
    pub fn close_all(&mut self, code: u16, reason: &str) {
        for (id, tx) in self.clients.drain() {
            let close = Outbound::Close {
                code,
                reason: reason.to_string(),
            };
            if tx.try_send(close).is_err() {
                debug!(client = id, "could not queue close frame");
            }
        }
    }
}

impl Default for ClientBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_QUEUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(message: &str) -> ServerMessage {
        ServerMessage::Error {
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_client() {
        let mut broker = ClientBroker::default();
        let (_, mut a) = broker.register();
        let (_, mut b) = broker.register();
        broker.broadcast(error("boom"));
        assert_eq!(a.recv().await, Some(Outbound::Message(error("boom"))));
        assert_eq!(b.recv().await, Some(Outbound::Message(error("boom"))));
    }

    #[tokio::test]
    async fn full_queue_closes_and_removes_client() {
        let mut broker = ClientBroker::new(1);
        let (id, mut rx) = broker.register();
        let (other, mut other_rx) = broker.register();
        assert!(broker.send(id, Outbound::Message(error("first"))));
        assert!(!broker.send(id, Outbound::Message(error("second"))));
        assert!(!broker.contains(id));
        assert!(broker.contains(other));

        assert_eq!(rx.recv().await, Some(Outbound::Message(error("first"))));
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Close {
                code: CLOSE_CLIENT_LAGGING,
                reason: CLOSE_REASON_CLIENT_LAGGING.to_string()
            })
        );
        assert_eq!(rx.recv().await, None);

        broker.broadcast(error("later"));
        assert_eq!(other_rx.recv().await, Some(Outbound::Message(error("later"))));
    }

    #[test]
    fn closed_queue_removes_client() {
        let mut broker = ClientBroker::default();
        let (gone, rx) = broker.register();
        let (stays, _rx) = broker.register();
        drop(rx);
        broker.broadcast(error("x"));
        assert!(!broker.contains(gone));
        assert!(broker.contains(stays));
        assert_eq!(broker.len(), 1);
    }

    #[tokio::test]
    async fn close_all_sends_close_and_empties() {
        let mut broker = ClientBroker::default();
        let (_, mut rx) = broker.register();
        broker.close_all(1001, "bye");
        assert!(broker.is_empty());
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Close {
                code: 1001,
                reason: "bye".to_string()
            })
        );
        assert_eq!(rx.recv().await, None);
    }
}
