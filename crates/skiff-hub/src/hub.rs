use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use skiff_proto::ServerMessage;

pub type ClientId = u64;

/// Outbound queue of one client. The socket task drains it.
pub type ClientTx = mpsc::Sender<Arc<str>>;

/// Client registry plus fan-out. Sends never wait on a slow client: a full or
/// closed queue drops that client after the pass.
pub struct BroadcastHub {
    next_id: AtomicU64,
    max_clients: usize,
    clients: Mutex<HashMap<ClientId, ClientTx>>,
    fanout: tokio::sync::Mutex<()>,
}

impl BroadcastHub {
    pub fn new(max_clients: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            max_clients,
            clients: Mutex::new(HashMap::new()),
            fanout: tokio::sync::Mutex::new(()),
        }
    }

    /// `None` when the hub is at capacity.
    pub fn register(&self, tx: ClientTx) -> Option<ClientId> {
        let mut clients = self.clients.lock();
        if clients.len() >= self.max_clients {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        clients.insert(id, tx);
        debug!("hub: client {} registered ({} total)", id, clients.len());
        Some(id)
    }

    pub fn unregister(&self, id: ClientId) -> bool {
        let removed = self.clients.lock().remove(&id).is_some();
        if removed {
            debug!("hub: client {} removed", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Queues one message for one client. A dead queue unregisters it.
    pub fn send_to(&self, id: ClientId, msg: &ServerMessage) -> bool {
        let Some(text) = encode(msg) else { return false };
        let Some(tx) = self.clients.lock().get(&id).cloned() else { return false };
        if tx.try_send(text).is_err() {
            warn!("hub: client {} queue unavailable; dropping it", id);
            self.unregister(id);
            return false;
        }
        true
    }

    pub async fn broadcast(&self, msg: &ServerMessage) -> usize {
        self.broadcast_batch(std::slice::from_ref(msg)).await
    }

    /// Delivers the whole batch to every client before the next batch starts.
    /// Returns how many clients got all of it.
    pub async fn broadcast_batch(&self, msgs: &[ServerMessage]) -> usize {
        let encoded: Vec<Arc<str>> = msgs.iter().filter_map(encode).collect();
        if encoded.is_empty() {
            return 0;
        }

        let _turn = self.fanout.lock().await;
        let snapshot: Vec<(ClientId, ClientTx)> = self.clients.lock().iter().map(|(id, tx)| (*id, tx.clone())).collect();

        let mut failed = Vec::new();
        for (id, tx) in &snapshot {
            if encoded.iter().any(|text| tx.try_send(text.clone()).is_err()) {
                failed.push(*id);
            }
        }

        if !failed.is_empty() {
            let mut clients = self.clients.lock();
            for id in &failed {
                clients.remove(id);
            }
            warn!("hub: dropped {} unreachable client(s), {} left", failed.len(), clients.len());
        }
        snapshot.len() - failed.len()
    }
}

fn encode(msg: &ServerMessage) -> Option<Arc<str>> {
    match msg.encode() {
        Ok(text) => Some(text),
        Err(e) => {
            error!("hub: cannot encode {:?}: {}", msg, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> ServerMessage {
        ServerMessage::Speed { level: 40 }
    }

    #[tokio::test]
    async fn failed_client_is_removed_and_others_receive() {
        let hub = BroadcastHub::new(8);
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, rx2) = mpsc::channel(4);
        let (tx3, mut rx3) = mpsc::channel(4);
        let a = hub.register(tx1).unwrap();
        let b = hub.register(tx2).unwrap();
        let c = hub.register(tx3).unwrap();
        drop(rx2);

        assert_eq!(hub.broadcast(&ping()).await, 2);
        assert_eq!(&*rx1.recv().await.unwrap(), r#"{"tipo":"velocidad","velocidad":40}"#);
        assert!(rx3.recv().await.is_some());
        assert_eq!(hub.len(), 2);
        assert!(!hub.unregister(b));

        assert_eq!(hub.broadcast(&ping()).await, 2);
        assert!(hub.send_to(a, &ping()));
        assert!(hub.send_to(c, &ping()));
        assert!(!hub.send_to(b, &ping()));
    }

    #[tokio::test]
    async fn full_queue_drops_slow_client() {
        let hub = BroadcastHub::new(8);
        let (fast_tx, mut fast_rx) = mpsc::channel(16);
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        hub.register(fast_tx).unwrap();
        hub.register(slow_tx).unwrap();

        let batch = vec![ping(), ServerMessage::error("x"), ping()];
        assert_eq!(hub.broadcast_batch(&batch).await, 1);
        assert_eq!(hub.len(), 1);
        for _ in 0..3 {
            assert!(fast_rx.recv().await.is_some());
        }
    }

    #[test]
    fn register_respects_cap() {
        let hub = BroadcastHub::new(1);
        let (tx, _rx) = mpsc::channel(1);
        let id = hub.register(tx.clone()).unwrap();
        assert!(hub.register(tx.clone()).is_none());
        assert!(hub.unregister(id));
        assert!(hub.register(tx).is_some());
    }
}
