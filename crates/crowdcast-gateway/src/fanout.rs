//! Per-room fan-out.
//!
//! One bounded queue feeds a single worker; each connection registers a
//! sender under its room. The worker serializes a message once and pushes it
//! to every subscriber of the room concurrently. A subscriber whose channel
//! has gone away is reaped on its first failed send — new subscribers only
//! see messages dequeued after they joined.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crowdcast_protocol::ChatMessage;

/// Buffered frames per connection before its sender blocks the dispatch.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

pub type RoomMessage = (String, ChatMessage);

pub struct FanoutManager {
    rooms: Mutex<HashMap<String, HashMap<u64, mpsc::Sender<String>>>>,
    queue_tx: mpsc::Sender<RoomMessage>,
    next_conn_id: AtomicU64,
}

impl FanoutManager {
    /// Returns the manager and the queue receiver the worker must drain.
    pub fn new(queue_size: usize) -> (Self, mpsc::Receiver<RoomMessage>) {
        let (queue_tx, queue_rx) = mpsc::channel(queue_size);
        (
            Self {
                rooms: Mutex::new(HashMap::new()),
                queue_tx,
                next_conn_id: AtomicU64::new(1),
            },
            queue_rx,
        )
    }

    /// Register a connection under `room_id`; returns its id and the stream
    /// of serialized frames to forward to the client.
    pub fn subscribe(&self, room_id: &str) -> (u64, mpsc::Receiver<String>) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let mut rooms = self.rooms.lock().unwrap();
        rooms.entry(room_id.to_string()).or_default().insert(conn_id, tx);
        info!(room_id, conn_id, "subscriber joined");
        (conn_id, rx)
    }

    pub fn unsubscribe(&self, room_id: &str, conn_id: u64) {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(room) = rooms.get_mut(room_id) {
            room.remove(&conn_id);
            if room.is_empty() {
                rooms.remove(room_id);
            }
        }
        debug!(room_id, conn_id, "subscriber left");
    }

    /// Non-blocking enqueue: `false` means the queue was full and the
    /// broadcast is dropped.
    pub fn enqueue_broadcast(&self, room_id: &str, message: ChatMessage) -> bool {
        match self.queue_tx.try_send((room_id.to_string(), message)) {
            Ok(()) => true,
            Err(_) => {
                warn!(room_id, "broadcast queue full; dropping message");
                false
            }
        }
    }

    pub fn active_connections(&self) -> usize {
        self.rooms.lock().unwrap().values().map(HashMap::len).sum()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap().len()
    }

    /// Deliver one message to the room's current subscriber set.
    async fn dispatch(&self, room_id: &str, message: &ChatMessage) {
        // snapshot under the lock, send outside it
        let subscribers: Vec<(u64, mpsc::Sender<String>)> = {
            let rooms = self.rooms.lock().unwrap();
            match rooms.get(room_id) {
                Some(room) => room.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return,
            }
        };
        if subscribers.is_empty() {
            return;
        }

        let payload = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                warn!(room_id, error = %e, "failed to serialize broadcast");
                return;
            }
        };

        let sends = subscribers.iter().map(|(conn_id, tx)| {
            let payload = payload.clone();
            async move { (*conn_id, tx.send(payload).await) }
        });
        let results = join_all(sends).await;

        let dead: Vec<u64> = results
            .into_iter()
            .filter_map(|(conn_id, res)| res.err().map(|_| conn_id))
            .collect();
        for conn_id in dead {
            info!(room_id, conn_id, "removing dead subscriber");
            self.unsubscribe(room_id, conn_id);
        }
    }

    /// The single broadcast worker. Runs until cancelled or the queue closes.
    pub async fn run_worker(
        &self,
        mut queue_rx: mpsc::Receiver<RoomMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                item = queue_rx.recv() => {
                    match item {
                        Some((room_id, message)) => self.dispatch(&room_id, &message).await,
                        None => break,
                    }
                }
            }
        }
        info!("broadcast worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdcast_protocol::Origin;

    fn message(id: &str) -> ChatMessage {
        ChatMessage {
            schema_name: None,
            schema_version: None,
            id: id.into(),
            ts: "2024-05-01T12:00:00Z".into(),
            room_id: "room:demo".into(),
            origin: Origin::Human,
            content: "hello".into(),
            user_id: None,
            display_name: None,
            reply_to: None,
            mentions: None,
            emotes: None,
            badges: None,
            style: None,
            client_meta: None,
            moderation: None,
            trace: None,
        }
    }

    #[tokio::test]
    async fn overloaded_queue_drops_beyond_capacity() {
        // burst of 32 against a queue of 8 with no worker draining
        let (manager, _rx) = FanoutManager::new(8);
        let mut accepted = 0;
        for i in 0..32 {
            if manager.enqueue_broadcast("room:demo", message(&format!("m{i}"))) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 8);
    }

    #[tokio::test]
    async fn dispatch_reaches_current_subscribers_only() {
        let (manager, _rx) = FanoutManager::new(8);
        let (_early, mut early_rx) = manager.subscribe("room:demo");

        manager.dispatch("room:demo", &message("m1")).await;
        assert!(early_rx.try_recv().is_ok());

        // late joiner sees nothing from before its subscription
        let (_late, mut late_rx) = manager.subscribe("room:demo");
        assert!(late_rx.try_recv().is_err());

        manager.dispatch("room:demo", &message("m2")).await;
        assert!(early_rx.try_recv().is_ok());
        assert!(late_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn dead_subscriber_is_reaped_on_first_failed_send() {
        let (manager, _rx) = FanoutManager::new(8);
        let (_alive, mut alive_rx) = manager.subscribe("room:demo");
        let (dead_id, dead_rx) = manager.subscribe("room:demo");
        drop(dead_rx);
        assert_eq!(manager.active_connections(), 2);

        manager.dispatch("room:demo", &message("m1")).await;

        assert_eq!(manager.active_connections(), 1, "dead conn {dead_id} reaped");
        assert!(alive_rx.try_recv().is_ok(), "live subscriber still served");
    }

    #[tokio::test]
    async fn room_key_vanishes_with_last_subscriber() {
        let (manager, _rx) = FanoutManager::new(8);
        let (conn_id, _subscriber_rx) = manager.subscribe("room:demo");
        assert_eq!(manager.room_count(), 1);
        manager.unsubscribe("room:demo", conn_id);
        assert_eq!(manager.room_count(), 0);
    }

    #[tokio::test]
    async fn worker_drains_queue_in_fifo_order() {
        let (manager, queue_rx) = FanoutManager::new(8);
        let manager = std::sync::Arc::new(manager);
        let (_conn, mut sub_rx) = manager.subscribe("room:demo");

        let cancel = CancellationToken::new();
        let worker = {
            let manager = manager.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { manager.run_worker(queue_rx, cancel).await })
        };

        for i in 0..3 {
            assert!(manager.enqueue_broadcast("room:demo", message(&format!("m{i}"))));
        }
        for i in 0..3 {
            let payload = sub_rx.recv().await.unwrap();
            assert!(payload.contains(&format!("\"id\":\"m{i}\"")));
        }

        cancel.cancel();
        worker.await.unwrap();
    }
}
