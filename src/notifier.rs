//! Result notifier: best-effort push of judge events to live client connections

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::queue::JudgeReply;

/// Events pushed to clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JudgeEvent {
    Judging {
        submission_id: Option<i64>,
        problem_id: i64,
    },
    Result(JudgeReply),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

struct Connection {
    id: ConnectionId,
    tx: UnboundedSender<String>,
}

/// Live connections by user id; a user may hold several (one per tab)
#[derive(Default)]
pub struct Notifier {
    connections: DashMap<i64, Vec<Connection>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; messages for the user arrive on the returned receiver
    pub fn register(&self, user_id: i64) -> (ConnectionId, UnboundedReceiver<String>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .entry(user_id)
            .or_default()
            .push(Connection { id, tx });
        debug!("User {} connected ({:?})", user_id, id);
        (id, rx)
    }

    pub fn unregister(&self, user_id: i64, id: ConnectionId) {
        if let Some(mut connections) = self.connections.get_mut(&user_id) {
            connections.retain(|c| c.id != id);
        }
        self.connections
            .remove_if(&user_id, |_, connections| connections.is_empty());
        debug!("User {} disconnected ({:?})", user_id, id);
    }

    /// Send `event` to every connection of `user_id`
    ///
    /// Closed connections are dropped; a user without connections is a no-op.
    /// Returns the number of connections reached.
    pub fn push(&self, user_id: i64, event: &JudgeEvent) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode event for user {}: {}", user_id, e);
                return 0;
            }
        };

        let mut delivered = 0;
        if let Some(mut connections) = self.connections.get_mut(&user_id) {
            connections.retain(|c| match c.tx.send(payload.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!("Dropping closed connection {:?} of user {}", c.id, user_id);
                    false
                }
            });
        }
        self.connections
            .remove_if(&user_id, |_, connections| connections.is_empty());
        delivered
    }

    pub fn connection_count(&self, user_id: i64) -> usize {
        self.connections
            .get(&user_id)
            .map(|connections| connections.len())
            .unwrap_or(0)
    }
}
