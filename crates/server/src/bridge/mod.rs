//! Session bridge: joins real-time client connections to tables.
//!
//! Inbound frames are validated, deduplicated by request id, and routed to
//! the table the player is seated at; outbound events fan out through
//! per-client bounded channels. A client that stops draining its channel
//! is dropped and re-syncs with `subscribe_table` after reconnecting.

pub mod client;
pub mod tracker;
pub mod ws;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::error::AppError;
use crate::manager::{Notifier, TableManager};
use crate::protocol::{ClientMessage, ServerMessage};

use self::client::ClientHandle;
use self::tracker::ActionTracker;

pub struct SessionBridge {
    manager: Arc<TableManager>,
    auth: Arc<dyn Authenticator>,
    clients: DashMap<i64, ClientHandle>,
    subscriptions: DashMap<Uuid, HashSet<i64>>,
    tracker: ActionTracker,
}

impl SessionBridge {
    pub fn new(manager: Arc<TableManager>, auth: Arc<dyn Authenticator>) -> Arc<Self> {
        Arc::new(SessionBridge {
            manager,
            auth,
            clients: DashMap::new(),
            subscriptions: DashMap::new(),
            tracker: ActionTracker::new(),
        })
    }

    pub fn authenticate(&self, token: &str) -> Result<i64, AppError> {
        self.auth.authenticate(token)
    }

    /// Register a connection; a newer connection for the same user
    /// replaces the old one, whose channel closes.
    pub fn register_client(&self, user_id: i64) -> tokio::sync::mpsc::Receiver<ServerMessage> {
        let (handle, rx) = ClientHandle::new(user_id);
        self.clients.insert(user_id, handle);
        info!(user_id, "client connected");
        rx
    }

    pub fn unregister_client(&self, user_id: i64) {
        self.clients.remove(&user_id);
        for mut entry in self.subscriptions.iter_mut() {
            entry.value_mut().remove(&user_id);
        }
        info!(user_id, "client disconnected");
    }

    pub async fn handle_message(&self, user_id: i64, msg: ClientMessage) {
        match msg {
            ClientMessage::Ping => {
                self.send_to(user_id, ServerMessage::Pong);
            }
            ClientMessage::SubscribeTable { table_id } => {
                if self.manager.table(table_id).is_none() {
                    self.send_error(user_id, &AppError::NotFound("table"));
                    return;
                }
                self.subscriptions
                    .entry(table_id)
                    .or_default()
                    .insert(user_id);
                self.manager.send_table_state_to(table_id, user_id).await;
            }
            ClientMessage::GameAction {
                action,
                amount,
                request_id,
            } => {
                let Some(table) = self.manager.table_for_user(user_id) else {
                    self.send_error(user_id, &AppError::NotFound("table"));
                    return;
                };
                if !self
                    .tracker
                    .record(user_id, &request_id, table.id(), action, amount)
                {
                    // Transport retry of a request that already took
                    // effect; swallow it.
                    debug!(user_id, %request_id, "duplicate game_action ignored");
                    return;
                }
                if let Err(err) = self.manager.process_client_action(user_id, action, amount) {
                    self.send_error(user_id, &err);
                }
            }
        }
    }

    /// Errors go only to the acting client; the table never sees them.
    fn send_error(&self, user_id: i64, err: &AppError) {
        self.send_to(
            user_id,
            ServerMessage::Error {
                message: err.client_message(),
            },
        );
    }

    pub fn send_to(&self, user_id: i64, msg: ServerMessage) {
        let failed = self
            .clients
            .get(&user_id)
            .map(|c| !c.send(msg))
            .unwrap_or(false);
        if failed {
            // Slow or dead consumer: drop it, the client will reconnect
            // and re-sync.
            self.unregister_client(user_id);
        }
    }

    /// Periodic eviction of expired idempotency entries.
    pub fn spawn_tracker_gc(self: &Arc<Self>, interval: Duration) {
        let bridge = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                bridge.tracker.gc();
            }
        });
    }
}

impl Notifier for SessionBridge {
    fn subscribers(&self, table_id: Uuid) -> Vec<i64> {
        self.subscriptions
            .get(&table_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn send_to_user(&self, user_id: i64, msg: ServerMessage) {
        self.send_to(user_id, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenAuthenticator;
    use crate::ledger::ChipLedger;
    use crate::store::mem::MemStore;
    use crate::store::Store;
    use holdem_engine::ActionKind;

    fn bridge_fixture() -> (Arc<SessionBridge>, Arc<MemStore>, Arc<TableManager>) {
        let store: Arc<MemStore> = Arc::new(MemStore::new());
        let ledger = Arc::new(ChipLedger::new(store.clone()));
        let (manager, _rx) = TableManager::new(store.clone(), ledger);
        let auth = Arc::new(StaticTokenAuthenticator::new());
        auth.insert("tok", 1);
        let bridge = SessionBridge::new(manager.clone(), auth);
        manager.set_notifier(bridge.clone());
        (bridge, store, manager)
    }

    #[tokio::test]
    async fn ping_pong() {
        let (bridge, _, _) = bridge_fixture();
        let mut rx = bridge.register_client(1);
        bridge.handle_message(1, ClientMessage::Ping).await;
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::Pong));
    }

    #[tokio::test]
    async fn subscribing_to_an_unknown_table_errors_only_the_caller() {
        let (bridge, _, _) = bridge_fixture();
        let mut rx = bridge.register_client(1);
        bridge
            .handle_message(
                1,
                ClientMessage::SubscribeTable {
                    table_id: Uuid::new_v4(),
                },
            )
            .await;
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn action_without_a_seat_is_an_error_frame() {
        let (bridge, _, _) = bridge_fixture();
        let mut rx = bridge.register_client(1);
        bridge
            .handle_message(
                1,
                ClientMessage::GameAction {
                    action: ActionKind::Fold,
                    amount: 0,
                    request_id: "r1".into(),
                },
            )
            .await;
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn duplicate_request_id_produces_exactly_one_effect() {
        use crate::matchmaking::Matchmaking;

        let (bridge, store, manager) = bridge_fixture();
        let ledger = Arc::new(ChipLedger::new(store.clone()));
        let a = store.create_user("a", "A", 5_000).await.unwrap();
        let b = store.create_user("b", "B", 5_000).await.unwrap();

        let matchmaking = Matchmaking::new(store.clone(), ledger, manager.clone(), 0);
        matchmaking.join(a.id, "headsup", 1_000).await.unwrap();
        matchmaking.join(b.id, "headsup", 1_000).await.unwrap();

        let table_id = manager.table_for_user(a.id).unwrap().id();
        manager.check_and_start_game(table_id).await.unwrap();
        let table = manager.table(table_id).unwrap();
        let hand = table.state_for(None).current_hand.unwrap();
        let actor = hand.current_turn.unwrap();
        let seq_before = hand.action_sequence;

        let frame = ClientMessage::GameAction {
            action: ActionKind::Call,
            amount: 0,
            request_id: "dup-1".into(),
        };
        bridge.handle_message(actor, frame.clone()).await;
        bridge.handle_message(actor, frame).await;

        let hand = table.state_for(None).current_hand.unwrap();
        // Exactly one accepted action: the sequence advanced once and no
        // out-of-turn error reached the engine state.
        assert_eq!(hand.action_sequence, seq_before + 1);
    }
}
