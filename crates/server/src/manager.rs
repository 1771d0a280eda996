//! Table manager: owns the map of live engines, funnels engine events into
//! the durable log, keeps seat stacks synced, and fans state out to
//! subscribed clients.
//!
//! The engine stays authoritative in RAM; persistence failures in the
//! event path are logged and dropped, never rolled back into the engine.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use holdem_engine::{
    ActionKind, EngineError, EngineEvent, EventSink, GameEvent, GameKind, RemoveOutcome, Table,
    TableConfig,
};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::ledger::ChipLedger;
use crate::protocol::{ServerMessage, TableStatePayload};
use crate::store::{
    NewGameEvent, SeatStatusColumn, Store, TableRecord, TableStatusColumn, TransactionKind,
};

/// Pause between a completed hand and the next one at a cash table.
const NEXT_HAND_DELAY: StdDuration = StdDuration::from_secs(5);

/// Client-facing side of the bridge, injected after construction to break
/// the manager/bridge cycle.
pub trait Notifier: Send + Sync {
    fn subscribers(&self, table_id: Uuid) -> Vec<i64>;
    fn send_to_user(&self, user_id: i64, msg: ServerMessage);
}

/// Tournament controller callbacks, injected after construction.
#[async_trait]
pub trait TournamentHooks: Send + Sync {
    async fn on_hand_complete(&self, tournament_id: Uuid, table_id: Uuid);
    async fn on_game_complete(&self, tournament_id: Uuid, table_id: Uuid);
}

pub struct TableManager {
    store: Arc<dyn Store>,
    ledger: Arc<ChipLedger>,
    tables: DashMap<Uuid, Arc<Table>>,
    /// table -> owning tournament, for tournament-owned tables.
    tournament_of: DashMap<Uuid, Uuid>,
    /// user -> table they are seated at.
    seat_of: DashMap<i64, Uuid>,
    /// table -> open hand row id.
    open_hands: DashMap<Uuid, i64>,
    /// table -> hand row id of the most recently completed hand.
    last_hands: DashMap<Uuid, i64>,
    /// table -> next event sequence number within the current hand.
    event_seqs: DashMap<Uuid, i64>,
    notifier: RwLock<Option<Arc<dyn Notifier>>>,
    hooks: RwLock<Option<Arc<dyn TournamentHooks>>>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    /// Weak self-reference so spawned timers can call back in without
    /// keeping the manager alive.
    self_ref: RwLock<std::sync::Weak<TableManager>>,
}

impl TableManager {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<ChipLedger>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(TableManager {
            store,
            ledger,
            tables: DashMap::new(),
            tournament_of: DashMap::new(),
            seat_of: DashMap::new(),
            open_hands: DashMap::new(),
            last_hands: DashMap::new(),
            event_seqs: DashMap::new(),
            notifier: RwLock::new(None),
            hooks: RwLock::new(None),
            events_tx,
            self_ref: RwLock::new(std::sync::Weak::new()),
        });
        *manager.self_ref.write() = Arc::downgrade(&manager);
        (manager, events_rx)
    }

    pub fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        *self.notifier.write() = Some(notifier);
    }

    pub fn set_tournament_hooks(&self, hooks: Arc<dyn TournamentHooks>) {
        *self.hooks.write() = Some(hooks);
    }

    /// Sink handed to every engine; events cross into the async world
    /// through an unbounded channel so the engine lock never blocks.
    pub fn engine_sink(&self) -> EventSink {
        let tx = self.events_tx.clone();
        Arc::new(move |ev| {
            let _ = tx.send(ev);
        })
    }

    pub fn table(&self, table_id: Uuid) -> Option<Arc<Table>> {
        self.tables.get(&table_id).map(|t| t.clone())
    }

    pub fn table_for_user(&self, user_id: i64) -> Option<Arc<Table>> {
        self.seat_of
            .get(&user_id)
            .and_then(|tid| self.table(*tid))
    }

    pub fn tournament_of(&self, table_id: Uuid) -> Option<Uuid> {
        self.tournament_of.get(&table_id).map(|t| *t)
    }

    pub fn note_seated(&self, user_id: i64, table_id: Uuid) {
        self.seat_of.insert(user_id, table_id);
    }

    pub fn clear_seat(&self, user_id: i64) {
        self.seat_of.remove(&user_id);
    }

    pub fn live_table_ids(&self) -> Vec<Uuid> {
        self.tables.iter().map(|e| *e.key()).collect()
    }

    /// Persist the table row and install a fresh engine for it.
    pub async fn create_table(
        &self,
        record: &TableRecord,
        config: TableConfig,
        kind: GameKind,
    ) -> Result<Arc<Table>, AppError> {
        self.store.insert_table(record).await?;
        Ok(self.install_table(record, config, kind))
    }

    /// Install an engine for an already-persisted table row (recovery,
    /// consolidation).
    pub fn install_table(
        &self,
        record: &TableRecord,
        config: TableConfig,
        kind: GameKind,
    ) -> Arc<Table> {
        let table = Arc::new(Table::new(record.id, kind, config, self.engine_sink()));
        if let Some(tournament_id) = record.tournament_id {
            self.tournament_of.insert(record.id, tournament_id);
        }
        self.tables.insert(record.id, table.clone());
        table
    }

    /// Drop a table from the registry without touching its row. Used by
    /// consolidation after the seats have been moved elsewhere.
    pub fn uninstall_table(&self, table_id: Uuid) {
        self.tables.remove(&table_id);
        self.tournament_of.remove(&table_id);
        self.open_hands.remove(&table_id);
        self.last_hands.remove(&table_id);
        self.event_seqs.remove(&table_id);
    }

    /// Try to start the next hand. Refuses while the countdown anchor is
    /// still in the future; reports false (not an error) when the table
    /// simply cannot start yet.
    pub async fn check_and_start_game(&self, table_id: Uuid) -> Result<bool, AppError> {
        let table = self.table(table_id).ok_or(AppError::NotFound("table"))?;
        if let Some(row) = self.store.table_by_id(table_id).await? {
            if row.status == TableStatusColumn::Completed {
                return Err(AppError::Unavailable("table is completed".into()));
            }
            if let Some(ready_at) = row.ready_to_start_at {
                if Utc::now() < ready_at {
                    debug!(%table_id, "start refused, countdown still running");
                    return Ok(false);
                }
            }
        }
        match table.start_game() {
            Ok(()) => {
                if let Err(err) = self
                    .store
                    .update_table_status(
                        table_id,
                        TableStatusColumn::Playing,
                        Some(Utc::now()),
                        None,
                    )
                    .await
                {
                    warn!(%table_id, %err, "failed to persist table start");
                }
                Ok(true)
            }
            Err(
                EngineError::NotEnoughPlayers
                | EngineError::HandInProgress
                | EngineError::TablePaused,
            ) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Route a client action to the table the player is seated at.
    pub fn process_client_action(
        &self,
        user_id: i64,
        action: ActionKind,
        amount: u64,
    ) -> Result<(), AppError> {
        let table = self
            .table_for_user(user_id)
            .ok_or(AppError::NotFound("table"))?;
        table.process_action(user_id, action, amount)?;
        Ok(())
    }

    /// Seat a player at an open cash table: buy-in debit and seat row land
    /// in one transaction, with the engine seat rolled back on failure.
    pub async fn add_player_to_table(
        &self,
        table_id: Uuid,
        user_id: i64,
        seat_index: usize,
        buy_in: i64,
    ) -> Result<(), AppError> {
        let row = self
            .store
            .table_by_id(table_id)
            .await?
            .ok_or(AppError::NotFound("table"))?;
        if row.game_kind != crate::store::GameKindColumn::Cash {
            return Err(AppError::Unavailable(
                "tournament seats are assigned, not bought".into(),
            ));
        }
        if buy_in < row.min_buy_in || buy_in > row.max_buy_in {
            return Err(AppError::InvalidInput("buy-in out of table bounds".into()));
        }
        let table = self.table(table_id).ok_or(AppError::NotFound("table"))?;
        let user = self
            .store
            .user_by_id(user_id)
            .await?
            .ok_or(AppError::NotFound("user"))?;

        table.add_player(user_id, &user.display_name, seat_index, buy_in as u64)?;

        let table_ref = table_id.to_string();
        let mut txn = self.store.begin().await?;
        let result = async {
            self.ledger
                .deduct_chips_with_tx(
                    txn.as_mut(),
                    user_id,
                    buy_in,
                    TransactionKind::CashGameBuyIn,
                    Some(&table_ref),
                    "cash game buy-in",
                )
                .await?;
            txn.insert_seat(&crate::store::SeatRecord {
                table_id,
                user_id,
                seat_index: seat_index as i32,
                stack: buy_in,
                status: SeatStatusColumn::Active,
                joined_at: Utc::now(),
                left_at: None,
            })
            .await?;
            Ok::<(), AppError>(())
        }
        .await;
        match result {
            Ok(()) => {
                txn.commit().await?;
                self.note_seated(user_id, table_id);
                Ok(())
            }
            Err(err) => {
                txn.rollback().await;
                let _ = table.remove_player(user_id);
                Err(err)
            }
        }
    }

    /// A player leaves a cash table: free the seat and return the stack to
    /// their balance. Mid-hand leaves auto-fold and settle at the hand
    /// boundary.
    pub async fn leave_table(&self, user_id: i64) -> Result<(), AppError> {
        let table = self
            .table_for_user(user_id)
            .ok_or(AppError::NotFound("table"))?;
        match table.remove_player(user_id)? {
            RemoveOutcome::Removed { stack } => {
                self.cash_out_seat(table.id(), user_id, stack).await?;
                self.clear_seat(user_id);
                Ok(())
            }
            RemoveOutcome::Deferred => Ok(()),
        }
    }

    async fn cash_out_seat(
        &self,
        table_id: Uuid,
        user_id: i64,
        stack: u64,
    ) -> Result<(), AppError> {
        let mut txn = self.store.begin().await?;
        let table_ref = table_id.to_string();
        let result = async {
            if stack > 0 {
                self.ledger
                    .add_chips_with_tx(
                        txn.as_mut(),
                        user_id,
                        stack as i64,
                        TransactionKind::CashGameCashOut,
                        Some(&table_ref),
                        "cash game cash out",
                    )
                    .await?;
            }
            txn.mark_seat_left(table_id, user_id).await?;
            Ok::<(), AppError>(())
        }
        .await;
        match result {
            Ok(()) => {
                txn.commit().await?;
                Ok(())
            }
            Err(err) => {
                txn.rollback().await;
                Err(err)
            }
        }
    }

    /// Write every live stack back to the seat rows. Called after each
    /// completed hand; recovery can only restore what this persisted.
    pub async fn sync_stacks_to_store(&self, table_id: Uuid) {
        let Some(table) = self.table(table_id) else {
            return;
        };
        for (_, user_id, stack) in table.occupancy() {
            let status = if stack == 0 {
                SeatStatusColumn::Busted
            } else {
                SeatStatusColumn::Active
            };
            if let Err(err) = self
                .store
                .update_seat_stack(table_id, user_id, stack as i64, status)
                .await
            {
                warn!(%table_id, user_id, %err, "failed to sync seat stack");
            }
        }
    }

    /// Cash table is done: return every remaining stack to its owner's
    /// balance inside one transaction and close the table row.
    pub async fn sync_final_stacks_on_game_complete(
        &self,
        table_id: Uuid,
    ) -> Result<(), AppError> {
        let table = self.table(table_id).ok_or(AppError::NotFound("table"))?;
        let occupancy = table.occupancy();
        let table_ref = table_id.to_string();

        let mut txn = self.store.begin().await?;
        let result = async {
            for &(_, user_id, stack) in &occupancy {
                if stack > 0 {
                    self.ledger
                        .add_chips_with_tx(
                            txn.as_mut(),
                            user_id,
                            stack as i64,
                            TransactionKind::CashGameCashOut,
                            Some(&table_ref),
                            "cash game settlement",
                        )
                        .await?;
                }
                txn.mark_seat_left(table_id, user_id).await?;
            }
            txn.update_table_status(table_id, TableStatusColumn::Completed, Some(Utc::now()))
                .await?;
            Ok::<(), AppError>(())
        }
        .await;
        match result {
            Ok(()) => txn.commit().await?,
            Err(err) => {
                txn.rollback().await;
                return Err(err);
            }
        }

        for (_, user_id, _) in occupancy {
            self.clear_seat(user_id);
        }
        self.uninstall_table(table_id);
        Ok(())
    }

    /// Send one client a message if a notifier is wired and the client is
    /// connected.
    pub fn notify_user(&self, user_id: i64, msg: ServerMessage) {
        if let Some(notifier) = self.notifier.read().clone() {
            notifier.send_to_user(user_id, msg);
        }
    }

    pub async fn broadcast_table_state(&self, table_id: Uuid, as_update: bool) {
        let Some(table) = self.table(table_id) else {
            return;
        };
        let Some(notifier) = self.notifier.read().clone() else {
            return;
        };
        let start_deadline = self.start_deadline_of(table_id).await;
        for user_id in notifier.subscribers(table_id) {
            let payload =
                TableStatePayload::from_snapshot(table.state_for(Some(user_id)), start_deadline);
            let msg = if as_update {
                ServerMessage::GameUpdate(payload)
            } else {
                ServerMessage::TableState(payload)
            };
            notifier.send_to_user(user_id, msg);
        }
    }

    pub async fn send_table_state_to(&self, table_id: Uuid, user_id: i64) {
        let Some(table) = self.table(table_id) else {
            return;
        };
        let Some(notifier) = self.notifier.read().clone() else {
            return;
        };
        let start_deadline = self.start_deadline_of(table_id).await;
        let payload =
            TableStatePayload::from_snapshot(table.state_for(Some(user_id)), start_deadline);
        notifier.send_to_user(user_id, ServerMessage::TableState(payload));
    }

    async fn start_deadline_of(&self, table_id: Uuid) -> Option<chrono::DateTime<Utc>> {
        match self.store.table_by_id(table_id).await {
            Ok(Some(row)) => row.ready_to_start_at.filter(|at| *at > Utc::now()),
            _ => None,
        }
    }

    /// Drain the engine event channel. Events arrive in per-table order
    /// and are processed one at a time.
    pub async fn run_events(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<EngineEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle_event(event).await;
        }
    }

    async fn handle_event(&self, ev: EngineEvent) {
        let table_id = ev.table_id;
        match &ev.event {
            GameEvent::HandStart {
                dealer_position,
                small_blind_position,
                big_blind_position,
            } => {
                match self
                    .store
                    .insert_hand(
                        table_id,
                        ev.hand_number as i64,
                        *dealer_position as i32,
                        *small_blind_position as i32,
                        *big_blind_position as i32,
                    )
                    .await
                {
                    Ok(hand_id) => {
                        self.open_hands.insert(table_id, hand_id);
                        self.event_seqs.insert(table_id, 0);
                    }
                    Err(err) => warn!(%table_id, %err, "failed to persist hand start"),
                }
                self.persist_event(&ev).await;
            }
            GameEvent::CardsDealt { .. } => {
                // Audit-trail only; hole cards reach their owner through
                // the per-viewer snapshot.
                self.persist_event(&ev).await;
            }
            GameEvent::BlindsPosted { .. } | GameEvent::RoundAdvanced { .. } => {
                self.persist_event(&ev).await;
                self.broadcast_table_state(table_id, true).await;
            }
            GameEvent::ActionRequired {
                user_id,
                deadline,
                action_sequence,
                ..
            } => {
                self.persist_event(&ev).await;
                self.schedule_timeout(table_id, *user_id, ev.hand_number, *action_sequence, *deadline);
                self.broadcast_table_state(table_id, true).await;
            }
            GameEvent::PlayerAction {
                user_id,
                action,
                amount,
                betting_round,
                ..
            } => {
                self.persist_event(&ev).await;
                if let Some(hand_id) = self.open_hands.get(&table_id).map(|h| *h) {
                    if let Err(err) = self
                        .store
                        .insert_hand_action(
                            hand_id,
                            *user_id,
                            action.as_str(),
                            *amount as i64,
                            betting_round.as_str(),
                        )
                        .await
                    {
                        warn!(%table_id, %err, "failed to persist hand action");
                    }
                }
                self.broadcast_table_state(table_id, true).await;
            }
            GameEvent::HandComplete {
                winners,
                community,
                pot,
            } => {
                self.persist_event(&ev).await;
                if let Some((_, hand_id)) = self.open_hands.remove(&table_id) {
                    self.last_hands.insert(table_id, hand_id);
                    let community_json =
                        serde_json::to_value(community).unwrap_or_default();
                    let winners_json = serde_json::to_value(winners).unwrap_or_default();
                    if let Err(err) = self
                        .store
                        .complete_hand(hand_id, community_json, *pot as i64, winners_json)
                        .await
                    {
                        warn!(%table_id, %err, "failed to persist hand completion");
                    }
                }
                self.sync_stacks_to_store(table_id).await;
                self.process_pending_removals(table_id).await;

                if let Some(notifier) = self.notifier.read().clone() {
                    for user_id in notifier.subscribers(table_id) {
                        notifier.send_to_user(
                            user_id,
                            ServerMessage::HandComplete {
                                table_id,
                                hand_number: ev.hand_number,
                                winners: winners.clone(),
                                community_cards: community.clone(),
                                pot: *pot,
                            },
                        );
                    }
                }
                self.broadcast_table_state(table_id, true).await;

                // Between hands the row is waiting; a table whose game
                // just completed keeps its completed status instead.
                let back_to_waiting = self
                    .table(table_id)
                    .is_some_and(|t| t.status() == holdem_engine::TableStatus::Waiting);
                if back_to_waiting {
                    if let Err(err) = self
                        .store
                        .update_table_status(table_id, TableStatusColumn::Waiting, None, None)
                        .await
                    {
                        warn!(%table_id, %err, "failed to persist table status");
                    }
                }

                // Clone the hook handle out before awaiting so the registry
                // guard is not held across the await.
                let hooks = self.hooks.read().clone();
                if let Some(tournament_id) = self.tournament_of(table_id) {
                    if let Some(hooks) = hooks {
                        hooks.on_hand_complete(tournament_id, table_id).await;
                    }
                } else {
                    self.schedule_next_hand(table_id);
                }
            }
            GameEvent::GameComplete {
                winner,
                final_chips,
                total_players,
            } => {
                self.persist_event(&ev).await;
                if let Some(notifier) = self.notifier.read().clone() {
                    for user_id in notifier.subscribers(table_id) {
                        notifier.send_to_user(
                            user_id,
                            ServerMessage::GameComplete {
                                table_id,
                                winner: *winner,
                                final_chips: *final_chips,
                                total_players: *total_players,
                            },
                        );
                    }
                }
                // The registry entry may already be gone if the controller
                // tore the table down in the hand-complete hook; fall back
                // to the row so tournament chips never leak into balances.
                let tournament_id = match self.tournament_of(table_id) {
                    Some(id) => Some(id),
                    None => self
                        .store
                        .table_by_id(table_id)
                        .await
                        .ok()
                        .flatten()
                        .and_then(|row| row.tournament_id),
                };
                let hooks = self.hooks.read().clone();
                if let Some(tournament_id) = tournament_id {
                    if let Some(hooks) = hooks {
                        hooks.on_game_complete(tournament_id, table_id).await;
                    }
                } else if let Err(err) =
                    self.sync_final_stacks_on_game_complete(table_id).await
                {
                    warn!(%table_id, %err, "failed to settle completed cash game");
                }
                info!(%table_id, winner, "game complete");
            }
        }
    }

    /// Append the event to the durable log with the hand's next sequence
    /// number. Best-effort: a failure here is logged and dropped.
    async fn persist_event(&self, ev: &EngineEvent) {
        let table_id = ev.table_id;
        let hand_id = self
            .open_hands
            .get(&table_id)
            .map(|h| *h)
            .or_else(|| self.last_hands.get(&table_id).map(|h| *h));
        let Some(hand_id) = hand_id else {
            return;
        };

        let sequence_number = {
            let mut entry = self.event_seqs.entry(table_id).or_insert(0);
            let seq = *entry;
            *entry += 1;
            seq
        };

        let (user_id, betting_round, action, amount) = match &ev.event {
            GameEvent::PlayerAction {
                user_id,
                action,
                amount,
                betting_round,
                ..
            } => (
                Some(*user_id),
                Some(betting_round.as_str().to_string()),
                Some(action.as_str().to_string()),
                Some(*amount as i64),
            ),
            other => (other.user_id(), None, None, None),
        };

        let record = NewGameEvent {
            hand_id,
            table_id,
            event_type: ev.event.kind().to_string(),
            user_id,
            betting_round,
            action,
            amount,
            metadata: serde_json::to_value(&ev.event).unwrap_or_default(),
            sequence_number,
        };
        if let Err(err) = self.store.append_event(&record).await {
            warn!(%table_id, %err, "failed to append game event");
        }
    }

    /// Arm a one-shot timer for the pending decision. The engine guards
    /// with the (hand, sequence) identity, so a timer that lost the race
    /// with the player is a no-op.
    fn schedule_timeout(
        &self,
        table_id: Uuid,
        user_id: i64,
        hand_number: u64,
        action_seq: u64,
        deadline: chrono::DateTime<Utc>,
    ) {
        let Some(table) = self.table(table_id) else {
            return;
        };
        let wait = (deadline - Utc::now()).to_std().unwrap_or_default();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            match table.handle_timeout(user_id, hand_number, action_seq) {
                Ok(()) => info!(%table_id, user_id, "action timed out"),
                Err(EngineError::StaleTimeout) => {}
                Err(err) => warn!(%table_id, user_id, %err, "timeout handling failed"),
            }
        });
    }

    /// The deferred start goes through the same entry point the
    /// matchmaking countdown uses.
    fn schedule_next_hand(&self, table_id: Uuid) {
        let Some(table) = self.table(table_id) else {
            return;
        };
        if table.status() != holdem_engine::TableStatus::Waiting {
            return;
        }
        let this = self.self_ref.read().clone();
        tokio::spawn(async move {
            tokio::time::sleep(NEXT_HAND_DELAY).await;
            if let Some(manager) = this.upgrade() {
                if let Err(err) = manager.check_and_start_game(table_id).await {
                    warn!(%table_id, %err, "failed to start next hand");
                }
            }
        });
    }

    async fn process_pending_removals(&self, table_id: Uuid) {
        let Some(table) = self.table(table_id) else {
            return;
        };
        if self.tournament_of(table_id).is_some() {
            // Tournament seats are owned by the controller; chips never
            // leave the tournament through a seat removal.
            return;
        }
        for user_id in table.pending_removals() {
            match table.remove_player(user_id) {
                Ok(RemoveOutcome::Removed { stack }) => {
                    if let Err(err) = self.cash_out_seat(table_id, user_id, stack).await {
                        warn!(%table_id, user_id, %err, "failed to cash out leaver");
                    }
                    self.clear_seat(user_id);
                }
                Ok(RemoveOutcome::Deferred) => {}
                Err(err) => warn!(%table_id, user_id, %err, "failed to remove leaver"),
            }
        }
    }
}

