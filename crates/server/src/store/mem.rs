//! In-memory store backend.
//!
//! Mirrors the relational constraints the Postgres backend relies on
//! (unique usernames, unique tournament codes, one event per hand sequence
//! number). Transactions clone the whole state and swap it back on commit,
//! which gives true all-or-nothing semantics for the sequential access
//! patterns the tests use.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::records::*;
use super::{NewGameEvent, Store, StoreError, StoreTxn};

#[derive(Default, Clone)]
struct MemState {
    next_user_id: i64,
    users: HashMap<i64, UserRecord>,
    next_chip_tx_id: i64,
    chip_transactions: Vec<ChipTransactionRecord>,
    tables: HashMap<Uuid, TableRecord>,
    seats: Vec<SeatRecord>,
    next_hand_id: i64,
    hands: HashMap<i64, HandRecord>,
    next_action_id: i64,
    hand_actions: Vec<HandActionRecord>,
    next_event_id: i64,
    events: Vec<GameEventRecord>,
    tournaments: HashMap<Uuid, TournamentRecord>,
    tournament_players: Vec<TournamentPlayerRecord>,
    next_entry_id: i64,
    queue_entries: Vec<MatchmakingEntryRecord>,
}

#[derive(Default)]
pub struct MemStore {
    state: Arc<Mutex<MemState>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemTxn {
    base: Arc<Mutex<MemState>>,
    working: MemState,
}

impl MemState {
    fn active_seat_mut(&mut self, table_id: Uuid, user_id: i64) -> Option<&mut SeatRecord> {
        self.seats
            .iter_mut()
            .find(|s| s.table_id == table_id && s.user_id == user_id && s.left_at.is_none())
    }
}

#[async_trait]
impl Store for MemStore {
    async fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError> {
        let working = self.state.lock().clone();
        Ok(Box::new(MemTxn {
            base: self.state.clone(),
            working,
        }))
    }

    async fn create_user(
        &self,
        username: &str,
        display_name: &str,
        chips: i64,
    ) -> Result<UserRecord, StoreError> {
        let mut s = self.state.lock();
        if s.users.values().any(|u| u.username == username) {
            return Err(StoreError::Conflict(format!(
                "username {username} already taken"
            )));
        }
        s.next_user_id += 1;
        let user = UserRecord {
            id: s.next_user_id,
            username: username.to_string(),
            display_name: display_name.to_string(),
            chips,
            suspended: false,
            created_at: Utc::now(),
        };
        s.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.state.lock().users.get(&user_id).cloned())
    }

    async fn user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn chip_transactions_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<ChipTransactionRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .chip_transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_table(&self, table: &TableRecord) -> Result<(), StoreError> {
        self.state.lock().tables.insert(table.id, table.clone());
        Ok(())
    }

    async fn table_by_id(&self, table_id: Uuid) -> Result<Option<TableRecord>, StoreError> {
        Ok(self.state.lock().tables.get(&table_id).cloned())
    }

    async fn tables_with_status(
        &self,
        statuses: &[TableStatusColumn],
    ) -> Result<Vec<TableRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .tables
            .values()
            .filter(|t| statuses.contains(&t.status))
            .cloned()
            .collect())
    }

    async fn tables_for_tournament(
        &self,
        tournament_id: Uuid,
    ) -> Result<Vec<TableRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .tables
            .values()
            .filter(|t| t.tournament_id == Some(tournament_id))
            .cloned()
            .collect())
    }

    async fn update_table_status(
        &self,
        table_id: Uuid,
        status: TableStatusColumn,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut s = self.state.lock();
        let table = s
            .tables
            .get_mut(&table_id)
            .ok_or(StoreError::NotFound("table"))?;
        table.status = status;
        if started_at.is_some() {
            table.started_at = started_at;
        }
        if completed_at.is_some() {
            table.completed_at = completed_at;
        }
        Ok(())
    }

    async fn set_table_blinds(
        &self,
        table_id: Uuid,
        small_blind: i64,
        big_blind: i64,
    ) -> Result<(), StoreError> {
        let mut s = self.state.lock();
        let table = s
            .tables
            .get_mut(&table_id)
            .ok_or(StoreError::NotFound("table"))?;
        table.small_blind = small_blind;
        table.big_blind = big_blind;
        Ok(())
    }

    async fn active_seats(&self, table_id: Uuid) -> Result<Vec<SeatRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .seats
            .iter()
            .filter(|s| s.table_id == table_id && s.left_at.is_none())
            .cloned()
            .collect())
    }

    async fn update_seat_stack(
        &self,
        table_id: Uuid,
        user_id: i64,
        stack: i64,
        status: SeatStatusColumn,
    ) -> Result<(), StoreError> {
        let mut s = self.state.lock();
        let seat = s
            .active_seat_mut(table_id, user_id)
            .ok_or(StoreError::NotFound("seat"))?;
        seat.stack = stack;
        seat.status = status;
        Ok(())
    }

    async fn insert_hand(
        &self,
        table_id: Uuid,
        hand_number: i64,
        dealer_position: i32,
        small_blind_position: i32,
        big_blind_position: i32,
    ) -> Result<i64, StoreError> {
        let mut s = self.state.lock();
        if s.hands
            .values()
            .any(|h| h.table_id == table_id && h.completed_at.is_none())
        {
            return Err(StoreError::Conflict(
                "table already has an open hand".to_string(),
            ));
        }
        s.next_hand_id += 1;
        let id = s.next_hand_id;
        s.hands.insert(
            id,
            HandRecord {
                id,
                table_id,
                hand_number,
                dealer_position,
                small_blind_position,
                big_blind_position,
                community_cards: serde_json::Value::Array(vec![]),
                total_pot: 0,
                winners: serde_json::Value::Array(vec![]),
                started_at: Utc::now(),
                completed_at: None,
            },
        );
        Ok(id)
    }

    async fn complete_hand(
        &self,
        hand_id: i64,
        community_cards: serde_json::Value,
        total_pot: i64,
        winners: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut s = self.state.lock();
        let hand = s
            .hands
            .get_mut(&hand_id)
            .ok_or(StoreError::NotFound("hand"))?;
        hand.community_cards = community_cards;
        hand.total_pot = total_pot;
        hand.winners = winners;
        hand.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn cancel_incomplete_hands(&self) -> Result<u64, StoreError> {
        let mut s = self.state.lock();
        let open: Vec<i64> = s
            .hands
            .values()
            .filter(|h| h.completed_at.is_none())
            .map(|h| h.id)
            .collect();
        for id in &open {
            s.hands.remove(id);
            s.events.retain(|e| e.hand_id != *id);
            s.hand_actions.retain(|a| a.hand_id != *id);
        }
        Ok(open.len() as u64)
    }

    async fn insert_hand_action(
        &self,
        hand_id: i64,
        user_id: i64,
        action: &str,
        amount: i64,
        betting_round: &str,
    ) -> Result<(), StoreError> {
        let mut s = self.state.lock();
        s.next_action_id += 1;
        let id = s.next_action_id;
        s.hand_actions.push(HandActionRecord {
            id,
            hand_id,
            user_id,
            action: action.to_string(),
            amount,
            betting_round: betting_round.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn append_event(&self, event: &NewGameEvent) -> Result<(), StoreError> {
        let mut s = self.state.lock();
        if s.events
            .iter()
            .any(|e| e.hand_id == event.hand_id && e.sequence_number == event.sequence_number)
        {
            return Err(StoreError::Conflict(format!(
                "duplicate event sequence {} for hand {}",
                event.sequence_number, event.hand_id
            )));
        }
        s.next_event_id += 1;
        let id = s.next_event_id;
        s.events.push(GameEventRecord {
            id,
            hand_id: event.hand_id,
            table_id: event.table_id,
            event_type: event.event_type.clone(),
            user_id: event.user_id,
            betting_round: event.betting_round.clone(),
            action: event.action.clone(),
            amount: event.amount,
            metadata: event.metadata.clone(),
            sequence_number: event.sequence_number,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn events_for_hand(
        &self,
        hand_id: i64,
    ) -> Result<Vec<GameEventRecord>, StoreError> {
        let mut events: Vec<GameEventRecord> = self
            .state
            .lock()
            .events
            .iter()
            .filter(|e| e.hand_id == hand_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.sequence_number);
        Ok(events)
    }

    async fn insert_tournament(&self, t: &TournamentRecord) -> Result<(), StoreError> {
        let mut s = self.state.lock();
        if s.tournaments
            .values()
            .any(|x| x.tournament_code == t.tournament_code)
        {
            return Err(StoreError::Conflict(format!(
                "tournament code {} already exists",
                t.tournament_code
            )));
        }
        s.tournaments.insert(t.id, t.clone());
        Ok(())
    }

    async fn tournament_by_id(
        &self,
        tournament_id: Uuid,
    ) -> Result<Option<TournamentRecord>, StoreError> {
        Ok(self.state.lock().tournaments.get(&tournament_id).cloned())
    }

    async fn tournament_by_code(
        &self,
        code: &str,
    ) -> Result<Option<TournamentRecord>, StoreError> {
        let code = code.to_ascii_uppercase();
        Ok(self
            .state
            .lock()
            .tournaments
            .values()
            .find(|t| t.tournament_code == code)
            .cloned())
    }

    async fn tournaments_with_status(
        &self,
        status: TournamentStatus,
    ) -> Result<Vec<TournamentRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .tournaments
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn update_tournament(&self, t: &TournamentRecord) -> Result<(), StoreError> {
        let mut s = self.state.lock();
        if !s.tournaments.contains_key(&t.id) {
            return Err(StoreError::NotFound("tournament"));
        }
        s.tournaments.insert(t.id, t.clone());
        Ok(())
    }

    async fn insert_tournament_player(
        &self,
        tournament_id: Uuid,
        user_id: i64,
    ) -> Result<(), StoreError> {
        let mut s = self.state.lock();
        if s.tournament_players
            .iter()
            .any(|p| p.tournament_id == tournament_id && p.user_id == user_id)
        {
            return Err(StoreError::Conflict("already registered".to_string()));
        }
        s.tournament_players.push(TournamentPlayerRecord {
            tournament_id,
            user_id,
            final_position: None,
            chips_at_elimination: None,
            prize_amount: 0,
            registered_at: Utc::now(),
            eliminated_at: None,
        });
        Ok(())
    }

    async fn remove_tournament_player(
        &self,
        tournament_id: Uuid,
        user_id: i64,
    ) -> Result<(), StoreError> {
        self.state
            .lock()
            .tournament_players
            .retain(|p| !(p.tournament_id == tournament_id && p.user_id == user_id));
        Ok(())
    }

    async fn tournament_players(
        &self,
        tournament_id: Uuid,
    ) -> Result<Vec<TournamentPlayerRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .tournament_players
            .iter()
            .filter(|p| p.tournament_id == tournament_id)
            .cloned()
            .collect())
    }

    async fn set_player_elimination(
        &self,
        tournament_id: Uuid,
        user_id: i64,
        final_position: i32,
        chips_at_elimination: i64,
    ) -> Result<(), StoreError> {
        let mut s = self.state.lock();
        let player = s
            .tournament_players
            .iter_mut()
            .find(|p| p.tournament_id == tournament_id && p.user_id == user_id)
            .ok_or(StoreError::NotFound("tournament player"))?;
        player.final_position = Some(final_position);
        player.chips_at_elimination = Some(chips_at_elimination);
        player.eliminated_at = Some(Utc::now());
        Ok(())
    }

    async fn insert_queue_entry(
        &self,
        user_id: i64,
        game_kind: GameKindColumn,
        queue_bucket: &str,
        min_buy_in: i64,
        max_buy_in: i64,
    ) -> Result<MatchmakingEntryRecord, StoreError> {
        let mut s = self.state.lock();
        s.next_entry_id += 1;
        let entry = MatchmakingEntryRecord {
            id: s.next_entry_id,
            user_id,
            game_kind,
            queue_bucket: queue_bucket.to_string(),
            min_buy_in,
            max_buy_in,
            status: QueueStatus::Waiting,
            created_at: Utc::now(),
            matched_at: None,
        };
        s.queue_entries.push(entry.clone());
        Ok(entry)
    }

    async fn waiting_entry_for_user(
        &self,
        user_id: i64,
    ) -> Result<Option<MatchmakingEntryRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .queue_entries
            .iter()
            .find(|e| e.user_id == user_id && e.status == QueueStatus::Waiting)
            .cloned())
    }

    async fn cancel_queue_entry(&self, entry_id: i64) -> Result<(), StoreError> {
        let mut s = self.state.lock();
        let entry = s
            .queue_entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or(StoreError::NotFound("matchmaking entry"))?;
        entry.status = QueueStatus::Cancelled;
        Ok(())
    }
}

#[async_trait]
impl StoreTxn for MemTxn {
    async fn user_for_update(&mut self, user_id: i64) -> Result<UserRecord, StoreError> {
        self.working
            .users
            .get(&user_id)
            .cloned()
            .ok_or(StoreError::NotFound("user"))
    }

    async fn set_user_chips(&mut self, user_id: i64, chips: i64) -> Result<(), StoreError> {
        let user = self
            .working
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound("user"))?;
        user.chips = chips;
        Ok(())
    }

    async fn insert_chip_transaction(
        &mut self,
        user_id: i64,
        amount: i64,
        balance_before: i64,
        balance_after: i64,
        kind: TransactionKind,
        reference_id: Option<&str>,
        description: &str,
    ) -> Result<(), StoreError> {
        self.working.next_chip_tx_id += 1;
        let id = self.working.next_chip_tx_id;
        self.working.chip_transactions.push(ChipTransactionRecord {
            id,
            user_id,
            amount,
            balance_before,
            balance_after,
            kind,
            reference_id: reference_id.map(str::to_string),
            description: description.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn insert_seat(&mut self, seat: &SeatRecord) -> Result<(), StoreError> {
        let occupied = self.working.seats.iter().any(|s| {
            s.table_id == seat.table_id
                && s.left_at.is_none()
                && (s.user_id == seat.user_id || s.seat_index == seat.seat_index)
        });
        if occupied {
            return Err(StoreError::Conflict("seat already taken".to_string()));
        }
        self.working.seats.push(seat.clone());
        Ok(())
    }

    async fn update_seat_stack(
        &mut self,
        table_id: Uuid,
        user_id: i64,
        stack: i64,
        status: SeatStatusColumn,
    ) -> Result<(), StoreError> {
        let seat = self
            .working
            .active_seat_mut(table_id, user_id)
            .ok_or(StoreError::NotFound("seat"))?;
        seat.stack = stack;
        seat.status = status;
        Ok(())
    }

    async fn mark_seat_left(
        &mut self,
        table_id: Uuid,
        user_id: i64,
    ) -> Result<(), StoreError> {
        let seat = self
            .working
            .active_seat_mut(table_id, user_id)
            .ok_or(StoreError::NotFound("seat"))?;
        seat.left_at = Some(Utc::now());
        Ok(())
    }

    async fn update_table_status(
        &mut self,
        table_id: Uuid,
        status: TableStatusColumn,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let table = self
            .working
            .tables
            .get_mut(&table_id)
            .ok_or(StoreError::NotFound("table"))?;
        table.status = status;
        if completed_at.is_some() {
            table.completed_at = completed_at;
        }
        Ok(())
    }

    async fn mark_entry_matched(&mut self, entry_id: i64) -> Result<(), StoreError> {
        let entry = self
            .working
            .queue_entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or(StoreError::NotFound("matchmaking entry"))?;
        entry.status = QueueStatus::Matched;
        entry.matched_at = Some(Utc::now());
        Ok(())
    }

    async fn insert_tournament_player(
        &mut self,
        tournament_id: Uuid,
        user_id: i64,
    ) -> Result<(), StoreError> {
        if self
            .working
            .tournament_players
            .iter()
            .any(|p| p.tournament_id == tournament_id && p.user_id == user_id)
        {
            return Err(StoreError::Conflict("already registered".to_string()));
        }
        self.working.tournament_players.push(TournamentPlayerRecord {
            tournament_id,
            user_id,
            final_position: None,
            chips_at_elimination: None,
            prize_amount: 0,
            registered_at: Utc::now(),
            eliminated_at: None,
        });
        Ok(())
    }

    async fn remove_tournament_player(
        &mut self,
        tournament_id: Uuid,
        user_id: i64,
    ) -> Result<(), StoreError> {
        self.working
            .tournament_players
            .retain(|p| !(p.tournament_id == tournament_id && p.user_id == user_id));
        Ok(())
    }

    async fn set_player_prize(
        &mut self,
        tournament_id: Uuid,
        user_id: i64,
        prize_amount: i64,
    ) -> Result<(), StoreError> {
        let player = self
            .working
            .tournament_players
            .iter_mut()
            .find(|p| p.tournament_id == tournament_id && p.user_id == user_id)
            .ok_or(StoreError::NotFound("tournament player"))?;
        player.prize_amount = prize_amount;
        Ok(())
    }

    async fn set_prizes_distributed(
        &mut self,
        tournament_id: Uuid,
    ) -> Result<(), StoreError> {
        let t = self
            .working
            .tournaments
            .get_mut(&tournament_id)
            .ok_or(StoreError::NotFound("tournament"))?;
        t.prizes_distributed = true;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        *self.base.lock() = self.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) {}
}
