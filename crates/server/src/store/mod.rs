//! Storage seam.
//!
//! Services depend on the [`Store`] trait only. Two backends implement it:
//! [`PgStore`](pg::PgStore) over Postgres for production and
//! [`MemStore`](mem::MemStore) for tests and recovery assertions. Multi-row
//! mutations that must be atomic run on a [`StoreTxn`] obtained from
//! `begin`, committed or rolled back as a unit.

pub mod mem;
pub mod pg;
pub mod records;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub use records::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// New event-log row; the id and timestamp are assigned by the store.
#[derive(Clone, Debug)]
pub struct NewGameEvent {
    pub hand_id: i64,
    pub table_id: Uuid,
    pub event_type: String,
    pub user_id: Option<i64>,
    pub betting_round: Option<String>,
    pub action: Option<String>,
    pub amount: Option<i64>,
    pub metadata: serde_json::Value,
    pub sequence_number: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError>;

    // -- users ----------------------------------------------------------

    async fn create_user(
        &self,
        username: &str,
        display_name: &str,
        chips: i64,
    ) -> Result<UserRecord, StoreError>;

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>, StoreError>;

    async fn user_by_username(&self, username: &str)
        -> Result<Option<UserRecord>, StoreError>;

    async fn chip_transactions_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<ChipTransactionRecord>, StoreError>;

    // -- tables and seats ----------------------------------------------

    async fn insert_table(&self, table: &TableRecord) -> Result<(), StoreError>;

    async fn table_by_id(&self, table_id: Uuid) -> Result<Option<TableRecord>, StoreError>;

    async fn tables_with_status(
        &self,
        statuses: &[TableStatusColumn],
    ) -> Result<Vec<TableRecord>, StoreError>;

    async fn tables_for_tournament(
        &self,
        tournament_id: Uuid,
    ) -> Result<Vec<TableRecord>, StoreError>;

    async fn update_table_status(
        &self,
        table_id: Uuid,
        status: TableStatusColumn,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    async fn set_table_blinds(
        &self,
        table_id: Uuid,
        small_blind: i64,
        big_blind: i64,
    ) -> Result<(), StoreError>;

    async fn active_seats(&self, table_id: Uuid) -> Result<Vec<SeatRecord>, StoreError>;

    async fn update_seat_stack(
        &self,
        table_id: Uuid,
        user_id: i64,
        stack: i64,
        status: SeatStatusColumn,
    ) -> Result<(), StoreError>;

    // -- hands and events ----------------------------------------------

    async fn insert_hand(
        &self,
        table_id: Uuid,
        hand_number: i64,
        dealer_position: i32,
        small_blind_position: i32,
        big_blind_position: i32,
    ) -> Result<i64, StoreError>;

    async fn complete_hand(
        &self,
        hand_id: i64,
        community_cards: serde_json::Value,
        total_pot: i64,
        winners: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Recovery: drop mid-hand rows, which are never authoritative.
    async fn cancel_incomplete_hands(&self) -> Result<u64, StoreError>;

    async fn insert_hand_action(
        &self,
        hand_id: i64,
        user_id: i64,
        action: &str,
        amount: i64,
        betting_round: &str,
    ) -> Result<(), StoreError>;

    async fn append_event(&self, event: &NewGameEvent) -> Result<(), StoreError>;

    async fn events_for_hand(&self, hand_id: i64)
        -> Result<Vec<GameEventRecord>, StoreError>;

    // -- tournaments ----------------------------------------------------

    async fn insert_tournament(&self, t: &TournamentRecord) -> Result<(), StoreError>;

    async fn tournament_by_id(
        &self,
        tournament_id: Uuid,
    ) -> Result<Option<TournamentRecord>, StoreError>;

    async fn tournament_by_code(
        &self,
        code: &str,
    ) -> Result<Option<TournamentRecord>, StoreError>;

    async fn tournaments_with_status(
        &self,
        status: TournamentStatus,
    ) -> Result<Vec<TournamentRecord>, StoreError>;

    /// Whole-row update; the controller owns tournament state stamps.
    async fn update_tournament(&self, t: &TournamentRecord) -> Result<(), StoreError>;

    async fn insert_tournament_player(
        &self,
        tournament_id: Uuid,
        user_id: i64,
    ) -> Result<(), StoreError>;

    async fn remove_tournament_player(
        &self,
        tournament_id: Uuid,
        user_id: i64,
    ) -> Result<(), StoreError>;

    async fn tournament_players(
        &self,
        tournament_id: Uuid,
    ) -> Result<Vec<TournamentPlayerRecord>, StoreError>;

    async fn set_player_elimination(
        &self,
        tournament_id: Uuid,
        user_id: i64,
        final_position: i32,
        chips_at_elimination: i64,
    ) -> Result<(), StoreError>;

    // -- matchmaking ----------------------------------------------------

    async fn insert_queue_entry(
        &self,
        user_id: i64,
        game_kind: GameKindColumn,
        queue_bucket: &str,
        min_buy_in: i64,
        max_buy_in: i64,
    ) -> Result<MatchmakingEntryRecord, StoreError>;

    async fn waiting_entry_for_user(
        &self,
        user_id: i64,
    ) -> Result<Option<MatchmakingEntryRecord>, StoreError>;

    async fn cancel_queue_entry(&self, entry_id: i64) -> Result<(), StoreError>;
}

/// Mutations bound to one transaction. Everything applies atomically on
/// `commit` and vanishes on `rollback`.
#[async_trait]
pub trait StoreTxn: Send {
    /// Load a user under a row write lock.
    async fn user_for_update(&mut self, user_id: i64) -> Result<UserRecord, StoreError>;

    async fn set_user_chips(&mut self, user_id: i64, chips: i64) -> Result<(), StoreError>;

    async fn insert_chip_transaction(
        &mut self,
        user_id: i64,
        amount: i64,
        balance_before: i64,
        balance_after: i64,
        kind: TransactionKind,
        reference_id: Option<&str>,
        description: &str,
    ) -> Result<(), StoreError>;

    async fn insert_seat(&mut self, seat: &SeatRecord) -> Result<(), StoreError>;

    async fn update_seat_stack(
        &mut self,
        table_id: Uuid,
        user_id: i64,
        stack: i64,
        status: SeatStatusColumn,
    ) -> Result<(), StoreError>;

    async fn mark_seat_left(&mut self, table_id: Uuid, user_id: i64)
        -> Result<(), StoreError>;

    async fn update_table_status(
        &mut self,
        table_id: Uuid,
        status: TableStatusColumn,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    async fn mark_entry_matched(&mut self, entry_id: i64) -> Result<(), StoreError>;

    async fn insert_tournament_player(
        &mut self,
        tournament_id: Uuid,
        user_id: i64,
    ) -> Result<(), StoreError>;

    async fn remove_tournament_player(
        &mut self,
        tournament_id: Uuid,
        user_id: i64,
    ) -> Result<(), StoreError>;

    async fn set_player_prize(
        &mut self,
        tournament_id: Uuid,
        user_id: i64,
        prize_amount: i64,
    ) -> Result<(), StoreError>;

    async fn set_prizes_distributed(
        &mut self,
        tournament_id: Uuid,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>);
}
