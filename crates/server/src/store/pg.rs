//! Postgres store backend over sqlx.
//!
//! Row locking uses `SELECT ... FOR UPDATE`; callers that lock several
//! users (transfers) must do so in ascending user id order to keep the
//! lock graph acyclic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::records::*;
use super::{NewGameEvent, Store, StoreError, StoreTxn};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(PgStore { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

struct PgTxn {
    txn: Transaction<'static, Postgres>,
}

fn decode(msg: String) -> StoreError {
    StoreError::Database(sqlx::Error::Decode(msg.into()))
}

fn map_user(row: &PgRow) -> Result<UserRecord, StoreError> {
    Ok(UserRecord {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        display_name: row.try_get("display_name")?,
        chips: row.try_get("chips")?,
        suspended: row.try_get("suspended")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_chip_transaction(row: &PgRow) -> Result<ChipTransactionRecord, StoreError> {
    let kind: String = row.try_get("kind")?;
    Ok(ChipTransactionRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        balance_before: row.try_get("balance_before")?,
        balance_after: row.try_get("balance_after")?,
        kind: TransactionKind::parse(&kind)
            .ok_or_else(|| decode(format!("unknown transaction kind {kind}")))?,
        reference_id: row.try_get("reference_id")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_table(row: &PgRow) -> Result<TableRecord, StoreError> {
    let kind: String = row.try_get("game_kind")?;
    let status: String = row.try_get("status")?;
    Ok(TableRecord {
        id: row.try_get("id")?,
        game_kind: GameKindColumn::parse(&kind)
            .ok_or_else(|| decode(format!("unknown game kind {kind}")))?,
        status: TableStatusColumn::parse(&status)
            .ok_or_else(|| decode(format!("unknown table status {status}")))?,
        small_blind: row.try_get("small_blind")?,
        big_blind: row.try_get("big_blind")?,
        max_seats: row.try_get("max_seats")?,
        min_buy_in: row.try_get("min_buy_in")?,
        max_buy_in: row.try_get("max_buy_in")?,
        tournament_id: row.try_get("tournament_id")?,
        table_number: row.try_get("table_number")?,
        ready_to_start_at: row.try_get("ready_to_start_at")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn map_seat(row: &PgRow) -> Result<SeatRecord, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(SeatRecord {
        table_id: row.try_get("table_id")?,
        user_id: row.try_get("user_id")?,
        seat_index: row.try_get("seat_index")?,
        stack: row.try_get("stack")?,
        status: SeatStatusColumn::parse(&status)
            .ok_or_else(|| decode(format!("unknown seat status {status}")))?,
        joined_at: row.try_get("joined_at")?,
        left_at: row.try_get("left_at")?,
    })
}

fn map_event(row: &PgRow) -> Result<GameEventRecord, StoreError> {
    Ok(GameEventRecord {
        id: row.try_get("id")?,
        hand_id: row.try_get("hand_id")?,
        table_id: row.try_get("table_id")?,
        event_type: row.try_get("event_type")?,
        user_id: row.try_get("user_id")?,
        betting_round: row.try_get("betting_round")?,
        action: row.try_get("action")?,
        amount: row.try_get("amount")?,
        metadata: row.try_get("metadata")?,
        sequence_number: row.try_get("sequence_number")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_tournament(row: &PgRow) -> Result<TournamentRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let blind_levels: serde_json::Value = row.try_get("blind_structure")?;
    let prize_structure: serde_json::Value = row.try_get("prize_structure")?;
    Ok(TournamentRecord {
        id: row.try_get("id")?,
        tournament_code: row.try_get("tournament_code")?,
        name: row.try_get("name")?,
        created_by: row.try_get("created_by")?,
        status: TournamentStatus::parse(&status)
            .ok_or_else(|| decode(format!("unknown tournament status {status}")))?,
        buy_in: row.try_get("buy_in")?,
        starting_chips: row.try_get("starting_chips")?,
        min_players: row.try_get("min_players")?,
        max_players: row.try_get("max_players")?,
        table_size: row.try_get("table_size")?,
        registration_closes_at: row.try_get("registration_closes_at")?,
        auto_start_delay_seconds: row.try_get("auto_start_delay_seconds")?,
        blind_levels: serde_json::from_value(blind_levels)?,
        prize_structure: serde_json::from_value(prize_structure)?,
        current_level: row.try_get("current_level")?,
        level_started_at: row.try_get("level_started_at")?,
        paused_at: row.try_get("paused_at")?,
        resumed_at: row.try_get("resumed_at")?,
        total_paused_seconds: row.try_get("total_paused_seconds")?,
        registration_completed_at: row.try_get("registration_completed_at")?,
        prizes_distributed: row.try_get("prizes_distributed")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn map_tournament_player(row: &PgRow) -> Result<TournamentPlayerRecord, StoreError> {
    Ok(TournamentPlayerRecord {
        tournament_id: row.try_get("tournament_id")?,
        user_id: row.try_get("user_id")?,
        final_position: row.try_get("final_position")?,
        chips_at_elimination: row.try_get("chips_at_elimination")?,
        prize_amount: row.try_get("prize_amount")?,
        registered_at: row.try_get("registered_at")?,
        eliminated_at: row.try_get("eliminated_at")?,
    })
}

fn map_queue_entry(row: &PgRow) -> Result<MatchmakingEntryRecord, StoreError> {
    let kind: String = row.try_get("game_kind")?;
    let status: String = row.try_get("status")?;
    Ok(MatchmakingEntryRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        game_kind: GameKindColumn::parse(&kind)
            .ok_or_else(|| decode(format!("unknown game kind {kind}")))?,
        queue_bucket: row.try_get("queue_bucket")?,
        min_buy_in: row.try_get("min_buy_in")?,
        max_buy_in: row.try_get("max_buy_in")?,
        status: QueueStatus::parse(&status)
            .ok_or_else(|| decode(format!("unknown queue status {status}")))?,
        created_at: row.try_get("created_at")?,
        matched_at: row.try_get("matched_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError> {
        let txn = self.pool.begin().await?;
        Ok(Box::new(PgTxn { txn }))
    }

    async fn create_user(
        &self,
        username: &str,
        display_name: &str,
        chips: i64,
    ) -> Result<UserRecord, StoreError> {
        let row = sqlx::query(
            "INSERT INTO users (username, display_name, chips) VALUES ($1, $2, $3) \
             RETURNING id, username, display_name, chips, suspended, created_at",
        )
        .bind(username)
        .bind(display_name)
        .bind(chips)
        .fetch_one(&self.pool)
        .await?;
        map_user(&row)
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, display_name, chips, suspended, created_at \
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_user).transpose()
    }

    async fn user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, display_name, chips, suspended, created_at \
             FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_user).transpose()
    }

    async fn chip_transactions_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<ChipTransactionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, amount, balance_before, balance_after, kind, \
                    reference_id, description, created_at \
             FROM chip_transactions WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_chip_transaction).collect()
    }

    async fn insert_table(&self, table: &TableRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tables (id, game_kind, status, small_blind, big_blind, max_seats, \
                                 min_buy_in, max_buy_in, tournament_id, table_number, \
                                 ready_to_start_at, created_at, started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(table.id)
        .bind(table.game_kind.as_str())
        .bind(table.status.as_str())
        .bind(table.small_blind)
        .bind(table.big_blind)
        .bind(table.max_seats)
        .bind(table.min_buy_in)
        .bind(table.max_buy_in)
        .bind(table.tournament_id)
        .bind(table.table_number)
        .bind(table.ready_to_start_at)
        .bind(table.created_at)
        .bind(table.started_at)
        .bind(table.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn table_by_id(&self, table_id: Uuid) -> Result<Option<TableRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM tables WHERE id = $1")
            .bind(table_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_table).transpose()
    }

    async fn tables_with_status(
        &self,
        statuses: &[TableStatusColumn],
    ) -> Result<Vec<TableRecord>, StoreError> {
        let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query("SELECT * FROM tables WHERE status = ANY($1)")
            .bind(&names)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_table).collect()
    }

    async fn tables_for_tournament(
        &self,
        tournament_id: Uuid,
    ) -> Result<Vec<TableRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM tables WHERE tournament_id = $1 ORDER BY table_number",
        )
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_table).collect()
    }

    async fn update_table_status(
        &self,
        table_id: Uuid,
        status: TableStatusColumn,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE tables SET status = $2, \
                    started_at = COALESCE($3, started_at), \
                    completed_at = COALESCE($4, completed_at) \
             WHERE id = $1",
        )
        .bind(table_id)
        .bind(status.as_str())
        .bind(started_at)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_table_blinds(
        &self,
        table_id: Uuid,
        small_blind: i64,
        big_blind: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE tables SET small_blind = $2, big_blind = $3 WHERE id = $1")
            .bind(table_id)
            .bind(small_blind)
            .bind(big_blind)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn active_seats(&self, table_id: Uuid) -> Result<Vec<SeatRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT table_id, user_id, seat_index, stack, status, joined_at, left_at \
             FROM table_seats WHERE table_id = $1 AND left_at IS NULL ORDER BY seat_index",
        )
        .bind(table_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_seat).collect()
    }

    async fn update_seat_stack(
        &self,
        table_id: Uuid,
        user_id: i64,
        stack: i64,
        status: SeatStatusColumn,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE table_seats SET stack = $3, status = $4 \
             WHERE table_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(table_id)
        .bind(user_id)
        .bind(stack)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
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
        let row = sqlx::query(
            "INSERT INTO hands (table_id, hand_number, dealer_position, \
                                small_blind_position, big_blind_position) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(table_id)
        .bind(hand_number)
        .bind(dealer_position)
        .bind(small_blind_position)
        .bind(big_blind_position)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn complete_hand(
        &self,
        hand_id: i64,
        community_cards: serde_json::Value,
        total_pot: i64,
        winners: serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE hands SET community_cards = $2, total_pot = $3, winners = $4, \
                    completed_at = NOW() WHERE id = $1",
        )
        .bind(hand_id)
        .bind(community_cards)
        .bind(total_pot)
        .bind(winners)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_incomplete_hands(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM hands WHERE completed_at IS NULL")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_hand_action(
        &self,
        hand_id: i64,
        user_id: i64,
        action: &str,
        amount: i64,
        betting_round: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO hand_actions (hand_id, user_id, action, amount, betting_round) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(hand_id)
        .bind(user_id)
        .bind(action)
        .bind(amount)
        .bind(betting_round)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_event(&self, event: &NewGameEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO game_events (hand_id, table_id, event_type, user_id, \
                                      betting_round, action, amount, metadata, \
                                      sequence_number) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(event.hand_id)
        .bind(event.table_id)
        .bind(&event.event_type)
        .bind(event.user_id)
        .bind(&event.betting_round)
        .bind(&event.action)
        .bind(event.amount)
        .bind(&event.metadata)
        .bind(event.sequence_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn events_for_hand(
        &self,
        hand_id: i64,
    ) -> Result<Vec<GameEventRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM game_events WHERE hand_id = $1 ORDER BY sequence_number",
        )
        .bind(hand_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_event).collect()
    }

    async fn insert_tournament(&self, t: &TournamentRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tournaments (id, tournament_code, name, created_by, status, \
                    buy_in, starting_chips, min_players, max_players, table_size, \
                    registration_closes_at, auto_start_delay_seconds, blind_structure, \
                    prize_structure, current_level, level_started_at, paused_at, \
                    resumed_at, total_paused_seconds, registration_completed_at, \
                    prizes_distributed, created_at, started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
                     $16, $17, $18, $19, $20, $21, $22, $23, $24)",
        )
        .bind(t.id)
        .bind(&t.tournament_code)
        .bind(&t.name)
        .bind(t.created_by)
        .bind(t.status.as_str())
        .bind(t.buy_in)
        .bind(t.starting_chips)
        .bind(t.min_players)
        .bind(t.max_players)
        .bind(t.table_size)
        .bind(t.registration_closes_at)
        .bind(t.auto_start_delay_seconds)
        .bind(serde_json::to_value(&t.blind_levels)?)
        .bind(serde_json::to_value(&t.prize_structure)?)
        .bind(t.current_level)
        .bind(t.level_started_at)
        .bind(t.paused_at)
        .bind(t.resumed_at)
        .bind(t.total_paused_seconds)
        .bind(t.registration_completed_at)
        .bind(t.prizes_distributed)
        .bind(t.created_at)
        .bind(t.started_at)
        .bind(t.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn tournament_by_id(
        &self,
        tournament_id: Uuid,
    ) -> Result<Option<TournamentRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM tournaments WHERE id = $1")
            .bind(tournament_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_tournament).transpose()
    }

    async fn tournament_by_code(
        &self,
        code: &str,
    ) -> Result<Option<TournamentRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM tournaments WHERE tournament_code = $1")
            .bind(code.to_ascii_uppercase())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_tournament).transpose()
    }

    async fn tournaments_with_status(
        &self,
        status: TournamentStatus,
    ) -> Result<Vec<TournamentRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM tournaments WHERE status = $1")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_tournament).collect()
    }

    async fn update_tournament(&self, t: &TournamentRecord) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE tournaments SET status = $2, current_level = $3, \
                    level_started_at = $4, paused_at = $5, resumed_at = $6, \
                    total_paused_seconds = $7, registration_completed_at = $8, \
                    prizes_distributed = $9, started_at = $10, completed_at = $11, \
                    blind_structure = $12, prize_structure = $13 \
             WHERE id = $1",
        )
        .bind(t.id)
        .bind(t.status.as_str())
        .bind(t.current_level)
        .bind(t.level_started_at)
        .bind(t.paused_at)
        .bind(t.resumed_at)
        .bind(t.total_paused_seconds)
        .bind(t.registration_completed_at)
        .bind(t.prizes_distributed)
        .bind(t.started_at)
        .bind(t.completed_at)
        .bind(serde_json::to_value(&t.blind_levels)?)
        .bind(serde_json::to_value(&t.prize_structure)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_tournament_player(
        &self,
        tournament_id: Uuid,
        user_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tournament_players (tournament_id, user_id) VALUES ($1, $2)",
        )
        .bind(tournament_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_tournament_player(
        &self,
        tournament_id: Uuid,
        user_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM tournament_players WHERE tournament_id = $1 AND user_id = $2",
        )
        .bind(tournament_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn tournament_players(
        &self,
        tournament_id: Uuid,
    ) -> Result<Vec<TournamentPlayerRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM tournament_players WHERE tournament_id = $1 ORDER BY registered_at",
        )
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_tournament_player).collect()
    }

    async fn set_player_elimination(
        &self,
        tournament_id: Uuid,
        user_id: i64,
        final_position: i32,
        chips_at_elimination: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE tournament_players SET final_position = $3, \
                    chips_at_elimination = $4, eliminated_at = NOW() \
             WHERE tournament_id = $1 AND user_id = $2",
        )
        .bind(tournament_id)
        .bind(user_id)
        .bind(final_position)
        .bind(chips_at_elimination)
        .execute(&self.pool)
        .await?;
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
        let row = sqlx::query(
            "INSERT INTO matchmaking_queue (user_id, game_kind, queue_bucket, \
                    min_buy_in, max_buy_in, status) \
             VALUES ($1, $2, $3, $4, $5, 'waiting') \
             RETURNING id, user_id, game_kind, queue_bucket, min_buy_in, max_buy_in, \
                       status, created_at, matched_at",
        )
        .bind(user_id)
        .bind(game_kind.as_str())
        .bind(queue_bucket)
        .bind(min_buy_in)
        .bind(max_buy_in)
        .fetch_one(&self.pool)
        .await?;
        map_queue_entry(&row)
    }

    async fn waiting_entry_for_user(
        &self,
        user_id: i64,
    ) -> Result<Option<MatchmakingEntryRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM matchmaking_queue \
             WHERE user_id = $1 AND status = 'waiting' ORDER BY created_at LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_queue_entry).transpose()
    }

    async fn cancel_queue_entry(&self, entry_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE matchmaking_queue SET status = 'cancelled' WHERE id = $1")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StoreTxn for PgTxn {
    async fn user_for_update(&mut self, user_id: i64) -> Result<UserRecord, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, display_name, chips, suspended, created_at \
             FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.txn)
        .await?
        .ok_or(StoreError::NotFound("user"))?;
        map_user(&row)
    }

    async fn set_user_chips(&mut self, user_id: i64, chips: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET chips = $2 WHERE id = $1")
            .bind(user_id)
            .bind(chips)
            .execute(&mut *self.txn)
            .await?;
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
        sqlx::query(
            "INSERT INTO chip_transactions (user_id, amount, balance_before, \
                    balance_after, kind, reference_id, description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(user_id)
        .bind(amount)
        .bind(balance_before)
        .bind(balance_after)
        .bind(kind.as_str())
        .bind(reference_id)
        .bind(description)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn insert_seat(&mut self, seat: &SeatRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO table_seats (table_id, user_id, seat_index, stack, status, \
                    joined_at, left_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(seat.table_id)
        .bind(seat.user_id)
        .bind(seat.seat_index)
        .bind(seat.stack)
        .bind(seat.status.as_str())
        .bind(seat.joined_at)
        .bind(seat.left_at)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn update_seat_stack(
        &mut self,
        table_id: Uuid,
        user_id: i64,
        stack: i64,
        status: SeatStatusColumn,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE table_seats SET stack = $3, status = $4 \
             WHERE table_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(table_id)
        .bind(user_id)
        .bind(stack)
        .bind(status.as_str())
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn mark_seat_left(
        &mut self,
        table_id: Uuid,
        user_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE table_seats SET left_at = NOW() \
             WHERE table_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(table_id)
        .bind(user_id)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn update_table_status(
        &mut self,
        table_id: Uuid,
        status: TableStatusColumn,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE tables SET status = $2, completed_at = COALESCE($3, completed_at) \
             WHERE id = $1",
        )
        .bind(table_id)
        .bind(status.as_str())
        .bind(completed_at)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn mark_entry_matched(&mut self, entry_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE matchmaking_queue SET status = 'matched', matched_at = NOW() \
             WHERE id = $1",
        )
        .bind(entry_id)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn insert_tournament_player(
        &mut self,
        tournament_id: Uuid,
        user_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tournament_players (tournament_id, user_id) VALUES ($1, $2)",
        )
        .bind(tournament_id)
        .bind(user_id)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn remove_tournament_player(
        &mut self,
        tournament_id: Uuid,
        user_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM tournament_players WHERE tournament_id = $1 AND user_id = $2",
        )
        .bind(tournament_id)
        .bind(user_id)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn set_player_prize(
        &mut self,
        tournament_id: Uuid,
        user_id: i64,
        prize_amount: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE tournament_players SET prize_amount = $3 \
             WHERE tournament_id = $1 AND user_id = $2",
        )
        .bind(tournament_id)
        .bind(user_id)
        .bind(prize_amount)
        .execute(&mut *self.txn)
        .await?;
        Ok(())
    }

    async fn set_prizes_distributed(
        &mut self,
        tournament_id: Uuid,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE tournaments SET prizes_distributed = TRUE WHERE id = $1")
            .bind(tournament_id)
            .execute(&mut *self.txn)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        let _ = self.txn.rollback().await;
    }
}
