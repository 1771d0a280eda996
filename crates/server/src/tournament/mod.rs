//! Multi-table tournament controller: registration through payout.
//!
//! Background loops (the starter scan and the blind ticker) drive time;
//! gameplay feedback arrives through the [`TournamentHooks`] the table
//! manager invokes at hand boundaries. The controller owns tournament
//! state stamps; engines only ever see blind updates and pause/resume.

pub mod blinds;
pub mod codes;
pub mod eliminations;
pub mod tables;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use holdem_engine::{GameKind, TableConfig};
use rand::rngs::OsRng;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::ledger::{distribute_prizes_exact, ChipLedger};
use crate::manager::{TableManager, TournamentHooks};
use crate::protocol::ServerMessage;
use crate::store::{
    BlindLevel, GameKindColumn, SeatRecord, SeatStatusColumn, Store, StoreError, TableRecord,
    TableStatusColumn, TournamentRecord, TournamentStatus, TransactionKind,
};

use self::tables::{balance_move, consolidation_needed, partition_players, TableOccupancy};

const ACTION_TIMEOUT_SECONDS: i64 = 30;
const CODE_RETRIES: usize = 5;

/// Everything a creator supplies for a new tournament.
#[derive(Clone, Debug)]
pub struct TournamentParams {
    pub name: String,
    pub buy_in: i64,
    pub starting_chips: i64,
    pub min_players: i32,
    pub max_players: i32,
    pub table_size: i32,
    pub auto_start_delay_seconds: i64,
    pub registration_closes_at: Option<chrono::DateTime<Utc>>,
    pub blind_levels: Vec<BlindLevel>,
    /// Basis-point shares for positions 1..n; must sum to exactly 10000.
    pub prize_structure: Vec<i64>,
}

impl TournamentParams {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidInput("tournament name is empty".into()));
        }
        if self.buy_in < 1 {
            return Err(AppError::InvalidInput("buy-in must be at least 1".into()));
        }
        if self.starting_chips < 1 {
            return Err(AppError::InvalidInput(
                "starting chips must be at least 1".into(),
            ));
        }
        if self.min_players < 2 {
            return Err(AppError::InvalidInput("min players must be at least 2".into()));
        }
        if self.max_players < self.min_players {
            return Err(AppError::InvalidInput(
                "max players below min players".into(),
            ));
        }
        if !(2..=9).contains(&self.table_size) {
            return Err(AppError::InvalidInput(
                "table size must be between 2 and 9".into(),
            ));
        }
        if self.blind_levels.is_empty() {
            return Err(AppError::InvalidInput("blind schedule is empty".into()));
        }
        if self
            .blind_levels
            .iter()
            .any(|l| l.small_blind < 1 || l.big_blind < l.small_blind || l.duration_seconds < 1)
        {
            return Err(AppError::InvalidInput("malformed blind level".into()));
        }
        if self.prize_structure.is_empty() {
            return Err(AppError::InvalidInput("prize structure is empty".into()));
        }
        if self.prize_structure.iter().any(|&bp| bp <= 0) {
            return Err(AppError::InvalidInput(
                "prize shares must be positive".into(),
            ));
        }
        let total: i64 = self.prize_structure.iter().sum();
        if total != 10_000 {
            return Err(AppError::InvalidInput(format!(
                "prize shares must sum to 10000 basis points, got {total}"
            )));
        }
        Ok(())
    }
}

pub struct TournamentController {
    store: Arc<dyn Store>,
    ledger: Arc<ChipLedger>,
    manager: Arc<TableManager>,
}

impl TournamentController {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<ChipLedger>,
        manager: Arc<TableManager>,
    ) -> Arc<Self> {
        Arc::new(TournamentController {
            store,
            ledger,
            manager,
        })
    }

    // -- lifecycle ------------------------------------------------------

    pub async fn create(
        &self,
        creator: i64,
        params: TournamentParams,
    ) -> Result<TournamentRecord, AppError> {
        params.validate()?;

        for _ in 0..CODE_RETRIES {
            let record = TournamentRecord {
                id: Uuid::new_v4(),
                tournament_code: codes::generate_code(&mut OsRng),
                name: params.name.clone(),
                created_by: creator,
                status: TournamentStatus::Registering,
                buy_in: params.buy_in,
                starting_chips: params.starting_chips,
                min_players: params.min_players,
                max_players: params.max_players,
                table_size: params.table_size,
                registration_closes_at: params.registration_closes_at,
                auto_start_delay_seconds: params.auto_start_delay_seconds,
                blind_levels: params.blind_levels.clone(),
                prize_structure: params.prize_structure.clone(),
                current_level: 0,
                level_started_at: None,
                paused_at: None,
                resumed_at: None,
                total_paused_seconds: 0,
                registration_completed_at: None,
                prizes_distributed: false,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
            };
            match self.store.insert_tournament(&record).await {
                Ok(()) => {
                    info!(code = %record.tournament_code, "tournament created");
                    return Ok(record);
                }
                // Code collision: roll a new one.
                Err(StoreError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(AppError::Internal(
            "could not allocate a unique tournament code".into(),
        ))
    }

    /// Buy in and register, atomically.
    pub async fn register(&self, user_id: i64, code: &str) -> Result<TournamentRecord, AppError> {
        let code = codes::normalize_code(code);
        let tournament = self
            .store
            .tournament_by_code(&code)
            .await?
            .ok_or(AppError::NotFound("tournament"))?;
        if tournament.status != TournamentStatus::Registering {
            return Err(AppError::Unavailable("registration is closed".into()));
        }
        if let Some(closes) = tournament.registration_closes_at {
            if Utc::now() >= closes {
                return Err(AppError::Unavailable("registration is closed".into()));
            }
        }
        let registered = self.store.tournament_players(tournament.id).await?;
        if registered.len() as i32 >= tournament.max_players {
            return Err(AppError::Conflict("tournament is full".into()));
        }
        if registered.iter().any(|p| p.user_id == user_id) {
            return Err(AppError::Conflict("already registered".into()));
        }

        let reference = tournament.id.to_string();
        let mut txn = self.store.begin().await?;
        let result = async {
            self.ledger
                .deduct_chips_with_tx(
                    txn.as_mut(),
                    user_id,
                    tournament.buy_in,
                    TransactionKind::TournamentBuyIn,
                    Some(&reference),
                    "tournament buy-in",
                )
                .await?;
            txn.insert_tournament_player(tournament.id, user_id).await?;
            Ok::<(), AppError>(())
        }
        .await;
        match result {
            Ok(()) => {
                txn.commit().await?;
                Ok(tournament)
            }
            Err(err) => {
                txn.rollback().await;
                Err(err)
            }
        }
    }

    /// Refund and drop a registration while the tournament still registers.
    pub async fn unregister(&self, user_id: i64, tournament_id: Uuid) -> Result<(), AppError> {
        let tournament = self
            .store
            .tournament_by_id(tournament_id)
            .await?
            .ok_or(AppError::NotFound("tournament"))?;
        if tournament.status != TournamentStatus::Registering {
            return Err(AppError::Unavailable(
                "tournament already left registration".into(),
            ));
        }
        let registered = self.store.tournament_players(tournament_id).await?;
        if !registered.iter().any(|p| p.user_id == user_id) {
            return Err(AppError::NotFound("tournament player"));
        }

        let reference = tournament_id.to_string();
        let mut txn = self.store.begin().await?;
        let result = async {
            self.ledger
                .add_chips_with_tx(
                    txn.as_mut(),
                    user_id,
                    tournament.buy_in,
                    TransactionKind::TournamentRefund,
                    Some(&reference),
                    "tournament registration refund",
                )
                .await?;
            txn.remove_tournament_player(tournament_id, user_id).await?;
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

    /// Cancel a registering tournament and refund everyone.
    pub async fn cancel(&self, tournament_id: Uuid) -> Result<(), AppError> {
        let mut tournament = self
            .store
            .tournament_by_id(tournament_id)
            .await?
            .ok_or(AppError::NotFound("tournament"))?;
        if tournament.status != TournamentStatus::Registering {
            return Err(AppError::Unavailable(
                "only a registering tournament can be cancelled".into(),
            ));
        }
        let registered = self.store.tournament_players(tournament_id).await?;
        let reference = tournament_id.to_string();

        let mut txn = self.store.begin().await?;
        let result = async {
            for player in &registered {
                self.ledger
                    .add_chips_with_tx(
                        txn.as_mut(),
                        player.user_id,
                        tournament.buy_in,
                        TransactionKind::TournamentRefund,
                        Some(&reference),
                        "tournament cancelled",
                    )
                    .await?;
            }
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

        tournament.status = TournamentStatus::Cancelled;
        tournament.completed_at = Some(Utc::now());
        self.store.update_tournament(&tournament).await?;
        Ok(())
    }

    /// Operator override: skip the auto-start delay.
    pub async fn force_start(&self, tournament_id: Uuid) -> Result<(), AppError> {
        let tournament = self
            .store
            .tournament_by_id(tournament_id)
            .await?
            .ok_or(AppError::NotFound("tournament"))?;
        self.start_tournament(tournament).await
    }

    /// Starter scan: stamp registration completion when the field reaches
    /// the minimum, and launch once the auto-start delay elapses.
    pub async fn starter_tick(&self) {
        let registering = match self
            .store
            .tournaments_with_status(TournamentStatus::Registering)
            .await
        {
            Ok(list) => list,
            Err(err) => {
                warn!(%err, "starter scan failed");
                return;
            }
        };
        for mut tournament in registering {
            let players = match self.store.tournament_players(tournament.id).await {
                Ok(players) => players,
                Err(err) => {
                    warn!(%err, "failed to load tournament players");
                    continue;
                }
            };
            if (players.len() as i32) < tournament.min_players {
                continue;
            }
            if tournament.registration_completed_at.is_none() {
                tournament.registration_completed_at = Some(Utc::now());
                if let Err(err) = self.store.update_tournament(&tournament).await {
                    warn!(%err, "failed to stamp registration completion");
                    continue;
                }
            }
            let ready_at = tournament.registration_completed_at.unwrap_or_else(Utc::now)
                + Duration::seconds(tournament.auto_start_delay_seconds);
            if Utc::now() >= ready_at {
                if let Err(err) = self.start_tournament(tournament).await {
                    error!(%err, "tournament start failed");
                }
            }
        }
    }

    /// Blind ticker: advance due levels of every running tournament.
    pub async fn blind_tick(&self) {
        let running = match self
            .store
            .tournaments_with_status(TournamentStatus::InProgress)
            .await
        {
            Ok(list) => list,
            Err(err) => {
                warn!(%err, "blind scan failed");
                return;
            }
        };
        let now = Utc::now();
        for tournament in running {
            if blinds::next_level_due(&tournament, now) {
                if let Err(err) = self.advance_blind_level(tournament).await {
                    warn!(%err, "blind level advance failed");
                }
            }
        }
    }

    pub async fn pause(&self, tournament_id: Uuid) -> Result<(), AppError> {
        let mut tournament = self
            .store
            .tournament_by_id(tournament_id)
            .await?
            .ok_or(AppError::NotFound("tournament"))?;
        if tournament.status != TournamentStatus::InProgress {
            return Err(AppError::Unavailable("tournament is not running".into()));
        }
        for table in self.store.tables_for_tournament(tournament_id).await? {
            if let Some(engine) = self.manager.table(table.id) {
                let _ = engine.pause();
            }
        }
        tournament.status = TournamentStatus::Paused;
        tournament.paused_at = Some(Utc::now());
        self.store.update_tournament(&tournament).await?;
        self.notify_players(tournament_id, ServerMessage::TournamentPaused { tournament_id })
            .await;
        Ok(())
    }

    pub async fn resume(&self, tournament_id: Uuid) -> Result<(), AppError> {
        let mut tournament = self
            .store
            .tournament_by_id(tournament_id)
            .await?
            .ok_or(AppError::NotFound("tournament"))?;
        if tournament.status != TournamentStatus::Paused {
            return Err(AppError::Unavailable("tournament is not paused".into()));
        }
        let resumed_at = Utc::now();
        if let Some(paused_at) = tournament.paused_at {
            tournament.total_paused_seconds += (resumed_at - paused_at).num_seconds().max(0);
        }
        tournament.resumed_at = Some(resumed_at);
        tournament.status = TournamentStatus::InProgress;
        self.store.update_tournament(&tournament).await?;

        for table in self.store.tables_for_tournament(tournament_id).await? {
            if let Some(engine) = self.manager.table(table.id) {
                let _ = engine.resume();
            }
        }
        self.notify_players(tournament_id, ServerMessage::TournamentResumed { tournament_id })
            .await;
        Ok(())
    }

    // -- internals ------------------------------------------------------

    async fn start_tournament(&self, mut tournament: TournamentRecord) -> Result<(), AppError> {
        if tournament.status != TournamentStatus::Registering {
            return Err(AppError::Unavailable(
                "tournament already left registration".into(),
            ));
        }
        let players = self.store.tournament_players(tournament.id).await?;
        if (players.len() as i32) < tournament.min_players {
            return Err(AppError::Conflict("not enough players to start".into()));
        }

        tournament.status = TournamentStatus::Starting;
        self.store.update_tournament(&tournament).await?;

        let user_ids: Vec<i64> = players.iter().map(|p| p.user_id).collect();
        let plans = partition_players(
            &user_ids,
            tournament.starting_chips,
            tournament.table_size as usize,
        );
        let level = *tournament
            .current_blind_level()
            .ok_or_else(|| AppError::Internal("empty blind schedule".into()))?;

        let mut table_ids = Vec::with_capacity(plans.len());
        for plan in &plans {
            let table_id = self
                .materialize_table(&tournament, level, plan.table_number, &plan.seats)
                .await?;
            table_ids.push(table_id);
        }

        tournament.status = TournamentStatus::InProgress;
        tournament.started_at = Some(Utc::now());
        tournament.level_started_at = Some(Utc::now());
        self.store.update_tournament(&tournament).await?;

        self.notify_players(
            tournament.id,
            ServerMessage::TournamentStarted {
                tournament_id: tournament.id,
                name: tournament.name.clone(),
                table_count: plans.len(),
                player_count: user_ids.len(),
            },
        )
        .await;
        info!(tournament = %tournament.tournament_code, tables = plans.len(), "tournament started");

        for table_id in table_ids {
            if let Err(err) = self.manager.check_and_start_game(table_id).await {
                warn!(%table_id, %err, "tournament table failed to start");
            }
        }
        Ok(())
    }

    /// Create one tournament table: row, engine, and seats.
    async fn materialize_table(
        &self,
        tournament: &TournamentRecord,
        level: BlindLevel,
        table_number: i32,
        seats: &[(i64, i64)],
    ) -> Result<Uuid, AppError> {
        let table_id = Uuid::new_v4();
        let record = TableRecord {
            id: table_id,
            game_kind: GameKindColumn::Tournament,
            status: TableStatusColumn::Waiting,
            small_blind: level.small_blind,
            big_blind: level.big_blind,
            max_seats: tournament.table_size,
            min_buy_in: tournament.starting_chips,
            max_buy_in: tournament.starting_chips,
            tournament_id: Some(tournament.id),
            table_number: Some(table_number),
            ready_to_start_at: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let config = TableConfig {
            small_blind: level.small_blind as u64,
            big_blind: level.big_blind as u64,
            ante: level.ante as u64,
            max_players: tournament.table_size as usize,
            min_buy_in: tournament.starting_chips as u64,
            max_buy_in: tournament.starting_chips as u64,
            action_timeout: Duration::seconds(ACTION_TIMEOUT_SECONDS),
        };
        let engine = self
            .manager
            .create_table(&record, config, GameKind::Tournament)
            .await?;

        let mut txn = self.store.begin().await?;
        let result = async {
            for (seat_index, &(user_id, stack)) in seats.iter().enumerate() {
                txn.insert_seat(&SeatRecord {
                    table_id,
                    user_id,
                    seat_index: seat_index as i32,
                    stack,
                    status: SeatStatusColumn::Active,
                    joined_at: Utc::now(),
                    left_at: None,
                })
                .await?;
            }
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

        for (seat_index, &(user_id, stack)) in seats.iter().enumerate() {
            let name = match self.store.user_by_id(user_id).await? {
                Some(user) => user.display_name,
                None => format!("player-{user_id}"),
            };
            engine.restore_player(user_id, &name, seat_index, stack as u64)?;
            self.manager.note_seated(user_id, table_id);
        }
        Ok(table_id)
    }

    async fn advance_blind_level(&self, mut tournament: TournamentRecord) -> Result<(), AppError> {
        tournament.current_level += 1;
        tournament.level_started_at = Some(Utc::now());
        self.store.update_tournament(&tournament).await?;

        let level = *tournament
            .current_blind_level()
            .ok_or_else(|| AppError::Internal("blind level out of range".into()))?;
        for table in self.store.tables_for_tournament(tournament.id).await? {
            if table.status == TableStatusColumn::Completed {
                continue;
            }
            if let Some(engine) = self.manager.table(table.id) {
                // Applied at the next hand boundary.
                engine.set_blinds(
                    level.small_blind as u64,
                    level.big_blind as u64,
                    level.ante as u64,
                );
            }
            if let Err(err) = self
                .store
                .set_table_blinds(table.id, level.small_blind, level.big_blind)
                .await
            {
                warn!(table_id = %table.id, %err, "failed to persist blind change");
            }
        }

        self.notify_players(
            tournament.id,
            ServerMessage::BlindLevelIncreased {
                tournament_id: tournament.id,
                level: tournament.current_level,
                small_blind: level.small_blind,
                big_blind: level.big_blind,
                ante: level.ante,
            },
        )
        .await;
        info!(
            tournament = %tournament.tournament_code,
            level = tournament.current_level,
            "blind level increased"
        );
        Ok(())
    }

    /// Eliminations from the hand that just completed, worst finisher
    /// first.
    async fn process_eliminations(
        &self,
        tournament_id: Uuid,
        table_id: Uuid,
    ) -> Result<(), AppError> {
        let Some(engine) = self.manager.table(table_id) else {
            return Ok(());
        };
        let mut busts = engine.last_hand_busts();
        if busts.is_empty() {
            return Ok(());
        }
        eliminations::order_same_hand_busts(&mut busts);

        for bust in busts {
            let players = self.store.tournament_players(tournament_id).await?;
            // The hand-complete and game-complete paths can both observe
            // the same bust; only the first assigns a position.
            if players
                .iter()
                .any(|p| p.user_id == bust.user_id && p.final_position.is_some())
            {
                continue;
            }
            let remaining = players.iter().filter(|p| p.final_position.is_none()).count();
            let position = remaining as i32;
            self.store
                .set_player_elimination(
                    tournament_id,
                    bust.user_id,
                    position,
                    bust.stack_at_hand_start as i64,
                )
                .await?;
            self.manager.clear_seat(bust.user_id);
            self.notify_players(
                tournament_id,
                ServerMessage::PlayerEliminated {
                    tournament_id,
                    user_id: bust.user_id,
                    final_position: position,
                },
            )
            .await;
            info!(tournament_id = %tournament_id, user_id = bust.user_id, position, "player eliminated");
        }

        // Field size changed; push a fresh summary to everyone.
        if let Some(tournament) = self.store.tournament_by_id(tournament_id).await? {
            let players = self.store.tournament_players(tournament_id).await?;
            let remaining = players.iter().filter(|p| p.final_position.is_none()).count();
            self.notify_players(
                tournament_id,
                ServerMessage::TournamentUpdate {
                    tournament_id,
                    status: tournament.status.as_str().to_string(),
                    players_remaining: remaining,
                    current_level: tournament.current_level,
                },
            )
            .await;
        }
        Ok(())
    }

    /// After eliminations: finish the tournament, shrink the table set, or
    /// keep the table playing.
    async fn after_hand(&self, tournament_id: Uuid, table_id: Uuid) -> Result<(), AppError> {
        self.process_eliminations(tournament_id, table_id).await?;

        if self.check_completion(tournament_id).await? {
            return Ok(());
        }
        if self.rebalance_or_consolidate(tournament_id).await? {
            return Ok(());
        }
        // Nothing structural changed; deal the next hand here.
        let still_open = self
            .manager
            .table(table_id)
            .is_some_and(|t| t.status() == holdem_engine::TableStatus::Waiting);
        if still_open {
            if let Err(err) = self.manager.check_and_start_game(table_id).await {
                warn!(%table_id, %err, "failed to continue tournament table");
            }
        }
        Ok(())
    }

    async fn check_completion(&self, tournament_id: Uuid) -> Result<bool, AppError> {
        let mut tournament = self
            .store
            .tournament_by_id(tournament_id)
            .await?
            .ok_or(AppError::NotFound("tournament"))?;
        let players = self.store.tournament_players(tournament_id).await?;
        let remaining: Vec<_> = players
            .iter()
            .filter(|p| p.final_position.is_none())
            .collect();
        if remaining.len() != 1 {
            return Ok(false);
        }

        let winner = remaining[0].user_id;
        let total_chips = tournament.starting_chips * players.len() as i64;
        self.store
            .set_player_elimination(tournament_id, winner, 1, total_chips)
            .await?;
        self.manager.clear_seat(winner);

        for table in self.store.tables_for_tournament(tournament_id).await? {
            if table.status != TableStatusColumn::Completed {
                let _ = self
                    .store
                    .update_table_status(
                        table.id,
                        TableStatusColumn::Completed,
                        None,
                        Some(Utc::now()),
                    )
                    .await;
            }
            self.manager.uninstall_table(table.id);
        }

        tournament.status = TournamentStatus::Completed;
        tournament.completed_at = Some(Utc::now());
        self.store.update_tournament(&tournament).await?;

        let prize_pool = tournament.buy_in * players.len() as i64;
        self.distribute_prizes(&tournament, players.len()).await?;
        self.notify_players(
            tournament_id,
            ServerMessage::TournamentComplete {
                tournament_id,
                winner,
                prize_pool,
            },
        )
        .await;
        info!(tournament = %tournament.tournament_code, winner, "tournament complete");
        Ok(true)
    }

    /// Pay the prize structure. Idempotent: a tournament whose prizes were
    /// already distributed is a no-op.
    async fn distribute_prizes(
        &self,
        tournament: &TournamentRecord,
        entrants: usize,
    ) -> Result<(), AppError> {
        let current = self
            .store
            .tournament_by_id(tournament.id)
            .await?
            .ok_or(AppError::NotFound("tournament"))?;
        if current.prizes_distributed {
            return Ok(());
        }

        let pool = tournament.buy_in * entrants as i64;
        let amounts = distribute_prizes_exact(pool, &tournament.prize_structure);
        let players = self.store.tournament_players(tournament.id).await?;
        let reference = tournament.id.to_string();

        for (index, &amount) in amounts.iter().enumerate() {
            let position = index as i32 + 1;
            let Some(player) = players.iter().find(|p| p.final_position == Some(position))
            else {
                warn!(
                    tournament_id = %tournament.id,
                    position,
                    "no finisher for paid position"
                );
                continue;
            };
            if amount <= 0 {
                continue;
            }

            let mut txn = self.store.begin().await?;
            let result = async {
                self.ledger
                    .add_chips_with_tx(
                        txn.as_mut(),
                        player.user_id,
                        amount,
                        TransactionKind::TournamentPrize,
                        Some(&reference),
                        &format!("tournament prize, position {position}"),
                    )
                    .await?;
                txn.set_player_prize(tournament.id, player.user_id, amount)
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

            self.notify_players(
                tournament.id,
                ServerMessage::PrizeAwarded {
                    tournament_id: tournament.id,
                    user_id: player.user_id,
                    position,
                    amount,
                },
            )
            .await;
        }

        let mut txn = self.store.begin().await?;
        txn.set_prizes_distributed(tournament.id).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Returns true when the table set changed (so the caller must not
    /// restart the old table).
    async fn rebalance_or_consolidate(&self, tournament_id: Uuid) -> Result<bool, AppError> {
        let tournament = self
            .store
            .tournament_by_id(tournament_id)
            .await?
            .ok_or(AppError::NotFound("tournament"))?;
        let table_rows: Vec<TableRecord> = self
            .store
            .tables_for_tournament(tournament_id)
            .await?
            .into_iter()
            .filter(|t| t.status != TableStatusColumn::Completed)
            .collect();
        if table_rows.len() < 2 {
            return Ok(false);
        }

        let mut occupancies = Vec::with_capacity(table_rows.len());
        let mut any_hand_live = false;
        for row in &table_rows {
            let Some(engine) = self.manager.table(row.id) else {
                continue;
            };
            if engine.hand_in_progress() {
                any_hand_live = true;
            }
            let seats: Vec<(usize, i64)> = engine
                .occupancy()
                .into_iter()
                .filter(|(_, _, stack)| *stack > 0)
                .map(|(seat, user, _)| (seat, user))
                .collect();
            occupancies.push(TableOccupancy {
                table_id: row.id,
                button: engine.button(),
                max_seats: tournament.table_size as usize,
                seats,
            });
        }

        let counts: Vec<usize> = occupancies.iter().map(|o| o.seats.len()).collect();
        if consolidation_needed(&counts, tournament.table_size as usize) {
            if any_hand_live {
                // Reshuffling seats mid-hand would corrupt pots; the next
                // hand boundary retries.
                return Ok(false);
            }
            self.consolidate(&tournament, &table_rows).await?;
            return Ok(true);
        }

        if let Some(mv) = balance_move(&occupancies) {
            let from_live = self
                .manager
                .table(mv.from_table)
                .is_some_and(|t| t.hand_in_progress());
            let to_live = self
                .manager
                .table(mv.to_table)
                .is_some_and(|t| t.hand_in_progress());
            if from_live || to_live {
                return Ok(false);
            }
            self.apply_balance_move(&mv).await?;
        }
        Ok(false)
    }

    async fn apply_balance_move(&self, mv: &tables::BalanceMove) -> Result<(), AppError> {
        let from = self
            .manager
            .table(mv.from_table)
            .ok_or(AppError::NotFound("table"))?;
        let to = self
            .manager
            .table(mv.to_table)
            .ok_or(AppError::NotFound("table"))?;

        let stack = match from.remove_player(mv.user_id)? {
            holdem_engine::RemoveOutcome::Removed { stack } => stack,
            holdem_engine::RemoveOutcome::Deferred => return Ok(()),
        };
        let name = match self.store.user_by_id(mv.user_id).await? {
            Some(user) => user.display_name,
            None => format!("player-{}", mv.user_id),
        };
        to.restore_player(mv.user_id, &name, mv.to_seat, stack)?;
        self.manager.note_seated(mv.user_id, mv.to_table);

        let mut txn = self.store.begin().await?;
        let result = async {
            txn.mark_seat_left(mv.from_table, mv.user_id).await?;
            txn.insert_seat(&SeatRecord {
                table_id: mv.to_table,
                user_id: mv.user_id,
                seat_index: mv.to_seat as i32,
                stack: stack as i64,
                status: SeatStatusColumn::Active,
                joined_at: Utc::now(),
                left_at: None,
            })
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
        info!(
            user_id = mv.user_id,
            from = %mv.from_table,
            to = %mv.to_table,
            "seat balanced"
        );
        Ok(())
    }

    /// Rebuild the table set with one table fewer, preserving every stack
    /// exactly.
    async fn consolidate(
        &self,
        tournament: &TournamentRecord,
        old_tables: &[TableRecord],
    ) -> Result<(), AppError> {
        // Gather every live stack across the tournament.
        let mut survivors: Vec<(i64, i64)> = Vec::new();
        for row in old_tables {
            let Some(engine) = self.manager.table(row.id) else {
                continue;
            };
            for (_, user_id, stack) in engine.occupancy() {
                if stack > 0 {
                    survivors.push((user_id, stack as i64));
                }
            }
        }

        // Retire the old tables.
        let mut txn = self.store.begin().await?;
        let result = async {
            for row in old_tables {
                for seat in self.store.active_seats(row.id).await? {
                    txn.mark_seat_left(row.id, seat.user_id).await?;
                }
                txn.update_table_status(row.id, TableStatusColumn::Completed, Some(Utc::now()))
                    .await?;
            }
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
        for row in old_tables {
            self.manager.uninstall_table(row.id);
        }

        // Build the replacement set.
        let user_ids: Vec<i64> = survivors.iter().map(|(uid, _)| *uid).collect();
        let stacks: std::collections::HashMap<i64, i64> = survivors.iter().copied().collect();
        let level = *tournament
            .current_blind_level()
            .ok_or_else(|| AppError::Internal("blind level out of range".into()))?;
        let plans = partition_players(&user_ids, 0, tournament.table_size as usize);

        let mut new_ids = Vec::with_capacity(plans.len());
        for plan in &plans {
            let seats: Vec<(i64, i64)> = plan
                .seats
                .iter()
                .map(|(uid, _)| (*uid, stacks.get(uid).copied().unwrap_or(0)))
                .collect();
            let table_id = self
                .materialize_table(tournament, level, plan.table_number, &seats)
                .await?;
            new_ids.push(table_id);
        }

        self.notify_players(
            tournament.id,
            ServerMessage::TablesConsolidated {
                tournament_id: tournament.id,
                table_count: new_ids.len(),
            },
        )
        .await;
        info!(
            tournament = %tournament.tournament_code,
            tables = new_ids.len(),
            "tables consolidated"
        );

        for table_id in new_ids {
            if let Err(err) = self.manager.check_and_start_game(table_id).await {
                warn!(%table_id, %err, "consolidated table failed to start");
            }
        }
        Ok(())
    }

    async fn notify_players(&self, tournament_id: Uuid, msg: ServerMessage) {
        let Ok(players) = self.store.tournament_players(tournament_id).await else {
            return;
        };
        for player in players {
            self.manager.notify_user(player.user_id, msg.clone());
        }
    }
}

#[async_trait]
impl TournamentHooks for TournamentController {
    async fn on_hand_complete(&self, tournament_id: Uuid, table_id: Uuid) {
        if let Err(err) = self.after_hand(tournament_id, table_id).await {
            error!(%tournament_id, %table_id, %err, "tournament hand follow-up failed");
        }
    }

    async fn on_game_complete(&self, tournament_id: Uuid, table_id: Uuid) {
        self.notify_players(
            tournament_id,
            ServerMessage::TournamentTableComplete {
                tournament_id,
                table_id,
            },
        )
        .await;
        // A finished table is either the whole tournament finishing or a
        // consolidation trigger; both run off the same follow-up path.
        if let Err(err) = self.after_hand(tournament_id, table_id).await {
            error!(%tournament_id, %table_id, %err, "tournament table completion failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::MemStore;

    fn params() -> TournamentParams {
        TournamentParams {
            name: "Friday Night".into(),
            buy_in: 100,
            starting_chips: 1_500,
            min_players: 2,
            max_players: 9,
            table_size: 9,
            auto_start_delay_seconds: 0,
            registration_closes_at: None,
            blind_levels: vec![
                BlindLevel {
                    small_blind: 10,
                    big_blind: 20,
                    ante: 0,
                    duration_seconds: 300,
                },
                BlindLevel {
                    small_blind: 20,
                    big_blind: 40,
                    ante: 5,
                    duration_seconds: 300,
                },
            ],
            prize_structure: vec![10_000],
        }
    }

    struct Fixture {
        store: Arc<MemStore>,
        ledger: Arc<ChipLedger>,
        manager: Arc<TableManager>,
        controller: Arc<TournamentController>,
    }

    fn fixture() -> (Fixture, tokio::sync::mpsc::UnboundedReceiver<holdem_engine::EngineEvent>)
    {
        let store: Arc<MemStore> = Arc::new(MemStore::new());
        let ledger = Arc::new(ChipLedger::new(store.clone()));
        let (manager, rx) = TableManager::new(store.clone(), ledger.clone());
        let controller =
            TournamentController::new(store.clone(), ledger.clone(), manager.clone());
        manager.set_tournament_hooks(controller.clone());
        (
            Fixture {
                store,
                ledger,
                manager,
                controller,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn prize_structure_must_sum_to_ten_thousand() {
        let (f, _rx) = fixture();
        let creator = f.store.create_user("host", "Host", 1_000).await.unwrap();

        let mut bad = params();
        bad.prize_structure = vec![5_000, 3_000];
        let err = f.controller.create(creator.id, bad).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn register_deducts_the_buy_in_once() {
        let (f, _rx) = fixture();
        let creator = f.store.create_user("host", "Host", 1_000).await.unwrap();
        let player = f.store.create_user("p1", "P1", 1_000).await.unwrap();

        let t = f.controller.create(creator.id, params()).await.unwrap();
        assert_eq!(t.tournament_code.len(), codes::CODE_LENGTH);

        f.controller
            .register(player.id, &t.tournament_code)
            .await
            .unwrap();
        assert_eq!(f.ledger.balance(player.id).await.unwrap(), 900);

        // Lookup is case-insensitive; a second registration conflicts.
        let err = f
            .controller
            .register(player.id, &t.tournament_code.to_lowercase())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(f.ledger.balance(player.id).await.unwrap(), 900);
    }

    #[tokio::test]
    async fn unregister_refunds_while_registering() {
        let (f, _rx) = fixture();
        let creator = f.store.create_user("host", "Host", 1_000).await.unwrap();
        let player = f.store.create_user("p1", "P1", 1_000).await.unwrap();

        let t = f.controller.create(creator.id, params()).await.unwrap();
        f.controller
            .register(player.id, &t.tournament_code)
            .await
            .unwrap();
        f.controller.unregister(player.id, t.id).await.unwrap();

        assert_eq!(f.ledger.balance(player.id).await.unwrap(), 1_000);
        let rows = f.store.chip_transactions_for_user(player.id).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn cancel_refunds_every_registrant() {
        let (f, _rx) = fixture();
        let creator = f.store.create_user("host", "Host", 1_000).await.unwrap();
        let t = f.controller.create(creator.id, params()).await.unwrap();

        let mut ids = Vec::new();
        for i in 0..3 {
            let u = f
                .store
                .create_user(&format!("p{i}"), &format!("P{i}"), 500)
                .await
                .unwrap();
            f.controller.register(u.id, &t.tournament_code).await.unwrap();
            ids.push(u.id);
        }

        f.controller.cancel(t.id).await.unwrap();
        for id in ids {
            assert_eq!(f.ledger.balance(id).await.unwrap(), 500);
        }
        let t = f.store.tournament_by_id(t.id).await.unwrap().unwrap();
        assert_eq!(t.status, TournamentStatus::Cancelled);
    }

    #[tokio::test]
    async fn starter_launches_once_the_field_and_delay_allow() {
        let (f, _rx) = fixture();
        let creator = f.store.create_user("host", "Host", 1_000).await.unwrap();
        let t = f.controller.create(creator.id, params()).await.unwrap();

        for i in 0..3 {
            let u = f
                .store
                .create_user(&format!("p{i}"), &format!("P{i}"), 500)
                .await
                .unwrap();
            f.controller.register(u.id, &t.tournament_code).await.unwrap();
        }

        f.controller.starter_tick().await;
        let t = f.store.tournament_by_id(t.id).await.unwrap().unwrap();
        assert_eq!(t.status, TournamentStatus::InProgress);
        assert!(t.registration_completed_at.is_some());
        assert!(t.level_started_at.is_some());

        // One table of three, everyone seated with the starting stack.
        let tables = f.store.tables_for_tournament(t.id).await.unwrap();
        assert_eq!(tables.len(), 1);
        let engine = f.manager.table(tables[0].id).expect("engine installed");
        let occupancy = engine.occupancy();
        assert_eq!(occupancy.len(), 3);
        // Blinds came out of two stacks already; total chips conserved.
        let total: u64 = occupancy.iter().map(|(_, _, s)| s).sum::<u64>()
            + engine
                .state_for(None)
                .current_hand
                .map(|h| h.pot.main + h.pot.side.iter().sum::<u64>())
                .unwrap_or(0);
        assert_eq!(total, 4_500);
        assert!(engine.hand_in_progress());
    }

    #[tokio::test]
    async fn blind_tick_advances_due_levels_and_stages_engines() {
        let (f, _rx) = fixture();
        let creator = f.store.create_user("host", "Host", 1_000).await.unwrap();
        let t = f.controller.create(creator.id, params()).await.unwrap();
        for i in 0..2 {
            let u = f
                .store
                .create_user(&format!("p{i}"), &format!("P{i}"), 500)
                .await
                .unwrap();
            f.controller.register(u.id, &t.tournament_code).await.unwrap();
        }
        f.controller.force_start(t.id).await.unwrap();

        // Backdate the level start so the first level is due.
        let mut t = f.store.tournament_by_id(t.id).await.unwrap().unwrap();
        t.level_started_at = Some(Utc::now() - Duration::seconds(600));
        f.store.update_tournament(&t).await.unwrap();

        f.controller.blind_tick().await;

        let t = f.store.tournament_by_id(t.id).await.unwrap().unwrap();
        assert_eq!(t.current_level, 1);
        let tables = f.store.tables_for_tournament(t.id).await.unwrap();
        assert_eq!(tables[0].small_blind, 20);
        assert_eq!(tables[0].big_blind, 40);

        // The second level is the last; it never advances again.
        let mut t = t;
        t.level_started_at = Some(Utc::now() - Duration::seconds(6_000));
        f.store.update_tournament(&t).await.unwrap();
        f.controller.blind_tick().await;
        let t = f.store.tournament_by_id(t.id).await.unwrap().unwrap();
        assert_eq!(t.current_level, 1);
    }

    #[tokio::test]
    async fn pause_and_resume_track_paused_time() {
        let (f, _rx) = fixture();
        let creator = f.store.create_user("host", "Host", 1_000).await.unwrap();
        let t = f.controller.create(creator.id, params()).await.unwrap();
        for i in 0..2 {
            let u = f
                .store
                .create_user(&format!("p{i}"), &format!("P{i}"), 500)
                .await
                .unwrap();
            f.controller.register(u.id, &t.tournament_code).await.unwrap();
        }
        f.controller.force_start(t.id).await.unwrap();

        f.controller.pause(t.id).await.unwrap();
        let paused = f.store.tournament_by_id(t.id).await.unwrap().unwrap();
        assert_eq!(paused.status, TournamentStatus::Paused);
        assert!(paused.paused_at.is_some());

        let tables = f.store.tables_for_tournament(t.id).await.unwrap();
        let engine = f.manager.table(tables[0].id).unwrap();
        assert_eq!(engine.status(), holdem_engine::TableStatus::Paused);

        f.controller.resume(t.id).await.unwrap();
        let resumed = f.store.tournament_by_id(t.id).await.unwrap().unwrap();
        assert_eq!(resumed.status, TournamentStatus::InProgress);
        assert!(resumed.resumed_at.is_some());
        assert!(resumed.total_paused_seconds >= 0);
        assert_eq!(engine.status(), holdem_engine::TableStatus::Playing);
    }

    #[tokio::test]
    async fn heads_up_tournament_runs_to_payout() {
        let (f, rx) = fixture();
        tokio::spawn(f.manager.clone().run_events(rx));

        let creator = f.store.create_user("host", "Host", 1_000).await.unwrap();
        let t = f.controller.create(creator.id, params()).await.unwrap();
        let a = f.store.create_user("a", "A", 1_000).await.unwrap();
        let b = f.store.create_user("b", "B", 1_000).await.unwrap();
        f.controller.register(a.id, &t.tournament_code).await.unwrap();
        f.controller.register(b.id, &t.tournament_code).await.unwrap();
        f.controller.force_start(t.id).await.unwrap();

        // Shove every decision until one player holds all the chips. The
        // controller then finishes the tournament through its hooks.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        loop {
            if std::time::Instant::now() > deadline {
                panic!("tournament did not finish");
            }
            let record = f.store.tournament_by_id(t.id).await.unwrap().unwrap();
            if record.status == TournamentStatus::Completed {
                break;
            }
            let tables = f.store.tables_for_tournament(t.id).await.unwrap();
            let mut acted = false;
            for row in &tables {
                let Some(engine) = f.manager.table(row.id) else {
                    continue;
                };
                if let Some(hand) = engine.state_for(None).current_hand {
                    if let Some(turn) = hand.current_turn {
                        let _ = engine.process_action(
                            turn,
                            holdem_engine::ActionKind::AllIn,
                            0,
                        );
                        acted = true;
                    }
                }
            }
            if !acted {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            } else {
                tokio::task::yield_now().await;
            }
        }

        let record = f.store.tournament_by_id(t.id).await.unwrap().unwrap();
        assert!(record.prizes_distributed);
        assert!(record.completed_at.is_some());

        let players = f.store.tournament_players(t.id).await.unwrap();
        let mut positions: Vec<i32> =
            players.iter().filter_map(|p| p.final_position).collect();
        positions.sort_unstable();
        assert_eq!(positions, vec![1, 2]);

        // Winner takes the whole 200-chip pool; totals conserve.
        let winner = players
            .iter()
            .find(|p| p.final_position == Some(1))
            .unwrap();
        assert_eq!(winner.prize_amount, 200);
        let balance_a = f.ledger.balance(a.id).await.unwrap();
        let balance_b = f.ledger.balance(b.id).await.unwrap();
        assert_eq!(balance_a + balance_b, 2_000);
        assert_eq!(balance_a.max(balance_b), 1_100);
        assert_eq!(balance_a.min(balance_b), 900);
    }
}
