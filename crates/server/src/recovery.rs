//! Crash recovery: rebuild the live engine map from durable state.
//!
//! Mid-hand state is never persisted, so recovery cancels open hand rows
//! and rehydrates every active table at its last hand boundary. Stack
//! conservation is bounded by the last hand-complete sync: at most one
//! in-flight hand's committed bets can be lost.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use holdem_engine::{GameKind, TableConfig};
use tracing::{info, warn};

use crate::error::AppError;
use crate::manager::TableManager;
use crate::store::{Store, TableRecord, TableStatusColumn, TournamentStatus};

const ACTION_TIMEOUT_SECONDS: i64 = 30;

/// Grace period for clients to reconnect before rehydrated tables deal.
pub const RECONNECT_GRACE: Duration = Duration::from_secs(3);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub tables: usize,
    pub tournaments: usize,
    pub seats: usize,
    pub cancelled_hands: u64,
}

pub struct Recovery {
    store: Arc<dyn Store>,
    manager: Arc<TableManager>,
}

impl Recovery {
    pub fn new(store: Arc<dyn Store>, manager: Arc<TableManager>) -> Self {
        Recovery { store, manager }
    }

    pub async fn recover(&self) -> Result<RecoveryStats, AppError> {
        let cancelled_hands = self.store.cancel_incomplete_hands().await?;

        let rows = self
            .store
            .tables_with_status(&[
                TableStatusColumn::Waiting,
                TableStatusColumn::Playing,
                TableStatusColumn::Paused,
            ])
            .await?;

        let mut stats = RecoveryStats {
            cancelled_hands,
            ..RecoveryStats::default()
        };
        let mut tournaments: HashSet<uuid::Uuid> = HashSet::new();

        for row in rows {
            let plan = match row.tournament_id {
                Some(tournament_id) => {
                    let Some(tournament) =
                        self.store.tournament_by_id(tournament_id).await?
                    else {
                        warn!(table_id = %row.id, "orphan tournament table skipped");
                        continue;
                    };
                    if !matches!(
                        tournament.status,
                        TournamentStatus::Starting
                            | TournamentStatus::InProgress
                            | TournamentStatus::Paused
                    ) {
                        continue;
                    }
                    // Blinds come from the tournament's current level, not
                    // the possibly-stale table row.
                    let Some(level) = tournament.current_blind_level().copied() else {
                        warn!(table_id = %row.id, "tournament has no blind level");
                        continue;
                    };
                    tournaments.insert(tournament_id);
                    Some((
                        TableConfig {
                            small_blind: level.small_blind as u64,
                            big_blind: level.big_blind as u64,
                            ante: level.ante as u64,
                            max_players: tournament.table_size as usize,
                            min_buy_in: tournament.starting_chips as u64,
                            max_buy_in: tournament.starting_chips as u64,
                            action_timeout: ChronoDuration::seconds(ACTION_TIMEOUT_SECONDS),
                        },
                        GameKind::Tournament,
                        tournament.status == TournamentStatus::Paused,
                    ))
                }
                None => {
                    if !matches!(
                        row.status,
                        TableStatusColumn::Waiting | TableStatusColumn::Playing
                    ) {
                        continue;
                    }
                    Some((
                        TableConfig {
                            small_blind: row.small_blind as u64,
                            big_blind: row.big_blind as u64,
                            ante: 0,
                            max_players: row.max_seats as usize,
                            min_buy_in: row.min_buy_in as u64,
                            max_buy_in: row.max_buy_in as u64,
                            action_timeout: ChronoDuration::seconds(ACTION_TIMEOUT_SECONDS),
                        },
                        GameKind::Cash,
                        false,
                    ))
                }
            };
            let Some((config, kind, paused)) = plan else {
                continue;
            };

            stats.seats += self.rehydrate_table(&row, config, kind, paused).await?;
            stats.tables += 1;
        }

        stats.tournaments = tournaments.len();
        info!(
            tables = stats.tables,
            tournaments = stats.tournaments,
            seats = stats.seats,
            cancelled_hands = stats.cancelled_hands,
            "recovery complete"
        );
        Ok(stats)
    }

    async fn rehydrate_table(
        &self,
        row: &TableRecord,
        config: TableConfig,
        kind: GameKind,
        paused: bool,
    ) -> Result<usize, AppError> {
        let engine = self.manager.install_table(row, config, kind);
        let mut restored = 0;
        for seat in self.store.active_seats(row.id).await? {
            let name = match self.store.user_by_id(seat.user_id).await? {
                Some(user) => user.display_name,
                None => format!("player-{}", seat.user_id),
            };
            match engine.restore_player(
                seat.user_id,
                &name,
                seat.seat_index as usize,
                seat.stack as u64,
            ) {
                Ok(()) => {
                    self.manager.note_seated(seat.user_id, row.id);
                    restored += 1;
                }
                Err(err) => {
                    warn!(table_id = %row.id, user_id = seat.user_id, %err, "seat not restored");
                }
            }
        }
        if paused {
            let _ = engine.pause();
        }
        Ok(restored)
    }

    /// After the reconnect grace, tables with enough funded players deal a
    /// fresh hand; the rest stay waiting.
    pub fn schedule_restart(&self, grace: Duration) {
        let manager = self.manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            for table_id in manager.live_table_ids() {
                match manager.check_and_start_game(table_id).await {
                    Ok(started) => {
                        info!(%table_id, started, "post-recovery start attempt");
                    }
                    Err(err) => warn!(%table_id, %err, "post-recovery start failed"),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ChipLedger;
    use crate::store::mem::MemStore;
    use crate::store::{GameKindColumn, SeatRecord, SeatStatusColumn};
    use chrono::Utc;
    use uuid::Uuid;

    async fn seeded_store() -> (Arc<MemStore>, Uuid, i64, i64) {
        let store = Arc::new(MemStore::new());
        let a = store.create_user("a", "A", 0).await.unwrap();
        let b = store.create_user("b", "B", 0).await.unwrap();

        let table_id = Uuid::new_v4();
        store
            .insert_table(&TableRecord {
                id: table_id,
                game_kind: GameKindColumn::Cash,
                status: TableStatusColumn::Playing,
                small_blind: 5,
                big_blind: 10,
                max_seats: 6,
                min_buy_in: 100,
                max_buy_in: 2_000,
                tournament_id: None,
                table_number: None,
                ready_to_start_at: None,
                created_at: Utc::now(),
                started_at: Some(Utc::now()),
                completed_at: None,
            })
            .await
            .unwrap();

        let mut txn = store.begin().await.unwrap();
        for (user_id, seat_index, stack) in [(a.id, 0, 450_i64), (b.id, 1, 700_i64)] {
            txn.insert_seat(&SeatRecord {
                table_id,
                user_id,
                seat_index,
                stack,
                status: SeatStatusColumn::Active,
                joined_at: Utc::now(),
                left_at: None,
            })
            .await
            .unwrap();
        }
        txn.commit().await.unwrap();

        (store, table_id, a.id, b.id)
    }

    #[tokio::test]
    async fn recovery_restores_seats_and_cancels_open_hands() {
        let (store, table_id, a, b) = seeded_store().await;

        // A hand was open when the process died.
        store
            .insert_hand(table_id, 7, 0, 0, 1)
            .await
            .unwrap();

        let ledger = Arc::new(ChipLedger::new(store.clone()));
        let (manager, _rx) = TableManager::new(store.clone(), ledger);
        let recovery = Recovery::new(store.clone(), manager.clone());

        let stats = recovery.recover().await.unwrap();
        assert_eq!(stats.tables, 1);
        assert_eq!(stats.seats, 2);
        assert_eq!(stats.cancelled_hands, 1);
        assert_eq!(stats.tournaments, 0);

        let engine = manager.table(table_id).expect("engine rehydrated");
        let mut occupancy = engine.occupancy();
        occupancy.sort_by_key(|(seat, _, _)| *seat);
        assert_eq!(occupancy, vec![(0, a, 450), (1, b, 700)]);

        // The mid-hand row is gone; a fresh hand can deal immediately.
        assert!(manager.check_and_start_game(table_id).await.unwrap());
        assert!(engine.hand_in_progress());
    }

    #[tokio::test]
    async fn completed_tables_stay_down() {
        let (store, table_id, _, _) = seeded_store().await;
        store
            .update_table_status(
                table_id,
                TableStatusColumn::Completed,
                None,
                Some(Utc::now()),
            )
            .await
            .unwrap();

        let ledger = Arc::new(ChipLedger::new(store.clone()));
        let (manager, _rx) = TableManager::new(store.clone(), ledger);
        let recovery = Recovery::new(store.clone(), manager.clone());

        let stats = recovery.recover().await.unwrap();
        assert_eq!(stats.tables, 0);
        assert!(manager.table(table_id).is_none());
    }
}
