//! Persisted row shapes. Column names and enum spellings are fixed wire
//! compatibility points; keep them in sync with the migrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub chips: i64,
    pub suspended: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    TournamentBuyIn,
    TournamentPrize,
    TournamentRefund,
    CashGameBuyIn,
    CashGameCashOut,
    AdminAdjustment,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::TournamentBuyIn => "tournament_buy_in",
            TransactionKind::TournamentPrize => "tournament_prize",
            TransactionKind::TournamentRefund => "tournament_refund",
            TransactionKind::CashGameBuyIn => "cash_game_buy_in",
            TransactionKind::CashGameCashOut => "cash_game_cash_out",
            TransactionKind::AdminAdjustment => "admin_adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tournament_buy_in" => Some(TransactionKind::TournamentBuyIn),
            "tournament_prize" => Some(TransactionKind::TournamentPrize),
            "tournament_refund" => Some(TransactionKind::TournamentRefund),
            "cash_game_buy_in" => Some(TransactionKind::CashGameBuyIn),
            "cash_game_cash_out" => Some(TransactionKind::CashGameCashOut),
            "admin_adjustment" => Some(TransactionKind::AdminAdjustment),
            _ => None,
        }
    }
}

/// Append-only audit row; one per balance mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct ChipTransactionRecord {
    pub id: i64,
    pub user_id: i64,
    /// Positive = credit, negative = debit.
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub kind: TransactionKind,
    pub reference_id: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKindColumn {
    Cash,
    Tournament,
}

impl GameKindColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            GameKindColumn::Cash => "cash",
            GameKindColumn::Tournament => "tournament",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(GameKindColumn::Cash),
            "tournament" => Some(GameKindColumn::Tournament),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatusColumn {
    Waiting,
    Playing,
    Paused,
    Completed,
}

impl TableStatusColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            TableStatusColumn::Waiting => "waiting",
            TableStatusColumn::Playing => "playing",
            TableStatusColumn::Paused => "paused",
            TableStatusColumn::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(TableStatusColumn::Waiting),
            "playing" => Some(TableStatusColumn::Playing),
            "paused" => Some(TableStatusColumn::Paused),
            "completed" => Some(TableStatusColumn::Completed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableRecord {
    pub id: Uuid,
    pub game_kind: GameKindColumn,
    pub status: TableStatusColumn,
    pub small_blind: i64,
    pub big_blind: i64,
    pub max_seats: i32,
    pub min_buy_in: i64,
    pub max_buy_in: i64,
    pub tournament_id: Option<Uuid>,
    pub table_number: Option<i32>,
    /// Countdown anchor: the table refuses to start before this instant.
    pub ready_to_start_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatusColumn {
    Active,
    SittingOut,
    Folded,
    Busted,
}

impl SeatStatusColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            SeatStatusColumn::Active => "active",
            SeatStatusColumn::SittingOut => "sitting_out",
            SeatStatusColumn::Folded => "folded",
            SeatStatusColumn::Busted => "busted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SeatStatusColumn::Active),
            "sitting_out" => Some(SeatStatusColumn::SittingOut),
            "folded" => Some(SeatStatusColumn::Folded),
            "busted" => Some(SeatStatusColumn::Busted),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SeatRecord {
    pub table_id: Uuid,
    pub user_id: i64,
    pub seat_index: i32,
    pub stack: i64,
    pub status: SeatStatusColumn,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HandRecord {
    pub id: i64,
    pub table_id: Uuid,
    pub hand_number: i64,
    pub dealer_position: i32,
    pub small_blind_position: i32,
    pub big_blind_position: i32,
    pub community_cards: serde_json::Value,
    pub total_pot: i64,
    pub winners: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HandActionRecord {
    pub id: i64,
    pub hand_id: i64,
    pub user_id: i64,
    pub action: String,
    pub amount: i64,
    pub betting_round: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only event log row; `sequence_number` is unique per hand so the
/// full history replays in order.
#[derive(Clone, Debug, PartialEq)]
pub struct GameEventRecord {
    pub id: i64,
    pub hand_id: i64,
    pub table_id: Uuid,
    pub event_type: String,
    pub user_id: Option<i64>,
    pub betting_round: Option<String>,
    pub action: Option<String>,
    pub amount: Option<i64>,
    pub metadata: serde_json::Value,
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    Registering,
    Starting,
    InProgress,
    Paused,
    Completed,
    Cancelled,
}

impl TournamentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TournamentStatus::Registering => "registering",
            TournamentStatus::Starting => "starting",
            TournamentStatus::InProgress => "in_progress",
            TournamentStatus::Paused => "paused",
            TournamentStatus::Completed => "completed",
            TournamentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "registering" => Some(TournamentStatus::Registering),
            "starting" => Some(TournamentStatus::Starting),
            "in_progress" => Some(TournamentStatus::InProgress),
            "paused" => Some(TournamentStatus::Paused),
            "completed" => Some(TournamentStatus::Completed),
            "cancelled" => Some(TournamentStatus::Cancelled),
            _ => None,
        }
    }
}

/// One level of a tournament blind schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindLevel {
    pub small_blind: i64,
    pub big_blind: i64,
    #[serde(default)]
    pub ante: i64,
    pub duration_seconds: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TournamentRecord {
    pub id: Uuid,
    /// 8-character shareable code, unique, ambiguous glyphs excluded.
    pub tournament_code: String,
    pub name: String,
    pub created_by: i64,
    pub status: TournamentStatus,
    pub buy_in: i64,
    pub starting_chips: i64,
    pub min_players: i32,
    pub max_players: i32,
    /// Seats per table, standard 9 or 6.
    pub table_size: i32,
    pub registration_closes_at: Option<DateTime<Utc>>,
    pub auto_start_delay_seconds: i64,
    pub blind_levels: Vec<BlindLevel>,
    /// Basis-point shares, position 1 first; must sum to exactly 10000.
    pub prize_structure: Vec<i64>,
    pub current_level: i32,
    pub level_started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub total_paused_seconds: i64,
    pub registration_completed_at: Option<DateTime<Utc>>,
    pub prizes_distributed: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TournamentRecord {
    pub fn current_blind_level(&self) -> Option<&BlindLevel> {
        self.blind_levels.get(self.current_level as usize)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TournamentPlayerRecord {
    pub tournament_id: Uuid,
    pub user_id: i64,
    /// 1 = winner; assigned in reverse elimination order.
    pub final_position: Option<i32>,
    pub chips_at_elimination: Option<i64>,
    pub prize_amount: i64,
    pub registered_at: DateTime<Utc>,
    pub eliminated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Waiting,
    Matched,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Matched => "matched",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(QueueStatus::Waiting),
            "matched" => Some(QueueStatus::Matched),
            "cancelled" => Some(QueueStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatchmakingEntryRecord {
    pub id: i64,
    pub user_id: i64,
    pub game_kind: GameKindColumn,
    pub queue_bucket: String,
    pub min_buy_in: i64,
    pub max_buy_in: i64,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
}
