//! Event vocabulary emitted by the table engine.
//!
//! Every state change produces one event in table order. The server funnels
//! these into the hand log and fans them out to subscribed clients; the
//! engine itself never blocks on a consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::deck::Card;
use crate::state::hand::BettingRound;
use crate::state::player::ActionKind;

/// One result line at hand completion.
///
/// A showdown produces a line for every player still in the hand: all of
/// their cards are revealed, and losing hands carry a zero amount. A hand
/// everyone folded ends with a single line, no reveal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub user_id: i64,
    pub amount: u64,
    /// Hand category label, absent when everyone else folded.
    pub hand_rank: Option<String>,
    /// Revealed hole cards, empty when the hand never reached showdown.
    pub hand_cards: Vec<Card>,
}

/// One table-scoped event with its hand context.
#[derive(Clone, Debug, Serialize)]
pub struct EngineEvent {
    pub table_id: Uuid,
    pub hand_number: u64,
    #[serde(flatten)]
    pub event: GameEvent,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameEvent {
    HandStart {
        dealer_position: usize,
        small_blind_position: usize,
        big_blind_position: usize,
    },
    BlindsPosted {
        small_blind: u64,
        big_blind: u64,
        ante: u64,
        pot: u64,
    },
    /// Per-player hole cards. Internal: persisted for the audit trail but
    /// never broadcast to other players.
    CardsDealt {
        user_id: i64,
        cards: [Card; 2],
    },
    ActionRequired {
        position: usize,
        user_id: i64,
        deadline: DateTime<Utc>,
        action_sequence: u64,
    },
    PlayerAction {
        user_id: i64,
        action: ActionKind,
        amount: u64,
        betting_round: BettingRound,
        action_sequence: u64,
    },
    RoundAdvanced {
        round: BettingRound,
        community: Vec<Card>,
        pot: u64,
    },
    HandComplete {
        winners: Vec<Winner>,
        community: Vec<Card>,
        pot: u64,
    },
    GameComplete {
        winner: i64,
        final_chips: u64,
        total_players: usize,
    },
}

impl GameEvent {
    /// Stable kind name used in the persisted event log.
    pub fn kind(&self) -> &'static str {
        match self {
            GameEvent::HandStart { .. } => "hand_start",
            GameEvent::BlindsPosted { .. } => "blinds_posted",
            GameEvent::CardsDealt { .. } => "card_dealt",
            GameEvent::ActionRequired { .. } => "action_required",
            GameEvent::PlayerAction { .. } => "player_action",
            GameEvent::RoundAdvanced { .. } => "round_advanced",
            GameEvent::HandComplete { .. } => "hand_complete",
            GameEvent::GameComplete { .. } => "game_complete",
        }
    }

    /// The acting or affected player, when the event has one.
    pub fn user_id(&self) -> Option<i64> {
        match self {
            GameEvent::CardsDealt { user_id, .. }
            | GameEvent::ActionRequired { user_id, .. }
            | GameEvent::PlayerAction { user_id, .. } => Some(*user_id),
            GameEvent::GameComplete { winner, .. } => Some(*winner),
            _ => None,
        }
    }
}
