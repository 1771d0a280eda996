//! Wire protocol: JSON frames, one per message, in a
//! `{ "type": ..., "payload": ... }` envelope.

use chrono::{DateTime, Utc};
use holdem_engine::{
    ActionKind, BettingRound, Card, SeatStatus, TableSnapshot, TableStatus, Winner,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages clients send to the bridge.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    SubscribeTable {
        table_id: Uuid,
    },
    GameAction {
        action: ActionKind,
        #[serde(default)]
        amount: u64,
        /// Client-generated idempotency key. Empty is tolerated for older
        /// clients and bypasses deduplication.
        #[serde(default)]
        request_id: String,
    },
    Ping,
}

/// One seat as a viewer sees it; `cards` only for the owner.
#[derive(Clone, Debug, Serialize)]
pub struct PlayerState {
    pub user_id: i64,
    pub name: String,
    pub seat_index: usize,
    pub stack: u64,
    pub bet: u64,
    pub status: SeatStatus,
    pub last_action: Option<ActionKind>,
    pub last_action_amount: u64,
    pub is_dealer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cards: Option<[Card; 2]>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TableStatePayload {
    pub table_id: Uuid,
    pub status: TableStatus,
    pub players: Vec<PlayerState>,
    pub community_cards: Vec<Card>,
    pub pot: u64,
    pub current_turn: Option<i64>,
    pub betting_round: Option<BettingRound>,
    pub current_bet: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_deadline: Option<DateTime<Utc>>,
    pub action_sequence: u64,
    /// Countdown anchor for tables waiting on a matchmaking start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_deadline: Option<DateTime<Utc>>,
    pub winners: Vec<Winner>,
}

impl TableStatePayload {
    pub fn from_snapshot(
        snapshot: TableSnapshot,
        start_deadline: Option<DateTime<Utc>>,
    ) -> Self {
        let players = snapshot
            .players
            .into_iter()
            .map(|p| PlayerState {
                user_id: p.user_id,
                name: p.name,
                seat_index: p.seat_index,
                stack: p.stack,
                bet: p.bet,
                status: p.status,
                last_action: p.last_action,
                last_action_amount: p.last_action_amount,
                is_dealer: p.is_dealer,
                cards: p.cards,
            })
            .collect();

        let (community_cards, pot, current_turn, betting_round, current_bet, deadline, seq) =
            match snapshot.current_hand {
                Some(hand) => (
                    hand.community_cards,
                    hand.pot.main + hand.pot.side.iter().sum::<u64>(),
                    hand.current_turn,
                    Some(hand.betting_round),
                    hand.current_bet,
                    hand.action_deadline,
                    hand.action_sequence,
                ),
                None => (Vec::new(), 0, None, None, 0, None, 0),
            };

        TableStatePayload {
            table_id: snapshot.table_id,
            status: snapshot.status,
            players,
            community_cards,
            pot,
            current_turn,
            betting_round,
            current_bet,
            action_deadline: deadline,
            action_sequence: seq,
            start_deadline,
            winners: snapshot.winners,
        }
    }
}

/// Messages the bridge sends to clients.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong,
    TableState(TableStatePayload),
    GameUpdate(TableStatePayload),
    HandComplete {
        table_id: Uuid,
        hand_number: u64,
        winners: Vec<Winner>,
        community_cards: Vec<Card>,
        pot: u64,
    },
    GameComplete {
        table_id: Uuid,
        winner: i64,
        final_chips: u64,
        total_players: usize,
    },
    MatchFound {
        table_id: Uuid,
        game_mode: String,
        start_deadline: DateTime<Utc>,
    },
    Error {
        message: String,
    },
    TournamentStarted {
        tournament_id: Uuid,
        name: String,
        table_count: usize,
        player_count: usize,
    },
    TournamentUpdate {
        tournament_id: Uuid,
        status: String,
        players_remaining: usize,
        current_level: i32,
    },
    TournamentPaused {
        tournament_id: Uuid,
    },
    TournamentResumed {
        tournament_id: Uuid,
    },
    TournamentComplete {
        tournament_id: Uuid,
        winner: i64,
        prize_pool: i64,
    },
    BlindLevelIncreased {
        tournament_id: Uuid,
        level: i32,
        small_blind: i64,
        big_blind: i64,
        ante: i64,
    },
    PlayerEliminated {
        tournament_id: Uuid,
        user_id: i64,
        final_position: i32,
    },
    PrizeAwarded {
        tournament_id: Uuid,
        user_id: i64,
        position: i32,
        amount: i64,
    },
    TablesConsolidated {
        tournament_id: Uuid,
        table_count: usize,
    },
    TournamentTableComplete {
        tournament_id: Uuid,
        table_id: Uuid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frames_parse_from_the_envelope() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"subscribe_table","payload":{"table_id":"7c0c754d-6cb7-4fc2-9687-24e7be8d5b1f"}}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMessage::SubscribeTable { .. }));

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"game_action","payload":{"action":"raise","amount":60,"request_id":"r-1"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::GameAction {
                action,
                amount,
                request_id,
            } => {
                assert_eq!(action, ActionKind::Raise);
                assert_eq!(amount, 60);
                assert_eq!(request_id, "r-1");
            }
            other => panic!("unexpected {other:?}"),
        }

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn game_action_defaults_apply() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"game_action","payload":{"action":"fold"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::GameAction {
                amount, request_id, ..
            } => {
                assert_eq!(amount, 0);
                assert!(request_id.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn outbound_frames_carry_the_envelope() {
        let json = serde_json::to_value(&ServerMessage::Pong).unwrap();
        assert_eq!(json["type"], "pong");

        let json = serde_json::to_value(&ServerMessage::Error {
            message: "nope".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["payload"]["message"], "nope");
    }

    #[test]
    fn allin_action_spelling_matches_the_wire() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"game_action","payload":{"action":"allin"}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::GameAction {
                action: ActionKind::AllIn,
                ..
            }
        ));
    }
}
