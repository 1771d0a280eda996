//! The per-table state machine.
//!
//! One `Table` owns everything about one table's hands: seats, the deck,
//! betting rounds, pot resolution and showdown. All mutation goes through a
//! single write lock, so actions on a table are totally ordered; reads take
//! deep-copied snapshots. The event sink is invoked under the lock and must
//! neither block nor call back into the table.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{BOARD_SIZE, MIN_PLAYERS};
use crate::error::EngineError;
use crate::events::{EngineEvent, GameEvent, Winner};
use crate::state::deck::{Card, Deck};
use crate::state::hand::{BettingRound, HandState};
use crate::state::hand_eval::{evaluate_seven, HandScore};
use crate::state::player::{ActionKind, Seat, SeatStatus};
use crate::state::pot::{build_pots, uncalled_bet};

/// What kind of table this is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Cash,
    Tournament,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Waiting,
    Playing,
    Paused,
    Completed,
}

/// Static table parameters. Blind changes staged mid-hand apply at the
/// next hand boundary.
#[derive(Clone, Debug)]
pub struct TableConfig {
    pub small_blind: u64,
    pub big_blind: u64,
    pub ante: u64,
    pub max_players: usize,
    pub min_buy_in: u64,
    pub max_buy_in: u64,
    pub action_timeout: Duration,
}

/// Sink for engine events. Called with the table write lock held.
pub type EventSink = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Result of a leave request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Seat freed now; the stack goes back to the player's balance.
    Removed { stack: u64 },
    /// Player is in the current hand; removal applies at the hand boundary.
    Deferred,
}

/// A player who lost their last chip in the previous hand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BustRecord {
    pub user_id: i64,
    pub seat_index: usize,
    pub stack_at_hand_start: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct SeatSnapshot {
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
pub struct PotSnapshot {
    pub main: u64,
    pub side: Vec<u64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HandSnapshot {
    pub hand_number: u64,
    pub community_cards: Vec<Card>,
    pub betting_round: BettingRound,
    pub current_bet: u64,
    pub pot: PotSnapshot,
    pub current_position: Option<usize>,
    pub current_turn: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_deadline: Option<DateTime<Utc>>,
    pub action_sequence: u64,
}

/// Deep-copied view of the table for one viewer.
#[derive(Clone, Debug, Serialize)]
pub struct TableSnapshot {
    pub table_id: Uuid,
    pub game_kind: GameKind,
    pub status: TableStatus,
    pub small_blind: u64,
    pub big_blind: u64,
    pub players: Vec<SeatSnapshot>,
    pub current_hand: Option<HandSnapshot>,
    pub winners: Vec<Winner>,
}

struct Inner {
    config: TableConfig,
    staged_blinds: Option<(u64, u64, u64)>,
    status: TableStatus,
    seats: Vec<Option<Seat>>,
    button: usize,
    hand: Option<HandState>,
    hand_counter: u64,
    last_winners: Vec<Winner>,
    last_hand_busts: Vec<BustRecord>,
    /// Hole cards revealed at the last showdown, public until the next
    /// hand deals. Keyed by user so a reseat cannot inherit a reveal.
    showdown_reveals: Vec<(i64, [Card; 2])>,
    paused_remaining: Option<Duration>,
    rng: StdRng,
}

pub struct Table {
    id: Uuid,
    kind: GameKind,
    sink: EventSink,
    inner: RwLock<Inner>,
}

impl Table {
    pub fn new(id: Uuid, kind: GameKind, config: TableConfig, sink: EventSink) -> Self {
        Self::with_seeded_rng(id, kind, config, sink, StdRng::from_entropy())
    }

    /// Deterministic construction for tests: same seed, same deals.
    pub fn with_rng(
        id: Uuid,
        kind: GameKind,
        config: TableConfig,
        sink: EventSink,
        seed: u64,
    ) -> Self {
        Self::with_seeded_rng(id, kind, config, sink, StdRng::seed_from_u64(seed))
    }

    fn with_seeded_rng(
        id: Uuid,
        kind: GameKind,
        config: TableConfig,
        sink: EventSink,
        rng: StdRng,
    ) -> Self {
        let seats = (0..config.max_players).map(|_| None).collect();
        // Start the button on the last seat so the first hand's advance
        // lands on the lowest occupied index.
        let button = config.max_players.saturating_sub(1);
        Table {
            id,
            kind,
            sink,
            inner: RwLock::new(Inner {
                config,
                staged_blinds: None,
                status: TableStatus::Waiting,
                seats,
                button,
                hand: None,
                hand_counter: 0,
                last_winners: Vec::new(),
                last_hand_busts: Vec::new(),
                showdown_reveals: Vec::new(),
                paused_remaining: None,
                rng,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> GameKind {
        self.kind
    }

    pub fn status(&self) -> TableStatus {
        self.inner.read().status
    }

    pub fn hand_in_progress(&self) -> bool {
        self.inner.read().hand.is_some()
    }

    pub fn current_hand_number(&self) -> Option<u64> {
        self.inner.read().hand.as_ref().map(|h| h.hand_number)
    }

    /// (seat index, user id, stack) for every occupied seat.
    pub fn occupancy(&self) -> Vec<(usize, i64, u64)> {
        self.inner
            .read()
            .seats
            .iter()
            .flatten()
            .map(|s| (s.seat_index, s.user_id, s.stack))
            .collect()
    }

    /// Dealer position of the current or most recent hand.
    pub fn button(&self) -> usize {
        self.inner.read().button
    }

    /// Players who busted in the most recent completed hand.
    pub fn last_hand_busts(&self) -> Vec<BustRecord> {
        self.inner.read().last_hand_busts.clone()
    }

    /// Players whose leave request waits for the hand boundary.
    pub fn pending_removals(&self) -> Vec<i64> {
        self.inner
            .read()
            .seats
            .iter()
            .flatten()
            .filter(|s| s.pending_removal)
            .map(|s| s.user_id)
            .collect()
    }

    /// Seat a player. Takes effect at the next hand boundary when a hand
    /// is live.
    pub fn add_player(
        &self,
        user_id: i64,
        name: &str,
        seat_index: usize,
        buy_in: u64,
    ) -> Result<(), EngineError> {
        let mut guard = self.inner.write();
        let g = &mut *guard;

        if g.status == TableStatus::Completed {
            return Err(EngineError::GameOver);
        }
        if seat_index >= g.config.max_players {
            return Err(EngineError::InvalidSeatIndex);
        }
        if g.seats[seat_index].is_some() {
            return Err(EngineError::SeatOccupied);
        }
        if g.seats.iter().flatten().any(|s| s.user_id == user_id) {
            return Err(EngineError::AlreadySeated);
        }
        if buy_in < g.config.min_buy_in || buy_in > g.config.max_buy_in {
            return Err(EngineError::InvalidBuyIn);
        }

        g.seats[seat_index] = Some(Seat::new(user_id, name.to_string(), seat_index, buy_in));
        Ok(())
    }

    /// Re-seat a player from a persisted stack. Used when rehydrating a
    /// table after a restart; skips the buy-in bounds a fresh join must
    /// satisfy, since a live stack can drift outside them.
    pub fn restore_player(
        &self,
        user_id: i64,
        name: &str,
        seat_index: usize,
        stack: u64,
    ) -> Result<(), EngineError> {
        let mut guard = self.inner.write();
        let g = &mut *guard;

        if g.status == TableStatus::Completed {
            return Err(EngineError::GameOver);
        }
        if seat_index >= g.config.max_players {
            return Err(EngineError::InvalidSeatIndex);
        }
        if g.seats[seat_index].is_some() {
            return Err(EngineError::SeatOccupied);
        }
        if g.seats.iter().flatten().any(|s| s.user_id == user_id) {
            return Err(EngineError::AlreadySeated);
        }

        g.seats[seat_index] = Some(Seat::new(user_id, name.to_string(), seat_index, stack));
        Ok(())
    }

    /// Remove a player. Mid-hand this auto-folds and defers the removal to
    /// the hand boundary.
    pub fn remove_player(&self, user_id: i64) -> Result<RemoveOutcome, EngineError> {
        let mut guard = self.inner.write();
        let g = &mut *guard;

        let pos = g
            .seats
            .iter()
            .flatten()
            .find(|s| s.user_id == user_id)
            .map(|s| s.seat_index)
            .ok_or(EngineError::PlayerNotAtTable)?;

        let in_live_hand = g.hand.is_some()
            && g.seats[pos].as_ref().is_some_and(|s| s.in_hand());

        if in_live_hand {
            if let Some(seat) = g.seats[pos].as_mut() {
                seat.pending_removal = true;
            }
            if g.seats[pos].as_ref().is_some_and(|s| s.can_act()) {
                self.force_fold(g, pos);
            }
            return Ok(RemoveOutcome::Deferred);
        }

        let stack = g.seats[pos].as_ref().map(|s| s.stack).unwrap_or(0);
        g.seats[pos] = None;
        Ok(RemoveOutcome::Removed { stack })
    }

    /// Stage a blind change; it applies at the next hand boundary, or
    /// immediately when no hand is live.
    pub fn set_blinds(&self, small_blind: u64, big_blind: u64, ante: u64) {
        let mut guard = self.inner.write();
        let g = &mut *guard;
        if g.hand.is_some() {
            g.staged_blinds = Some((small_blind, big_blind, ante));
        } else {
            g.config.small_blind = small_blind;
            g.config.big_blind = big_blind;
            g.config.ante = ante;
        }
    }

    /// Start the next hand.
    pub fn start_game(&self) -> Result<(), EngineError> {
        let mut guard = self.inner.write();
        let g = &mut *guard;

        match g.status {
            TableStatus::Completed => return Err(EngineError::GameOver),
            TableStatus::Paused => return Err(EngineError::TablePaused),
            _ => {}
        }
        if g.hand.is_some() {
            return Err(EngineError::HandInProgress);
        }

        if let Some((sb, bb, ante)) = g.staged_blinds.take() {
            g.config.small_blind = sb;
            g.config.big_blind = bb;
            g.config.ante = ante;
        }

        for seat in g.seats.iter_mut().flatten() {
            seat.reset_for_hand();
        }

        let eligible: Vec<usize> = g
            .seats
            .iter()
            .flatten()
            .filter(|s| s.can_be_dealt())
            .map(|s| s.seat_index)
            .collect();
        if eligible.len() < MIN_PLAYERS {
            return Err(EngineError::NotEnoughPlayers);
        }

        g.hand_counter += 1;
        let hand_number = g.hand_counter;

        let dealer = next_in(&eligible, g.button, g.config.max_players);
        g.button = dealer;

        // Heads-up: the dealer posts the small blind and acts first preflop.
        let (sb_pos, bb_pos) = if eligible.len() == 2 {
            (dealer, next_in(&eligible, dealer, g.config.max_players))
        } else {
            let sb = next_in(&eligible, dealer, g.config.max_players);
            (sb, next_in(&eligible, sb, g.config.max_players))
        };

        for &idx in &eligible {
            if let Some(seat) = g.seats[idx].as_mut() {
                seat.status = SeatStatus::Playing;
                seat.stack_at_hand_start = seat.stack;
            }
        }

        let deck = Deck::shuffled(&mut g.rng);
        g.hand = Some(HandState {
            hand_number,
            round: BettingRound::Preflop,
            deck,
            community: Vec::with_capacity(BOARD_SIZE),
            current_bet: g.config.big_blind,
            last_raise: 0,
            dealer,
            small_blind_pos: sb_pos,
            big_blind_pos: bb_pos,
            action_on: None,
            action_seq: 0,
            action_deadline: None,
        });
        g.status = TableStatus::Playing;
        g.last_winners.clear();
        g.showdown_reveals.clear();

        self.emit(
            hand_number,
            GameEvent::HandStart {
                dealer_position: dealer,
                small_blind_position: sb_pos,
                big_blind_position: bb_pos,
            },
        );

        let ante = g.config.ante;
        if ante > 0 {
            for &idx in &eligible {
                if let Some(seat) = g.seats[idx].as_mut() {
                    seat.post_ante(ante);
                }
            }
        }
        if let Some(seat) = g.seats[sb_pos].as_mut() {
            seat.place_bet(g.config.small_blind);
        }
        if let Some(seat) = g.seats[bb_pos].as_mut() {
            seat.place_bet(g.config.big_blind);
        }

        let pot = g
            .hand
            .as_ref()
            .map(|h| h.pot_total(&g.seats))
            .unwrap_or(0);
        self.emit(
            hand_number,
            GameEvent::BlindsPosted {
                small_blind: g.config.small_blind,
                big_blind: g.config.big_blind,
                ante,
                pot,
            },
        );

        // Two hole cards each, dealt starting left of the dealer.
        let order = deal_order(&eligible, dealer, g.config.max_players);
        for &idx in &order {
            let (c1, c2) = {
                let hand = g.hand.as_mut().ok_or(EngineError::NoHandInProgress)?;
                let c1 = hand.deck.deal().ok_or(EngineError::DeckExhausted)?;
                let c2 = hand.deck.deal().ok_or(EngineError::DeckExhausted)?;
                (c1, c2)
            };
            if let Some(seat) = g.seats[idx].as_mut() {
                seat.hole_cards = Some([c1, c2]);
                self.emit(
                    hand_number,
                    GameEvent::CardsDealt {
                        user_id: seat.user_id,
                        cards: [c1, c2],
                    },
                );
            }
        }

        // First decision goes left of the big blind; if the blinds already
        // put everyone all-in, run the board out instead.
        let first = g
            .hand
            .as_ref()
            .and_then(|h| h.next_playing_after(&g.seats, bb_pos));
        match first {
            Some(pos) => self.request_action(g, pos),
            None => self.advance_rounds(g),
        }
        Ok(())
    }

    /// Apply a player decision. Must come from the seat whose turn it is.
    pub fn process_action(
        &self,
        user_id: i64,
        action: ActionKind,
        amount: u64,
    ) -> Result<(), EngineError> {
        let mut guard = self.inner.write();
        let g = &mut *guard;

        match g.status {
            TableStatus::Paused => return Err(EngineError::TablePaused),
            TableStatus::Completed => return Err(EngineError::GameOver),
            _ => {}
        }
        let hand = g.hand.as_ref().ok_or(EngineError::NoHandInProgress)?;
        let pos = hand.action_on.ok_or(EngineError::OutOfTurn)?;
        let seat = g.seats[pos].as_ref().ok_or(EngineError::OutOfTurn)?;
        if seat.user_id != user_id {
            return Err(EngineError::OutOfTurn);
        }
        if !seat.can_act() {
            return Err(EngineError::PlayerCannotAct);
        }

        self.apply_action(g, pos, action, amount)
    }

    /// Fold-or-check a player whose decision timer elapsed. The
    /// (hand number, action sequence) pair identifies the pending decision;
    /// a mismatch means the player acted first and the timeout is stale.
    pub fn handle_timeout(
        &self,
        user_id: i64,
        hand_number: u64,
        action_seq: u64,
    ) -> Result<(), EngineError> {
        let mut guard = self.inner.write();
        let g = &mut *guard;

        if g.status != TableStatus::Playing {
            return Err(EngineError::StaleTimeout);
        }
        let hand = g.hand.as_ref().ok_or(EngineError::StaleTimeout)?;
        if hand.hand_number != hand_number || hand.action_seq != action_seq {
            return Err(EngineError::StaleTimeout);
        }
        let pos = hand.action_on.ok_or(EngineError::StaleTimeout)?;
        let seat = g.seats[pos].as_ref().ok_or(EngineError::StaleTimeout)?;
        if seat.user_id != user_id || !seat.can_act() {
            return Err(EngineError::StaleTimeout);
        }
        // A pause shifts the deadline; a timer armed before the shift must
        // not fire early.
        match hand.action_deadline {
            Some(deadline) if Utc::now() >= deadline => {}
            _ => return Err(EngineError::StaleTimeout),
        }

        let to_call = hand.current_bet.saturating_sub(seat.round_bet);
        let action = if to_call > 0 {
            ActionKind::Fold
        } else {
            ActionKind::Check
        };
        self.apply_action(g, pos, action, 0)
    }

    /// Freeze the action timer without losing round state.
    pub fn pause(&self) -> Result<(), EngineError> {
        let mut guard = self.inner.write();
        let g = &mut *guard;
        match g.status {
            TableStatus::Completed => return Err(EngineError::GameOver),
            TableStatus::Paused => return Ok(()),
            _ => {}
        }
        g.status = TableStatus::Paused;
        if let Some(hand) = g.hand.as_mut() {
            if let Some(deadline) = hand.action_deadline.take() {
                g.paused_remaining = Some(deadline - Utc::now());
            }
        }
        Ok(())
    }

    /// Unfreeze; the pending decision gets its remaining time back.
    pub fn resume(&self) -> Result<(), EngineError> {
        let mut guard = self.inner.write();
        let g = &mut *guard;
        if g.status != TableStatus::Paused {
            return Ok(());
        }
        g.status = if g.hand.is_some() {
            TableStatus::Playing
        } else {
            TableStatus::Waiting
        };
        let remaining = g.paused_remaining.take();
        if let Some(hand) = g.hand.as_mut() {
            if let Some(remaining) = remaining {
                let deadline = Utc::now() + remaining.max(Duration::zero());
                hand.action_deadline = Some(deadline);
                if let Some(pos) = hand.action_on {
                    let user_id = g.seats[pos].as_ref().map(|s| s.user_id).unwrap_or(0);
                    let seq = hand.action_seq;
                    let hand_number = hand.hand_number;
                    self.emit(
                        hand_number,
                        GameEvent::ActionRequired {
                            position: pos,
                            user_id,
                            deadline,
                            action_sequence: seq,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Snapshot for one viewer. While a hand runs, hole cards are visible
    /// only to their owner; once it reaches showdown every hand still in
    /// contention is public, and stays public until the next deal.
    pub fn state_for(&self, viewer: Option<i64>) -> TableSnapshot {
        let g = self.inner.read();
        let players = g
            .seats
            .iter()
            .flatten()
            .map(|s| SeatSnapshot {
                user_id: s.user_id,
                name: s.name.clone(),
                seat_index: s.seat_index,
                stack: s.stack,
                bet: s.round_bet,
                status: s.status,
                last_action: s.last_action,
                last_action_amount: s.last_action_amount,
                is_dealer: g.hand.as_ref().map_or(s.seat_index == g.button, |h| {
                    s.seat_index == h.dealer
                }),
                cards: match (&g.hand, viewer) {
                    (Some(h), _) if h.round == BettingRound::Showdown && s.in_hand() => {
                        s.hole_cards
                    }
                    (Some(_), Some(v)) if v == s.user_id => s.hole_cards,
                    (Some(_), _) => None,
                    // Between hands the last showdown's reveals stay
                    // public, folded hands stay hidden.
                    (None, _) => g
                        .showdown_reveals
                        .iter()
                        .find(|(user_id, _)| *user_id == s.user_id)
                        .map(|&(_, cards)| cards),
                },
            })
            .collect();

        let current_hand = g.hand.as_ref().map(|h| {
            let pots = build_pots(&g.seats);
            let main = pots.first().map(|p| p.amount).unwrap_or(0);
            let side = pots.iter().skip(1).map(|p| p.amount).collect();
            HandSnapshot {
                hand_number: h.hand_number,
                community_cards: h.community.clone(),
                betting_round: h.round,
                current_bet: h.current_bet,
                pot: PotSnapshot { main, side },
                current_position: h.action_on,
                current_turn: h
                    .action_on
                    .and_then(|p| g.seats[p].as_ref())
                    .map(|s| s.user_id),
                action_deadline: h.action_deadline,
                action_sequence: h.action_seq,
            }
        });

        TableSnapshot {
            table_id: self.id,
            game_kind: self.kind,
            status: g.status,
            small_blind: g.config.small_blind,
            big_blind: g.config.big_blind,
            players,
            current_hand,
            winners: g.last_winners.clone(),
        }
    }

    fn emit(&self, hand_number: u64, event: GameEvent) {
        (self.sink)(EngineEvent {
            table_id: self.id,
            hand_number,
            event,
        });
    }

    fn apply_action(
        &self,
        g: &mut Inner,
        pos: usize,
        action: ActionKind,
        amount: u64,
    ) -> Result<(), EngineError> {
        let hand = g.hand.as_mut().ok_or(EngineError::NoHandInProgress)?;
        let seat = g.seats[pos].as_mut().ok_or(EngineError::OutOfTurn)?;

        let to_call = hand.current_bet.saturating_sub(seat.round_bet);
        let big_blind = g.config.big_blind;
        let bet_level_before = hand.current_bet;

        let (recorded, recorded_amount) = match action {
            ActionKind::Fold => {
                seat.fold();
                (ActionKind::Fold, 0)
            }
            ActionKind::Check => {
                if to_call > 0 {
                    return Err(EngineError::CannotCheck);
                }
                (ActionKind::Check, 0)
            }
            ActionKind::Call => {
                if to_call == 0 {
                    return Err(EngineError::NothingToCall);
                }
                let actual = seat.place_bet(to_call);
                let kind = if seat.status == SeatStatus::AllIn {
                    ActionKind::AllIn
                } else {
                    ActionKind::Call
                };
                (kind, actual)
            }
            ActionKind::Raise => {
                let raise_to = amount;
                if raise_to <= hand.current_bet || raise_to <= seat.round_bet {
                    return Err(EngineError::RaiseTooSmall);
                }
                let needed = raise_to - seat.round_bet;
                if needed >= seat.stack {
                    // Going all-in is exempt from the minimum-raise rule.
                    seat.place_bet(seat.stack);
                    let level = seat.round_bet;
                    raise_level(hand, level, big_blind);
                    (ActionKind::AllIn, level)
                } else {
                    let min_to = hand.current_bet + big_blind.max(hand.last_raise);
                    if raise_to < min_to {
                        return Err(EngineError::RaiseTooSmall);
                    }
                    seat.place_bet(needed);
                    raise_level(hand, raise_to, big_blind);
                    (ActionKind::Raise, raise_to)
                }
            }
            ActionKind::AllIn => {
                if seat.stack == 0 {
                    return Err(EngineError::PlayerCannotAct);
                }
                let actual = seat.place_bet(seat.stack);
                let level = seat.round_bet;
                if level > hand.current_bet {
                    raise_level(hand, level, big_blind);
                }
                (ActionKind::AllIn, actual)
            }
        };

        seat.has_acted = true;
        seat.last_action = Some(recorded);
        seat.last_action_amount = recorded_amount;
        hand.action_seq += 1;

        // A higher bet level re-opens the action for everyone behind.
        if hand.current_bet > bet_level_before {
            let level = hand.current_bet;
            for seat in g.seats.iter_mut().flatten() {
                if seat.seat_index != pos && seat.can_act() && seat.round_bet < level {
                    seat.has_acted = false;
                }
            }
        }

        let round = hand.round;
        let seq = hand.action_seq;
        let hand_number = hand.hand_number;
        let user_id = g.seats[pos].as_ref().map(|s| s.user_id).unwrap_or(0);
        self.emit(
            hand_number,
            GameEvent::PlayerAction {
                user_id,
                action: recorded,
                amount: recorded_amount,
                betting_round: round,
                action_sequence: seq,
            },
        );

        self.post_action_flow(g, pos);
        Ok(())
    }

    /// Fold a seat that is leaving mid-hand, possibly out of turn.
    fn force_fold(&self, g: &mut Inner, pos: usize) {
        let Some(hand) = g.hand.as_mut() else {
            return;
        };
        let Some(seat) = g.seats[pos].as_mut() else {
            return;
        };
        if !seat.can_act() {
            return;
        }
        seat.fold();
        seat.has_acted = true;
        seat.last_action = Some(ActionKind::Fold);
        seat.last_action_amount = 0;
        hand.action_seq += 1;

        let round = hand.round;
        let seq = hand.action_seq;
        let hand_number = hand.hand_number;
        let held_action = hand.action_on == Some(pos);
        let user_id = g.seats[pos].as_ref().map(|s| s.user_id).unwrap_or(0);
        self.emit(
            hand_number,
            GameEvent::PlayerAction {
                user_id,
                action: ActionKind::Fold,
                amount: 0,
                betting_round: round,
                action_sequence: seq,
            },
        );

        if held_action {
            self.post_action_flow(g, pos);
            return;
        }
        // An out-of-turn fold never moves the action, but it can end the
        // hand or complete the round.
        let Some(hand) = g.hand.as_ref() else {
            return;
        };
        if hand.in_hand_count(&g.seats) <= 1 {
            self.settle_fold_win(g);
        } else if hand.betting_complete(&g.seats) {
            self.advance_rounds(g);
        }
    }

    fn post_action_flow(&self, g: &mut Inner, acted: usize) {
        let Some(hand) = g.hand.as_ref() else {
            return;
        };
        if hand.in_hand_count(&g.seats) <= 1 {
            self.settle_fold_win(g);
            return;
        }
        if hand.betting_complete(&g.seats) {
            self.advance_rounds(g);
            return;
        }
        let next = hand.next_playing_after(&g.seats, acted);
        if let Some(pos) = next {
            self.request_action(g, pos);
        }
    }

    fn request_action(&self, g: &mut Inner, pos: usize) {
        let deadline = Utc::now() + g.config.action_timeout;
        let Some(hand) = g.hand.as_mut() else {
            return;
        };
        hand.action_on = Some(pos);
        hand.action_deadline = Some(deadline);
        let seq = hand.action_seq;
        let hand_number = hand.hand_number;
        let user_id = g.seats[pos].as_ref().map(|s| s.user_id).unwrap_or(0);
        self.emit(
            hand_number,
            GameEvent::ActionRequired {
                position: pos,
                user_id,
                deadline,
                action_sequence: seq,
            },
        );
    }

    /// Advance betting rounds, dealing streets as they open. When fewer
    /// than two players can still bet the board runs out to showdown.
    fn advance_rounds(&self, g: &mut Inner) {
        loop {
            for seat in g.seats.iter_mut().flatten() {
                seat.reset_for_round();
            }
            let Some(hand) = g.hand.as_mut() else {
                return;
            };
            hand.current_bet = 0;
            hand.last_raise = 0;
            hand.action_on = None;
            hand.action_deadline = None;

            let next = hand.round.next();
            hand.round = next;
            let deal = match next {
                BettingRound::Flop => 3,
                BettingRound::Turn | BettingRound::River => 1,
                BettingRound::Showdown => {
                    self.settle_showdown(g);
                    return;
                }
                BettingRound::Preflop => 0,
            };
            for _ in 0..deal {
                if let Some(card) = hand.deck.deal() {
                    hand.community.push(card);
                }
            }

            let community = hand.community.clone();
            let hand_number = hand.hand_number;
            let pot = hand.pot_total(&g.seats);
            self.emit(
                hand_number,
                GameEvent::RoundAdvanced {
                    round: next,
                    community,
                    pot,
                },
            );

            let hand = match g.hand.as_ref() {
                Some(h) => h,
                None => return,
            };
            if hand.can_bet_count(&g.seats) >= 2 {
                if let Some(first) = hand.first_to_act_postflop(&g.seats) {
                    self.request_action(g, first);
                    return;
                }
            }
        }
    }

    /// Everyone else folded: the last player standing takes the pot
    /// without a showdown.
    fn settle_fold_win(&self, g: &mut Inner) {
        if let Some((idx, excess)) = uncalled_bet(&g.seats) {
            if let Some(seat) = g.seats[idx].as_mut() {
                seat.hand_bet -= excess;
                seat.award(excess);
            }
        }

        let total: u64 = build_pots(&g.seats).iter().map(|p| p.amount).sum();
        let winner = g
            .seats
            .iter()
            .flatten()
            .find(|s| s.in_hand())
            .map(|s| s.seat_index);
        let Some(winner_pos) = winner else {
            return;
        };

        let user_id = {
            let Some(seat) = g.seats[winner_pos].as_mut() else {
                return;
            };
            seat.award(total);
            seat.user_id
        };

        let winners = vec![Winner {
            user_id,
            amount: total,
            hand_rank: None,
            hand_cards: Vec::new(),
        }];
        self.finish_hand(g, winners, total);
    }

    fn settle_showdown(&self, g: &mut Inner) {
        if let Some((idx, excess)) = uncalled_bet(&g.seats) {
            if let Some(seat) = g.seats[idx].as_mut() {
                seat.hand_bet -= excess;
                seat.award(excess);
            }
        }

        let board: Vec<Card> = g
            .hand
            .as_ref()
            .map(|h| h.community.clone())
            .unwrap_or_default();
        if board.len() < BOARD_SIZE {
            // A showdown always has a full board; nothing sensible to do
            // otherwise.
            self.settle_fold_win(g);
            return;
        }

        let mut scores: BTreeMap<usize, HandScore> = BTreeMap::new();
        for seat in g.seats.iter().flatten().filter(|s| s.in_hand()) {
            let Some(hole) = seat.hole_cards else {
                continue;
            };
            let cards = [
                hole[0], hole[1], board[0], board[1], board[2], board[3], board[4],
            ];
            scores.insert(seat.seat_index, evaluate_seven(&cards));
        }

        let pots = build_pots(&g.seats);
        let total: u64 = pots.iter().map(|p| p.amount).sum();

        // amount won and best score per winning seat
        let mut awards: BTreeMap<usize, (u64, HandScore)> = BTreeMap::new();
        for pot in &pots {
            let mut contenders: Vec<(usize, HandScore)> = pot
                .eligible
                .iter()
                .filter_map(|idx| scores.get(idx).map(|s| (*idx, *s)))
                .collect();
            if contenders.is_empty() {
                continue;
            }
            contenders.sort_by(|a, b| match b.1.cmp(&a.1) {
                Ordering::Equal => a.0.cmp(&b.0),
                other => other,
            });
            let best = contenders[0].1;
            let winners: Vec<usize> = contenders
                .iter()
                .filter(|(_, s)| *s == best)
                .map(|(idx, _)| *idx)
                .collect();

            let share = pot.amount / winners.len() as u64;
            let residue = pot.amount % winners.len() as u64;
            for (i, &idx) in winners.iter().enumerate() {
                // Leftmost winner takes the indivisible residue.
                let amount = if i == 0 { share + residue } else { share };
                let entry = awards.entry(idx).or_insert((0, best));
                entry.0 += amount;
            }
        }

        // Every hand that reached showdown is revealed, winner or not;
        // losing lines carry a zero amount.
        let mut winners = Vec::with_capacity(scores.len());
        for (&idx, score) in &scores {
            let Some(seat) = g.seats[idx].as_mut() else {
                continue;
            };
            let amount = awards.get(&idx).map(|&(amount, _)| amount).unwrap_or(0);
            if amount > 0 {
                seat.award(amount);
            }
            if let Some(hole) = seat.hole_cards {
                g.showdown_reveals.push((seat.user_id, hole));
            }
            winners.push(Winner {
                user_id: seat.user_id,
                amount,
                hand_rank: Some(score.rank.label().to_string()),
                hand_cards: seat.hole_cards.map(|c| c.to_vec()).unwrap_or_default(),
            });
        }

        self.finish_hand(g, winners, total);
    }

    fn finish_hand(&self, g: &mut Inner, winners: Vec<Winner>, pot: u64) {
        let Some(hand) = g.hand.take() else {
            return;
        };

        g.last_hand_busts = g
            .seats
            .iter()
            .flatten()
            .filter(|s| {
                s.stack == 0
                    && matches!(
                        s.status,
                        SeatStatus::Playing | SeatStatus::AllIn | SeatStatus::Folded
                    )
            })
            .map(|s| BustRecord {
                user_id: s.user_id,
                seat_index: s.seat_index,
                stack_at_hand_start: s.stack_at_hand_start,
            })
            .collect();

        self.emit(
            hand.hand_number,
            GameEvent::HandComplete {
                winners: winners.clone(),
                community: hand.community.clone(),
                pot,
            },
        );
        g.last_winners = winners;
        g.button = hand.dealer;
        g.status = TableStatus::Waiting;

        if let Some((sb, bb, ante)) = g.staged_blinds.take() {
            g.config.small_blind = sb;
            g.config.big_blind = bb;
            g.config.ante = ante;
        }

        for seat in g.seats.iter_mut().flatten() {
            seat.reset_for_hand();
        }

        let seated = g.seats.iter().flatten().count();
        let holders: Vec<(i64, u64)> = g
            .seats
            .iter()
            .flatten()
            .filter(|s| s.stack > 0)
            .map(|s| (s.user_id, s.stack))
            .collect();
        if seated >= MIN_PLAYERS && holders.len() == 1 {
            let (winner, final_chips) = holders[0];
            self.emit(
                hand.hand_number,
                GameEvent::GameComplete {
                    winner,
                    final_chips,
                    total_players: seated,
                },
            );
            g.status = TableStatus::Completed;
        }
    }
}

/// Bump the round-bet level after a raise, tracking the last full raise
/// for the minimum-raise rule. Short all-ins move the level but do not
/// grow the minimum raise.
fn raise_level(hand: &mut HandState, level: u64, big_blind: u64) {
    if level > hand.current_bet {
        let increment = level - hand.current_bet;
        if increment >= big_blind.max(hand.last_raise) {
            hand.last_raise = increment;
        }
        hand.current_bet = level;
    }
}

/// Next index in `members` strictly after `from`, wrapping over the seat
/// ring of size `n`.
fn next_in(members: &[usize], from: usize, n: usize) -> usize {
    for step in 1..=n {
        let idx = (from + step) % n;
        if members.contains(&idx) {
            return idx;
        }
    }
    from
}

/// Seats in dealing order, starting left of the dealer.
fn deal_order(members: &[usize], dealer: usize, n: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(members.len());
    for step in 1..=n {
        let idx = (dealer + step) % n;
        if members.contains(&idx) {
            order.push(idx);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn capture() -> (EventSink, Arc<Mutex<Vec<EngineEvent>>>) {
        let store: Arc<Mutex<Vec<EngineEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_store = store.clone();
        let sink: EventSink = Arc::new(move |ev| sink_store.lock().push(ev));
        (sink, store)
    }

    fn config(small_blind: u64, big_blind: u64, max_players: usize) -> TableConfig {
        TableConfig {
            small_blind,
            big_blind,
            ante: 0,
            max_players,
            min_buy_in: 1,
            max_buy_in: 1_000_000_000,
            // Deadlines are due the moment they are set, so timeout paths
            // can fire without sleeping.
            action_timeout: Duration::zero(),
        }
    }

    fn table_with(
        players: &[(i64, u64)],
        small_blind: u64,
        big_blind: u64,
        seed: u64,
    ) -> (Table, Arc<Mutex<Vec<EngineEvent>>>) {
        let (sink, events) = capture();
        let table = Table::with_rng(
            Uuid::new_v4(),
            GameKind::Cash,
            config(small_blind, big_blind, players.len().max(2)),
            sink,
            seed,
        );
        for (i, (id, stack)) in players.iter().enumerate() {
            table.add_player(*id, &format!("p{id}"), i, *stack).unwrap();
        }
        (table, events)
    }

    fn stack_of(table: &Table, user_id: i64) -> u64 {
        table
            .occupancy()
            .into_iter()
            .find(|(_, uid, _)| *uid == user_id)
            .map(|(_, _, stack)| stack)
            .unwrap()
    }

    fn turn_of(table: &Table) -> Option<i64> {
        table
            .state_for(None)
            .current_hand
            .and_then(|h| h.current_turn)
    }

    fn kinds(events: &Arc<Mutex<Vec<EngineEvent>>>) -> Vec<&'static str> {
        events.lock().iter().map(|e| e.event.kind()).collect()
    }

    #[test]
    fn heads_up_blinds_and_first_action() {
        // Alice on the button posts the small blind and acts first.
        let (table, _) = table_with(&[(1, 1000), (2, 1000)], 5, 10, 7);
        table.start_game().unwrap();

        assert_eq!(stack_of(&table, 1), 995);
        assert_eq!(stack_of(&table, 2), 990);

        let snap = table.state_for(None);
        let hand = snap.current_hand.unwrap();
        assert_eq!(hand.pot.main, 15);
        assert!(hand.pot.side.is_empty());
        assert_eq!(hand.current_bet, 10);
        assert_eq!(hand.betting_round, BettingRound::Preflop);
        assert_eq!(hand.current_turn, Some(1));

        table.process_action(1, ActionKind::Call, 0).unwrap();
        assert_eq!(stack_of(&table, 1), 990);
        let hand = table.state_for(None).current_hand.unwrap();
        assert_eq!(hand.pot.main, 20);
        assert_eq!(hand.current_turn, Some(2));

        table.process_action(2, ActionKind::Check, 0).unwrap();
        let hand = table.state_for(None).current_hand.unwrap();
        assert_eq!(hand.betting_round, BettingRound::Flop);
        assert_eq!(hand.community_cards.len(), 3);
        assert_eq!(hand.current_bet, 0);
    }

    #[test]
    fn minimum_raise_rule() {
        // Blinds 10/20. First raise to 40 sets the raise size to 20, so the
        // next raise must reach at least 60.
        let (table, _) = table_with(&[(1, 10_000), (2, 10_000), (3, 10_000)], 10, 20, 7);
        table.start_game().unwrap();

        // Dealer is seat 0, blinds 1 and 2, so seat 0 opens.
        assert_eq!(turn_of(&table), Some(1));
        table.process_action(1, ActionKind::Raise, 40).unwrap();

        assert_eq!(turn_of(&table), Some(2));
        assert_eq!(
            table.process_action(2, ActionKind::Raise, 50),
            Err(EngineError::RaiseTooSmall)
        );
        table.process_action(2, ActionKind::Raise, 60).unwrap();
        assert_eq!(turn_of(&table), Some(3));
    }

    #[test]
    fn all_in_side_pot_resolution() {
        // A=100 is all-in at 100; B and C contest the 400 side pot. Every
        // committed chip comes back out at showdown.
        let (table, events) = table_with(&[(1, 100), (2, 300), (3, 300)], 5, 10, 11);
        table.start_game().unwrap();

        table.process_action(1, ActionKind::AllIn, 0).unwrap();
        table.process_action(2, ActionKind::Raise, 300).unwrap();
        table.process_action(3, ActionKind::Call, 0).unwrap();

        let total: u64 = table.occupancy().iter().map(|(_, _, s)| s).sum();
        assert_eq!(total, 700, "all committed chips are paid back out");

        let complete = events
            .lock()
            .iter()
            .find_map(|e| match &e.event {
                GameEvent::HandComplete { winners, pot, .. } => {
                    Some((winners.clone(), *pot))
                }
                _ => None,
            })
            .expect("hand completes");
        let (winners, pot) = complete;
        assert_eq!(pot, 700);
        assert_eq!(winners.iter().map(|w| w.amount).sum::<u64>(), 700);
        // A can never win more than the 300 main pot.
        if let Some(a) = winners.iter().find(|w| w.user_id == 1) {
            assert!(a.amount <= 300);
        }
    }

    #[test]
    fn fold_ends_hand_and_returns_uncalled_bet() {
        let (table, events) = table_with(&[(1, 1000), (2, 1000)], 5, 10, 7);
        table.start_game().unwrap();

        table.process_action(1, ActionKind::Raise, 50).unwrap();
        table.process_action(2, ActionKind::Fold, 0).unwrap();

        // The 40 nobody called goes back; the 20 pot goes to the raiser.
        assert_eq!(stack_of(&table, 1), 1010);
        assert_eq!(stack_of(&table, 2), 990);

        let winners = events
            .lock()
            .iter()
            .find_map(|e| match &e.event {
                GameEvent::HandComplete { winners, .. } => Some(winners.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].user_id, 1);
        assert_eq!(winners[0].amount, 20);
        assert!(winners[0].hand_rank.is_none());
        assert_eq!(table.status(), TableStatus::Waiting);
    }

    #[test]
    fn big_blind_gets_the_option() {
        let (table, _) = table_with(&[(1, 1000), (2, 1000), (3, 1000)], 10, 20, 7);
        table.start_game().unwrap();

        table.process_action(1, ActionKind::Call, 0).unwrap();
        table.process_action(2, ActionKind::Call, 0).unwrap();
        // Everyone matched, but the big blind has not spoken yet.
        assert_eq!(turn_of(&table), Some(3));
        table.process_action(3, ActionKind::Check, 0).unwrap();

        let hand = table.state_for(None).current_hand.unwrap();
        assert_eq!(hand.betting_round, BettingRound::Flop);
    }

    #[test]
    fn out_of_turn_and_illegal_check_rejected() {
        let (table, _) = table_with(&[(1, 1000), (2, 1000)], 5, 10, 7);
        table.start_game().unwrap();

        assert_eq!(
            table.process_action(2, ActionKind::Check, 0),
            Err(EngineError::OutOfTurn)
        );
        assert_eq!(
            table.process_action(1, ActionKind::Check, 0),
            Err(EngineError::CannotCheck)
        );
        assert_eq!(
            table.process_action(1, ActionKind::Raise, 15),
            Err(EngineError::RaiseTooSmall)
        );
    }

    #[test]
    fn timeout_folds_when_facing_a_bet() {
        let (table, events) = table_with(&[(1, 1000), (2, 1000)], 5, 10, 7);
        table.start_game().unwrap();

        let (hand_number, seq) = {
            let snap = table.state_for(None).current_hand.unwrap();
            (snap.hand_number, snap.action_sequence)
        };

        // A stale identity is refused.
        assert_eq!(
            table.handle_timeout(1, hand_number, seq + 1),
            Err(EngineError::StaleTimeout)
        );

        table.handle_timeout(1, hand_number, seq).unwrap();
        let fold = events.lock().iter().any(|e| {
            matches!(
                e.event,
                GameEvent::PlayerAction {
                    user_id: 1,
                    action: ActionKind::Fold,
                    ..
                }
            )
        });
        assert!(fold);
        assert_eq!(stack_of(&table, 2), 1005);
    }

    #[test]
    fn timeout_checks_when_nothing_to_call() {
        let (table, events) = table_with(&[(1, 1000), (2, 1000)], 5, 10, 7);
        table.start_game().unwrap();

        table.process_action(1, ActionKind::Call, 0).unwrap();
        let snap = table.state_for(None).current_hand.unwrap();
        table
            .handle_timeout(2, snap.hand_number, snap.action_sequence)
            .unwrap();

        let checked = events.lock().iter().any(|e| {
            matches!(
                e.event,
                GameEvent::PlayerAction {
                    user_id: 2,
                    action: ActionKind::Check,
                    ..
                }
            )
        });
        assert!(checked);
        let hand = table.state_for(None).current_hand.unwrap();
        assert_eq!(hand.betting_round, BettingRound::Flop);
    }

    #[test]
    fn pause_freezes_and_resume_restores_the_decision() {
        let (table, events) = table_with(&[(1, 1000), (2, 1000)], 5, 10, 7);
        table.start_game().unwrap();

        table.pause().unwrap();
        assert_eq!(table.status(), TableStatus::Paused);
        assert_eq!(
            table.process_action(1, ActionKind::Call, 0),
            Err(EngineError::TablePaused)
        );
        let snap = table.state_for(None).current_hand.unwrap();
        assert!(snap.action_deadline.is_none());

        let before = events.lock().len();
        table.resume().unwrap();
        assert_eq!(table.status(), TableStatus::Playing);
        let snap = table.state_for(None).current_hand.unwrap();
        assert!(snap.action_deadline.is_some());
        assert_eq!(snap.current_turn, Some(1));
        // The pending decision is re-announced with a fresh deadline.
        assert!(events.lock().len() > before);

        table.process_action(1, ActionKind::Call, 0).unwrap();
    }

    #[test]
    fn action_sequence_strictly_increases() {
        let (table, events) = table_with(&[(1, 1000), (2, 1000)], 5, 10, 7);
        table.start_game().unwrap();
        table.process_action(1, ActionKind::Call, 0).unwrap();
        table.process_action(2, ActionKind::Check, 0).unwrap();
        table.process_action(2, ActionKind::Check, 0).unwrap();

        let seqs: Vec<u64> = events
            .lock()
            .iter()
            .filter_map(|e| match e.event {
                GameEvent::PlayerAction {
                    action_sequence, ..
                } => Some(action_sequence),
                _ => None,
            })
            .collect();
        assert!(seqs.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn identical_seed_and_inputs_replay_identically() {
        let run = |seed| {
            let (table, events) = table_with(&[(1, 500), (2, 500), (3, 500)], 5, 10, seed);
            table.start_game().unwrap();
            table.process_action(1, ActionKind::Call, 0).unwrap();
            table.process_action(2, ActionKind::Call, 0).unwrap();
            table.process_action(3, ActionKind::Check, 0).unwrap();
            // Check the flop down to showdown.
            for _ in 0..3 {
                for _ in 0..3 {
                    if let Some(user) = turn_of(&table) {
                        let _ = table.process_action(user, ActionKind::Check, 0);
                    }
                }
            }
            let stacks: Vec<(usize, i64, u64)> = table.occupancy();
            let dealt: Vec<String> = events
                .lock()
                .iter()
                .filter_map(|e| match &e.event {
                    GameEvent::CardsDealt { user_id, cards } => {
                        Some(format!("{user_id}:{}{}", cards[0], cards[1]))
                    }
                    GameEvent::RoundAdvanced { community, .. } => Some(
                        community
                            .iter()
                            .map(|c| c.to_string())
                            .collect::<Vec<_>>()
                            .join(""),
                    ),
                    _ => None,
                })
                .collect();
            (stacks, dealt, kinds(&events).len())
        };

        assert_eq!(run(21), run(21));
    }

    #[test]
    fn game_completes_when_one_player_holds_all_chips() {
        // The big blind is all-in from the forced bet; the board runs out.
        let (table, events) = table_with(&[(1, 100), (2, 10)], 5, 10, 13);
        table.start_game().unwrap();
        table.process_action(1, ActionKind::Call, 0).unwrap();

        let total: u64 = table.occupancy().iter().map(|(_, _, s)| s).sum();
        assert_eq!(total, 110);

        let busted = table.occupancy().iter().any(|(_, _, s)| *s == 0);
        let completed = kinds(&events).contains(&"game_complete");
        assert_eq!(busted, completed);
        if completed {
            assert_eq!(table.status(), TableStatus::Completed);
            assert_eq!(table.last_hand_busts().len(), 1);
        } else {
            assert_eq!(table.status(), TableStatus::Waiting);
        }
    }

    #[test]
    fn leaving_mid_hand_folds_and_defers_removal() {
        let (table, _) = table_with(&[(1, 1000), (2, 1000), (3, 1000)], 5, 10, 7);
        table.start_game().unwrap();

        // Seat 2 (small blind) leaves while the hand is live.
        assert_eq!(table.remove_player(2), Ok(RemoveOutcome::Deferred));
        assert_eq!(table.pending_removals(), vec![2]);

        // The hand plays on without them.
        table.process_action(1, ActionKind::Call, 0).unwrap();
        table.process_action(3, ActionKind::Check, 0).unwrap();
        assert!(table.hand_in_progress());

        // After the hand the seat can actually be vacated.
        while table.hand_in_progress() {
            if let Some(user) = turn_of(&table) {
                table.process_action(user, ActionKind::Check, 0).unwrap();
            }
        }
        let outcome = table.remove_player(2).unwrap();
        assert!(matches!(outcome, RemoveOutcome::Removed { .. }));
    }

    #[test]
    fn seating_validations() {
        let (table, _) = table_with(&[(1, 1000), (2, 1000)], 5, 10, 7);
        assert_eq!(
            table.add_player(3, "p3", 0, 500),
            Err(EngineError::SeatOccupied)
        );
        assert_eq!(
            table.add_player(1, "p1", 1, 500),
            Err(EngineError::SeatOccupied)
        );
        assert_eq!(
            table.add_player(3, "p3", 9, 500),
            Err(EngineError::InvalidSeatIndex)
        );
    }

    #[test]
    fn buy_in_bounds_enforced() {
        let (sink, _) = capture();
        let mut cfg = config(5, 10, 6);
        cfg.min_buy_in = 100;
        cfg.max_buy_in = 1000;
        let table = Table::with_rng(Uuid::new_v4(), GameKind::Cash, cfg, sink, 7);
        assert_eq!(
            table.add_player(1, "p1", 0, 50),
            Err(EngineError::InvalidBuyIn)
        );
        assert_eq!(
            table.add_player(1, "p1", 0, 2000),
            Err(EngineError::InvalidBuyIn)
        );
        table.add_player(1, "p1", 0, 500).unwrap();
    }

    #[test]
    fn start_requires_two_funded_players() {
        let (table, _) = table_with(&[(1, 1000)], 5, 10, 7);
        assert_eq!(table.start_game(), Err(EngineError::NotEnoughPlayers));
    }

    #[test]
    fn staged_blinds_apply_at_the_next_hand() {
        let (table, _) = table_with(&[(1, 10_000), (2, 10_000)], 5, 10, 7);
        table.start_game().unwrap();
        table.set_blinds(10, 20, 0);

        // Current hand still plays at 5/10.
        let snap = table.state_for(None);
        assert_eq!(snap.big_blind, 10);

        while table.hand_in_progress() {
            let snap = table.state_for(None);
            let hand = snap.current_hand.unwrap();
            let user = hand.current_turn.unwrap();
            let seat = snap.players.iter().find(|p| p.user_id == user).unwrap();
            let action = if hand.current_bet > seat.bet {
                ActionKind::Call
            } else {
                ActionKind::Check
            };
            table.process_action(user, action, 0).unwrap();
        }
        assert_eq!(table.state_for(None).big_blind, 20);
    }

    #[test]
    fn hole_cards_visible_only_to_their_owner() {
        let (table, _) = table_with(&[(1, 1000), (2, 1000)], 5, 10, 7);
        table.start_game().unwrap();

        let for_alice = table.state_for(Some(1));
        let alice = for_alice.players.iter().find(|p| p.user_id == 1).unwrap();
        let bob = for_alice.players.iter().find(|p| p.user_id == 2).unwrap();
        assert!(alice.cards.is_some());
        assert!(bob.cards.is_none());

        let public = table.state_for(None);
        assert!(public.players.iter().all(|p| p.cards.is_none()));
    }

    #[test]
    fn showdown_reveals_non_folded_cards_to_everyone() {
        let (table, events) = table_with(&[(1, 1000), (2, 1000), (3, 1000)], 5, 10, 17);
        table.start_game().unwrap();

        // The opener folds; the blinds check the hand down to showdown.
        table.process_action(1, ActionKind::Fold, 0).unwrap();
        table.process_action(2, ActionKind::Call, 0).unwrap();
        table.process_action(3, ActionKind::Check, 0).unwrap();
        while table.hand_in_progress() {
            if let Some(user) = turn_of(&table) {
                table.process_action(user, ActionKind::Check, 0).unwrap();
            }
        }

        // Showdown hands are public to any viewer until the next deal;
        // the folded hand stays hidden.
        for viewer in [None, Some(1), Some(2)] {
            let snap = table.state_for(viewer);
            let p1 = snap.players.iter().find(|p| p.user_id == 1).unwrap();
            let p2 = snap.players.iter().find(|p| p.user_id == 2).unwrap();
            let p3 = snap.players.iter().find(|p| p.user_id == 3).unwrap();
            assert!(p1.cards.is_none(), "folded hand must stay hidden");
            assert!(p2.cards.is_some());
            assert!(p3.cards.is_some());
        }

        // Every showdown participant lands in the hand results with real
        // cards and a rank; only the pot share differs.
        let winners = events
            .lock()
            .iter()
            .find_map(|e| match &e.event {
                GameEvent::HandComplete { winners, .. } => Some(winners.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(winners.len(), 2);
        for line in &winners {
            assert_eq!(line.hand_cards.len(), 2);
            assert!(line.hand_rank.is_some());
        }
        assert_eq!(winners.iter().map(|w| w.amount).sum::<u64>(), 20);

        // The reveal window closes when the next hand deals.
        table.start_game().unwrap();
        let snap = table.state_for(None);
        assert!(snap.players.iter().all(|p| p.cards.is_none()));
    }

    #[test]
    fn event_stream_has_the_expected_shape() {
        let (table, events) = table_with(&[(1, 1000), (2, 1000)], 5, 10, 7);
        table.start_game().unwrap();

        let observed = kinds(&events);
        assert_eq!(observed[0], "hand_start");
        assert_eq!(observed[1], "blinds_posted");
        assert_eq!(
            observed.iter().filter(|k| **k == "card_dealt").count(),
            2
        );
        assert_eq!(observed.last(), Some(&"action_required"));
    }
}
