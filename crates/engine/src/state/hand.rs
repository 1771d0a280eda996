use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::deck::{Card, Deck};
use super::player::Seat;

/// Betting phase within a hand.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BettingRound {
    Preflop,
    Flop,
    Turn,
    River,
    Showdown,
}

impl BettingRound {
    pub fn as_str(self) -> &'static str {
        match self {
            BettingRound::Preflop => "preflop",
            BettingRound::Flop => "flop",
            BettingRound::Turn => "turn",
            BettingRound::River => "river",
            BettingRound::Showdown => "showdown",
        }
    }

    pub fn next(self) -> BettingRound {
        match self {
            BettingRound::Preflop => BettingRound::Flop,
            BettingRound::Flop => BettingRound::Turn,
            BettingRound::Turn => BettingRound::River,
            BettingRound::River | BettingRound::Showdown => BettingRound::Showdown,
        }
    }
}

/// Live state of one hand in progress.
#[derive(Clone, Debug)]
pub struct HandState {
    pub hand_number: u64,
    pub round: BettingRound,
    pub deck: Deck,
    pub community: Vec<Card>,
    /// Round-bet level every player must match to stay in.
    pub current_bet: u64,
    /// Size of the last full raise, for the minimum-raise rule.
    pub last_raise: u64,
    pub dealer: usize,
    pub small_blind_pos: usize,
    pub big_blind_pos: usize,
    /// Seat whose decision is pending, if any.
    pub action_on: Option<usize>,
    /// Monotone per-hand counter, bumped on every accepted action.
    pub action_seq: u64,
    pub action_deadline: Option<DateTime<Utc>>,
}

impl HandState {
    /// Next seat after `from` that can still make a decision.
    pub fn next_playing_after(
        &self,
        seats: &[Option<Seat>],
        from: usize,
    ) -> Option<usize> {
        let n = seats.len();
        for step in 1..=n {
            let idx = (from + step) % n;
            if seats[idx].as_ref().is_some_and(|s| s.can_act()) {
                return Some(idx);
            }
        }
        None
    }

    /// First seat left of the dealer able to act; opens post-flop rounds.
    pub fn first_to_act_postflop(&self, seats: &[Option<Seat>]) -> Option<usize> {
        self.next_playing_after(seats, self.dealer)
    }

    /// A round ends once every player who can still act has acted since
    /// the last raise and matches the current bet.
    pub fn betting_complete(&self, seats: &[Option<Seat>]) -> bool {
        seats
            .iter()
            .flatten()
            .filter(|s| s.can_act())
            .all(|s| s.has_acted && s.round_bet == self.current_bet)
    }

    /// Players still contesting the pot.
    pub fn in_hand_count(&self, seats: &[Option<Seat>]) -> usize {
        seats.iter().flatten().filter(|s| s.in_hand()).count()
    }

    /// Players who could still put chips in (not folded, not all-in).
    pub fn can_bet_count(&self, seats: &[Option<Seat>]) -> usize {
        seats.iter().flatten().filter(|s| s.can_act()).count()
    }

    /// Everything committed to the hand so far.
    pub fn pot_total(&self, seats: &[Option<Seat>]) -> u64 {
        seats.iter().flatten().map(|s| s.hand_bet).sum()
    }
}
