use serde::{Deserialize, Serialize};

use super::deck::Card;

/// Seat status across and within hands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    /// Seated but not dealt into the current hand.
    Sitting,
    /// Dealt in and able to act.
    Playing,
    /// Folded this hand.
    Folded,
    /// Committed the whole stack this hand.
    AllIn,
    /// Skipping hands by choice.
    SittingOut,
    /// Out of chips.
    Busted,
}

/// Player decision kinds, in wire spelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Fold,
    Check,
    Call,
    Raise,
    #[serde(rename = "allin")]
    AllIn,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Fold => "fold",
            ActionKind::Check => "check",
            ActionKind::Call => "call",
            ActionKind::Raise => "raise",
            ActionKind::AllIn => "allin",
        }
    }
}

/// One occupied seat.
#[derive(Clone, Debug)]
pub struct Seat {
    pub user_id: i64,
    pub name: String,
    pub seat_index: usize,
    /// Chips behind, not counting anything already committed.
    pub stack: u64,
    /// Committed in the current betting round.
    pub round_bet: u64,
    /// Committed across the whole hand, antes included.
    pub hand_bet: u64,
    pub status: SeatStatus,
    /// Acted since the last raise in the current round.
    pub has_acted: bool,
    pub last_action: Option<ActionKind>,
    pub last_action_amount: u64,
    /// Leave requested mid-hand; applied at the hand boundary.
    pub pending_removal: bool,
    pub hole_cards: Option<[Card; 2]>,
    /// Stack at the moment the current hand started. Used to order
    /// same-hand eliminations.
    pub stack_at_hand_start: u64,
}

impl Seat {
    pub fn new(user_id: i64, name: String, seat_index: usize, buy_in: u64) -> Self {
        Seat {
            user_id,
            name,
            seat_index,
            stack: buy_in,
            round_bet: 0,
            hand_bet: 0,
            status: SeatStatus::Sitting,
            has_acted: false,
            last_action: None,
            last_action_amount: 0,
            pending_removal: false,
            hole_cards: None,
            stack_at_hand_start: buy_in,
        }
    }

    /// Commit chips, clipped to the stack. Flips to all-in when the stack
    /// empties. Returns the amount actually committed.
    pub fn place_bet(&mut self, amount: u64) -> u64 {
        let actual = amount.min(self.stack);
        self.stack -= actual;
        self.round_bet += actual;
        self.hand_bet += actual;
        if self.stack == 0 && self.status == SeatStatus::Playing {
            self.status = SeatStatus::AllIn;
        }
        actual
    }

    /// Ante goes straight to the pot without raising the round commitment.
    pub fn post_ante(&mut self, amount: u64) -> u64 {
        let actual = amount.min(self.stack);
        self.stack -= actual;
        self.hand_bet += actual;
        if self.stack == 0 && self.status == SeatStatus::Playing {
            self.status = SeatStatus::AllIn;
        }
        actual
    }

    pub fn award(&mut self, amount: u64) {
        self.stack += amount;
    }

    pub fn fold(&mut self) {
        self.status = SeatStatus::Folded;
    }

    /// Still contesting the pot (not folded, possibly all-in).
    pub fn in_hand(&self) -> bool {
        matches!(self.status, SeatStatus::Playing | SeatStatus::AllIn)
    }

    /// Able to make a decision right now.
    pub fn can_act(&self) -> bool {
        self.status == SeatStatus::Playing
    }

    /// Eligible to be dealt into the next hand.
    pub fn can_be_dealt(&self) -> bool {
        self.stack > 0
            && !self.pending_removal
            && !matches!(self.status, SeatStatus::SittingOut)
    }

    pub fn reset_for_hand(&mut self) {
        self.round_bet = 0;
        self.hand_bet = 0;
        self.has_acted = false;
        self.last_action = None;
        self.last_action_amount = 0;
        self.hole_cards = None;
        self.stack_at_hand_start = self.stack;
        self.status = if self.stack == 0 {
            SeatStatus::Busted
        } else if self.status == SeatStatus::SittingOut {
            SeatStatus::SittingOut
        } else {
            SeatStatus::Sitting
        };
    }

    pub fn reset_for_round(&mut self) {
        self.round_bet = 0;
        self.has_acted = false;
        self.last_action = None;
        self.last_action_amount = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn place_bet_clips_to_stack_and_flips_all_in() {
        let mut seat = Seat::new(1, "alice".into(), 0, 100);
        seat.status = SeatStatus::Playing;

        assert_eq!(seat.place_bet(40), 40);
        assert_eq!(seat.stack, 60);
        assert_eq!(seat.round_bet, 40);
        assert_eq!(seat.status, SeatStatus::Playing);

        assert_eq!(seat.place_bet(500), 60);
        assert_eq!(seat.stack, 0);
        assert_eq!(seat.hand_bet, 100);
        assert_eq!(seat.status, SeatStatus::AllIn);
    }

    #[test]
    fn ante_does_not_count_toward_round_bet() {
        let mut seat = Seat::new(1, "bob".into(), 2, 100);
        seat.status = SeatStatus::Playing;
        seat.post_ante(5);
        assert_eq!(seat.round_bet, 0);
        assert_eq!(seat.hand_bet, 5);
        assert_eq!(seat.stack, 95);
    }

    #[test]
    fn reset_for_hand_marks_busted_seats() {
        let mut seat = Seat::new(1, "carol".into(), 1, 50);
        seat.status = SeatStatus::Playing;
        seat.place_bet(50);
        seat.reset_for_hand();
        assert_eq!(seat.status, SeatStatus::Busted);
        assert_eq!(seat.hand_bet, 0);
    }
}
