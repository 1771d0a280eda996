//! Elimination ordering.
//!
//! Positions are assigned in reverse order of elimination: the first
//! player out of an N-player field finishes Nth, the last survivor
//! finishes 1st. Two players busting in the same hand are ordered by
//! fewest chips at the start of the hand, ties broken by seat index.

use holdem_engine::table::BustRecord;

/// Sort same-hand busts into elimination order (worst finisher first).
pub fn order_same_hand_busts(busts: &mut [BustRecord]) {
    busts.sort_by_key(|b| (b.stack_at_hand_start, b.seat_index));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bust(user_id: i64, seat_index: usize, stack_at_hand_start: u64) -> BustRecord {
        BustRecord {
            user_id,
            seat_index,
            stack_at_hand_start,
        }
    }

    #[test]
    fn fewest_chips_at_hand_start_goes_out_first() {
        let mut busts = vec![bust(1, 4, 900), bust(2, 0, 300)];
        order_same_hand_busts(&mut busts);
        assert_eq!(busts[0].user_id, 2);
        assert_eq!(busts[1].user_id, 1);
    }

    #[test]
    fn equal_stacks_break_ties_by_seat_index() {
        let mut busts = vec![bust(7, 5, 500), bust(8, 2, 500)];
        order_same_hand_busts(&mut busts);
        assert_eq!(busts[0].user_id, 8);
        assert_eq!(busts[1].user_id, 7);
    }
}
