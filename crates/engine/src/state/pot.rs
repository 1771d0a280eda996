use super::player::{Seat, SeatStatus};

/// One pot layer: its chips and the seats eligible to win it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pot {
    pub amount: u64,
    pub eligible: Vec<usize>,
}

/// The portion of the highest bet nobody could call.
///
/// If exactly one contesting player committed more than every other seat
/// (folded seats included), that excess is returned before pots form.
pub fn uncalled_bet(seats: &[Option<Seat>]) -> Option<(usize, u64)> {
    let top = seats
        .iter()
        .flatten()
        .filter(|s| s.in_hand())
        .max_by_key(|s| s.hand_bet)?;
    let best_other = seats
        .iter()
        .flatten()
        .filter(|s| s.seat_index != top.seat_index)
        .map(|s| s.hand_bet)
        .max()
        .unwrap_or(0);
    (top.hand_bet > best_other).then(|| (top.seat_index, top.hand_bet - best_other))
}

/// Layer the hand's commitments into a main pot and side pots.
///
/// Side pots crystallize at the all-in commitment levels; the top layer is
/// capped by the largest commitment still in the hand. Each layer collects,
/// from every seat (folded money stays in), the slice of its commitment
/// between the previous cap and this one; a seat is eligible for a layer
/// iff it is still in the hand and committed at least the cap. Assumes any
/// uncalled excess was returned first, which keeps every commitment at or
/// below the top cap.
pub fn build_pots(seats: &[Option<Seat>]) -> Vec<Pot> {
    let top = seats
        .iter()
        .flatten()
        .filter(|s| s.in_hand())
        .map(|s| s.hand_bet)
        .max()
        .unwrap_or(0);
    let mut caps: Vec<u64> = seats
        .iter()
        .flatten()
        .filter(|s| s.status == SeatStatus::AllIn)
        .map(|s| s.hand_bet)
        .filter(|&c| c > 0 && c < top)
        .collect();
    caps.push(top);
    caps.sort_unstable();
    caps.dedup();

    let mut pots = Vec::with_capacity(caps.len());
    let mut prev = 0u64;
    for cap in caps {
        let mut amount = 0u64;
        for seat in seats.iter().flatten() {
            amount += seat.hand_bet.min(cap) - seat.hand_bet.min(prev);
        }
        let eligible: Vec<usize> = seats
            .iter()
            .flatten()
            .filter(|s| s.in_hand() && s.hand_bet >= cap)
            .map(|s| s.seat_index)
            .collect();
        if amount > 0 {
            pots.push(Pot { amount, eligible });
        }
        prev = cap;
    }
    pots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::player::SeatStatus;

    fn seat(index: usize, hand_bet: u64, status: SeatStatus) -> Option<Seat> {
        let mut s = Seat::new(index as i64 + 1, format!("p{index}"), index, 1_000);
        s.status = status;
        s.hand_bet = hand_bet;
        Some(s)
    }

    #[test]
    fn equal_commitments_make_one_pot() {
        let seats = vec![
            seat(0, 100, SeatStatus::AllIn),
            seat(1, 100, SeatStatus::AllIn),
        ];
        let pots = build_pots(&seats);
        assert_eq!(pots.len(), 1);
        assert_eq!(pots[0].amount, 200);
        assert_eq!(pots[0].eligible, vec![0, 1]);
    }

    #[test]
    fn three_all_ins_layer_into_three_pots() {
        let seats = vec![
            seat(0, 100, SeatStatus::AllIn),
            seat(1, 200, SeatStatus::AllIn),
            seat(2, 300, SeatStatus::AllIn),
        ];
        let pots = build_pots(&seats);
        assert_eq!(pots.len(), 3);
        assert_eq!((pots[0].amount, pots[0].eligible.clone()), (300, vec![0, 1, 2]));
        assert_eq!((pots[1].amount, pots[1].eligible.clone()), (200, vec![1, 2]));
        assert_eq!((pots[2].amount, pots[2].eligible.clone()), (100, vec![2]));
    }

    #[test]
    fn paired_stacks_make_two_pots() {
        let seats = vec![
            seat(0, 100, SeatStatus::AllIn),
            seat(1, 100, SeatStatus::AllIn),
            seat(2, 300, SeatStatus::AllIn),
            seat(3, 300, SeatStatus::AllIn),
        ];
        let pots = build_pots(&seats);
        assert_eq!(pots.len(), 2);
        assert_eq!((pots[0].amount, pots[0].eligible.clone()), (400, vec![0, 1, 2, 3]));
        assert_eq!((pots[1].amount, pots[1].eligible.clone()), (400, vec![2, 3]));
    }

    #[test]
    fn folded_money_stays_in_but_earns_no_eligibility() {
        let seats = vec![
            seat(0, 60, SeatStatus::Folded),
            seat(1, 100, SeatStatus::Playing),
            seat(2, 100, SeatStatus::Playing),
        ];
        let pots = build_pots(&seats);
        assert_eq!(pots.len(), 1);
        assert_eq!(pots[0].amount, 260);
        assert_eq!(pots[0].eligible, vec![1, 2]);
    }

    #[test]
    fn pot_totals_conserve_commitments() {
        let seats = vec![
            seat(0, 50, SeatStatus::AllIn),
            seat(1, 200, SeatStatus::AllIn),
            seat(2, 200, SeatStatus::Playing),
            seat(3, 120, SeatStatus::Folded),
        ];
        let committed: u64 = seats.iter().flatten().map(|s| s.hand_bet).sum();
        let layered: u64 = build_pots(&seats).iter().map(|p| p.amount).sum();
        assert_eq!(committed, layered);
    }

    #[test]
    fn uncalled_excess_returns_to_the_over_bettor() {
        let seats = vec![
            seat(0, 500, SeatStatus::Folded),
            seat(1, 1500, SeatStatus::Playing),
        ];
        assert_eq!(uncalled_bet(&seats), Some((1, 1000)));
    }

    #[test]
    fn matched_top_bets_return_nothing() {
        let seats = vec![
            seat(0, 300, SeatStatus::AllIn),
            seat(1, 300, SeatStatus::Playing),
        ];
        assert_eq!(uncalled_bet(&seats), None);
    }
}
