//! Seat planning: the initial partition of registrants over tables, the
//! consolidation predicate, and the balancing move.

use uuid::Uuid;

/// One planned table with its seats filled from index 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TablePlan {
    pub table_number: i32,
    /// (user id, starting stack) per seat, seat indices 0..len.
    pub seats: Vec<(i64, i64)>,
}

/// Spread players over the fewest tables that keep every table at or
/// below `max_per_table`, with table sizes differing by at most one.
pub fn partition_players(
    user_ids: &[i64],
    starting_chips: i64,
    max_per_table: usize,
) -> Vec<TablePlan> {
    let n = user_ids.len();
    if n == 0 {
        return Vec::new();
    }
    let table_count = n.div_ceil(max_per_table);
    let base = n / table_count;
    let extra = n % table_count;

    let mut plans = Vec::with_capacity(table_count);
    let mut cursor = 0;
    for table_number in 0..table_count {
        let size = base + usize::from(table_number < extra);
        let seats = user_ids[cursor..cursor + size]
            .iter()
            .map(|&uid| (uid, starting_chips))
            .collect();
        cursor += size;
        plans.push(TablePlan {
            table_number: table_number as i32 + 1,
            seats,
        });
    }
    plans
}

/// Tables can be reduced when everyone fits on one table fewer.
pub fn consolidation_needed(per_table_counts: &[usize], max_per_table: usize) -> bool {
    let tables = per_table_counts.len();
    if tables < 2 {
        return false;
    }
    let total: usize = per_table_counts.iter().sum();
    total <= (tables - 1) * max_per_table
}

/// A single player movement from the fullest table to the emptiest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BalanceMove {
    pub user_id: i64,
    pub from_table: Uuid,
    pub to_table: Uuid,
    pub to_seat: usize,
}

/// Live occupancy of one table, as the balancer sees it.
#[derive(Clone, Debug)]
pub struct TableOccupancy {
    pub table_id: Uuid,
    pub button: usize,
    pub max_seats: usize,
    /// (seat index, user id) for seats with chips.
    pub seats: Vec<(usize, i64)>,
}

/// Pick a balancing move when the fullest and emptiest tables differ by
/// more than two players. The lifted player is the one furthest behind
/// the button (the most hands away from posting blinds), ties broken by
/// the lower seat index.
pub fn balance_move(tables: &[TableOccupancy]) -> Option<BalanceMove> {
    if tables.len() < 2 {
        return None;
    }
    let fullest = tables.iter().max_by_key(|t| t.seats.len())?;
    let emptiest = tables.iter().min_by_key(|t| t.seats.len())?;
    if fullest.table_id == emptiest.table_id
        || fullest.seats.len() <= emptiest.seats.len() + 2
    {
        return None;
    }

    let n = fullest.max_seats;
    let lifted = fullest
        .seats
        .iter()
        .max_by_key(|(seat, _)| {
            let distance = (seat + n - fullest.button) % n;
            // Higher distance wins; on equal distance prefer the lower
            // seat index (invert it for the max comparison).
            (distance, usize::MAX - seat)
        })
        .copied()?;

    let occupied: Vec<usize> = emptiest.seats.iter().map(|(seat, _)| *seat).collect();
    let to_seat = (0..emptiest.max_seats).find(|idx| !occupied.contains(idx))?;

    Some(BalanceMove {
        user_id: lifted.1,
        from_table: fullest.table_id,
        to_table: emptiest.table_id,
        to_seat,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_spreads_players_evenly() {
        let users: Vec<i64> = (1..=20).collect();
        let plans = partition_players(&users, 5_000, 9);
        assert_eq!(plans.len(), 3);
        let sizes: Vec<usize> = plans.iter().map(|p| p.seats.len()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 20);
        assert!(sizes.iter().all(|s| (6..=7).contains(s)));
        assert_eq!(plans[0].table_number, 1);
        assert_eq!(plans[2].table_number, 3);
        // Every player seated exactly once with the starting stack.
        let mut seated: Vec<i64> = plans
            .iter()
            .flat_map(|p| p.seats.iter().map(|(uid, _)| *uid))
            .collect();
        seated.sort_unstable();
        assert_eq!(seated, users);
        assert!(plans
            .iter()
            .all(|p| p.seats.iter().all(|(_, stack)| *stack == 5_000)));
    }

    #[test]
    fn small_field_gets_one_table() {
        let users: Vec<i64> = (1..=6).collect();
        let plans = partition_players(&users, 1_500, 9);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].seats.len(), 6);
    }

    #[test]
    fn consolidation_triggers_exactly_at_the_threshold() {
        // 3 tables of 9: 18 players fit on 2 tables, 19 do not.
        assert!(consolidation_needed(&[6, 6, 6], 9));
        assert!(!consolidation_needed(&[7, 6, 6], 9));
        assert!(!consolidation_needed(&[9], 9));
    }

    #[test]
    fn balance_moves_the_player_furthest_behind_the_button() {
        let full = Uuid::new_v4();
        let empty = Uuid::new_v4();
        let tables = vec![
            TableOccupancy {
                table_id: full,
                button: 2,
                max_seats: 9,
                seats: vec![(0, 10), (1, 11), (2, 12), (3, 13), (4, 14), (5, 15)],
            },
            TableOccupancy {
                table_id: empty,
                button: 0,
                max_seats: 9,
                seats: vec![(0, 20), (1, 21), (2, 22)],
            },
        ];
        let mv = balance_move(&tables).expect("difference of 3 forces a move");
        // Distances from the button at seat 2: seat 1 is 8 steps away,
        // the furthest from posting blinds again.
        assert_eq!(mv.user_id, 11);
        assert_eq!(mv.from_table, full);
        assert_eq!(mv.to_table, empty);
        assert_eq!(mv.to_seat, 3);
    }

    #[test]
    fn balanced_tables_need_no_move() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let tables = vec![
            TableOccupancy {
                table_id: a,
                button: 0,
                max_seats: 9,
                seats: vec![(0, 1), (1, 2), (2, 3), (3, 4), (4, 5)],
            },
            TableOccupancy {
                table_id: b,
                button: 0,
                max_seats: 9,
                seats: vec![(0, 6), (1, 7), (2, 8)],
            },
        ];
        assert_eq!(balance_move(&tables), None);
    }
}
