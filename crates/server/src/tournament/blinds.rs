//! Blind schedule timing.

use chrono::{DateTime, Duration, Utc};

use crate::store::TournamentRecord;

/// When the current level ends. Pause time is added on top of the level
/// duration so pauses never shorten a level.
pub fn level_deadline(t: &TournamentRecord) -> Option<DateTime<Utc>> {
    let level = t.current_blind_level()?;
    let started = t.level_started_at?;
    Some(started + Duration::seconds(level.duration_seconds + t.total_paused_seconds))
}

/// The ticker advances a level when its deadline has passed and a further
/// level exists. The last level runs until the tournament ends.
pub fn next_level_due(t: &TournamentRecord, now: DateTime<Utc>) -> bool {
    if (t.current_level as usize) + 1 >= t.blind_levels.len() {
        return false;
    }
    match level_deadline(t) {
        Some(deadline) => now >= deadline,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BlindLevel, TournamentStatus};
    use uuid::Uuid;

    fn tournament(levels: Vec<BlindLevel>, paused_seconds: i64) -> TournamentRecord {
        TournamentRecord {
            id: Uuid::new_v4(),
            tournament_code: "ABCD2345".into(),
            name: "test".into(),
            created_by: 1,
            status: TournamentStatus::InProgress,
            buy_in: 100,
            starting_chips: 1_000,
            min_players: 2,
            max_players: 9,
            table_size: 9,
            registration_closes_at: None,
            auto_start_delay_seconds: 0,
            blind_levels: levels,
            prize_structure: vec![10_000],
            current_level: 0,
            level_started_at: Some(Utc::now() - Duration::seconds(600)),
            paused_at: None,
            resumed_at: None,
            total_paused_seconds: paused_seconds,
            registration_completed_at: None,
            prizes_distributed: false,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    fn level(duration_seconds: i64) -> BlindLevel {
        BlindLevel {
            small_blind: 10,
            big_blind: 20,
            ante: 0,
            duration_seconds,
        }
    }

    #[test]
    fn level_advances_after_its_duration() {
        let t = tournament(vec![level(300), level(300)], 0);
        assert!(next_level_due(&t, Utc::now()));
    }

    #[test]
    fn pause_time_extends_the_level() {
        // Level ran 600s of wall clock, but 400s of it was paused.
        let t = tournament(vec![level(300), level(300)], 400);
        assert!(!next_level_due(&t, Utc::now()));
        assert!(next_level_due(&t, Utc::now() + Duration::seconds(200)));
    }

    #[test]
    fn final_level_never_advances() {
        let t = tournament(vec![level(300)], 0);
        assert!(!next_level_due(&t, Utc::now()));
    }
}
