//! Property tests for the level curve and the daily streak.

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;

use lingo_backend::services::progress::{
    lesson_xp, xp_threshold, LevelProgress, StreakState, StreakStatus, StreakTransition,
};

fn arb_awards() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..5_000, 0..40)
}

/// Day offsets from a fixed epoch, not necessarily increasing.
fn arb_days() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..400, 1..60)
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

proptest! {
    #[test]
    fn xp_never_exceeds_current_threshold(awards in arb_awards()) {
        let mut progress = LevelProgress { level: 1, xp: 0, total_xp: 0 };
        for amount in &awards {
            let up = progress.award(*amount);
            prop_assert!(up.xp < xp_threshold(up.level));
            prop_assert_eq!(up.next_level_xp, xp_threshold(up.level));
        }
        prop_assert!(progress.level >= 1);
    }

    #[test]
    fn total_xp_is_sum_of_awards(awards in arb_awards()) {
        let mut progress = LevelProgress { level: 1, xp: 0, total_xp: 0 };
        for amount in &awards {
            progress.award(*amount);
        }
        prop_assert_eq!(progress.total_xp, awards.iter().sum::<u64>());

        // Levels already passed account for exactly the rest of the total.
        let spent: u64 = (1..progress.level).map(xp_threshold).sum();
        prop_assert_eq!(spent + progress.xp, progress.total_xp);
    }

    #[test]
    fn split_awards_reach_same_level(a in 0u64..10_000, b in 0u64..10_000) {
        let mut once = LevelProgress { level: 1, xp: 0, total_xp: 0 };
        once.award(a + b);
        let mut twice = LevelProgress { level: 1, xp: 0, total_xp: 0 };
        twice.award(a);
        twice.award(b);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn thresholds_never_shrink(level in 1u32..60) {
        prop_assert!(xp_threshold(level + 1) >= xp_threshold(level));
    }

    #[test]
    fn lesson_xp_is_bounded(score in proptest::option::of(0u8..=255)) {
        let xp = lesson_xp(score);
        prop_assert!((50..=100).contains(&xp));
    }

    #[test]
    fn streak_never_exceeds_longest(days in arb_days()) {
        let mut state = StreakState::default();
        for offset in &days {
            let update = state.record_activity(epoch() + Duration::days(*offset));
            prop_assert!(update.streak >= 1);
            prop_assert!(update.streak <= update.longest_streak);
        }
    }

    #[test]
    fn practice_on_consecutive_days_extends(start in 0i64..300, run in 1usize..30) {
        let mut state = StreakState::default();
        for i in 0..run {
            let update = state.record_activity(epoch() + Duration::days(start + i as i64));
            let expected = if i == 0 { StreakTransition::Started } else { StreakTransition::Extended };
            prop_assert_eq!(update.transition, expected);
        }
        prop_assert_eq!(state.streak as usize, run);
        prop_assert_eq!(state.longest as usize, run);
    }

    #[test]
    fn repeat_practice_same_day_is_idempotent(offset in 0i64..300, repeats in 1usize..5) {
        let day = epoch() + Duration::days(offset);
        let mut state = StreakState::default();
        state.record_activity(day);
        let before = state;
        for _ in 0..repeats {
            let update = state.record_activity(day);
            prop_assert_eq!(update.transition, StreakTransition::SameDay);
        }
        prop_assert_eq!(state, before);
    }

    #[test]
    fn gap_of_two_days_resets(offset in 0i64..300, gap in 2i64..100) {
        let mut state = StreakState::default();
        let first = epoch() + Duration::days(offset);
        state.record_activity(first);
        state.record_activity(first + Duration::days(1));

        let later = first + Duration::days(1 + gap);
        prop_assert_eq!(state.status(later), StreakStatus::Lapsed);
        prop_assert_eq!(state.current(later), 0);

        let update = state.record_activity(later);
        prop_assert_eq!(update.transition, StreakTransition::Reset);
        prop_assert_eq!(update.streak, 1);
        prop_assert_eq!(update.longest_streak, 2);
    }
}
