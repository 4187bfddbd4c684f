//! Level curve, XP awards and the daily streak.

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::Profile;

const BASE_LEVEL_XP: f64 = 100.0;
const LEVEL_GROWTH: f64 = 1.2;

pub const LESSON_BASE_XP: u64 = 50;
pub const MODULE_BONUS_XP: u64 = 100;

/// XP needed to advance from `level` to `level + 1`: floor(100 * 1.2^(level-1)).
pub fn xp_threshold(level: u32) -> u64 {
    let exponent = level.max(1) - 1;
    (BASE_LEVEL_XP * LEVEL_GROWTH.powf(f64::from(exponent))).floor() as u64
}

/// XP for completing a lesson, before any module bonus.
pub fn lesson_xp(score: Option<u8>) -> u64 {
    LESSON_BASE_XP + u64::from(score.unwrap_or(0).min(100)) / 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    pub level: u32,
    /// Progress inside the current level.
    pub xp: u64,
    pub total_xp: u64,
}

impl Default for LevelProgress {
    fn default() -> Self {
        Self {
            level: 1,
            xp: 0,
            total_xp: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelUp {
    pub awarded: u64,
    pub leveled_up: bool,
    pub levels_gained: u32,
    pub level: u32,
    pub xp: u64,
    pub next_level_xp: u64,
}

impl LevelProgress {
    pub fn of(profile: &Profile) -> Self {
        Self {
            level: profile.level.max(1),
            xp: profile.xp,
            total_xp: profile.total_xp,
        }
    }

    pub fn apply_to(&self, profile: &mut Profile) {
        profile.level = self.level;
        profile.xp = self.xp;
        profile.total_xp = self.total_xp;
    }

    /// Adds `amount`, crossing as many level boundaries as it covers.
    pub fn award(&mut self, amount: u64) -> LevelUp {
        self.level = self.level.max(1);
        self.xp = self.xp.saturating_add(amount);
        self.total_xp = self.total_xp.saturating_add(amount);

        let mut levels_gained = 0;
        loop {
            let threshold = xp_threshold(self.level);
            if self.xp < threshold {
                break;
            }
            self.xp -= threshold;
            self.level += 1;
            levels_gained += 1;
        }

        LevelUp {
            awarded: amount,
            leveled_up: levels_gained > 0,
            levels_gained,
            level: self.level,
            xp: self.xp,
            next_level_xp: xp_threshold(self.level),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StreakStatus {
    NoActivity,
    /// Last activity was today or yesterday.
    Active,
    /// More than one calendar day since the last activity.
    Lapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StreakTransition {
    Started,
    SameDay,
    Extended,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakUpdate {
    pub transition: StreakTransition,
    pub streak: u32,
    pub longest_streak: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreakState {
    pub streak: u32,
    pub longest: u32,
    pub last_activity: Option<NaiveDate>,
}

impl StreakState {
    pub fn of(profile: &Profile) -> Self {
        Self {
            streak: profile.streak,
            longest: profile.longest_streak.max(profile.streak),
            last_activity: profile.last_practice_on,
        }
    }

    pub fn apply_to(&self, profile: &mut Profile) {
        profile.streak = self.streak;
        profile.longest_streak = self.longest;
        profile.last_practice_on = self.last_activity;
    }

    /// Compares calendar dates, not elapsed time.
    pub fn status(&self, today: NaiveDate) -> StreakStatus {
        match self.last_activity {
            None => StreakStatus::NoActivity,
            Some(last) if (today - last).num_days() <= 1 => StreakStatus::Active,
            Some(_) => StreakStatus::Lapsed,
        }
    }

    /// Streak as it should be shown today; a lapsed streak reads as zero.
    pub fn current(&self, today: NaiveDate) -> u32 {
        match self.status(today) {
            StreakStatus::Active => self.streak,
            StreakStatus::NoActivity | StreakStatus::Lapsed => 0,
        }
    }

    pub fn record_activity(&mut self, today: NaiveDate) -> StreakUpdate {
        let transition = match self.last_activity {
            None => {
                self.streak = 1;
                StreakTransition::Started
            }
            Some(last) => match (today - last).num_days() {
                // a clock moved backwards counts as the same day
                gap if gap <= 0 => StreakTransition::SameDay,
                1 => {
                    self.streak = self.streak.saturating_add(1);
                    StreakTransition::Extended
                }
                _ => {
                    self.streak = 1;
                    StreakTransition::Reset
                }
            },
        };

        if transition != StreakTransition::SameDay {
            self.last_activity = Some(today);
        }
        self.longest = self.longest.max(self.streak);

        StreakUpdate {
            transition,
            streak: self.streak,
            longest_streak: self.longest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn test_threshold_curve() {
        assert_eq!(xp_threshold(1), 100);
        assert_eq!(xp_threshold(2), 120);
        assert_eq!(xp_threshold(3), 144);
        assert_eq!(xp_threshold(4), 172);
        assert_eq!(xp_threshold(5), 207);
        assert_eq!(xp_threshold(0), 100);
    }

    #[test]
    fn test_award_250_from_zero_reaches_level_three() {
        let mut progress = LevelProgress::default();
        let up = progress.award(250);
        assert!(up.leveled_up);
        assert_eq!(up.levels_gained, 2);
        assert_eq!(progress.level, 3);
        assert_eq!(progress.xp, 30);
        assert_eq!(progress.total_xp, 250);
        assert_eq!(up.next_level_xp, 144);
    }

    #[test]
    fn test_award_below_threshold_does_not_level() {
        let mut progress = LevelProgress::default();
        let up = progress.award(99);
        assert!(!up.leveled_up);
        assert_eq!(progress.level, 1);
        let up = progress.award(1);
        assert!(up.leveled_up);
        assert_eq!((progress.level, progress.xp), (2, 0));
    }

    #[test]
    fn test_lesson_xp() {
        assert_eq!(lesson_xp(None), 50);
        assert_eq!(lesson_xp(Some(100)), 100);
        assert_eq!(lesson_xp(Some(61)), 80);
    }

    #[test]
    fn test_streak_first_activity_starts_at_one() {
        let mut state = StreakState::default();
        assert_eq!(state.status(day(1)), StreakStatus::NoActivity);
        let update = state.record_activity(day(1));
        assert_eq!(update.transition, StreakTransition::Started);
        assert_eq!(update.streak, 1);
    }

    #[test]
    fn test_streak_same_day_is_noop() {
        let mut state = StreakState::default();
        state.record_activity(day(1));
        let before = state;
        let update = state.record_activity(day(1));
        assert_eq!(update.transition, StreakTransition::SameDay);
        assert_eq!(state, before);
    }

    #[test]
    fn test_streak_next_day_extends_and_gap_resets() {
        let mut state = StreakState::default();
        state.record_activity(day(1));
        state.record_activity(day(2));
        let update = state.record_activity(day(3));
        assert_eq!(update.transition, StreakTransition::Extended);
        assert_eq!(update.streak, 3);

        assert_eq!(state.status(day(5)), StreakStatus::Lapsed);
        assert_eq!(state.current(day(5)), 0);
        let update = state.record_activity(day(5));
        assert_eq!(update.transition, StreakTransition::Reset);
        assert_eq!(update.streak, 1);
        assert_eq!(update.longest_streak, 3);
    }

    #[test]
    fn test_streak_clock_moving_backwards_is_same_day() {
        let mut state = StreakState::default();
        state.record_activity(day(10));
        let update = state.record_activity(day(9));
        assert_eq!(update.transition, StreakTransition::SameDay);
        assert_eq!(state.last_activity, Some(day(10)));
    }
}
