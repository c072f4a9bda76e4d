//! SM-2 Spaced Repetition Algorithm
//!
//! Scheduling state is never updated in place: every review triggers a full
//! replay of the card's ledger through [`recompute_stats`], so the derived
//! row is always a pure function of the persisted history. The ledger is the
//! sole source of truth; concurrent submissions for the same card cannot
//! lose scheduling information because whichever recompute commits last saw
//! the complete ledger.
//!
//! Alongside the replay, [`ewma_miss_update`] maintains a recency-weighted
//! miss probability as an O(1) incremental fold. That signal is lossy by
//! design (it cannot be rebuilt from the stats row alone) and its update can
//! race between devices; the last writer wins and one blend may be dropped.
//!
//! [`is_due`] and [`is_missed`] are the read-side selectors over the derived
//! stats; they never recompute anything.

use chrono::{DateTime, NaiveTime, Utc};

use super::models::{FlashcardStats, ReviewEvent};

/// Algorithm constants, passed explicitly so tests can construct variants.
/// Production paths use [`SchedulerConfig::default`]; the values are not
/// user-configurable.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub min_ease: f64,
    pub max_ease: f64,
    pub default_ease: f64,
    /// Blending constant for the EWMA miss tracker.
    pub ewma_alpha: f64,
    /// A card is "missed" when `ewma_miss` exceeds this (strictly).
    pub miss_threshold: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_ease: 1.3,
            max_ease: 2.5,
            default_ease: 2.5,
            ewma_alpha: 0.2,
            miss_threshold: 0.4,
        }
    }
}

/// Aggregate scheduling state derived from a card's full review history.
#[derive(Debug, Clone, PartialEq)]
pub struct RecomputedStats {
    pub correct_count: i64,
    pub wrong_count: i64,
    pub last_seen: DateTime<Utc>,
    pub ease: f64,
    pub interval_days: i64,
    pub due_date: DateTime<Utc>,
}

/// Replay a card's complete ledger, in chronological order, and derive its
/// scheduling state.
///
/// Returns `None` for an empty history; the caller must then delete any
/// existing stats row. Grades are assumed already validated to 0-5.
pub fn recompute_stats(
    reviews: &[ReviewEvent],
    config: &SchedulerConfig,
) -> Option<RecomputedStats> {
    let last = reviews.last()?;

    let correct_count = reviews.iter().filter(|r| r.grade >= 4).count() as i64;
    let wrong_count = reviews.len() as i64 - correct_count;

    let mut ease = config.default_ease;
    let mut interval: i64 = 1;
    let mut due_date = midnight_after(last.timestamp, interval);

    for (idx, review) in reviews.iter().enumerate() {
        let q = review.grade;
        if idx == 0 {
            interval = 1;
        } else if q < 3 {
            // Failed recall drops the card back to a one-day interval.
            interval = 1;
        } else {
            // Interval growth uses the ease carried over from the previous
            // iteration; the ease update below comes after.
            interval = (interval as f64 * ease).floor() as i64;
        }

        let miss = (5 - q) as f64;
        ease = (ease + (0.1 - miss * (0.08 + miss * 0.02))).clamp(config.min_ease, config.max_ease);

        due_date = midnight_after(review.timestamp, interval);
    }

    Some(RecomputedStats {
        correct_count,
        wrong_count,
        last_seen: last.timestamp,
        ease,
        interval_days: interval,
        due_date,
    })
}

/// Midnight UTC of the event's date plus `days`. Due dates anchor on the
/// reviewed day, not on the wall clock at recompute time.
fn midnight_after(ts: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    let date = ts.date_naive() + chrono::Duration::days(days);
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Outcome of an incremental miss-signal update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EwmaUpdate {
    /// No stats row existed; create one carrying only this value.
    Seed(f64),
    /// Write this value into the existing row.
    Blend(f64),
    /// The stored counts already absorb every logged attempt (including the
    /// one just appended); applying the blend again would double-count it.
    Skip,
}

/// Incrementally fold one review outcome into the card's miss signal.
///
/// `logged_attempts` is the ledger size after the triggering event was
/// appended. Unlike [`recompute_stats`] this never replays history, so the
/// result stays a convex combination of values in [0, 1].
pub fn ewma_miss_update(
    stats: Option<&FlashcardStats>,
    logged_attempts: i64,
    is_miss: bool,
    config: &SchedulerConfig,
) -> EwmaUpdate {
    let seed = if is_miss { 1.0 } else { 0.0 };
    let stats = match stats {
        None => return EwmaUpdate::Seed(seed),
        Some(s) => s,
    };

    if stats.correct_count + stats.wrong_count >= logged_attempts {
        return EwmaUpdate::Skip;
    }

    match stats.ewma_miss {
        None => EwmaUpdate::Blend(seed),
        Some(prev) => {
            EwmaUpdate::Blend(config.ewma_alpha * seed + (1.0 - config.ewma_alpha) * prev)
        }
    }
}

/// A card is due when it has no stats row at all, or when its schedule has
/// come up (`due_date <= now`, inclusive). A row seeded by the EWMA tracker
/// but never recomputed carries no schedule and is not due.
pub fn is_due(stats: Option<&FlashcardStats>, now: DateTime<Utc>) -> bool {
    match stats {
        None => true,
        Some(s) => s.due_date.map_or(false, |due| due <= now),
    }
}

/// A card is missed when its miss signal is present and strictly above the
/// threshold.
pub fn is_missed(stats: Option<&FlashcardStats>, config: &SchedulerConfig) -> bool {
    stats
        .and_then(|s| s.ewma_miss)
        .map_or(false, |m| m > config.miss_threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::Rng;
    use uuid::Uuid;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 30, 0).unwrap()
    }

    fn review(card: Uuid, grade: i32, timestamp: DateTime<Utc>) -> ReviewEvent {
        ReviewEvent {
            id: Uuid::new_v4(),
            flashcard_id: card,
            grade,
            latency_ms: Some(1200),
            timestamp,
        }
    }

    fn history(grades: &[i32]) -> Vec<ReviewEvent> {
        let card = Uuid::new_v4();
        grades
            .iter()
            .enumerate()
            .map(|(i, &g)| review(card, g, ts(1 + i as u32 / 24, i as u32 % 24)))
            .collect()
    }

    fn midnight(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_history_yields_no_stats() {
        assert!(recompute_stats(&[], &SchedulerConfig::default()).is_none());
    }

    #[test]
    fn test_single_perfect_review() {
        // Worked example A: one grade-5 review. The raw ease update would
        // exceed the maximum and is clamped back to 2.5.
        let card = Uuid::new_v4();
        let reviews = vec![review(card, 5, ts(10, 15))];
        let stats = recompute_stats(&reviews, &SchedulerConfig::default()).unwrap();

        assert_eq!(stats.interval_days, 1);
        assert_eq!(stats.ease, 2.5);
        assert_eq!(stats.correct_count, 1);
        assert_eq!(stats.wrong_count, 0);
        assert_eq!(stats.due_date, midnight(11));
        assert_eq!(stats.last_seen, ts(10, 15));
    }

    #[test]
    fn test_reset_then_success() {
        // Worked example B: grades [2, 5].
        // After event 1: interval 1, ease 2.5 - 0.32 = 2.18.
        // After event 2: interval floor(1 * 2.18) = 2, ease 2.18 + 0.1 = 2.28.
        let card = Uuid::new_v4();
        let reviews = vec![review(card, 2, ts(10, 9)), review(card, 5, ts(12, 9))];
        let stats = recompute_stats(&reviews, &SchedulerConfig::default()).unwrap();

        assert_eq!(stats.interval_days, 2);
        assert!((stats.ease - 2.28).abs() < 1e-9);
        assert_eq!(stats.correct_count, 1);
        assert_eq!(stats.wrong_count, 1);
        assert_eq!(stats.due_date, midnight(14));
    }

    #[test]
    fn test_counts_partition_entire_history() {
        // Grade 3 is a successful recall for scheduling but counts as wrong
        // for mastery (correct means >= 4).
        let stats = recompute_stats(&history(&[3, 4, 5, 0, 3]), &SchedulerConfig::default())
            .unwrap();
        assert_eq!(stats.correct_count, 2);
        assert_eq!(stats.wrong_count, 3);
        assert_eq!(stats.correct_count + stats.wrong_count, 5);
    }

    #[test]
    fn test_due_date_derives_from_last_event_not_now() {
        // A history from 2026-03 must schedule relative to its own last
        // event, no matter when the recompute runs.
        let card = Uuid::new_v4();
        let reviews = vec![review(card, 5, ts(3, 8)), review(card, 5, ts(5, 8))];
        let stats = recompute_stats(&reviews, &SchedulerConfig::default()).unwrap();

        // floor(1 * 2.5) = 2 days after March 5th.
        assert_eq!(stats.interval_days, 2);
        assert_eq!(stats.due_date, midnight(7));
        assert!(stats.due_date < Utc::now());
    }

    #[test]
    fn test_failed_recall_resets_interval() {
        let stats =
            recompute_stats(&history(&[5, 5, 5, 1]), &SchedulerConfig::default()).unwrap();
        assert_eq!(stats.interval_days, 1);
    }

    #[test]
    fn test_recompute_is_deterministic() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let len = rng.gen_range(1..=60);
            let grades: Vec<i32> = (0..len).map(|_| rng.gen_range(0..=5)).collect();
            let reviews = history(&grades);

            let a = recompute_stats(&reviews, &SchedulerConfig::default()).unwrap();
            let b = recompute_stats(&reviews, &SchedulerConfig::default()).unwrap();
            // Bit-identical, not approximately equal.
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_ease_and_interval_bounds_fuzz() {
        let config = SchedulerConfig::default();
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let len = rng.gen_range(1..=200);
            let grades: Vec<i32> = (0..len).map(|_| rng.gen_range(0..=5)).collect();
            let stats = recompute_stats(&history(&grades), &config).unwrap();

            assert!(stats.ease >= config.min_ease && stats.ease <= config.max_ease);
            assert!(stats.interval_days >= 1);
        }
    }

    #[test]
    fn test_fifty_blackouts_pin_lower_clamp() {
        let stats =
            recompute_stats(&history(&[0; 50]), &SchedulerConfig::default()).unwrap();
        assert_eq!(stats.ease, 1.3);
        assert_eq!(stats.interval_days, 1);
        assert_eq!(stats.correct_count, 0);
        assert_eq!(stats.wrong_count, 50);
    }

    #[test]
    fn test_ewma_seeds_on_first_touch() {
        let config = SchedulerConfig::default();
        assert_eq!(ewma_miss_update(None, 1, true, &config), EwmaUpdate::Seed(1.0));
        assert_eq!(ewma_miss_update(None, 1, false, &config), EwmaUpdate::Seed(0.0));
    }

    #[test]
    fn test_ewma_blends_toward_outcome() {
        let config = SchedulerConfig::default();
        let mut stats = FlashcardStats::seeded(Uuid::new_v4(), 1.0);
        stats.correct_count = 2;
        stats.wrong_count = 1;

        // Three absorbed attempts, a fourth just logged: guard passes.
        let update = ewma_miss_update(Some(&stats), 4, false, &config);
        match update {
            EwmaUpdate::Blend(v) => assert!((v - 0.8).abs() < 1e-12),
            other => panic!("expected blend, got {:?}", other),
        }
    }

    #[test]
    fn test_ewma_skips_when_counts_absorbed_attempts() {
        let config = SchedulerConfig::default();
        let mut stats = FlashcardStats::seeded(Uuid::new_v4(), 0.5);
        stats.correct_count = 3;
        stats.wrong_count = 1;

        assert_eq!(ewma_miss_update(Some(&stats), 4, true, &config), EwmaUpdate::Skip);
        assert_eq!(ewma_miss_update(Some(&stats), 3, true, &config), EwmaUpdate::Skip);
    }

    #[test]
    fn test_ewma_unset_on_existing_row_falls_back_to_seed() {
        let config = SchedulerConfig::default();
        let stats = FlashcardStats {
            ewma_miss: None,
            correct_count: 1,
            wrong_count: 1,
            ..FlashcardStats::seeded(Uuid::new_v4(), 0.0)
        };

        assert_eq!(
            ewma_miss_update(Some(&stats), 3, true, &config),
            EwmaUpdate::Blend(1.0)
        );
    }

    #[test]
    fn test_ewma_stays_within_unit_interval() {
        let config = SchedulerConfig::default();
        let mut rng = rand::thread_rng();
        let mut value = 1.0_f64;
        let mut absorbed = 1_i64;

        for _ in 0..500 {
            let mut stats = FlashcardStats::seeded(Uuid::new_v4(), value);
            stats.wrong_count = absorbed;
            match ewma_miss_update(Some(&stats), absorbed + 1, rng.gen_bool(0.5), &config) {
                EwmaUpdate::Blend(v) => {
                    assert!((0.0..=1.0).contains(&v));
                    value = v;
                    absorbed += 1;
                }
                other => panic!("expected blend, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_due_includes_boundary_and_statless_cards() {
        let now = ts(20, 12);
        let mut stats = FlashcardStats::seeded(Uuid::new_v4(), 0.0);

        // No stats row at all: always due.
        assert!(is_due(None, now));

        stats.due_date = Some(now);
        assert!(is_due(Some(&stats), now));

        stats.due_date = Some(now + chrono::Duration::seconds(1));
        assert!(!is_due(Some(&stats), now));
    }

    #[test]
    fn test_ewma_seeded_row_without_schedule_is_not_due() {
        let stats = FlashcardStats::seeded(Uuid::new_v4(), 1.0);
        assert!(stats.due_date.is_none());
        assert!(!is_due(Some(&stats), ts(20, 12)));
    }

    #[test]
    fn test_missed_threshold_is_strict() {
        let config = SchedulerConfig::default();
        let mut stats = FlashcardStats::seeded(Uuid::new_v4(), 0.41);
        assert!(is_missed(Some(&stats), &config));

        stats.ewma_miss = Some(0.4);
        assert!(!is_missed(Some(&stats), &config));

        stats.ewma_miss = None;
        assert!(!is_missed(Some(&stats), &config));
        assert!(!is_missed(None, &config));
    }
}
