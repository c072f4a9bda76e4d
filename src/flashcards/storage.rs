//! Storage operations for flashcards, their review ledger, and derived stats.
//!
//! The ledger (`flashcard_reviews`) is append-only and is never mutated by
//! the scheduling engine; review deletion exists as an administrative
//! operation only. A review submission runs as one transaction: append the
//! event, fold the EWMA miss signal, then replay the full ledger through the
//! SM-2 recompute and persist the derived row. The EWMA fold must run before
//! the recompute: its skip guard compares the stored counts (which still lag
//! by the event just appended) against the ledger size.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::algorithm::{
    ewma_miss_update, is_due, is_missed, recompute_stats, EwmaUpdate, SchedulerConfig,
};
use super::models::{Flashcard, FlashcardStats, ReviewEvent};
use crate::stacks::storage::{stack_owned_in, topic_owned_in};
use crate::storage::{format_datetime, parse_datetime, parse_uuid, Database, Result, StorageError};

#[derive(Clone)]
pub struct FlashcardStorage {
    db: Database,
    scheduler: SchedulerConfig,
}

impl FlashcardStorage {
    pub fn new(db: Database, scheduler: SchedulerConfig) -> Self {
        Self { db, scheduler }
    }

    // ==================== Card CRUD ====================

    pub fn list_by_topic(&self, user_id: Uuid, topic_id: Uuid) -> Result<Vec<Flashcard>> {
        let conn = self.db.conn()?;
        topic_owned_in(&conn, user_id, topic_id)?;
        let mut stmt = conn.prepare(
            "SELECT id, topic_id, front, back, explanation FROM flashcards
             WHERE topic_id = ?1 ORDER BY rowid",
        )?;
        let cards = stmt
            .query_map(params![topic_id.to_string()], map_card)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cards)
    }

    pub fn list_by_stack(&self, user_id: Uuid, stack_id: Uuid) -> Result<Vec<Flashcard>> {
        let conn = self.db.conn()?;
        stack_owned_in(&conn, user_id, stack_id)?;
        let mut stmt = conn.prepare(
            "SELECT f.id, f.topic_id, f.front, f.back, f.explanation
             FROM flashcards f JOIN topics t ON f.topic_id = t.id
             WHERE t.stack_id = ?1 ORDER BY f.rowid",
        )?;
        let cards = stmt
            .query_map(params![stack_id.to_string()], map_card)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cards)
    }

    pub fn get(&self, user_id: Uuid, flashcard_id: Uuid) -> Result<Flashcard> {
        let conn = self.db.conn()?;
        card_owned_in(&conn, user_id, flashcard_id)
    }

    pub fn create(
        &self,
        user_id: Uuid,
        topic_id: Uuid,
        front: String,
        back: String,
        explanation: Option<String>,
    ) -> Result<Flashcard> {
        let conn = self.db.conn()?;
        topic_owned_in(&conn, user_id, topic_id)?;
        let card = Flashcard::new(topic_id, front, back, explanation);
        conn.execute(
            "INSERT INTO flashcards (id, topic_id, front, back, explanation)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                card.id.to_string(),
                card.topic_id.to_string(),
                card.front,
                card.back,
                card.explanation,
            ],
        )?;
        Ok(card)
    }

    pub fn edit(
        &self,
        user_id: Uuid,
        flashcard_id: Uuid,
        front: String,
        back: String,
    ) -> Result<Flashcard> {
        let conn = self.db.conn()?;
        let mut card = card_owned_in(&conn, user_id, flashcard_id)?;
        conn.execute(
            "UPDATE flashcards SET front = ?1, back = ?2 WHERE id = ?3",
            params![front, back, flashcard_id.to_string()],
        )?;
        card.front = front;
        card.back = back;
        Ok(card)
    }

    pub fn delete(&self, user_id: Uuid, flashcard_id: Uuid) -> Result<()> {
        let conn = self.db.conn()?;
        card_owned_in(&conn, user_id, flashcard_id)?;
        conn.execute(
            "DELETE FROM flashcards WHERE id = ?1",
            params![flashcard_id.to_string()],
        )?;
        Ok(())
    }

    // ==================== Review ledger ====================

    /// The card's full grading history, chronologically ascending with
    /// insertion order as the tie-break.
    pub fn list_reviews(&self, user_id: Uuid, flashcard_id: Uuid) -> Result<Vec<ReviewEvent>> {
        let conn = self.db.conn()?;
        card_owned_in(&conn, user_id, flashcard_id)?;
        list_reviews_in(&conn, flashcard_id)
    }

    /// Append a grading event and refresh the card's derived stats.
    ///
    /// Grade validation (0-5) belongs to the API layer; this path assumes it
    /// already happened. The append, EWMA fold, and recompute commit as one
    /// atomic unit.
    pub fn submit_review(
        &self,
        user_id: Uuid,
        flashcard_id: Uuid,
        grade: i32,
        latency_ms: Option<i64>,
    ) -> Result<(ReviewEvent, FlashcardStats)> {
        let mut conn = self.db.conn()?;
        card_owned_in(&conn, user_id, flashcard_id)?;

        let tx = conn.transaction()?;
        let event = ReviewEvent::new(flashcard_id, grade, latency_ms);
        tx.execute(
            "INSERT INTO flashcard_reviews (id, flashcard_id, grade, latency_ms, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id.to_string(),
                event.flashcard_id.to_string(),
                event.grade,
                event.latency_ms,
                format_datetime(event.timestamp),
            ],
        )?;

        apply_ewma_in(&tx, flashcard_id, grade < 4, &self.scheduler)?;
        let stats = refresh_stats_in(&tx, flashcard_id, &self.scheduler)?
            .ok_or(StorageError::StatsNotFound(flashcard_id))?;
        tx.commit()?;

        log::debug!(
            "review {} for card {}: grade {}, interval {:?}d",
            event.id,
            flashcard_id,
            grade,
            stats.interval_days,
        );
        Ok((event, stats))
    }

    /// Administrative removal of a ledger event. The stats row is replayed
    /// from what remains and deleted outright when the ledger is empty.
    pub fn delete_review(&self, user_id: Uuid, review_id: Uuid) -> Result<Option<FlashcardStats>> {
        let mut conn = self.db.conn()?;
        let flashcard_id: Uuid = conn
            .query_row(
                "SELECT r.flashcard_id
                 FROM flashcard_reviews r
                 JOIN flashcards f ON r.flashcard_id = f.id
                 JOIN topics t ON f.topic_id = t.id
                 JOIN study_stacks s ON t.stack_id = s.id
                 WHERE r.id = ?1 AND s.user_id = ?2",
                params![review_id.to_string(), user_id.to_string()],
                |row| parse_uuid(0, row.get(0)?),
            )
            .optional()?
            .ok_or(StorageError::ReviewNotFound(review_id))?;

        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM flashcard_reviews WHERE id = ?1",
            params![review_id.to_string()],
        )?;
        let stats = refresh_stats_in(&tx, flashcard_id, &self.scheduler)?;
        tx.commit()?;
        Ok(stats)
    }

    // ==================== Stats & selectors ====================

    pub fn get_stats(&self, user_id: Uuid, flashcard_id: Uuid) -> Result<Option<FlashcardStats>> {
        let conn = self.db.conn()?;
        card_owned_in(&conn, user_id, flashcard_id)?;
        get_stats_in(&conn, flashcard_id)
    }

    /// Cards in the stack that are due at `now`: no stats row yet, or a
    /// schedule that has come up. Preserves card order.
    pub fn due_cards(
        &self,
        user_id: Uuid,
        stack_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Flashcard>> {
        let cards = self.cards_with_stats(user_id, stack_id)?;
        Ok(cards
            .into_iter()
            .filter(|(_, stats)| is_due(stats.as_ref(), now))
            .map(|(card, _)| card)
            .collect())
    }

    /// Cards in the stack whose miss signal sits above the threshold.
    pub fn missed_cards(&self, user_id: Uuid, stack_id: Uuid) -> Result<Vec<Flashcard>> {
        let cards = self.cards_with_stats(user_id, stack_id)?;
        Ok(cards
            .into_iter()
            .filter(|(_, stats)| is_missed(stats.as_ref(), &self.scheduler))
            .map(|(card, _)| card)
            .collect())
    }

    fn cards_with_stats(
        &self,
        user_id: Uuid,
        stack_id: Uuid,
    ) -> Result<Vec<(Flashcard, Option<FlashcardStats>)>> {
        let conn = self.db.conn()?;
        stack_owned_in(&conn, user_id, stack_id)?;
        let mut stmt = conn.prepare(
            "SELECT f.id, f.topic_id, f.front, f.back, f.explanation,
                    s.flashcard_id, s.correct_count, s.wrong_count, s.last_seen,
                    s.ease, s.interval_days, s.due_date, s.ewma_miss
             FROM flashcards f
             JOIN topics t ON f.topic_id = t.id
             LEFT JOIN flashcard_stats s ON s.flashcard_id = f.id
             WHERE t.stack_id = ?1
             ORDER BY f.rowid",
        )?;
        let rows = stmt
            .query_map(params![stack_id.to_string()], |row| {
                let card = map_card(row)?;
                let stats = match row.get::<_, Option<String>>(5)? {
                    None => None,
                    Some(id) => Some(FlashcardStats {
                        flashcard_id: parse_uuid(5, id)?,
                        correct_count: row.get(6)?,
                        wrong_count: row.get(7)?,
                        last_seen: opt_datetime(8, row.get(8)?)?,
                        ease: row.get(9)?,
                        interval_days: row.get(10)?,
                        due_date: opt_datetime(11, row.get(11)?)?,
                        ewma_miss: row.get(12)?,
                    }),
                };
                Ok((card, stats))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ==================== Row helpers ====================

fn map_card(row: &rusqlite::Row) -> rusqlite::Result<Flashcard> {
    Ok(Flashcard {
        id: parse_uuid(0, row.get(0)?)?,
        topic_id: parse_uuid(1, row.get(1)?)?,
        front: row.get(2)?,
        back: row.get(3)?,
        explanation: row.get(4)?,
    })
}

fn map_review(row: &rusqlite::Row) -> rusqlite::Result<ReviewEvent> {
    Ok(ReviewEvent {
        id: parse_uuid(0, row.get(0)?)?,
        flashcard_id: parse_uuid(1, row.get(1)?)?,
        grade: row.get(2)?,
        latency_ms: row.get(3)?,
        timestamp: parse_datetime(4, row.get(4)?)?,
    })
}

fn map_stats(row: &rusqlite::Row) -> rusqlite::Result<FlashcardStats> {
    Ok(FlashcardStats {
        flashcard_id: parse_uuid(0, row.get(0)?)?,
        correct_count: row.get(1)?,
        wrong_count: row.get(2)?,
        last_seen: opt_datetime(3, row.get(3)?)?,
        ease: row.get(4)?,
        interval_days: row.get(5)?,
        due_date: opt_datetime(6, row.get(6)?)?,
        ewma_miss: row.get(7)?,
    })
}

fn opt_datetime(
    idx: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_datetime(idx, v)).transpose()
}

fn card_owned_in(conn: &Connection, user_id: Uuid, flashcard_id: Uuid) -> Result<Flashcard> {
    conn.query_row(
        "SELECT f.id, f.topic_id, f.front, f.back, f.explanation
         FROM flashcards f
         JOIN topics t ON f.topic_id = t.id
         JOIN study_stacks s ON t.stack_id = s.id
         WHERE f.id = ?1 AND s.user_id = ?2",
        params![flashcard_id.to_string(), user_id.to_string()],
        map_card,
    )
    .optional()?
    .ok_or(StorageError::FlashcardNotFound(flashcard_id))
}

fn list_reviews_in(conn: &Connection, flashcard_id: Uuid) -> Result<Vec<ReviewEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, flashcard_id, grade, latency_ms, timestamp
         FROM flashcard_reviews WHERE flashcard_id = ?1
         ORDER BY timestamp ASC, rowid ASC",
    )?;
    let reviews = stmt
        .query_map(params![flashcard_id.to_string()], map_review)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(reviews)
}

fn get_stats_in(conn: &Connection, flashcard_id: Uuid) -> Result<Option<FlashcardStats>> {
    Ok(conn
        .query_row(
            "SELECT flashcard_id, correct_count, wrong_count, last_seen,
                    ease, interval_days, due_date, ewma_miss
             FROM flashcard_stats WHERE flashcard_id = ?1",
            params![flashcard_id.to_string()],
            map_stats,
        )
        .optional()?)
}

/// Fold one review outcome into the miss signal. The ledger size at this
/// point already includes the event that triggered the call.
fn apply_ewma_in(
    conn: &Connection,
    flashcard_id: Uuid,
    is_miss: bool,
    scheduler: &SchedulerConfig,
) -> Result<()> {
    let logged_attempts: i64 = conn.query_row(
        "SELECT COUNT(*) FROM flashcard_reviews WHERE flashcard_id = ?1",
        params![flashcard_id.to_string()],
        |row| row.get(0),
    )?;
    let stats = get_stats_in(conn, flashcard_id)?;

    match ewma_miss_update(stats.as_ref(), logged_attempts, is_miss, scheduler) {
        EwmaUpdate::Seed(value) => {
            conn.execute(
                "INSERT INTO flashcard_stats (flashcard_id, ewma_miss) VALUES (?1, ?2)",
                params![flashcard_id.to_string(), value],
            )?;
        }
        EwmaUpdate::Blend(value) => {
            conn.execute(
                "UPDATE flashcard_stats SET ewma_miss = ?1 WHERE flashcard_id = ?2",
                params![value, flashcard_id.to_string()],
            )?;
        }
        EwmaUpdate::Skip => {}
    }
    Ok(())
}

/// Replay the card's ledger and persist the derived row, leaving `ewma_miss`
/// untouched. An empty ledger deletes the row and yields `None`.
fn refresh_stats_in(
    conn: &Connection,
    flashcard_id: Uuid,
    scheduler: &SchedulerConfig,
) -> Result<Option<FlashcardStats>> {
    let reviews = list_reviews_in(conn, flashcard_id)?;
    match recompute_stats(&reviews, scheduler) {
        Some(derived) => {
            conn.execute(
                "INSERT INTO flashcard_stats
                     (flashcard_id, correct_count, wrong_count, last_seen,
                      ease, interval_days, due_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(flashcard_id) DO UPDATE SET
                     correct_count = excluded.correct_count,
                     wrong_count = excluded.wrong_count,
                     last_seen = excluded.last_seen,
                     ease = excluded.ease,
                     interval_days = excluded.interval_days,
                     due_date = excluded.due_date",
                params![
                    flashcard_id.to_string(),
                    derived.correct_count,
                    derived.wrong_count,
                    format_datetime(derived.last_seen),
                    derived.ease,
                    derived.interval_days,
                    format_datetime(derived.due_date),
                ],
            )?;
            get_stats_in(conn, flashcard_id)
        }
        None => {
            conn.execute(
                "DELETE FROM flashcard_stats WHERE flashcard_id = ?1",
                params![flashcard_id.to_string()],
            )?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::StackStorage;
    use crate::users::UserStorage;

    struct Fixture {
        cards: FlashcardStorage,
        user: Uuid,
        stack: Uuid,
        topic: Uuid,
    }

    fn setup() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let user = UserStorage::new(db.clone())
            .get_or_create("uid", "Tester")
            .unwrap();
        let stacks = StackStorage::new(db.clone());
        let stack = stacks
            .create_stack(user.id, "Chemistry".into(), None)
            .unwrap();
        let topic = stacks
            .create_topic(user.id, stack.id, "Stoichiometry".into(), None)
            .unwrap();
        Fixture {
            cards: FlashcardStorage::new(db, SchedulerConfig::default()),
            user: user.id,
            stack: stack.id,
            topic: topic.id,
        }
    }

    fn card(f: &Fixture) -> Flashcard {
        f.cards
            .create(
                f.user,
                f.topic,
                "What is a mole?".into(),
                "6.022e23 entities".into(),
                None,
            )
            .unwrap()
    }

    #[test]
    fn card_crud_scoped_by_owner() {
        let f = setup();
        let c = card(&f);

        assert_eq!(f.cards.list_by_topic(f.user, f.topic).unwrap().len(), 1);
        assert_eq!(f.cards.list_by_stack(f.user, f.stack).unwrap().len(), 1);

        let err = f.cards.get(Uuid::new_v4(), c.id).unwrap_err();
        assert!(err.is_not_found());

        let edited = f
            .cards
            .edit(f.user, c.id, "Front'".into(), "Back'".into())
            .unwrap();
        assert_eq!(edited.front, "Front'");

        f.cards.delete(f.user, c.id).unwrap();
        assert!(f.cards.list_by_topic(f.user, f.topic).unwrap().is_empty());
    }

    #[test]
    fn first_review_seeds_ewma_and_schedules() {
        let f = setup();
        let c = card(&f);

        let (event, stats) = f.cards.submit_review(f.user, c.id, 2, Some(900)).unwrap();
        assert_eq!(event.grade, 2);
        // First-ever touch on a statless card seeds the miss signal outright.
        assert_eq!(stats.ewma_miss, Some(1.0));
        assert_eq!(stats.correct_count, 0);
        assert_eq!(stats.wrong_count, 1);
        assert_eq!(stats.interval_days, Some(1));
    }

    #[test]
    fn counts_always_match_ledger_length() {
        let f = setup();
        let c = card(&f);

        for grade in [5, 0, 3, 4, 1] {
            let (_, stats) = f.cards.submit_review(f.user, c.id, grade, None).unwrap();
            let ledger = f.cards.list_reviews(f.user, c.id).unwrap();
            assert_eq!(
                stats.correct_count + stats.wrong_count,
                ledger.len() as i64
            );
        }
    }

    #[test]
    fn reset_then_success_schedules_two_days_out() {
        let f = setup();
        let c = card(&f);

        f.cards.submit_review(f.user, c.id, 2, None).unwrap();
        let (event, stats) = f.cards.submit_review(f.user, c.id, 5, None).unwrap();

        assert_eq!(stats.interval_days, Some(2));
        assert!((stats.ease.unwrap() - 2.28).abs() < 1e-9);
        let expected_due = (event.timestamp.date_naive() + chrono::Duration::days(2))
            .and_time(chrono::NaiveTime::MIN)
            .and_utc();
        assert_eq!(stats.due_date, Some(expected_due));
    }

    #[test]
    fn second_submission_blends_miss_signal() {
        let f = setup();
        let c = card(&f);

        f.cards.submit_review(f.user, c.id, 1, None).unwrap();
        let (_, stats) = f.cards.submit_review(f.user, c.id, 5, None).unwrap();

        // Seeded at 1.0, then blended toward a success: 0.2*0 + 0.8*1.0.
        assert!((stats.ewma_miss.unwrap() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn recompute_preserves_miss_signal() {
        let f = setup();
        let c = card(&f);

        f.cards.submit_review(f.user, c.id, 0, None).unwrap();
        let (_, stats) = f.cards.submit_review(f.user, c.id, 0, None).unwrap();

        let expected = 0.2 * 1.0 + 0.8 * 1.0;
        assert!((stats.ewma_miss.unwrap() - expected).abs() < 1e-12);
        // The schedule columns were rewritten by the replay in between.
        assert_eq!(stats.wrong_count, 2);
    }

    #[test]
    fn deleting_last_review_deletes_stats() {
        let f = setup();
        let c = card(&f);

        let (event, _) = f.cards.submit_review(f.user, c.id, 4, None).unwrap();
        let after = f.cards.delete_review(f.user, event.id).unwrap();

        assert!(after.is_none());
        assert!(f.cards.get_stats(f.user, c.id).unwrap().is_none());
    }

    #[test]
    fn deleting_one_review_replays_the_rest() {
        let f = setup();
        let c = card(&f);

        let (first, _) = f.cards.submit_review(f.user, c.id, 0, None).unwrap();
        f.cards.submit_review(f.user, c.id, 5, None).unwrap();

        let after = f.cards.delete_review(f.user, first.id).unwrap().unwrap();
        assert_eq!(after.correct_count, 1);
        assert_eq!(after.wrong_count, 0);
        // A single remaining review always schedules one day out.
        assert_eq!(after.interval_days, Some(1));
    }

    #[test]
    fn due_listing_includes_statless_and_overdue_cards() {
        let f = setup();
        let fresh = card(&f);
        let reviewed = f
            .cards
            .create(f.user, f.topic, "Q2".into(), "A2".into(), None)
            .unwrap();

        // A grade-5 review today schedules tomorrow; not due right now.
        f.cards.submit_review(f.user, reviewed.id, 5, None).unwrap();

        let due = f.cards.due_cards(f.user, f.stack, Utc::now()).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, fresh.id);

        // ...but it is due once "now" reaches its due date.
        let later = Utc::now() + chrono::Duration::days(2);
        let due_later = f.cards.due_cards(f.user, f.stack, later).unwrap();
        assert_eq!(due_later.len(), 2);
        // Input order is preserved: fresh card first, reviewed card second.
        assert_eq!(due_later[0].id, fresh.id);
        assert_eq!(due_later[1].id, reviewed.id);
    }

    #[test]
    fn missed_listing_uses_strict_threshold() {
        let f = setup();
        let missed = card(&f);
        let mastered = f
            .cards
            .create(f.user, f.topic, "Q2".into(), "A2".into(), None)
            .unwrap();

        f.cards.submit_review(f.user, missed.id, 0, None).unwrap();
        f.cards.submit_review(f.user, mastered.id, 5, None).unwrap();

        let listed = f.cards.missed_cards(f.user, f.stack).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, missed.id);
    }

    #[test]
    fn deleting_card_cascades_ledger_and_stats() {
        let f = setup();
        let c = card(&f);
        f.cards.submit_review(f.user, c.id, 3, None).unwrap();

        f.cards.delete(f.user, c.id).unwrap();

        let err = f.cards.list_reviews(f.user, c.id).unwrap_err();
        assert!(err.is_not_found());
    }
}
