//! Storage operations for exams, questions, and attempts.

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::models::{Exam, ExamAttempt, ExamInfo, Question, QuestionAttempt};
use crate::stacks::storage::stack_owned_in;
use crate::storage::{format_datetime, parse_datetime, parse_uuid, Database, Result, StorageError};

const ANSWER_OPTIONS: [&str; 4] = ["A", "B", "C", "D"];

#[derive(Clone)]
pub struct ExamStorage {
    db: Database,
}

impl ExamStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ==================== Exams ====================

    pub fn create_exam(&self, user_id: Uuid, stack_id: Uuid, name: String) -> Result<Exam> {
        let conn = self.db.conn()?;
        stack_owned_in(&conn, user_id, stack_id)?;
        let exam = Exam::new(stack_id, name);
        conn.execute(
            "INSERT INTO exams (id, stack_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                exam.id.to_string(),
                exam.stack_id.to_string(),
                exam.name,
                format_datetime(exam.created_at),
            ],
        )?;
        Ok(exam)
    }

    pub fn get_exam(&self, user_id: Uuid, exam_id: Uuid) -> Result<Exam> {
        let conn = self.db.conn()?;
        exam_owned_in(&conn, user_id, exam_id)
    }

    /// Exam enriched with the distinct topic names its questions cover and
    /// the best attempt so far (highest score, then most questions scored).
    pub fn exam_info(&self, user_id: Uuid, exam_id: Uuid) -> Result<ExamInfo> {
        let conn = self.db.conn()?;
        let exam = exam_owned_in(&conn, user_id, exam_id)?;
        exam_info_in(&conn, exam)
    }

    pub fn list_exams(&self, user_id: Uuid, stack_id: Uuid) -> Result<Vec<ExamInfo>> {
        let conn = self.db.conn()?;
        stack_owned_in(&conn, user_id, stack_id)?;
        let mut stmt = conn.prepare(
            "SELECT id, stack_id, name, created_at FROM exams
             WHERE stack_id = ?1 ORDER BY rowid",
        )?;
        let exams = stmt
            .query_map(params![stack_id.to_string()], map_exam)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        exams
            .into_iter()
            .map(|exam| exam_info_in(&conn, exam))
            .collect()
    }

    pub fn delete_exam(&self, user_id: Uuid, exam_id: Uuid) -> Result<()> {
        let conn = self.db.conn()?;
        exam_owned_in(&conn, user_id, exam_id)?;
        conn.execute("DELETE FROM exams WHERE id = ?1", params![exam_id.to_string()])?;
        Ok(())
    }

    // ==================== Questions ====================

    pub fn create_question(
        &self,
        user_id: Uuid,
        exam_id: Uuid,
        text: String,
        options: [String; 4],
        answer: String,
        topic_id: Option<Uuid>,
    ) -> Result<Question> {
        if !ANSWER_OPTIONS.contains(&answer.as_str()) {
            return Err(StorageError::InvalidAnswerOption(answer));
        }
        let conn = self.db.conn()?;
        exam_owned_in(&conn, user_id, exam_id)?;

        let position: i32 = conn.query_row(
            "SELECT COUNT(*) FROM questions WHERE exam_id = ?1",
            params![exam_id.to_string()],
            |row| row.get(0),
        )?;
        let [option_a, option_b, option_c, option_d] = options;
        let question = Question {
            id: Uuid::new_v4(),
            exam_id,
            topic_id,
            text,
            option_a,
            option_b,
            option_c,
            option_d,
            answer,
            explanation: None,
            position,
        };
        conn.execute(
            "INSERT INTO questions
                 (id, exam_id, topic_id, text, option_a, option_b, option_c, option_d,
                  answer, explanation, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                question.id.to_string(),
                question.exam_id.to_string(),
                question.topic_id.map(|t| t.to_string()),
                question.text,
                question.option_a,
                question.option_b,
                question.option_c,
                question.option_d,
                question.answer,
                question.explanation,
                question.position,
            ],
        )?;
        Ok(question)
    }

    pub fn list_questions(&self, user_id: Uuid, exam_id: Uuid) -> Result<Vec<Question>> {
        let conn = self.db.conn()?;
        exam_owned_in(&conn, user_id, exam_id)?;
        let mut stmt = conn.prepare(
            "SELECT id, exam_id, topic_id, text, option_a, option_b, option_c, option_d,
                    answer, explanation, position
             FROM questions WHERE exam_id = ?1 ORDER BY position, rowid",
        )?;
        let questions = stmt
            .query_map(params![exam_id.to_string()], map_question)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(questions)
    }

    pub fn delete_question(&self, user_id: Uuid, question_id: Uuid) -> Result<()> {
        let conn = self.db.conn()?;
        question_owned_in(&conn, user_id, question_id)?;
        conn.execute(
            "DELETE FROM questions WHERE id = ?1",
            params![question_id.to_string()],
        )?;
        Ok(())
    }

    // ==================== Attempts ====================

    pub fn create_attempt(&self, user_id: Uuid, exam_id: Uuid) -> Result<ExamAttempt> {
        let conn = self.db.conn()?;
        exam_owned_in(&conn, user_id, exam_id)?;
        let attempt = ExamAttempt::new(exam_id);
        conn.execute(
            "INSERT INTO exam_attempts (id, exam_id, completed_at) VALUES (?1, ?2, ?3)",
            params![
                attempt.id.to_string(),
                attempt.exam_id.to_string(),
                format_datetime(attempt.completed_at),
            ],
        )?;
        Ok(attempt)
    }

    pub fn list_attempts(&self, user_id: Uuid, exam_id: Uuid) -> Result<Vec<ExamAttempt>> {
        let conn = self.db.conn()?;
        exam_owned_in(&conn, user_id, exam_id)?;
        let mut stmt = conn.prepare(
            "SELECT id, exam_id, completed_at, scored_questions, score
             FROM exam_attempts WHERE exam_id = ?1 ORDER BY rowid",
        )?;
        let attempts = stmt
            .query_map(params![exam_id.to_string()], map_attempt)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attempts)
    }

    pub fn delete_attempt(&self, user_id: Uuid, attempt_id: Uuid) -> Result<()> {
        let conn = self.db.conn()?;
        attempt_owned_in(&conn, user_id, attempt_id)?;
        conn.execute(
            "DELETE FROM exam_attempts WHERE id = ?1",
            params![attempt_id.to_string()],
        )?;
        Ok(())
    }

    /// Record an answer for one question within an attempt. Correctness is
    /// fixed at creation by comparing against the question's answer letter.
    pub fn create_question_attempt(
        &self,
        user_id: Uuid,
        attempt_id: Uuid,
        question_id: Uuid,
        selected_option: Option<String>,
    ) -> Result<QuestionAttempt> {
        let conn = self.db.conn()?;
        attempt_owned_in(&conn, user_id, attempt_id)?;
        let question = question_owned_in(&conn, user_id, question_id)?;

        let is_correct = selected_option.as_deref() == Some(question.answer.as_str());
        let qa = QuestionAttempt {
            id: Uuid::new_v4(),
            exam_attempt_id: attempt_id,
            question_id,
            selected_option,
            is_correct,
            scored: true,
            manual_credit: false,
        };
        conn.execute(
            "INSERT INTO question_attempts
                 (id, exam_attempt_id, question_id, selected_option, is_correct,
                  scored, manual_credit)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                qa.id.to_string(),
                qa.exam_attempt_id.to_string(),
                qa.question_id.to_string(),
                qa.selected_option,
                qa.is_correct,
                qa.scored,
                qa.manual_credit,
            ],
        )?;
        Ok(qa)
    }

    pub fn list_question_attempts(
        &self,
        user_id: Uuid,
        attempt_id: Uuid,
    ) -> Result<Vec<QuestionAttempt>> {
        let conn = self.db.conn()?;
        attempt_owned_in(&conn, user_id, attempt_id)?;
        list_question_attempts_in(&conn, attempt_id)
    }

    /// Flip whether a question counts toward the score, or grant manual
    /// credit for an answer the letter-match got wrong.
    pub fn update_question_attempt_scoring(
        &self,
        user_id: Uuid,
        question_attempt_id: Uuid,
        scored: bool,
        manual_credit: bool,
    ) -> Result<QuestionAttempt> {
        let conn = self.db.conn()?;
        let mut qa = conn
            .query_row(
                "SELECT qa.id, qa.exam_attempt_id, qa.question_id, qa.selected_option,
                        qa.is_correct, qa.scored, qa.manual_credit
                 FROM question_attempts qa
                 JOIN exam_attempts a ON qa.exam_attempt_id = a.id
                 JOIN exams e ON a.exam_id = e.id
                 JOIN study_stacks s ON e.stack_id = s.id
                 WHERE qa.id = ?1 AND s.user_id = ?2",
                params![question_attempt_id.to_string(), user_id.to_string()],
                map_question_attempt,
            )
            .optional()?
            .ok_or(StorageError::QuestionAttemptNotFound(question_attempt_id))?;

        conn.execute(
            "UPDATE question_attempts SET scored = ?1, manual_credit = ?2 WHERE id = ?3",
            params![scored, manual_credit, question_attempt_id.to_string()],
        )?;
        qa.scored = scored;
        qa.manual_credit = manual_credit;
        Ok(qa)
    }

    /// Aggregate an attempt's question attempts into its score. Plain
    /// counting: scored questions form the denominator; correct or manually
    /// credited ones the numerator.
    pub fn score_attempt(&self, user_id: Uuid, attempt_id: Uuid) -> Result<ExamAttempt> {
        let conn = self.db.conn()?;
        let mut attempt = attempt_owned_in(&conn, user_id, attempt_id)?;

        let question_attempts = list_question_attempts_in(&conn, attempt_id)?;
        let mut scored_questions = 0_i64;
        let mut score = 0_i64;
        for qa in &question_attempts {
            if qa.scored {
                scored_questions += 1;
                if qa.manual_credit || qa.is_correct {
                    score += 1;
                }
            }
        }

        conn.execute(
            "UPDATE exam_attempts SET scored_questions = ?1, score = ?2 WHERE id = ?3",
            params![scored_questions, score, attempt_id.to_string()],
        )?;
        attempt.scored_questions = Some(scored_questions);
        attempt.score = Some(score);
        Ok(attempt)
    }
}

// ==================== Row helpers ====================

fn map_exam(row: &rusqlite::Row) -> rusqlite::Result<Exam> {
    Ok(Exam {
        id: parse_uuid(0, row.get(0)?)?,
        stack_id: parse_uuid(1, row.get(1)?)?,
        name: row.get(2)?,
        created_at: parse_datetime(3, row.get(3)?)?,
    })
}

fn map_question(row: &rusqlite::Row) -> rusqlite::Result<Question> {
    let topic_id = match row.get::<_, Option<String>>(2)? {
        Some(value) => Some(parse_uuid(2, value)?),
        None => None,
    };
    Ok(Question {
        id: parse_uuid(0, row.get(0)?)?,
        exam_id: parse_uuid(1, row.get(1)?)?,
        topic_id,
        text: row.get(3)?,
        option_a: row.get(4)?,
        option_b: row.get(5)?,
        option_c: row.get(6)?,
        option_d: row.get(7)?,
        answer: row.get(8)?,
        explanation: row.get(9)?,
        position: row.get(10)?,
    })
}

fn map_attempt(row: &rusqlite::Row) -> rusqlite::Result<ExamAttempt> {
    Ok(ExamAttempt {
        id: parse_uuid(0, row.get(0)?)?,
        exam_id: parse_uuid(1, row.get(1)?)?,
        completed_at: parse_datetime(2, row.get(2)?)?,
        scored_questions: row.get(3)?,
        score: row.get(4)?,
    })
}

fn map_question_attempt(row: &rusqlite::Row) -> rusqlite::Result<QuestionAttempt> {
    Ok(QuestionAttempt {
        id: parse_uuid(0, row.get(0)?)?,
        exam_attempt_id: parse_uuid(1, row.get(1)?)?,
        question_id: parse_uuid(2, row.get(2)?)?,
        selected_option: row.get(3)?,
        is_correct: row.get(4)?,
        scored: row.get(5)?,
        manual_credit: row.get(6)?,
    })
}

fn exam_owned_in(conn: &Connection, user_id: Uuid, exam_id: Uuid) -> Result<Exam> {
    conn.query_row(
        "SELECT e.id, e.stack_id, e.name, e.created_at
         FROM exams e JOIN study_stacks s ON e.stack_id = s.id
         WHERE e.id = ?1 AND s.user_id = ?2",
        params![exam_id.to_string(), user_id.to_string()],
        map_exam,
    )
    .optional()?
    .ok_or(StorageError::ExamNotFound(exam_id))
}

fn question_owned_in(conn: &Connection, user_id: Uuid, question_id: Uuid) -> Result<Question> {
    conn.query_row(
        "SELECT q.id, q.exam_id, q.topic_id, q.text, q.option_a, q.option_b, q.option_c,
                q.option_d, q.answer, q.explanation, q.position
         FROM questions q
         JOIN exams e ON q.exam_id = e.id
         JOIN study_stacks s ON e.stack_id = s.id
         WHERE q.id = ?1 AND s.user_id = ?2",
        params![question_id.to_string(), user_id.to_string()],
        map_question,
    )
    .optional()?
    .ok_or(StorageError::QuestionNotFound(question_id))
}

fn attempt_owned_in(conn: &Connection, user_id: Uuid, attempt_id: Uuid) -> Result<ExamAttempt> {
    conn.query_row(
        "SELECT a.id, a.exam_id, a.completed_at, a.scored_questions, a.score
         FROM exam_attempts a
         JOIN exams e ON a.exam_id = e.id
         JOIN study_stacks s ON e.stack_id = s.id
         WHERE a.id = ?1 AND s.user_id = ?2",
        params![attempt_id.to_string(), user_id.to_string()],
        map_attempt,
    )
    .optional()?
    .ok_or(StorageError::AttemptNotFound(attempt_id))
}

fn list_question_attempts_in(conn: &Connection, attempt_id: Uuid) -> Result<Vec<QuestionAttempt>> {
    let mut stmt = conn.prepare(
        "SELECT id, exam_attempt_id, question_id, selected_option, is_correct,
                scored, manual_credit
         FROM question_attempts WHERE exam_attempt_id = ?1 ORDER BY rowid",
    )?;
    let attempts = stmt
        .query_map(params![attempt_id.to_string()], map_question_attempt)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(attempts)
}

fn exam_info_in(conn: &Connection, exam: Exam) -> Result<ExamInfo> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT t.name FROM topics t
         JOIN questions q ON q.topic_id = t.id
         WHERE q.exam_id = ?1 ORDER BY t.name",
    )?;
    let topics = stmt
        .query_map(params![exam.id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let best_attempt = conn
        .query_row(
            "SELECT id, exam_id, completed_at, scored_questions, score
             FROM exam_attempts WHERE exam_id = ?1
             ORDER BY COALESCE(score, 0) DESC, COALESCE(scored_questions, 0) DESC
             LIMIT 1",
            params![exam.id.to_string()],
            map_attempt,
        )
        .optional()?;

    Ok(ExamInfo {
        id: exam.id,
        stack_id: exam.stack_id,
        name: exam.name,
        created_at: exam.created_at,
        topics,
        best_attempt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::StackStorage;
    use crate::users::UserStorage;

    struct Fixture {
        exams: ExamStorage,
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
        let stack = stacks.create_stack(user.id, "Physics".into(), None).unwrap();
        let topic = stacks
            .create_topic(user.id, stack.id, "Kinematics".into(), None)
            .unwrap();
        Fixture {
            exams: ExamStorage::new(db),
            user: user.id,
            stack: stack.id,
            topic: topic.id,
        }
    }

    fn options() -> [String; 4] {
        ["1 m/s".into(), "2 m/s".into(), "3 m/s".into(), "4 m/s".into()]
    }

    #[test]
    fn exam_with_questions_reports_topics() {
        let f = setup();
        let exam = f
            .exams
            .create_exam(f.user, f.stack, "Midterm".into())
            .unwrap();
        f.exams
            .create_question(
                f.user,
                exam.id,
                "Final velocity?".into(),
                options(),
                "B".into(),
                Some(f.topic),
            )
            .unwrap();

        let info = f.exams.exam_info(f.user, exam.id).unwrap();
        assert_eq!(info.topics, vec!["Kinematics".to_string()]);
        assert!(info.best_attempt.is_none());

        let listed = f.exams.list_exams(f.user, f.stack).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, exam.id);
    }

    #[test]
    fn invalid_answer_letter_is_rejected() {
        let f = setup();
        let exam = f.exams.create_exam(f.user, f.stack, "Quiz".into()).unwrap();
        let err = f
            .exams
            .create_question(f.user, exam.id, "Q".into(), options(), "E".into(), None)
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidAnswerOption(_)));
    }

    #[test]
    fn scoring_counts_only_scored_questions() {
        let f = setup();
        let exam = f.exams.create_exam(f.user, f.stack, "Quiz".into()).unwrap();
        let q1 = f
            .exams
            .create_question(f.user, exam.id, "Q1".into(), options(), "A".into(), None)
            .unwrap();
        let q2 = f
            .exams
            .create_question(f.user, exam.id, "Q2".into(), options(), "B".into(), None)
            .unwrap();
        let q3 = f
            .exams
            .create_question(f.user, exam.id, "Q3".into(), options(), "C".into(), None)
            .unwrap();

        let attempt = f.exams.create_attempt(f.user, exam.id).unwrap();
        // Correct, wrong, and wrong-but-credited answers.
        f.exams
            .create_question_attempt(f.user, attempt.id, q1.id, Some("A".into()))
            .unwrap();
        let wrong = f
            .exams
            .create_question_attempt(f.user, attempt.id, q2.id, Some("D".into()))
            .unwrap();
        let credited = f
            .exams
            .create_question_attempt(f.user, attempt.id, q3.id, Some("D".into()))
            .unwrap();

        // Drop the wrong one from scoring, credit the other manually.
        f.exams
            .update_question_attempt_scoring(f.user, wrong.id, false, false)
            .unwrap();
        f.exams
            .update_question_attempt_scoring(f.user, credited.id, true, true)
            .unwrap();

        let scored = f.exams.score_attempt(f.user, attempt.id).unwrap();
        assert_eq!(scored.scored_questions, Some(2));
        assert_eq!(scored.score, Some(2));
    }

    #[test]
    fn best_attempt_prefers_highest_score() {
        let f = setup();
        let exam = f.exams.create_exam(f.user, f.stack, "Quiz".into()).unwrap();
        let q = f
            .exams
            .create_question(f.user, exam.id, "Q".into(), options(), "A".into(), None)
            .unwrap();

        let low = f.exams.create_attempt(f.user, exam.id).unwrap();
        f.exams
            .create_question_attempt(f.user, low.id, q.id, Some("B".into()))
            .unwrap();
        f.exams.score_attempt(f.user, low.id).unwrap();

        let high = f.exams.create_attempt(f.user, exam.id).unwrap();
        f.exams
            .create_question_attempt(f.user, high.id, q.id, Some("A".into()))
            .unwrap();
        f.exams.score_attempt(f.user, high.id).unwrap();

        let info = f.exams.exam_info(f.user, exam.id).unwrap();
        assert_eq!(info.best_attempt.unwrap().id, high.id);
    }

    #[test]
    fn unanswered_question_is_incorrect() {
        let f = setup();
        let exam = f.exams.create_exam(f.user, f.stack, "Quiz".into()).unwrap();
        let q = f
            .exams
            .create_question(f.user, exam.id, "Q".into(), options(), "A".into(), None)
            .unwrap();
        let attempt = f.exams.create_attempt(f.user, exam.id).unwrap();

        let qa = f
            .exams
            .create_question_attempt(f.user, attempt.id, q.id, None)
            .unwrap();
        assert!(!qa.is_correct);
    }

    #[test]
    fn deleting_exam_cascades() {
        let f = setup();
        let exam = f.exams.create_exam(f.user, f.stack, "Quiz".into()).unwrap();
        let q = f
            .exams
            .create_question(f.user, exam.id, "Q".into(), options(), "A".into(), None)
            .unwrap();
        let attempt = f.exams.create_attempt(f.user, exam.id).unwrap();
        f.exams
            .create_question_attempt(f.user, attempt.id, q.id, Some("A".into()))
            .unwrap();

        f.exams.delete_exam(f.user, exam.id).unwrap();
        assert!(f.exams.get_exam(f.user, exam.id).unwrap_err().is_not_found());
        assert!(f
            .exams
            .list_question_attempts(f.user, attempt.id)
            .unwrap_err()
            .is_not_found());
    }
}
