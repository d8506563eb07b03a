use async_trait::async_trait;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::{PgPool, Postgres};
use std::collections::HashMap;
use uuid::Uuid;

use crate::database::store::{AnalyticsStore, AnswerStore, AttemptStore, QuizCatalog};
use crate::error::{Error, Result};
use crate::models::analytics::QuestionAnalytics;
use crate::models::answer::StudentAnswer;
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::{AnswerOption, CorrectAnswer, Question, QuestionWithKey};
use crate::models::quiz::Quiz;

const QUIZ_COLUMNS: &str = r#"id, content_id, title, total_points, passing_score, time_limit_minutes,
    available_from, available_until, max_attempts, auto_grade, show_results_immediately,
    show_correct_answers, allow_review, show_feedback, is_published, created_by"#;

const ATTEMPT_COLUMNS: &str = r#"id, quiz_id, student_id, attempt_number, started_at, submitted_at,
    time_spent_seconds, total_points, earned_points, percentage, is_passed, status,
    auto_graded_at, manually_graded_at, graded_by, ip_address, user_agent, version,
    created_at, updated_at"#;

const ANSWER_COLUMNS: &str = r#"id, attempt_id, question_id, answer_data, points_earned, is_correct,
    grader_feedback, graded_by, graded_at, answered_at, time_spent_seconds, created_at, updated_at"#;

fn attempt_update_sql() -> String {
    format!(
        r#"UPDATE quiz_attempts SET
               submitted_at = $3,
               time_spent_seconds = $4,
               total_points = $5,
               earned_points = $6,
               percentage = $7,
               is_passed = $8,
               status = $9,
               auto_graded_at = $10,
               manually_graded_at = $11,
               graded_by = $12,
               updated_at = $13,
               version = version + 1
           WHERE id = $1 AND version = $2
           RETURNING {}"#,
        ATTEMPT_COLUMNS
    )
}

fn bind_attempt_update<'q>(
    sql: &'q str,
    attempt: &'q Attempt,
) -> QueryAs<'q, Postgres, Attempt, PgArguments> {
    sqlx::query_as::<_, Attempt>(sql)
        .bind(attempt.id)
        .bind(attempt.version)
        .bind(attempt.submitted_at)
        .bind(attempt.time_spent_seconds)
        .bind(attempt.total_points)
        .bind(attempt.earned_points)
        .bind(attempt.percentage)
        .bind(attempt.is_passed)
        .bind(attempt.status)
        .bind(attempt.auto_graded_at)
        .bind(attempt.manually_graded_at)
        .bind(attempt.graded_by)
        .bind(attempt.updated_at)
}

fn grade_sql() -> String {
    format!(
        r#"UPDATE quiz_student_answers SET
               points_earned = $2,
               is_correct = $3,
               grader_feedback = $4,
               graded_by = $5,
               graded_at = $6,
               updated_at = $7
           WHERE id = $1
           RETURNING {}"#,
        ANSWER_COLUMNS
    )
}

fn bind_grade<'q>(
    sql: &'q str,
    answer: &'q StudentAnswer,
) -> QueryAs<'q, Postgres, StudentAnswer, PgArguments> {
    sqlx::query_as::<_, StudentAnswer>(sql)
        .bind(answer.id)
        .bind(answer.points_earned)
        .bind(answer.is_correct)
        .bind(&answer.grader_feedback)
        .bind(answer.graded_by)
        .bind(answer.graded_at)
        .bind(answer.updated_at)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn attach_keys(&self, questions: Vec<Question>) -> Result<Vec<QuestionWithKey>> {
        let ids: Vec<i64> = questions.iter().map(|q| q.id).collect();

        let options = sqlx::query_as::<_, AnswerOption>(
            r#"SELECT id, question_id, option_text, is_correct, order_index, blank_id
               FROM quiz_answer_options
               WHERE question_id = ANY($1)
               ORDER BY question_id, order_index, id"#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let rules = sqlx::query_as::<_, CorrectAnswer>(
            r#"SELECT id, question_id, answer_text, blank_id, blank_position, case_sensitive, exact_match
               FROM quiz_correct_answers
               WHERE question_id = ANY($1)
               ORDER BY question_id, blank_position NULLS LAST, id"#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut options_by_question: HashMap<i64, Vec<AnswerOption>> = HashMap::new();
        for option in options {
            options_by_question.entry(option.question_id).or_default().push(option);
        }
        let mut rules_by_question: HashMap<i64, Vec<CorrectAnswer>> = HashMap::new();
        for rule in rules {
            rules_by_question.entry(rule.question_id).or_default().push(rule);
        }

        Ok(questions
            .into_iter()
            .map(|question| QuestionWithKey {
                options: options_by_question.remove(&question.id).unwrap_or_default(),
                correct_answers: rules_by_question.remove(&question.id).unwrap_or_default(),
                question,
            })
            .collect())
    }
}

fn unique_violation(err: sqlx::Error, message: String) -> Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::Conflict(message),
        _ => err.into(),
    }
}

#[async_trait]
impl QuizCatalog for PgStore {
    async fn find_quiz(&self, quiz_id: i64) -> Result<Option<Quiz>> {
        let quiz = sqlx::query_as::<_, Quiz>(&format!(
            "SELECT {} FROM quizzes WHERE id = $1",
            QUIZ_COLUMNS
        ))
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(quiz)
    }

    async fn find_question(&self, question_id: i64) -> Result<Option<QuestionWithKey>> {
        let question = sqlx::query_as::<_, Question>(
            r#"SELECT id, quiz_id, question_type, question_text, points, order_index
               FROM quiz_questions WHERE id = $1"#,
        )
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?;

        match question {
            Some(q) => Ok(self.attach_keys(vec![q]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_questions(&self, quiz_id: i64) -> Result<Vec<QuestionWithKey>> {
        let questions = sqlx::query_as::<_, Question>(
            r#"SELECT id, quiz_id, question_type, question_text, points, order_index
               FROM quiz_questions
               WHERE quiz_id = $1
               ORDER BY order_index, id"#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;
        self.attach_keys(questions).await
    }

    async fn quiz_owner(&self, quiz_id: i64) -> Result<Option<i64>> {
        let owner: Option<(i64,)> = sqlx::query_as(
            r#"SELECT c.created_by
               FROM quizzes q
               JOIN course_contents cc ON cc.id = q.content_id
               JOIN course_sections cs ON cs.id = cc.section_id
               JOIN courses c ON c.id = cs.course_id
               WHERE q.id = $1"#,
        )
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(owner.map(|(id,)| id))
    }
}

#[async_trait]
impl AttemptStore for PgStore {
    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>> {
        let attempt = sqlx::query_as::<_, Attempt>(&format!(
            "SELECT {} FROM quiz_attempts WHERE id = $1",
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(attempt)
    }

    async fn latest_attempt(&self, quiz_id: i64, student_id: i64) -> Result<Option<Attempt>> {
        let attempt = sqlx::query_as::<_, Attempt>(&format!(
            r#"SELECT {} FROM quiz_attempts
               WHERE quiz_id = $1 AND student_id = $2
               ORDER BY attempt_number DESC
               LIMIT 1"#,
            ATTEMPT_COLUMNS
        ))
        .bind(quiz_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(attempt)
    }

    async fn count_attempts(&self, quiz_id: i64, student_id: i64) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM quiz_attempts WHERE quiz_id = $1 AND student_id = $2",
        )
        .bind(quiz_id)
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list_student_attempts(&self, quiz_id: i64, student_id: i64) -> Result<Vec<Attempt>> {
        let attempts = sqlx::query_as::<_, Attempt>(&format!(
            r#"SELECT {} FROM quiz_attempts
               WHERE quiz_id = $1 AND student_id = $2
               ORDER BY attempt_number"#,
            ATTEMPT_COLUMNS
        ))
        .bind(quiz_id)
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(attempts)
    }

    async fn list_quiz_attempts(
        &self,
        quiz_id: i64,
        status: Option<AttemptStatus>,
    ) -> Result<Vec<Attempt>> {
        let attempts = sqlx::query_as::<_, Attempt>(&format!(
            r#"SELECT {} FROM quiz_attempts
               WHERE quiz_id = $1 AND ($2::attempt_status IS NULL OR status = $2)
               ORDER BY student_id, attempt_number"#,
            ATTEMPT_COLUMNS
        ))
        .bind(quiz_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(attempts)
    }

    async fn insert_attempt(&self, attempt: &Attempt) -> Result<Attempt> {
        sqlx::query_as::<_, Attempt>(&format!(
            r#"INSERT INTO quiz_attempts (
                   id, quiz_id, student_id, attempt_number, started_at, status,
                   ip_address, user_agent, version, created_at, updated_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
               RETURNING {}"#,
            ATTEMPT_COLUMNS
        ))
        .bind(attempt.id)
        .bind(attempt.quiz_id)
        .bind(attempt.student_id)
        .bind(attempt.attempt_number)
        .bind(attempt.started_at)
        .bind(attempt.status)
        .bind(&attempt.ip_address)
        .bind(&attempt.user_agent)
        .bind(attempt.version)
        .bind(attempt.created_at)
        .bind(attempt.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            unique_violation(
                e,
                format!(
                    "student {} already has an open or identically numbered attempt on quiz {}",
                    attempt.student_id, attempt.quiz_id
                ),
            )
        })
    }

    async fn update_attempt(&self, attempt: &Attempt) -> Result<Attempt> {
        let sql = attempt_update_sql();
        let updated = bind_attempt_update(&sql, attempt)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(a) => Ok(a),
            None if self.find_attempt(attempt.id).await?.is_some() => Err(Error::Conflict(
                format!("attempt {} was modified concurrently", attempt.id),
            )),
            None => Err(Error::NotFound(format!("Attempt {} not found", attempt.id))),
        }
    }
}

#[async_trait]
impl AnswerStore for PgStore {
    async fn find_answer(&self, answer_id: Uuid) -> Result<Option<StudentAnswer>> {
        let answer = sqlx::query_as::<_, StudentAnswer>(&format!(
            "SELECT {} FROM quiz_student_answers WHERE id = $1",
            ANSWER_COLUMNS
        ))
        .bind(answer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(answer)
    }

    async fn find_by_question(
        &self,
        attempt_id: Uuid,
        question_id: i64,
    ) -> Result<Option<StudentAnswer>> {
        let answer = sqlx::query_as::<_, StudentAnswer>(&format!(
            "SELECT {} FROM quiz_student_answers WHERE attempt_id = $1 AND question_id = $2",
            ANSWER_COLUMNS
        ))
        .bind(attempt_id)
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(answer)
    }

    async fn upsert_answer(&self, answer: &StudentAnswer) -> Result<StudentAnswer> {
        let stored = sqlx::query_as::<_, StudentAnswer>(&format!(
            r#"INSERT INTO quiz_student_answers (
                   id, attempt_id, question_id, answer_data, answered_at,
                   time_spent_seconds, created_at, updated_at
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (attempt_id, question_id) DO UPDATE SET
                   answer_data = EXCLUDED.answer_data,
                   answered_at = EXCLUDED.answered_at,
                   time_spent_seconds = EXCLUDED.time_spent_seconds,
                   updated_at = EXCLUDED.updated_at,
                   points_earned = NULL,
                   is_correct = NULL,
                   grader_feedback = NULL,
                   graded_by = NULL,
                   graded_at = NULL
               RETURNING {}"#,
            ANSWER_COLUMNS
        ))
        .bind(answer.id)
        .bind(answer.attempt_id)
        .bind(answer.question_id)
        .bind(&answer.answer_data)
        .bind(answer.answered_at)
        .bind(answer.time_spent_seconds)
        .bind(answer.created_at)
        .bind(answer.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    async fn save_grade(&self, answer: &StudentAnswer) -> Result<StudentAnswer> {
        let sql = grade_sql();
        let stored = bind_grade(&sql, answer).fetch_optional(&self.pool).await?;
        stored.ok_or_else(|| Error::NotFound(format!("Answer {} not found", answer.id)))
    }

    async fn save_grade_with_attempt(
        &self,
        answer: &StudentAnswer,
        attempt: &Attempt,
    ) -> Result<(StudentAnswer, Attempt)> {
        let grade = grade_sql();
        let update = attempt_update_sql();
        let mut tx = self.pool.begin().await?;

        let Some(graded) = bind_grade(&grade, answer).fetch_optional(&mut *tx).await? else {
            tx.rollback().await?;
            return Err(Error::NotFound(format!("Answer {} not found", answer.id)));
        };
        let Some(updated) = bind_attempt_update(&update, attempt)
            .fetch_optional(&mut *tx)
            .await?
        else {
            tx.rollback().await?;
            return match self.find_attempt(attempt.id).await? {
                Some(_) => Err(Error::Conflict(format!(
                    "attempt {} was modified concurrently",
                    attempt.id
                ))),
                None => Err(Error::NotFound(format!("Attempt {} not found", attempt.id))),
            };
        };

        tx.commit().await?;
        Ok((graded, updated))
    }

    async fn list_attempt_answers(&self, attempt_id: Uuid) -> Result<Vec<StudentAnswer>> {
        let answers = sqlx::query_as::<_, StudentAnswer>(&format!(
            "SELECT {} FROM quiz_student_answers WHERE attempt_id = $1 ORDER BY question_id, created_at",
            ANSWER_COLUMNS
        ))
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(answers)
    }
}

#[async_trait]
impl AnalyticsStore for PgStore {
    async fn refresh_quiz_analytics(&self, quiz_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM quiz_analytics WHERE quiz_id = $1")
            .bind(quiz_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"INSERT INTO quiz_analytics (
                   quiz_id, question_id, total_attempts, correct_count, incorrect_count,
                   average_score, difficulty_rating, updated_at
               )
               SELECT
                   q.quiz_id,
                   q.id,
                   COUNT(sa.id),
                   COUNT(sa.id) FILTER (WHERE sa.is_correct = TRUE),
                   COUNT(sa.id) FILTER (WHERE sa.is_correct = FALSE),
                   ROUND(AVG(sa.points_earned), 2),
                   CASE
                       WHEN COUNT(sa.is_correct) = 0 THEN NULL
                       WHEN COUNT(sa.id) FILTER (WHERE sa.is_correct = TRUE)::numeric
                            / COUNT(sa.is_correct) >= 0.7 THEN 'EASY'::difficulty_rating
                       WHEN COUNT(sa.id) FILTER (WHERE sa.is_correct = TRUE)::numeric
                            / COUNT(sa.is_correct) >= 0.4 THEN 'MEDIUM'::difficulty_rating
                       ELSE 'HARD'::difficulty_rating
                   END,
                   NOW()
               FROM quiz_questions q
               LEFT JOIN quiz_attempts a
                   ON a.quiz_id = q.quiz_id AND a.status IN ('SUBMITTED', 'GRADED')
               LEFT JOIN quiz_student_answers sa
                   ON sa.question_id = q.id AND sa.attempt_id = a.id
               WHERE q.quiz_id = $1
               GROUP BY q.quiz_id, q.id"#,
        )
        .bind(quiz_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn quiz_analytics(&self, quiz_id: i64) -> Result<Vec<QuestionAnalytics>> {
        let rows = sqlx::query_as::<_, QuestionAnalytics>(
            r#"SELECT quiz_id, question_id, total_attempts, correct_count, incorrect_count,
                      average_score, difficulty_rating, updated_at
               FROM quiz_analytics
               WHERE quiz_id = $1
               ORDER BY question_id"#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
