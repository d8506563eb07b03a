//! Storage seams of the engine.
//!
//! Quiz and question data is owned by the authoring side and only read here.
//! Attempts and student answers are owned by the engine. Every implementation
//! must honour the uniqueness and compare-and-set contracts documented on each
//! method; the services rely on them for the single-`IN_PROGRESS` and
//! contiguous-numbering invariants.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::models::analytics::QuestionAnalytics;
use crate::models::answer::StudentAnswer;
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::QuestionWithKey;
use crate::models::quiz::Quiz;

#[async_trait]
pub trait QuizCatalog: Send + Sync {
    async fn find_quiz(&self, quiz_id: i64) -> Result<Option<Quiz>>;

    async fn find_question(&self, question_id: i64) -> Result<Option<QuestionWithKey>>;

    /// All questions of a quiz ordered by `order_index`.
    async fn list_questions(&self, quiz_id: i64) -> Result<Vec<QuestionWithKey>>;

    /// Creator of the course holding the quiz, resolved content -> section -> course.
    async fn quiz_owner(&self, quiz_id: i64) -> Result<Option<i64>>;
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>>;

    /// Attempt with the highest attempt number for the pair.
    async fn latest_attempt(&self, quiz_id: i64, student_id: i64) -> Result<Option<Attempt>>;

    async fn count_attempts(&self, quiz_id: i64, student_id: i64) -> Result<i64>;

    /// Ordered by attempt number.
    async fn list_student_attempts(&self, quiz_id: i64, student_id: i64) -> Result<Vec<Attempt>>;

    async fn list_quiz_attempts(
        &self,
        quiz_id: i64,
        status: Option<AttemptStatus>,
    ) -> Result<Vec<Attempt>>;

    /// Fails with `Error::Conflict` when the pair already has an `IN_PROGRESS`
    /// attempt or the attempt number is taken.
    async fn insert_attempt(&self, attempt: &Attempt) -> Result<Attempt>;

    /// Compare-and-set on `version`. Returns the stored attempt with the bumped
    /// version, or `Error::Conflict` if another writer got there first.
    async fn update_attempt(&self, attempt: &Attempt) -> Result<Attempt>;
}

#[async_trait]
pub trait AnswerStore: Send + Sync {
    async fn find_answer(&self, answer_id: Uuid) -> Result<Option<StudentAnswer>>;

    async fn find_by_question(
        &self,
        attempt_id: Uuid,
        question_id: i64,
    ) -> Result<Option<StudentAnswer>>;

    /// Upsert keyed by (attempt, question). An existing row keeps its id and
    /// creation time, takes the new payload and loses any previous grade.
    async fn upsert_answer(&self, answer: &StudentAnswer) -> Result<StudentAnswer>;

    /// Writes only the grading columns of an existing answer.
    async fn save_grade(&self, answer: &StudentAnswer) -> Result<StudentAnswer>;

    /// Writes the answer's grading columns and the attempt's compare-and-set
    /// update together. Neither is kept if either fails.
    async fn save_grade_with_attempt(
        &self,
        answer: &StudentAnswer,
        attempt: &Attempt,
    ) -> Result<(StudentAnswer, Attempt)>;

    async fn list_attempt_answers(&self, attempt_id: Uuid) -> Result<Vec<StudentAnswer>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Recomputes per-question statistics over submitted attempts of the quiz.
    async fn refresh_quiz_analytics(&self, quiz_id: i64) -> Result<()>;

    async fn quiz_analytics(&self, quiz_id: i64) -> Result<Vec<QuestionAnalytics>>;
}

/// Handles to every collaborator the services need.
#[derive(Clone)]
pub struct Stores {
    pub catalog: Arc<dyn QuizCatalog>,
    pub attempts: Arc<dyn AttemptStore>,
    pub answers: Arc<dyn AnswerStore>,
    pub analytics: Arc<dyn AnalyticsStore>,
}

impl Stores {
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(crate::database::postgres::PgStore::new(pool));
        Self {
            catalog: store.clone(),
            attempts: store.clone(),
            answers: store.clone(),
            analytics: store,
        }
    }

    pub fn in_memory(store: Arc<crate::database::memory::InMemoryStore>) -> Self {
        Self {
            catalog: store.clone(),
            attempts: store.clone(),
            answers: store.clone(),
            analytics: store,
        }
    }
}
