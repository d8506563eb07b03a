use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::database::store::{AnalyticsStore, AnswerStore, AttemptStore, QuizCatalog};
use crate::error::{Error, Result};
use crate::models::analytics::QuestionAnalytics;
use crate::models::answer::StudentAnswer;
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::QuestionWithKey;
use crate::models::quiz::Quiz;

#[derive(Default)]
struct Tables {
    quizzes: HashMap<i64, Quiz>,
    questions: BTreeMap<i64, QuestionWithKey>,
    owners: HashMap<i64, i64>,
    attempts: HashMap<Uuid, Attempt>,
    answers: HashMap<Uuid, StudentAnswer>,
    analytics: BTreeMap<(i64, i64), QuestionAnalytics>,
    failing_grade_writes: HashSet<Uuid>,
    forced_conflicts: HashMap<Uuid, usize>,
}

impl Tables {
    fn check_version(&mut self, attempt: &Attempt) -> Result<()> {
        let stored = self
            .attempts
            .get(&attempt.id)
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt.id)))?;
        let forced = match self.forced_conflicts.get_mut(&attempt.id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };
        if forced || stored.version != attempt.version {
            return Err(Error::Conflict(format!(
                "attempt {} was modified concurrently",
                attempt.id
            )));
        }
        Ok(())
    }

    fn check_grade_write(&self, answer_id: Uuid) -> Result<()> {
        if self.failing_grade_writes.contains(&answer_id) {
            return Err(Error::Internal(format!(
                "grade write for answer {} failed",
                answer_id
            )));
        }
        if !self.answers.contains_key(&answer_id) {
            return Err(Error::NotFound(format!("Answer {} not found", answer_id)));
        }
        Ok(())
    }

    fn write_grade(&mut self, answer: &StudentAnswer) -> Result<StudentAnswer> {
        let stored = self
            .answers
            .get_mut(&answer.id)
            .ok_or_else(|| Error::NotFound(format!("Answer {} not found", answer.id)))?;
        stored.points_earned = answer.points_earned;
        stored.is_correct = answer.is_correct;
        stored.grader_feedback = answer.grader_feedback.clone();
        stored.graded_by = answer.graded_by;
        stored.graded_at = answer.graded_at;
        stored.updated_at = answer.updated_at;
        Ok(stored.clone())
    }

    fn write_attempt(&mut self, attempt: &Attempt) -> Attempt {
        let mut next = attempt.clone();
        next.version += 1;
        self.attempts.insert(next.id, next.clone());
        next
    }
}

/// Process-local implementation of every store, used when no database is
/// configured and throughout the test suite.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Course ownership defaults to the quiz creator until overridden.
    pub fn insert_quiz(&self, quiz: Quiz) {
        let mut tables = self.write();
        tables.owners.entry(quiz.id).or_insert(quiz.created_by);
        tables.quizzes.insert(quiz.id, quiz);
    }

    pub fn insert_question(&self, question: QuestionWithKey) {
        self.write().questions.insert(question.question.id, question);
    }

    pub fn set_quiz_owner(&self, quiz_id: i64, owner_id: i64) {
        self.write().owners.insert(quiz_id, owner_id);
    }

    /// Makes every later `save_grade` for this answer fail.
    pub fn fail_grade_writes_for(&self, answer_id: Uuid) {
        self.write().failing_grade_writes.insert(answer_id);
    }

    /// The next `times` version-checked writes to the attempt report a
    /// conflict, as if another instance had updated it first.
    pub fn conflict_attempt_writes_for(&self, attempt_id: Uuid, times: usize) {
        self.write().forced_conflicts.insert(attempt_id, times);
    }
}

#[async_trait]
impl QuizCatalog for InMemoryStore {
    async fn find_quiz(&self, quiz_id: i64) -> Result<Option<Quiz>> {
        Ok(self.read().quizzes.get(&quiz_id).cloned())
    }

    async fn find_question(&self, question_id: i64) -> Result<Option<QuestionWithKey>> {
        Ok(self.read().questions.get(&question_id).cloned())
    }

    async fn list_questions(&self, quiz_id: i64) -> Result<Vec<QuestionWithKey>> {
        let mut questions: Vec<QuestionWithKey> = self
            .read()
            .questions
            .values()
            .filter(|q| q.question.quiz_id == quiz_id)
            .cloned()
            .collect();
        questions.sort_by_key(|q| (q.question.order_index, q.question.id));
        Ok(questions)
    }

    async fn quiz_owner(&self, quiz_id: i64) -> Result<Option<i64>> {
        Ok(self.read().owners.get(&quiz_id).copied())
    }
}

#[async_trait]
impl AttemptStore for InMemoryStore {
    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>> {
        Ok(self.read().attempts.get(&attempt_id).cloned())
    }

    async fn latest_attempt(&self, quiz_id: i64, student_id: i64) -> Result<Option<Attempt>> {
        Ok(self
            .read()
            .attempts
            .values()
            .filter(|a| a.quiz_id == quiz_id && a.student_id == student_id)
            .max_by_key(|a| a.attempt_number)
            .cloned())
    }

    async fn count_attempts(&self, quiz_id: i64, student_id: i64) -> Result<i64> {
        Ok(self
            .read()
            .attempts
            .values()
            .filter(|a| a.quiz_id == quiz_id && a.student_id == student_id)
            .count() as i64)
    }

    async fn list_student_attempts(&self, quiz_id: i64, student_id: i64) -> Result<Vec<Attempt>> {
        let mut attempts: Vec<Attempt> = self
            .read()
            .attempts
            .values()
            .filter(|a| a.quiz_id == quiz_id && a.student_id == student_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }

    async fn list_quiz_attempts(
        &self,
        quiz_id: i64,
        status: Option<AttemptStatus>,
    ) -> Result<Vec<Attempt>> {
        let mut attempts: Vec<Attempt> = self
            .read()
            .attempts
            .values()
            .filter(|a| a.quiz_id == quiz_id && status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        attempts.sort_by_key(|a| (a.student_id, a.attempt_number));
        Ok(attempts)
    }

    async fn insert_attempt(&self, attempt: &Attempt) -> Result<Attempt> {
        let mut tables = self.write();
        for existing in tables.attempts.values() {
            if existing.quiz_id != attempt.quiz_id || existing.student_id != attempt.student_id {
                continue;
            }
            if existing.status == AttemptStatus::InProgress {
                return Err(Error::Conflict(format!(
                    "student {} already has attempt {} in progress",
                    attempt.student_id, existing.id
                )));
            }
            if existing.attempt_number == attempt.attempt_number {
                return Err(Error::Conflict(format!(
                    "attempt number {} is already taken",
                    attempt.attempt_number
                )));
            }
        }
        tables.attempts.insert(attempt.id, attempt.clone());
        Ok(attempt.clone())
    }

    async fn update_attempt(&self, attempt: &Attempt) -> Result<Attempt> {
        let mut tables = self.write();
        tables.check_version(attempt)?;
        Ok(tables.write_attempt(attempt))
    }
}

#[async_trait]
impl AnswerStore for InMemoryStore {
    async fn find_answer(&self, answer_id: Uuid) -> Result<Option<StudentAnswer>> {
        Ok(self.read().answers.get(&answer_id).cloned())
    }

    async fn find_by_question(
        &self,
        attempt_id: Uuid,
        question_id: i64,
    ) -> Result<Option<StudentAnswer>> {
        Ok(self
            .read()
            .answers
            .values()
            .find(|a| a.attempt_id == attempt_id && a.question_id == question_id)
            .cloned())
    }

    async fn upsert_answer(&self, answer: &StudentAnswer) -> Result<StudentAnswer> {
        let mut tables = self.write();
        let existing_id = tables
            .answers
            .values()
            .find(|a| a.attempt_id == answer.attempt_id && a.question_id == answer.question_id)
            .map(|a| a.id);

        let Some(existing_id) = existing_id else {
            tables.answers.insert(answer.id, answer.clone());
            return Ok(answer.clone());
        };
        let stored = tables
            .answers
            .get_mut(&existing_id)
            .ok_or_else(|| Error::Internal(format!("answer {} vanished", existing_id)))?;
        stored.answer_data = answer.answer_data.clone();
        stored.answered_at = answer.answered_at;
        stored.time_spent_seconds = answer.time_spent_seconds;
        stored.updated_at = answer.updated_at;
        stored.points_earned = None;
        stored.is_correct = None;
        stored.grader_feedback = None;
        stored.graded_by = None;
        stored.graded_at = None;
        Ok(stored.clone())
    }

    async fn save_grade(&self, answer: &StudentAnswer) -> Result<StudentAnswer> {
        let mut tables = self.write();
        tables.check_grade_write(answer.id)?;
        tables.write_grade(answer)
    }

    async fn save_grade_with_attempt(
        &self,
        answer: &StudentAnswer,
        attempt: &Attempt,
    ) -> Result<(StudentAnswer, Attempt)> {
        let mut tables = self.write();
        tables.check_grade_write(answer.id)?;
        tables.check_version(attempt)?;
        let graded = tables.write_grade(answer)?;
        Ok((graded, tables.write_attempt(attempt)))
    }

    async fn list_attempt_answers(&self, attempt_id: Uuid) -> Result<Vec<StudentAnswer>> {
        let mut answers: Vec<StudentAnswer> = self
            .read()
            .answers
            .values()
            .filter(|a| a.attempt_id == attempt_id)
            .cloned()
            .collect();
        answers.sort_by_key(|a| (a.question_id, a.created_at));
        Ok(answers)
    }
}

#[async_trait]
impl AnalyticsStore for InMemoryStore {
    async fn refresh_quiz_analytics(&self, quiz_id: i64) -> Result<()> {
        let mut tables = self.write();
        let finished: HashSet<Uuid> = tables
            .attempts
            .values()
            .filter(|a| a.quiz_id == quiz_id && a.status.is_gradeable())
            .map(|a| a.id)
            .collect();
        let question_ids: Vec<i64> = tables
            .questions
            .values()
            .filter(|q| q.question.quiz_id == quiz_id)
            .map(|q| q.question.id)
            .collect();

        let now = Utc::now();
        let mut computed = Vec::with_capacity(question_ids.len());
        for question_id in question_ids {
            let answers: Vec<&StudentAnswer> = tables
                .answers
                .values()
                .filter(|a| a.question_id == question_id && finished.contains(&a.attempt_id))
                .collect();
            computed.push(QuestionAnalytics::compute(quiz_id, question_id, &answers, now));
        }

        tables.analytics.retain(|(q, _), _| *q != quiz_id);
        for stats in computed {
            tables.analytics.insert((quiz_id, stats.question_id), stats);
        }
        Ok(())
    }

    async fn quiz_analytics(&self, quiz_id: i64) -> Result<Vec<QuestionAnalytics>> {
        Ok(self
            .read()
            .analytics
            .range((quiz_id, i64::MIN)..=(quiz_id, i64::MAX))
            .map(|(_, stats)| stats.clone())
            .collect())
    }
}
