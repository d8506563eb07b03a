use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::database::Stores;
use crate::dto::grading_dto::{BulkGradeEntry, PendingAnswer};
use crate::error::{Error, GradeFailure, Result};
use crate::models::analytics::QuestionAnalytics;
use crate::models::answer::StudentAnswer;
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::QuestionWithKey;
use crate::models::user::Caller;
use crate::services::access::ensure_quiz_owner;
use crate::services::locks::KeyedLocks;
use crate::services::score_service::{AttemptSnapshot, ScoreAggregator};
use crate::utils::time::Clock;

/// Lost compare-and-set races tolerated per grade before giving up.
const MAX_GRADE_CONFLICTS: usize = 3;

/// An entry that passed every check and is ready to be written.
struct CheckedGrade {
    answer: StudentAnswer,
    question: QuestionWithKey,
    points: Decimal,
    feedback: Option<String>,
}

#[derive(Clone)]
pub struct ManualGradingService {
    stores: Stores,
    clock: Arc<dyn Clock>,
    attempt_locks: Arc<KeyedLocks<Uuid>>,
}

impl ManualGradingService {
    pub fn new(stores: Stores, clock: Arc<dyn Clock>, attempt_locks: Arc<KeyedLocks<Uuid>>) -> Self {
        Self {
            stores,
            clock,
            attempt_locks,
        }
    }

    async fn load_answer(&self, answer_id: Uuid) -> Result<StudentAnswer> {
        self.stores
            .answers
            .find_answer(answer_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Answer {} not found", answer_id)))
    }

    async fn load_attempt(&self, attempt_id: Uuid) -> Result<Attempt> {
        self.stores
            .attempts
            .find_attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))
    }

    /// Every check a grade has to pass. Must run with the attempt lock held.
    async fn check(
        &self,
        answer_id: Uuid,
        points: Decimal,
        feedback: Option<String>,
        caller: &Caller,
    ) -> Result<CheckedGrade> {
        let answer = self.load_answer(answer_id).await?;
        let attempt = self.load_attempt(answer.attempt_id).await?;
        ensure_quiz_owner(self.stores.catalog.as_ref(), attempt.quiz_id, caller).await?;

        if !attempt.status.is_gradeable() {
            return Err(Error::InvalidState(format!(
                "attempt {} is {} and cannot be graded",
                attempt.id, attempt.status
            )));
        }

        let question = self
            .stores
            .catalog
            .find_question(answer.question_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Question {} not found", answer.question_id)))?;

        if points < Decimal::ZERO {
            return Err(Error::BadRequest("points must not be negative".to_string()));
        }
        if points > question.question.points {
            return Err(Error::PointsExceedMaximum {
                requested: points,
                maximum: question.question.points,
            });
        }

        Ok(CheckedGrade {
            answer,
            question,
            points,
            feedback,
        })
    }

    async fn apply(&self, checked: CheckedGrade, caller: &Caller) -> Result<StudentAnswer> {
        let now = self.clock.now();
        let mut answer = checked.answer;
        answer.points_earned = Some(checked.points);
        answer.is_correct = Some(checked.points == checked.question.question.points);
        answer.grader_feedback = checked.feedback;
        answer.graded_by = Some(caller.user_id);
        answer.graded_at = Some(now);
        answer.updated_at = now;

        let mut conflicts = 0;
        loop {
            match self.commit(&answer, caller).await {
                Err(Error::Conflict(reason)) if conflicts < MAX_GRADE_CONFLICTS => {
                    conflicts += 1;
                    tracing::warn!(
                        answer_id = %answer.id,
                        attempt_id = %answer.attempt_id,
                        retry = conflicts,
                        %reason,
                        "Attempt changed while grading, re-reading"
                    );
                }
                other => return other,
            }
        }
    }

    /// Re-aggregates the attempt as if the grade were already stored, then
    /// writes the grade and the attempt in one step. Stamps the first manual grader.
    async fn commit(&self, answer: &StudentAnswer, caller: &Caller) -> Result<StudentAnswer> {
        let mut attempt = self.load_attempt(answer.attempt_id).await?;
        let mut snapshot = AttemptSnapshot::load(&self.stores, &attempt).await?;
        match snapshot.answers.iter_mut().find(|a| a.id == answer.id) {
            Some(slot) => *slot = answer.clone(),
            None => snapshot.answers.push(answer.clone()),
        }
        let summary = snapshot.summary();

        let now = self.clock.now();
        if attempt.manually_graded_at.is_none() {
            attempt.manually_graded_at = Some(now);
        }
        if attempt.graded_by.is_none() {
            attempt.graded_by = Some(caller.user_id);
        }
        attempt.updated_at = now;
        let previous = attempt.status;
        ScoreAggregator::apply(&mut attempt, &summary)?;

        let (graded, stored) = self
            .stores
            .answers
            .save_grade_with_attempt(answer, &attempt)
            .await?;
        if previous != stored.status {
            tracing::info!(
                attempt_id = %stored.id,
                from = %previous,
                to = %stored.status,
                "Attempt status changed after grading"
            );
        }
        Ok(graded)
    }

    pub async fn grade_answer(
        &self,
        answer_id: Uuid,
        points: Decimal,
        feedback: Option<String>,
        caller: &Caller,
    ) -> Result<StudentAnswer> {
        let attempt_id = self.load_answer(answer_id).await?.attempt_id;
        let _guard = self.attempt_locks.write(&attempt_id).await;

        let checked = match self.check(answer_id, points, feedback, caller).await {
            Ok(checked) => checked,
            Err(e) => {
                tracing::warn!(%answer_id, grader = caller.user_id, error = %e, "Grade rejected");
                return Err(e);
            }
        };
        let graded = self.apply(checked, caller).await?;

        tracing::info!(%answer_id, grader = caller.user_id, points = %points, "Answer graded");
        Ok(graded)
    }

    /// Checks every entry before writing any. Locks on all touched attempts are
    /// taken in id order and held for the whole batch.
    pub async fn bulk_grade(
        &self,
        entries: Vec<BulkGradeEntry>,
        caller: &Caller,
    ) -> Result<Vec<StudentAnswer>> {
        if entries.is_empty() {
            return Err(Error::BadRequest("no grades supplied".to_string()));
        }

        let mut failures = Vec::new();
        let mut seen = HashSet::new();
        let mut attempt_of: HashMap<Uuid, Uuid> = HashMap::new();
        for entry in &entries {
            if !seen.insert(entry.answer_id) {
                failures.push(GradeFailure::from_error(
                    entry.answer_id,
                    &Error::BadRequest("answer listed more than once".to_string()),
                ));
                continue;
            }
            match self.load_answer(entry.answer_id).await {
                Ok(answer) => {
                    attempt_of.insert(entry.answer_id, answer.attempt_id);
                }
                Err(e) => failures.push(GradeFailure::from_error(entry.answer_id, &e)),
            }
        }

        let attempt_ids: BTreeSet<Uuid> = attempt_of.values().copied().collect();
        let mut guards = Vec::with_capacity(attempt_ids.len());
        for attempt_id in &attempt_ids {
            guards.push(self.attempt_locks.write(attempt_id).await);
        }

        let mut checked = Vec::with_capacity(entries.len());
        for entry in entries {
            if !attempt_of.contains_key(&entry.answer_id) {
                continue;
            }
            match self
                .check(entry.answer_id, entry.points, entry.feedback, caller)
                .await
            {
                Ok(grade) => checked.push(grade),
                Err(e) => failures.push(GradeFailure::from_error(entry.answer_id, &e)),
            }
        }

        if !failures.is_empty() {
            tracing::warn!(
                grader = caller.user_id,
                rejected = failures.len(),
                "Bulk grade rejected, nothing applied"
            );
            return Err(Error::BulkGrade {
                failures,
                applied: Vec::new(),
            });
        }

        let mut graded = Vec::with_capacity(checked.len());
        for grade in checked {
            let answer_id = grade.answer.id;
            match self.apply(grade, caller).await {
                Ok(answer) => graded.push(answer),
                Err(e) => {
                    tracing::error!(%answer_id, error = ?e, "Bulk grade stopped during apply");
                    return Err(Error::BulkGrade {
                        failures: vec![GradeFailure::from_error(answer_id, &e)],
                        applied: graded.iter().map(|a| a.id).collect(),
                    });
                }
            }
        }

        tracing::info!(grader = caller.user_id, count = graded.len(), "Bulk grade applied");
        Ok(graded)
    }

    /// Subjective answers on submitted attempts, ungraded first, then newest first.
    pub async fn list_pending(&self, quiz_id: i64, caller: &Caller) -> Result<Vec<PendingAnswer>> {
        ensure_quiz_owner(self.stores.catalog.as_ref(), quiz_id, caller).await?;

        let questions: HashMap<i64, QuestionWithKey> = self
            .stores
            .catalog
            .list_questions(quiz_id)
            .await?
            .into_iter()
            .filter(|q| q.question.question_type.is_subjective())
            .map(|q| (q.question.id, q))
            .collect();

        let attempts = self
            .stores
            .attempts
            .list_quiz_attempts(quiz_id, Some(AttemptStatus::Submitted))
            .await?;

        let mut pending = Vec::new();
        for attempt in attempts {
            for answer in self.stores.answers.list_attempt_answers(attempt.id).await? {
                let Some(question) = questions.get(&answer.question_id) else {
                    continue;
                };
                pending.push(PendingAnswer {
                    student_id: attempt.student_id,
                    attempt_number: attempt.attempt_number,
                    submitted_at: attempt.submitted_at,
                    question_type: question.question.question_type,
                    question_text: question.question.question_text.clone(),
                    max_points: question.question.points,
                    answer,
                });
            }
        }

        pending.sort_by(|a, b| {
            a.answer
                .graded_at
                .is_some()
                .cmp(&b.answer.graded_at.is_some())
                .then_with(|| b.answer.answered_at.cmp(&a.answer.answered_at))
        });
        Ok(pending)
    }

    pub async fn quiz_analytics(&self, quiz_id: i64, caller: &Caller) -> Result<Vec<QuestionAnalytics>> {
        ensure_quiz_owner(self.stores.catalog.as_ref(), quiz_id, caller).await?;
        self.stores.analytics.quiz_analytics(quiz_id).await
    }
}
