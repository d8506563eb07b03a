use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::Stores;
use crate::dto::attempt_dto::{
    AttemptResult, AttemptReview, AttemptSummary, ClientInfo, GradingStatus, QuestionBreakdown,
    QuestionResult, ReviewItem, ReviewOption, ScoreBreakdown, TimeBreakdown,
};
use crate::error::{Error, Result};
use crate::models::answer::{AnswerPayload, StudentAnswer};
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::QuestionWithKey;
use crate::models::quiz::{Availability, Quiz};
use crate::models::user::Caller;
use crate::services::access::{ensure_quiz_owner, owns_quiz};
use crate::services::analytics_service::AnalyticsQueue;
use crate::services::grading_service::GradingService;
use crate::services::locks::KeyedLocks;
use crate::services::score_service::{AttemptSnapshot, ScoreAggregator};
use crate::utils::time::{format_duration, Clock};

/// Drives an attempt through `IN_PROGRESS -> SUBMITTED -> GRADED` (or
/// `ABANDONED`). Writes to one attempt go through its entry in `attempt_locks`:
/// answers take the shared side, state changes the exclusive side.
#[derive(Clone)]
pub struct AttemptService {
    stores: Stores,
    clock: Arc<dyn Clock>,
    attempt_locks: Arc<KeyedLocks<Uuid>>,
    start_locks: Arc<KeyedLocks<(i64, i64)>>,
    analytics: AnalyticsQueue,
}

impl AttemptService {
    pub fn new(
        stores: Stores,
        clock: Arc<dyn Clock>,
        attempt_locks: Arc<KeyedLocks<Uuid>>,
        analytics: AnalyticsQueue,
    ) -> Self {
        Self {
            stores,
            clock,
            attempt_locks,
            start_locks: Arc::new(KeyedLocks::new()),
            analytics,
        }
    }

    async fn load_quiz(&self, quiz_id: i64) -> Result<Quiz> {
        self.stores
            .catalog
            .find_quiz(quiz_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Quiz {} not found", quiz_id)))
    }

    async fn load_attempt(&self, attempt_id: Uuid) -> Result<Attempt> {
        self.stores
            .attempts
            .find_attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))
    }

    /// Loads the attempt and checks it belongs to the caller and is still open.
    async fn load_open_attempt(&self, attempt_id: Uuid, caller: &Caller) -> Result<Attempt> {
        let attempt = self.load_attempt(attempt_id).await?;
        if attempt.student_id != caller.user_id {
            return Err(Error::NotOwner);
        }
        if attempt.status != AttemptStatus::InProgress {
            return Err(Error::AlreadySubmitted {
                status: attempt.status,
            });
        }
        Ok(attempt)
    }

    pub async fn start_attempt(
        &self,
        quiz_id: i64,
        caller: &Caller,
        client: ClientInfo,
    ) -> Result<Attempt> {
        let quiz = self.load_quiz(quiz_id).await?;
        if !quiz.is_published && !caller.is_privileged() {
            return Err(Error::NotPublished(quiz_id));
        }

        let now = self.clock.now();
        match quiz.availability_at(now) {
            Availability::Open => {}
            Availability::NotYetOpen(from) => {
                return Err(Error::OutsideWindow(format!("quiz opens at {}", from.to_rfc3339())))
            }
            Availability::Closed(until) => {
                return Err(Error::OutsideWindow(format!("quiz closed at {}", until.to_rfc3339())))
            }
        }

        let _guard = self.start_locks.write(&(quiz_id, caller.user_id)).await;

        let latest = self
            .stores
            .attempts
            .latest_attempt(quiz_id, caller.user_id)
            .await?;
        if let Some(current) = latest.as_ref().filter(|a| a.status == AttemptStatus::InProgress) {
            tracing::info!(attempt_id = %current.id, quiz_id, student_id = caller.user_id, "Resuming attempt");
            return Ok(current.clone());
        }

        if let Some(max) = quiz.max_attempts {
            let used = self.stores.attempts.count_attempts(quiz_id, caller.user_id).await?;
            if used >= i64::from(max) {
                tracing::warn!(quiz_id, student_id = caller.user_id, used, max, "Attempt limit reached");
                return Err(Error::MaxAttemptsReached { max });
            }
        }

        let attempt_number = latest.map_or(1, |a| a.attempt_number + 1);
        let attempt = Attempt::new(
            quiz_id,
            caller.user_id,
            attempt_number,
            now,
            client.ip_address,
            client.user_agent,
        );
        let created = self.stores.attempts.insert_attempt(&attempt).await?;

        tracing::info!(
            attempt_id = %created.id,
            quiz_id,
            student_id = caller.user_id,
            attempt_number,
            "Attempt started"
        );
        Ok(created)
    }

    pub async fn record_answer(
        &self,
        attempt_id: Uuid,
        question_id: i64,
        raw: &JsonValue,
        time_spent_seconds: Option<i32>,
        caller: &Caller,
    ) -> Result<StudentAnswer> {
        let _guard = self.attempt_locks.read(&attempt_id).await;

        let attempt = self.load_open_attempt(attempt_id, caller).await?;
        let quiz = self.load_quiz(attempt.quiz_id).await?;

        let now = self.clock.now();
        if quiz.time_limit_exceeded(attempt.elapsed_seconds(now)) {
            return Err(Error::TimeExceeded {
                limit_minutes: quiz.time_limit_minutes.unwrap_or_default(),
            });
        }

        let question = self
            .stores
            .catalog
            .find_question(question_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Question {} not found", question_id)))?;
        if question.question.quiz_id != attempt.quiz_id {
            return Err(Error::QuestionMismatch {
                question_id,
                quiz_id: attempt.quiz_id,
            });
        }

        let payload = AnswerPayload::parse(question.question.question_type, raw)?;
        payload.validate_against(&question)?;

        let answer = StudentAnswer::new(attempt_id, question_id, payload, time_spent_seconds, now);
        let mut stored = self.stores.answers.upsert_answer(&answer).await?;

        let mut graded = stored.clone();
        if quiz.auto_grade && GradingService::auto_grade(&question, &mut graded, now) {
            match self.stores.answers.save_grade(&graded).await {
                Ok(saved) => stored = saved,
                Err(e) => tracing::warn!(
                    answer_id = %stored.id,
                    error = ?e,
                    "Immediate auto-grade not persisted, submit will retry"
                ),
            }
        }

        Ok(stored)
    }

    pub async fn submit_attempt(&self, attempt_id: Uuid, caller: &Caller) -> Result<AttemptResult> {
        let _guard = self.attempt_locks.write(&attempt_id).await;

        let mut attempt = self.load_open_attempt(attempt_id, caller).await?;
        let mut snapshot = AttemptSnapshot::load(&self.stores, &attempt).await?;
        let now = self.clock.now();

        if snapshot.quiz.auto_grade {
            self.regrade_objective(&mut snapshot, now).await?;
            attempt.auto_graded_at = Some(now);
        }

        let summary = snapshot.summary();
        attempt.submitted_at = Some(now);
        attempt.time_spent_seconds = Some(clamp_seconds(attempt.elapsed_seconds(now)));
        attempt.updated_at = now;
        ScoreAggregator::apply(&mut attempt, &summary)?;

        let stored = self.stores.attempts.update_attempt(&attempt).await?;
        tracing::info!(
            attempt_id = %stored.id,
            status = %stored.status,
            earned = %summary.earned_points,
            total = %summary.total_points,
            provisional = summary.provisional(),
            "Attempt submitted"
        );

        self.analytics.enqueue(stored.quiz_id);
        let (show_keys, show_feedback) = (snapshot.quiz.show_correct_answers, snapshot.quiz.show_feedback);
        Ok(build_result(stored, &snapshot, show_keys, show_feedback))
    }

    /// Re-verifies every objective answer, including ones graded while the
    /// attempt was open.
    async fn regrade_objective(&self, snapshot: &mut AttemptSnapshot, now: DateTime<Utc>) -> Result<()> {
        let questions: BTreeMap<i64, &QuestionWithKey> = snapshot
            .questions
            .iter()
            .map(|q| (q.question.id, q))
            .collect();

        for answer in snapshot.answers.iter_mut() {
            let Some(question) = questions.get(&answer.question_id) else {
                continue;
            };
            if GradingService::auto_grade(question, answer, now) {
                *answer = self.stores.answers.save_grade(answer).await?;
            }
        }
        Ok(())
    }

    pub async fn get_result(&self, attempt_id: Uuid, caller: &Caller) -> Result<AttemptResult> {
        let attempt = self.load_attempt(attempt_id).await?;
        if attempt.student_id != caller.user_id && !caller.is_privileged() {
            return Err(Error::NotOwner);
        }
        if attempt.status == AttemptStatus::InProgress {
            return Err(Error::InvalidState(format!(
                "attempt {} has not been submitted",
                attempt_id
            )));
        }

        let snapshot = AttemptSnapshot::load(&self.stores, &attempt).await?;
        if !snapshot.quiz.show_results_immediately && !caller.is_privileged() {
            return Err(Error::Forbidden(
                "results for this quiz are not released".to_string(),
            ));
        }

        let show_keys = snapshot.quiz.show_correct_answers || caller.is_privileged();
        let show_feedback = snapshot.quiz.show_feedback || caller.is_privileged();
        Ok(build_result(attempt, &snapshot, show_keys, show_feedback))
    }

    pub async fn review_attempt(&self, attempt_id: Uuid, caller: &Caller) -> Result<AttemptReview> {
        let attempt = self.load_attempt(attempt_id).await?;
        if attempt.student_id != caller.user_id {
            return Err(Error::NotOwner);
        }
        if attempt.status == AttemptStatus::InProgress {
            return Err(Error::InvalidState(format!(
                "attempt {} is still in progress",
                attempt_id
            )));
        }

        let snapshot = AttemptSnapshot::load(&self.stores, &attempt).await?;
        let quiz = &snapshot.quiz;
        if !quiz.allow_review {
            return Err(Error::Forbidden("review is disabled for this quiz".to_string()));
        }

        let items = snapshot
            .questions
            .iter()
            .map(|question| {
                let answer = snapshot.answer_for(question.question.id);
                ReviewItem {
                    question_id: question.question.id,
                    question_type: question.question.question_type,
                    question_text: question.question.question_text.clone(),
                    max_points: question.question.points,
                    options: question
                        .options
                        .iter()
                        .map(|o| ReviewOption {
                            id: o.id,
                            option_text: o.option_text.clone(),
                            blank_id: o.blank_id,
                            is_correct: quiz.show_correct_answers.then_some(o.is_correct),
                        })
                        .collect(),
                    correct_answers: quiz
                        .show_correct_answers
                        .then(|| correct_answer_texts(question))
                        .flatten(),
                    answer: answer.map(|a| a.payload().clone()),
                    points_earned: answer.and_then(|a| a.points_earned),
                    is_correct: answer.and_then(|a| a.is_correct),
                    feedback: answer
                        .filter(|_| quiz.show_feedback)
                        .and_then(|a| a.grader_feedback.clone()),
                }
            })
            .collect();

        Ok(AttemptReview {
            provisional: snapshot.summary().provisional(),
            attempt,
            items,
        })
    }

    /// History of one student on a quiz. Anyone but the student needs to own the quiz.
    pub async fn list_student_attempts(
        &self,
        quiz_id: i64,
        student_id: Option<i64>,
        caller: &Caller,
    ) -> Result<Vec<Attempt>> {
        let student_id = student_id.unwrap_or(caller.user_id);
        if student_id != caller.user_id {
            ensure_quiz_owner(self.stores.catalog.as_ref(), quiz_id, caller).await?;
        }
        self.stores
            .attempts
            .list_student_attempts(quiz_id, student_id)
            .await
    }

    pub async fn get_summary(&self, attempt_id: Uuid, caller: &Caller) -> Result<AttemptSummary> {
        let attempt = self.load_attempt(attempt_id).await?;
        if attempt.student_id != caller.user_id
            && !owns_quiz(self.stores.catalog.as_ref(), attempt.quiz_id, caller).await?
        {
            return Err(Error::NotOwner);
        }

        let snapshot = AttemptSnapshot::load(&self.stores, &attempt).await?;
        let score = snapshot.summary();

        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut answered = 0;
        let mut pending_count = 0;
        let (mut correct, mut incorrect, mut ungraded) = (0, 0, 0);
        for question in &snapshot.questions {
            *by_type
                .entry(question.question.question_type.as_str().to_string())
                .or_default() += 1;

            match snapshot.answer_for(question.question.id) {
                Some(answer) => {
                    answered += 1;
                    match answer.is_correct {
                        Some(true) => correct += 1,
                        Some(false) => incorrect += 1,
                        None => ungraded += 1,
                    }
                    if answer.points_earned.is_none() && question.question.question_type.is_subjective() {
                        pending_count += 1;
                    }
                }
                None if question.question.question_type.is_subjective() => pending_count += 1,
                None => {}
            }
        }

        let total_seconds = match attempt.time_spent_seconds {
            Some(spent) => i64::from(spent),
            None => attempt.elapsed_seconds(self.clock.now()),
        };
        let average_seconds_per_question = if answered > 0 {
            total_seconds / answered as i64
        } else {
            0
        };

        let fully_graded = pending_count == 0;
        Ok(AttemptSummary {
            attempt_id: attempt.id,
            quiz_id: attempt.quiz_id,
            student_id: attempt.student_id,
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            questions: QuestionBreakdown {
                total: snapshot.questions.len(),
                answered,
                unanswered: snapshot.questions.len() - answered,
                by_type,
            },
            time: TimeBreakdown {
                started_at: attempt.started_at,
                submitted_at: attempt.submitted_at,
                total_seconds,
                total_minutes: total_seconds / 60,
                average_seconds_per_question,
                formatted: format_duration(total_seconds),
            },
            score: ScoreBreakdown {
                total_points: attempt.total_points.unwrap_or(score.total_points),
                earned_points: attempt.earned_points.unwrap_or(score.earned_points),
                percentage: attempt.percentage.unwrap_or(score.percentage),
                passing_score: snapshot.quiz.passing_score,
                is_passed: attempt.is_passed.unwrap_or(false),
                correct,
                incorrect,
                ungraded,
            },
            grading: GradingStatus {
                fully_graded,
                pending_count,
                provisional: !fully_graded,
            },
        })
    }

    /// Closes an open attempt without scoring it. Students may only abandon
    /// their own attempt once its time limit has lapsed.
    pub async fn abandon_attempt(&self, attempt_id: Uuid, caller: &Caller) -> Result<Attempt> {
        let _guard = self.attempt_locks.write(&attempt_id).await;

        let mut attempt = self.load_attempt(attempt_id).await?;
        let quiz = self.load_quiz(attempt.quiz_id).await?;
        let now = self.clock.now();
        let elapsed = attempt.elapsed_seconds(now);

        let manager = owns_quiz(self.stores.catalog.as_ref(), quiz.id, caller).await?;
        if !manager {
            if attempt.student_id != caller.user_id {
                return Err(Error::NotOwner);
            }
            if !quiz.time_limit_exceeded(elapsed) {
                return Err(Error::Forbidden(
                    "an attempt can only be abandoned after its time limit".to_string(),
                ));
            }
        }
        if attempt.status != AttemptStatus::InProgress {
            return Err(Error::AlreadySubmitted {
                status: attempt.status,
            });
        }

        attempt.transition(AttemptStatus::Abandoned)?;
        attempt.time_spent_seconds = Some(clamp_seconds(elapsed));
        attempt.updated_at = now;
        let stored = self.stores.attempts.update_attempt(&attempt).await?;

        tracing::info!(attempt_id = %stored.id, by = caller.user_id, "Attempt abandoned");
        Ok(stored)
    }
}

fn clamp_seconds(seconds: i64) -> i32 {
    i32::try_from(seconds).unwrap_or(i32::MAX)
}

fn correct_answer_texts(question: &QuestionWithKey) -> Option<Vec<String>> {
    let texts: Vec<String> = question
        .correct_answers
        .iter()
        .filter_map(|c| c.answer_text.clone())
        .collect();
    (!texts.is_empty()).then_some(texts)
}

fn build_result(
    attempt: Attempt,
    snapshot: &AttemptSnapshot,
    show_keys: bool,
    show_feedback: bool,
) -> AttemptResult {
    let summary = snapshot.summary();
    let questions = snapshot
        .questions
        .iter()
        .map(|question| {
            let answer = snapshot.answer_for(question.question.id);
            QuestionResult {
                question_id: question.question.id,
                question_type: question.question.question_type,
                max_points: question.question.points,
                answered: answer.is_some(),
                points_earned: answer.and_then(|a| a.points_earned),
                is_correct: answer.and_then(|a| a.is_correct),
                correct_option_ids: (show_keys && !question.options.is_empty())
                    .then(|| question.correct_option_ids().into_iter().collect()),
                correct_answers: if show_keys {
                    correct_answer_texts(question)
                } else {
                    None
                },
                feedback: if show_feedback {
                    answer.and_then(|a| a.grader_feedback.clone())
                } else {
                    None
                },
            }
        })
        .collect();

    AttemptResult {
        attempt,
        provisional: summary.provisional(),
        pending_grading: summary.pending_count,
        questions,
    }
}
