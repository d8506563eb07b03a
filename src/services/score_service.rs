use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use crate::database::Stores;
use crate::error::{Error, Result};
use crate::models::answer::StudentAnswer;
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::QuestionWithKey;
use crate::models::quiz::Quiz;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub total_points: Decimal,
    pub earned_points: Decimal,
    pub percentage: Decimal,
    pub passed: bool,
    pub fully_graded: bool,
    /// Subjective answers still waiting for a grade.
    pub pending_count: usize,
}

impl ScoreSummary {
    pub fn provisional(&self) -> bool {
        !self.fully_graded
    }

    pub fn status(&self) -> AttemptStatus {
        if self.fully_graded {
            AttemptStatus::Graded
        } else {
            AttemptStatus::Submitted
        }
    }
}

pub struct ScoreAggregator;

impl ScoreAggregator {
    /// Totals only cover answered questions. Answers whose question is no
    /// longer in the quiz are ignored.
    pub fn aggregate(
        questions: &[QuestionWithKey],
        answers: &[StudentAnswer],
        passing_score: Option<Decimal>,
    ) -> ScoreSummary {
        let by_id: HashMap<i64, &QuestionWithKey> =
            questions.iter().map(|q| (q.question.id, q)).collect();

        let mut total_points = Decimal::ZERO;
        let mut earned_points = Decimal::ZERO;
        let mut pending_count = 0;

        for answer in answers {
            let Some(question) = by_id.get(&answer.question_id) else {
                continue;
            };
            total_points += question.question.points;
            match answer.points_earned {
                Some(points) => earned_points += points,
                None if question.question.question_type.is_subjective() => pending_count += 1,
                None => {}
            }
        }

        let exact = if total_points.is_zero() {
            Decimal::ZERO
        } else {
            earned_points / total_points * Decimal::ONE_HUNDRED
        };
        // Pass/fail is decided on the unrounded ratio; only the stored figure is rounded.
        let passed = passing_score.map_or(false, |p| exact >= p);
        let percentage = exact.round_dp(2);

        ScoreSummary {
            total_points,
            earned_points,
            percentage,
            passed,
            fully_graded: pending_count == 0,
            pending_count,
        }
    }

    /// Writes the aggregate onto the attempt and moves it to `GRADED` or
    /// back to `SUBMITTED` accordingly.
    pub fn apply(attempt: &mut Attempt, summary: &ScoreSummary) -> Result<()> {
        attempt.transition(summary.status())?;
        attempt.total_points = Some(summary.total_points);
        attempt.earned_points = Some(summary.earned_points);
        attempt.percentage = Some(summary.percentage);
        attempt.is_passed = Some(summary.passed);
        Ok(())
    }
}

/// Everything needed to score or render one attempt.
pub struct AttemptSnapshot {
    pub quiz: Quiz,
    pub questions: Vec<QuestionWithKey>,
    pub answers: Vec<StudentAnswer>,
}

impl AttemptSnapshot {
    pub async fn load(stores: &Stores, attempt: &Attempt) -> Result<Self> {
        let quiz = stores
            .catalog
            .find_quiz(attempt.quiz_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Quiz {} not found", attempt.quiz_id)))?;
        let questions = stores.catalog.list_questions(attempt.quiz_id).await?;
        let answers = stores.answers.list_attempt_answers(attempt.id).await?;
        Ok(Self {
            quiz,
            questions,
            answers,
        })
    }

    pub fn summary(&self) -> ScoreSummary {
        ScoreAggregator::aggregate(&self.questions, &self.answers, self.quiz.passing_score)
    }

    pub fn answer_for(&self, question_id: i64) -> Option<&StudentAnswer> {
        self.answers.iter().find(|a| a.question_id == question_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::answer::AnswerPayload;
    use crate::models::question::{Question, QuestionType};
    use chrono::Utc;
    use uuid::Uuid;

    fn question(id: i64, question_type: QuestionType, points: i64) -> QuestionWithKey {
        QuestionWithKey {
            question: Question {
                id,
                quiz_id: 1,
                question_type,
                question_text: format!("q{}", id),
                points: Decimal::from(points),
                order_index: id as i32,
            },
            options: vec![],
            correct_answers: vec![],
        }
    }

    fn answer(question_id: i64, points: Option<i64>) -> StudentAnswer {
        let mut a = StudentAnswer::new(
            Uuid::new_v4(),
            question_id,
            AnswerPayload::Essay { answer_text: "x".into() },
            None,
            Utc::now(),
        );
        a.points_earned = points.map(Decimal::from);
        a
    }

    #[test]
    fn half_right_is_fifty_percent() {
        let questions = vec![
            question(1, QuestionType::SingleChoice, 5),
            question(2, QuestionType::SingleChoice, 5),
        ];
        let answers = vec![answer(1, Some(5)), answer(2, Some(0))];
        let summary = ScoreAggregator::aggregate(&questions, &answers, None);

        assert_eq!(summary.total_points, Decimal::from(10));
        assert_eq!(summary.earned_points, Decimal::from(5));
        assert_eq!(summary.percentage, Decimal::from(50));
        assert!(!summary.passed);
        assert!(summary.fully_graded);
    }

    #[test]
    fn ungraded_essay_keeps_result_provisional() {
        let questions = vec![
            question(1, QuestionType::SingleChoice, 10),
            question(2, QuestionType::Essay, 10),
        ];
        let answers = vec![answer(1, Some(10)), answer(2, None)];
        let summary = ScoreAggregator::aggregate(&questions, &answers, Some(Decimal::from(60)));

        assert_eq!(summary.earned_points, Decimal::from(10));
        assert_eq!(summary.total_points, Decimal::from(20));
        assert_eq!(summary.pending_count, 1);
        assert!(summary.provisional());
        assert_eq!(summary.status(), AttemptStatus::Submitted);
        assert!(!summary.passed);
    }

    #[test]
    fn zero_total_is_zero_percent() {
        let summary = ScoreAggregator::aggregate(&[], &[], Some(Decimal::ZERO));
        assert_eq!(summary.percentage, Decimal::ZERO);
        assert!(summary.passed);
    }

    #[test]
    fn passing_compares_before_rounding() {
        let questions = vec![
            question(1, QuestionType::SingleChoice, 1),
            question(2, QuestionType::SingleChoice, 1),
            question(3, QuestionType::SingleChoice, 1),
        ];
        let answers = vec![answer(1, Some(1)), answer(2, Some(1)), answer(3, Some(0))];
        let summary = ScoreAggregator::aggregate(&questions, &answers, Some(Decimal::new(6667, 2)));

        assert_eq!(summary.percentage, Decimal::new(6667, 2));
        assert!(!summary.passed);

        let summary = ScoreAggregator::aggregate(&questions, &answers, Some(Decimal::new(6666, 2)));
        assert!(summary.passed);
    }

    #[test]
    fn unanswered_questions_do_not_count_towards_total() {
        let questions = vec![
            question(1, QuestionType::SingleChoice, 4),
            question(2, QuestionType::SingleChoice, 6),
        ];
        let summary = ScoreAggregator::aggregate(&questions, &[answer(1, Some(4))], None);
        assert_eq!(summary.total_points, Decimal::from(4));
        assert_eq!(summary.percentage, Decimal::from(100));
    }
}
