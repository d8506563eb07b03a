use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::answer::StudentAnswer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "difficulty_rating", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DifficultyRating {
    Easy,
    Medium,
    Hard,
}

impl DifficultyRating {
    /// EASY at 70% correct or more, MEDIUM at 40% or more, HARD below.
    pub fn from_counts(correct: i64, graded: i64) -> Option<Self> {
        if graded <= 0 {
            return None;
        }
        let rate = correct as f64 / graded as f64;
        Some(if rate >= 0.7 {
            DifficultyRating::Easy
        } else if rate >= 0.4 {
            DifficultyRating::Medium
        } else {
            DifficultyRating::Hard
        })
    }
}

/// Aggregated outcome of one question across every attempt of a quiz.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuestionAnalytics {
    pub quiz_id: i64,
    pub question_id: i64,
    pub total_attempts: i64,
    pub correct_count: i64,
    pub incorrect_count: i64,
    pub average_score: Option<Decimal>,
    pub difficulty_rating: Option<DifficultyRating>,
    pub updated_at: DateTime<Utc>,
}

impl QuestionAnalytics {
    /// Folds the answers given to one question into its statistics.
    /// Ungraded answers count towards `total_attempts` only.
    pub fn compute(
        quiz_id: i64,
        question_id: i64,
        answers: &[&StudentAnswer],
        now: DateTime<Utc>,
    ) -> Self {
        let correct_count = answers.iter().filter(|a| a.is_correct == Some(true)).count() as i64;
        let incorrect_count = answers.iter().filter(|a| a.is_correct == Some(false)).count() as i64;

        let scores: Vec<Decimal> = answers.iter().filter_map(|a| a.points_earned).collect();
        let average_score = if scores.is_empty() {
            None
        } else {
            let sum: Decimal = scores.iter().copied().sum();
            Some((sum / Decimal::from(scores.len() as i64)).round_dp(2))
        };

        Self {
            quiz_id,
            question_id,
            total_attempts: answers.len() as i64,
            correct_count,
            incorrect_count,
            average_score,
            difficulty_rating: DifficultyRating::from_counts(
                correct_count,
                correct_count + incorrect_count,
            ),
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_thresholds() {
        assert_eq!(DifficultyRating::from_counts(7, 10), Some(DifficultyRating::Easy));
        assert_eq!(DifficultyRating::from_counts(4, 10), Some(DifficultyRating::Medium));
        assert_eq!(DifficultyRating::from_counts(3, 10), Some(DifficultyRating::Hard));
        assert_eq!(DifficultyRating::from_counts(0, 0), None);
    }

    #[test]
    fn compute_ignores_ungraded_answers_for_scores() {
        use crate::models::answer::AnswerPayload;
        use uuid::Uuid;

        let now = Utc::now();
        let answer = |points: Option<i64>, correct: Option<bool>| {
            let mut a = StudentAnswer::new(
                Uuid::new_v4(),
                5,
                AnswerPayload::Essay { answer_text: "x".into() },
                None,
                now,
            );
            a.points_earned = points.map(Decimal::from);
            a.is_correct = correct;
            a
        };
        let answers = [
            answer(Some(4), Some(true)),
            answer(Some(1), Some(false)),
            answer(None, None),
        ];
        let refs: Vec<&StudentAnswer> = answers.iter().collect();

        let stats = QuestionAnalytics::compute(1, 5, &refs, now);
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.correct_count, 1);
        assert_eq!(stats.incorrect_count, 1);
        assert_eq!(stats.average_score, Some(Decimal::new(250, 2)));
        assert_eq!(stats.difficulty_rating, Some(DifficultyRating::Medium));
    }
}
