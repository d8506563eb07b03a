use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::Validate;

use crate::models::answer::AnswerPayload;
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::QuestionType;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordAnswerRequest {
    #[validate(range(min = 1))]
    pub question_id: i64,
    pub answer_data: serde_json::Value,
    #[validate(range(min = 0, message = "time_spent_seconds must not be negative"))]
    pub time_spent_seconds: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListAttemptsQuery {
    /// Quiz owners and admins may look at another student's history.
    pub student_id: Option<i64>,
}

/// Client details recorded when an attempt is created.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: i64,
    pub question_type: QuestionType,
    pub max_points: Decimal,
    pub answered: bool,
    pub points_earned: Option<Decimal>,
    pub is_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_option_ids: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResult {
    pub attempt: Attempt,
    /// Score may still change because subjective answers are ungraded.
    pub provisional: bool,
    pub pending_grading: usize,
    pub questions: Vec<QuestionResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOption {
    pub id: i64,
    pub option_text: String,
    pub blank_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub question_id: i64,
    pub question_type: QuestionType,
    pub question_text: String,
    pub max_points: Decimal,
    pub options: Vec<ReviewOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answers: Option<Vec<String>>,
    pub answer: Option<AnswerPayload>,
    pub points_earned: Option<Decimal>,
    pub is_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptReview {
    pub attempt: Attempt,
    pub provisional: bool,
    pub items: Vec<ReviewItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBreakdown {
    pub total: usize,
    pub answered: usize,
    pub unanswered: usize,
    pub by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBreakdown {
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub total_seconds: i64,
    pub total_minutes: i64,
    pub average_seconds_per_question: i64,
    pub formatted: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub total_points: Decimal,
    pub earned_points: Decimal,
    pub percentage: Decimal,
    pub passing_score: Option<Decimal>,
    pub is_passed: bool,
    pub correct: usize,
    pub incorrect: usize,
    pub ungraded: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingStatus {
    pub fully_graded: bool,
    pub pending_count: usize,
    pub provisional: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempt_id: Uuid,
    pub quiz_id: i64,
    pub student_id: i64,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub questions: QuestionBreakdown,
    pub time: TimeBreakdown,
    pub score: ScoreBreakdown,
    pub grading: GradingStatus,
}
