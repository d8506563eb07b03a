use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::answer::StudentAnswer;
use crate::models::question::QuestionType;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GradeAnswerRequest {
    pub points: Decimal,
    #[validate(length(max = 10000))]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BulkGradeEntry {
    pub answer_id: Uuid,
    pub points: Decimal,
    #[validate(length(max = 10000))]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BulkGradeRequest {
    #[validate(length(min = 1, max = 500, message = "grades must contain 1 to 500 entries"))]
    #[validate(nested)]
    pub grades: Vec<BulkGradeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkGradeResponse {
    pub graded: Vec<StudentAnswer>,
}

/// A subjective answer on a submitted attempt, as listed for graders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAnswer {
    pub answer: StudentAnswer,
    pub student_id: i64,
    pub attempt_number: i32,
    pub submitted_at: Option<DateTime<Utc>>,
    pub question_type: QuestionType,
    pub question_text: String,
    pub max_points: Decimal,
}
