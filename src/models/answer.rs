use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::question::{QuestionType, QuestionWithKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlank {
    pub blank_id: i32,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropdownBlank {
    pub blank_id: i32,
    pub selected_option_id: i64,
}

/// A student's raw answer, one shape per question type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerPayload {
    SingleChoice {
        selected_option_id: i64,
    },
    MultipleChoice {
        selected_option_ids: Vec<i64>,
    },
    ShortAnswer {
        answer_text: String,
    },
    Essay {
        answer_text: String,
    },
    FileUpload {
        file_path: String,
        #[serde(default)]
        file_name: Option<String>,
    },
    FillBlankText {
        blanks: Vec<TextBlank>,
    },
    FillBlankDropdown {
        blanks: Vec<DropdownBlank>,
    },
}

impl AnswerPayload {
    /// Reads the client's untagged JSON using the question's type as the tag.
    pub fn parse(question_type: QuestionType, raw: &JsonValue) -> Result<Self> {
        let JsonValue::Object(fields) = raw else {
            return Err(Error::MalformedAnswer(
                "answer data must be a JSON object".to_string(),
            ));
        };

        let mut fields = fields.clone();
        if let Some(tag) = fields.get("type") {
            if tag.as_str() != Some(question_type.as_str()) {
                return Err(Error::MalformedAnswer(format!(
                    "answer type {} does not match question type {}",
                    tag, question_type
                )));
            }
        }
        fields.insert(
            "type".to_string(),
            JsonValue::String(question_type.as_str().to_string()),
        );

        serde_json::from_value(JsonValue::Object(fields))
            .map_err(|e| Error::MalformedAnswer(format!("{} answer: {}", question_type, e)))
    }

    pub fn question_type(&self) -> QuestionType {
        match self {
            AnswerPayload::SingleChoice { .. } => QuestionType::SingleChoice,
            AnswerPayload::MultipleChoice { .. } => QuestionType::MultipleChoice,
            AnswerPayload::ShortAnswer { .. } => QuestionType::ShortAnswer,
            AnswerPayload::Essay { .. } => QuestionType::Essay,
            AnswerPayload::FileUpload { .. } => QuestionType::FileUpload,
            AnswerPayload::FillBlankText { .. } => QuestionType::FillBlankText,
            AnswerPayload::FillBlankDropdown { .. } => QuestionType::FillBlankDropdown,
        }
    }

    /// Checks the payload against the question's authoritative data: every
    /// referenced option must exist and blank ids must not repeat.
    pub fn validate_against(&self, question: &QuestionWithKey) -> Result<()> {
        let expected = question.question.question_type;
        if self.question_type() != expected {
            return Err(Error::MalformedAnswer(format!(
                "{} payload submitted for a {} question",
                self.question_type(),
                expected
            )));
        }

        match self {
            AnswerPayload::SingleChoice { selected_option_id } => {
                if question.option(*selected_option_id).is_none() {
                    return Err(unknown_option(*selected_option_id, question));
                }
            }
            AnswerPayload::MultipleChoice { selected_option_ids } => {
                let mut seen = HashSet::new();
                for id in selected_option_ids {
                    if !seen.insert(*id) {
                        return Err(Error::MalformedAnswer(format!(
                            "option {} selected more than once",
                            id
                        )));
                    }
                    if question.option(*id).is_none() {
                        return Err(unknown_option(*id, question));
                    }
                }
            }
            AnswerPayload::ShortAnswer { .. } | AnswerPayload::Essay { .. } => {}
            AnswerPayload::FileUpload { file_path, .. } => {
                if file_path.trim().is_empty() {
                    return Err(Error::MalformedAnswer(
                        "file upload answer must have a file_path".to_string(),
                    ));
                }
            }
            AnswerPayload::FillBlankText { blanks } => {
                unique_blanks(blanks.iter().map(|b| b.blank_id))?;
            }
            AnswerPayload::FillBlankDropdown { blanks } => {
                unique_blanks(blanks.iter().map(|b| b.blank_id))?;
                for blank in blanks {
                    match question.option(blank.selected_option_id) {
                        Some(opt) if opt.blank_id == Some(blank.blank_id) => {}
                        Some(_) => {
                            return Err(Error::MalformedAnswer(format!(
                                "option {} is not a choice for blank {}",
                                blank.selected_option_id, blank.blank_id
                            )))
                        }
                        None => return Err(unknown_option(blank.selected_option_id, question)),
                    }
                }
            }
        }
        Ok(())
    }
}

fn unknown_option(option_id: i64, question: &QuestionWithKey) -> Error {
    Error::MalformedAnswer(format!(
        "option {} does not belong to question {}",
        option_id, question.question.id
    ))
}

fn unique_blanks(ids: impl Iterator<Item = i32>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(Error::MalformedAnswer(format!(
                "blank {} answered more than once",
                id
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentAnswer {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub question_id: i64,
    pub answer_data: Json<AnswerPayload>,
    pub points_earned: Option<Decimal>,
    pub is_correct: Option<bool>,
    pub grader_feedback: Option<String>,
    pub graded_by: Option<i64>,
    pub graded_at: Option<DateTime<Utc>>,
    pub answered_at: DateTime<Utc>,
    pub time_spent_seconds: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudentAnswer {
    pub fn new(
        attempt_id: Uuid,
        question_id: i64,
        payload: AnswerPayload,
        time_spent_seconds: Option<i32>,
        answered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt_id,
            question_id,
            answer_data: Json(payload),
            points_earned: None,
            is_correct: None,
            grader_feedback: None,
            graded_by: None,
            graded_at: None,
            answered_at,
            time_spent_seconds,
            created_at: answered_at,
            updated_at: answered_at,
        }
    }

    pub fn payload(&self) -> &AnswerPayload {
        &self.answer_data.0
    }

    pub fn is_graded(&self) -> bool {
        self.points_earned.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{AnswerOption, Question};
    use serde_json::json;

    fn dropdown_question() -> QuestionWithKey {
        let opt = |id: i64, blank: i32, correct: bool| AnswerOption {
            id,
            question_id: 9,
            option_text: format!("opt {}", id),
            is_correct: correct,
            order_index: id as i32,
            blank_id: Some(blank),
        };
        QuestionWithKey {
            question: Question {
                id: 9,
                quiz_id: 1,
                question_type: QuestionType::FillBlankDropdown,
                question_text: "The [1] is [2]".into(),
                points: Decimal::from(2),
                order_index: 0,
            },
            options: vec![opt(1, 1, true), opt(2, 1, false), opt(3, 2, true)],
            correct_answers: vec![],
        }
    }

    #[test]
    fn parse_uses_question_type_as_tag() {
        let payload =
            AnswerPayload::parse(QuestionType::SingleChoice, &json!({"selected_option_id": 4}))
                .unwrap();
        assert_eq!(payload, AnswerPayload::SingleChoice { selected_option_id: 4 });

        let stored = serde_json::to_value(&payload).unwrap();
        assert_eq!(stored["type"], "SINGLE_CHOICE");
    }

    #[test]
    fn parse_rejects_wrong_shape() {
        let err = AnswerPayload::parse(QuestionType::MultipleChoice, &json!({"selected_option_id": 1}))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedAnswer(_)));

        let err = AnswerPayload::parse(QuestionType::Essay, &json!("just text")).unwrap_err();
        assert!(matches!(err, Error::MalformedAnswer(_)));

        let err = AnswerPayload::parse(
            QuestionType::Essay,
            &json!({"type": "SHORT_ANSWER", "answer_text": "x"}),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedAnswer(_)));
    }

    #[test]
    fn dropdown_option_must_belong_to_its_blank() {
        let q = dropdown_question();
        let ok = AnswerPayload::FillBlankDropdown {
            blanks: vec![
                DropdownBlank { blank_id: 1, selected_option_id: 2 },
                DropdownBlank { blank_id: 2, selected_option_id: 3 },
            ],
        };
        assert!(ok.validate_against(&q).is_ok());

        let crossed = AnswerPayload::FillBlankDropdown {
            blanks: vec![DropdownBlank { blank_id: 2, selected_option_id: 1 }],
        };
        assert!(matches!(crossed.validate_against(&q), Err(Error::MalformedAnswer(_))));

        let repeated = AnswerPayload::FillBlankDropdown {
            blanks: vec![
                DropdownBlank { blank_id: 1, selected_option_id: 1 },
                DropdownBlank { blank_id: 1, selected_option_id: 2 },
            ],
        };
        assert!(matches!(repeated.validate_against(&q), Err(Error::MalformedAnswer(_))));
    }

    #[test]
    fn file_upload_needs_a_path() {
        let mut q = dropdown_question();
        q.question.question_type = QuestionType::FileUpload;
        let payload = AnswerPayload::FileUpload { file_path: "  ".into(), file_name: None };
        assert!(matches!(payload.validate_against(&q), Err(Error::MalformedAnswer(_))));
    }
}
