use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "question_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    ShortAnswer,
    Essay,
    FileUpload,
    FillBlankText,
    FillBlankDropdown,
}

impl QuestionType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::SingleChoice => "SINGLE_CHOICE",
            QuestionType::MultipleChoice => "MULTIPLE_CHOICE",
            QuestionType::ShortAnswer => "SHORT_ANSWER",
            QuestionType::Essay => "ESSAY",
            QuestionType::FileUpload => "FILE_UPLOAD",
            QuestionType::FillBlankText => "FILL_BLANK_TEXT",
            QuestionType::FillBlankDropdown => "FILL_BLANK_DROPDOWN",
        }
    }

    /// Correctness can be decided by rule, without a human grader.
    pub fn is_auto_gradable(self) -> bool {
        matches!(
            self,
            QuestionType::SingleChoice
                | QuestionType::MultipleChoice
                | QuestionType::FillBlankText
                | QuestionType::FillBlankDropdown
        )
    }

    pub fn is_subjective(self) -> bool {
        !self.is_auto_gradable()
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,
    pub question_type: QuestionType,
    pub question_text: String,
    pub points: Decimal,
    pub order_index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnswerOption {
    pub id: i64,
    pub question_id: i64,
    pub option_text: String,
    pub is_correct: bool,
    pub order_index: i32,
    pub blank_id: Option<i32>,
}

/// Text-matching rule for fill-in-the-blank questions.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CorrectAnswer {
    pub id: i64,
    pub question_id: i64,
    pub answer_text: Option<String>,
    pub blank_id: Option<i32>,
    pub blank_position: Option<i32>,
    pub case_sensitive: bool,
    pub exact_match: bool,
}

/// A question together with the authoritative data needed to grade it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionWithKey {
    #[serde(flatten)]
    pub question: Question,
    pub options: Vec<AnswerOption>,
    pub correct_answers: Vec<CorrectAnswer>,
}

impl QuestionWithKey {
    pub fn option(&self, option_id: i64) -> Option<&AnswerOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    pub fn correct_option_ids(&self) -> BTreeSet<i64> {
        self.options
            .iter()
            .filter(|o| o.is_correct)
            .map(|o| o.id)
            .collect()
    }

    /// Blank ids declared by dropdown options.
    pub fn option_blank_ids(&self) -> BTreeSet<i32> {
        self.options.iter().filter_map(|o| o.blank_id).collect()
    }

    /// Blank ids declared by text-matching rules.
    pub fn rule_blank_ids(&self) -> BTreeSet<i32> {
        self.correct_answers.iter().filter_map(|c| c.blank_id).collect()
    }
}
