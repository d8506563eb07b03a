use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

use crate::models::answer::{AnswerPayload, DropdownBlank, StudentAnswer, TextBlank};
use crate::models::question::{CorrectAnswer, QuestionWithKey};

/// Scoring rules for the objective question types. Nothing here touches
/// storage; callers persist whatever `auto_grade` writes onto the answer.
pub struct GradingService;

impl GradingService {
    /// `Some(verdict)` for auto-gradable payloads, `None` when a human has to decide.
    pub fn evaluate(question: &QuestionWithKey, payload: &AnswerPayload) -> Option<bool> {
        if !question.question.question_type.is_auto_gradable()
            || payload.question_type() != question.question.question_type
        {
            return None;
        }

        let verdict = match payload {
            AnswerPayload::SingleChoice { selected_option_id } => {
                Self::single_choice(question, *selected_option_id)
            }
            AnswerPayload::MultipleChoice { selected_option_ids } => {
                Self::multiple_choice(question, selected_option_ids)
            }
            AnswerPayload::FillBlankDropdown { blanks } => Self::fill_blank_dropdown(question, blanks),
            AnswerPayload::FillBlankText { blanks } => Self::fill_blank_text(question, blanks),
            AnswerPayload::ShortAnswer { .. }
            | AnswerPayload::Essay { .. }
            | AnswerPayload::FileUpload { .. } => return None,
        };
        Some(verdict)
    }

    /// Grades one stored answer in place. Returns false, leaving the answer
    /// untouched, when the question is not auto-gradable.
    pub fn auto_grade(
        question: &QuestionWithKey,
        answer: &mut StudentAnswer,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(correct) = Self::evaluate(question, answer.payload()) else {
            return false;
        };
        answer.is_correct = Some(correct);
        answer.points_earned = Some(if correct {
            question.question.points
        } else {
            Decimal::ZERO
        });
        answer.graded_at = Some(now);
        answer.updated_at = now;
        true
    }

    fn single_choice(question: &QuestionWithKey, selected: i64) -> bool {
        question.option(selected).map_or(false, |o| o.is_correct)
    }

    /// Exact set equality with the options flagged correct; no partial credit.
    fn multiple_choice(question: &QuestionWithKey, selected: &[i64]) -> bool {
        let correct = question.correct_option_ids();
        let chosen: BTreeSet<i64> = selected.iter().copied().collect();
        chosen.len() == selected.len() && chosen == correct
    }

    fn fill_blank_dropdown(question: &QuestionWithKey, blanks: &[DropdownBlank]) -> bool {
        let required = question.option_blank_ids();
        if required.is_empty() {
            return false;
        }

        let chosen: BTreeMap<i32, i64> = blanks
            .iter()
            .map(|b| (b.blank_id, b.selected_option_id))
            .collect();
        if chosen.len() != blanks.len() || chosen.keys().any(|id| !required.contains(id)) {
            return false;
        }

        required.iter().all(|blank_id| {
            chosen
                .get(blank_id)
                .and_then(|option_id| question.option(*option_id))
                .map_or(false, |o| o.is_correct && o.blank_id == Some(*blank_id))
        })
    }

    /// Every required blank must match at least one rule for that blank. Rules
    /// without a blank id apply to every blank; when no rule names a blank, the
    /// submitted blanks are the ones required.
    fn fill_blank_text(question: &QuestionWithKey, blanks: &[TextBlank]) -> bool {
        let submitted: BTreeMap<i32, &str> = blanks
            .iter()
            .map(|b| (b.blank_id, b.answer.as_str()))
            .collect();
        if submitted.len() != blanks.len() || question.correct_answers.is_empty() {
            return false;
        }

        let named = question.rule_blank_ids();
        let required: BTreeSet<i32> = if named.is_empty() {
            submitted.keys().copied().collect()
        } else {
            if submitted.keys().any(|id| !named.contains(id)) {
                return false;
            }
            named
        };
        if required.is_empty() {
            return false;
        }

        required.iter().all(|blank_id| {
            let Some(text) = submitted.get(blank_id) else {
                return false;
            };
            question
                .correct_answers
                .iter()
                .filter(|rule| rule.blank_id.map_or(true, |b| b == *blank_id))
                .any(|rule| Self::text_matches(rule, text))
        })
    }

    pub fn text_matches(rule: &CorrectAnswer, submitted: &str) -> bool {
        let Some(expected) = rule.answer_text.as_deref() else {
            return false;
        };
        let expected = expected.trim();
        let submitted = submitted.trim();
        if expected.is_empty() || submitted.is_empty() {
            return false;
        }

        let (expected, submitted) = if rule.case_sensitive {
            (expected.to_string(), submitted.to_string())
        } else {
            (expected.to_lowercase(), submitted.to_lowercase())
        };

        if rule.exact_match {
            submitted == expected
        } else {
            submitted.contains(&expected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{AnswerOption, Question, QuestionType};
    use uuid::Uuid;

    fn question(question_type: QuestionType, options: Vec<AnswerOption>, rules: Vec<CorrectAnswer>) -> QuestionWithKey {
        QuestionWithKey {
            question: Question {
                id: 1,
                quiz_id: 1,
                question_type,
                question_text: "q".into(),
                points: Decimal::from(5),
                order_index: 0,
            },
            options,
            correct_answers: rules,
        }
    }

    fn option(id: i64, is_correct: bool, blank_id: Option<i32>) -> AnswerOption {
        AnswerOption {
            id,
            question_id: 1,
            option_text: format!("option {}", id),
            is_correct,
            order_index: id as i32,
            blank_id,
        }
    }

    fn rule(text: &str, blank_id: Option<i32>, case_sensitive: bool, exact_match: bool) -> CorrectAnswer {
        CorrectAnswer {
            id: 1,
            question_id: 1,
            answer_text: Some(text.to_string()),
            blank_id,
            blank_position: None,
            case_sensitive,
            exact_match,
        }
    }

    fn text_blanks(pairs: &[(i32, &str)]) -> AnswerPayload {
        AnswerPayload::FillBlankText {
            blanks: pairs
                .iter()
                .map(|(id, answer)| TextBlank { blank_id: *id, answer: answer.to_string() })
                .collect(),
        }
    }

    #[test]
    fn single_choice_follows_the_flag() {
        let q = question(
            QuestionType::SingleChoice,
            vec![option(1, false, None), option(2, true, None)],
            vec![],
        );
        assert_eq!(GradingService::evaluate(&q, &AnswerPayload::SingleChoice { selected_option_id: 2 }), Some(true));
        assert_eq!(GradingService::evaluate(&q, &AnswerPayload::SingleChoice { selected_option_id: 1 }), Some(false));
        assert_eq!(GradingService::evaluate(&q, &AnswerPayload::SingleChoice { selected_option_id: 99 }), Some(false));
    }

    #[test]
    fn multiple_choice_has_no_partial_credit() {
        let q = question(
            QuestionType::MultipleChoice,
            vec![
                option(1, true, None),
                option(2, true, None),
                option(3, true, None),
                option(4, false, None),
                option(5, false, None),
            ],
            vec![],
        );
        let pick = |ids: &[i64]| AnswerPayload::MultipleChoice { selected_option_ids: ids.to_vec() };

        assert_eq!(GradingService::evaluate(&q, &pick(&[1, 2, 4])), Some(false));
        assert_eq!(GradingService::evaluate(&q, &pick(&[1, 2])), Some(false));
        assert_eq!(GradingService::evaluate(&q, &pick(&[3, 1, 2])), Some(true));
    }

    #[test]
    fn multiple_choice_with_no_correct_options_wants_empty_selection() {
        let q = question(
            QuestionType::MultipleChoice,
            vec![option(1, false, None), option(2, false, None)],
            vec![],
        );
        let pick = |ids: &[i64]| AnswerPayload::MultipleChoice { selected_option_ids: ids.to_vec() };

        assert_eq!(GradingService::evaluate(&q, &pick(&[])), Some(true));
        assert_eq!(GradingService::evaluate(&q, &pick(&[1])), Some(false));
    }

    #[test]
    fn dropdown_needs_every_blank_right() {
        let q = question(
            QuestionType::FillBlankDropdown,
            vec![
                option(1, true, Some(1)),
                option(2, false, Some(1)),
                option(3, false, Some(2)),
                option(4, true, Some(2)),
            ],
            vec![],
        );
        let pick = |pairs: &[(i32, i64)]| AnswerPayload::FillBlankDropdown {
            blanks: pairs
                .iter()
                .map(|(b, o)| DropdownBlank { blank_id: *b, selected_option_id: *o })
                .collect(),
        };

        assert_eq!(GradingService::evaluate(&q, &pick(&[(1, 1), (2, 4)])), Some(true));
        assert_eq!(GradingService::evaluate(&q, &pick(&[(1, 1), (2, 3)])), Some(false));
        assert_eq!(GradingService::evaluate(&q, &pick(&[(1, 1)])), Some(false));
    }

    #[test]
    fn fill_blank_text_exact_vs_substring() {
        let exact = question(
            QuestionType::FillBlankText,
            vec![],
            vec![rule("Paris", Some(1), false, true)],
        );
        assert_eq!(GradingService::evaluate(&exact, &text_blanks(&[(1, "paris")])), Some(true));
        assert_eq!(GradingService::evaluate(&exact, &text_blanks(&[(1, "  Paris ")])), Some(true));
        assert_eq!(GradingService::evaluate(&exact, &text_blanks(&[(1, "Paris, France")])), Some(false));

        let loose = question(
            QuestionType::FillBlankText,
            vec![],
            vec![rule("Paris", Some(1), true, false)],
        );
        assert_eq!(GradingService::evaluate(&loose, &text_blanks(&[(1, "Paris, France")])), Some(true));
        assert_eq!(GradingService::evaluate(&loose, &text_blanks(&[(1, "paris, france")])), Some(false));
    }

    #[test]
    fn fill_blank_text_rejects_missing_and_unknown_blanks() {
        let q = question(
            QuestionType::FillBlankText,
            vec![],
            vec![rule("red", Some(1), false, true), rule("blue", Some(2), false, true)],
        );
        assert_eq!(GradingService::evaluate(&q, &text_blanks(&[(1, "red"), (2, "blue")])), Some(true));
        assert_eq!(GradingService::evaluate(&q, &text_blanks(&[(1, "red")])), Some(false));
        assert_eq!(
            GradingService::evaluate(&q, &text_blanks(&[(1, "red"), (2, "blue"), (3, "x")])),
            Some(false)
        );
    }

    #[test]
    fn subjective_types_stay_ungraded() {
        let q = question(QuestionType::Essay, vec![], vec![]);
        let mut answer = StudentAnswer::new(
            Uuid::new_v4(),
            1,
            AnswerPayload::Essay { answer_text: "long text".into() },
            None,
            Utc::now(),
        );
        assert!(!GradingService::auto_grade(&q, &mut answer, Utc::now()));
        assert_eq!(answer.points_earned, None);
        assert_eq!(answer.is_correct, None);
    }

    #[test]
    fn auto_grade_is_deterministic() {
        let q = question(
            QuestionType::SingleChoice,
            vec![option(1, true, None), option(2, false, None)],
            vec![],
        );
        let mut answer = StudentAnswer::new(
            Uuid::new_v4(),
            1,
            AnswerPayload::SingleChoice { selected_option_id: 1 },
            None,
            Utc::now(),
        );
        let now = Utc::now();
        assert!(GradingService::auto_grade(&q, &mut answer, now));
        let first = (answer.is_correct, answer.points_earned);
        assert!(GradingService::auto_grade(&q, &mut answer, now));
        assert_eq!(first, (answer.is_correct, answer.points_earned));
        assert_eq!(answer.points_earned, Some(Decimal::from(5)));
    }
}
