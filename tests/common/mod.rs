#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use quiz_grading_backend::{
    database::{memory::InMemoryStore, Stores},
    models::{
        question::{AnswerOption, CorrectAnswer, Question, QuestionType, QuestionWithKey},
        quiz::Quiz,
        user::Caller,
    },
    services::{
        analytics_service::AnalyticsQueue, attempt_service::AttemptService,
        manual_grading_service::ManualGradingService,
    },
    utils::time::ManualClock,
    AppState, StorageKind,
};
use rust_decimal::Decimal;

pub const ADMIN: i64 = 1;
pub const TEACHER: i64 = 100;
pub const OTHER_TEACHER: i64 = 101;
pub const STUDENT: i64 = 500;
pub const OTHER_STUDENT: i64 = 501;

pub fn student() -> Caller {
    Caller::student(STUDENT)
}

pub fn teacher() -> Caller {
    Caller::teacher(TEACHER)
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: ManualClock,
    pub state: AppState,
}

impl Harness {
    /// Must be called inside a tokio runtime; spawns the analytics worker.
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let stores = Stores::in_memory(store.clone());
        let clock = ManualClock::new(start_time());

        let (analytics, worker) = AnalyticsQueue::new(stores.analytics.clone(), 16);
        tokio::spawn(worker.run());

        let state = AppState::new(
            StorageKind::InMemory,
            stores,
            Arc::new(clock.clone()),
            analytics,
        );
        Self { store, clock, state }
    }

    pub fn attempts(&self) -> &AttemptService {
        &self.state.attempt_service
    }

    pub fn grading(&self) -> &ManualGradingService {
        &self.state.grading_service
    }

    pub fn seed(&self, quiz: Quiz, questions: Vec<QuestionWithKey>) {
        self.store.insert_quiz(quiz);
        for q in questions {
            self.store.insert_question(q);
        }
    }
}

pub fn quiz(id: i64) -> Quiz {
    Quiz {
        id,
        content_id: id * 10,
        title: format!("Quiz {}", id),
        total_points: Decimal::from(10),
        passing_score: None,
        time_limit_minutes: None,
        available_from: None,
        available_until: None,
        max_attempts: None,
        auto_grade: true,
        show_results_immediately: true,
        show_correct_answers: true,
        allow_review: true,
        show_feedback: true,
        is_published: true,
        created_by: TEACHER,
    }
}

pub fn question(id: i64, quiz_id: i64, question_type: QuestionType, points: i64) -> QuestionWithKey {
    QuestionWithKey {
        question: Question {
            id,
            quiz_id,
            question_type,
            question_text: format!("Question {}", id),
            points: Decimal::from(points),
            order_index: id as i32,
        },
        options: vec![],
        correct_answers: vec![],
    }
}

/// `(option id, is_correct, blank id)` triples.
pub fn with_options(mut q: QuestionWithKey, options: &[(i64, bool, Option<i32>)]) -> QuestionWithKey {
    let question_id = q.question.id;
    q.options = options
        .iter()
        .enumerate()
        .map(|(idx, (id, is_correct, blank_id))| AnswerOption {
            id: *id,
            question_id,
            option_text: format!("Option {}", id),
            is_correct: *is_correct,
            order_index: idx as i32,
            blank_id: *blank_id,
        })
        .collect();
    q
}

pub fn with_rule(
    mut q: QuestionWithKey,
    text: &str,
    blank_id: i32,
    case_sensitive: bool,
    exact_match: bool,
) -> QuestionWithKey {
    q.correct_answers.push(CorrectAnswer {
        id: q.correct_answers.len() as i64 + 1,
        question_id: q.question.id,
        answer_text: Some(text.to_string()),
        blank_id: Some(blank_id),
        blank_position: Some(blank_id),
        case_sensitive,
        exact_match,
    });
    q
}

/// Single-choice question whose option `id * 10 + 1` is correct and `id * 10 + 2` is not.
pub fn single_choice(id: i64, quiz_id: i64, points: i64) -> QuestionWithKey {
    with_options(
        question(id, quiz_id, QuestionType::SingleChoice, points),
        &[(id * 10 + 1, true, None), (id * 10 + 2, false, None)],
    )
}

pub fn right(question_id: i64) -> serde_json::Value {
    serde_json::json!({ "selected_option_id": question_id * 10 + 1 })
}

pub fn wrong(question_id: i64) -> serde_json::Value {
    serde_json::json!({ "selected_option_id": question_id * 10 + 2 })
}

pub fn essay(text: &str) -> serde_json::Value {
    serde_json::json!({ "answer_text": text })
}
