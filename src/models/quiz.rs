use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Quiz configuration as published by the authoring side.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quiz {
    pub id: i64,
    pub content_id: i64,
    pub title: String,
    pub total_points: Decimal,
    pub passing_score: Option<Decimal>,
    pub time_limit_minutes: Option<i32>,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
    pub max_attempts: Option<i32>,
    pub auto_grade: bool,
    pub show_results_immediately: bool,
    pub show_correct_answers: bool,
    pub allow_review: bool,
    pub show_feedback: bool,
    pub is_published: bool,
    pub created_by: i64,
}

/// Where `now` falls relative to a quiz's availability window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Open,
    NotYetOpen(DateTime<Utc>),
    Closed(DateTime<Utc>),
}

impl Quiz {
    pub fn availability_at(&self, now: DateTime<Utc>) -> Availability {
        if let Some(from) = self.available_from {
            if now < from {
                return Availability::NotYetOpen(from);
            }
        }
        if let Some(until) = self.available_until {
            if now > until {
                return Availability::Closed(until);
            }
        }
        Availability::Open
    }

    /// True when a time limit is configured and `elapsed_seconds` is past it.
    pub fn time_limit_exceeded(&self, elapsed_seconds: i64) -> bool {
        match self.time_limit_minutes {
            Some(limit) => elapsed_seconds > i64::from(limit) * 60,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn quiz() -> Quiz {
        Quiz {
            id: 1,
            content_id: 1,
            title: "Quiz".into(),
            total_points: Decimal::from(10),
            passing_score: None,
            time_limit_minutes: Some(30),
            available_from: None,
            available_until: None,
            max_attempts: None,
            auto_grade: true,
            show_results_immediately: true,
            show_correct_answers: false,
            allow_review: false,
            show_feedback: false,
            is_published: true,
            created_by: 1,
        }
    }

    #[test]
    fn availability_respects_both_bounds() {
        let now = Utc::now();
        let mut q = quiz();
        assert_eq!(q.availability_at(now), Availability::Open);

        q.available_from = Some(now + Duration::hours(1));
        assert!(matches!(q.availability_at(now), Availability::NotYetOpen(_)));

        q.available_from = Some(now - Duration::hours(2));
        q.available_until = Some(now - Duration::hours(1));
        assert!(matches!(q.availability_at(now), Availability::Closed(_)));
    }

    #[test]
    fn time_limit_is_strictly_greater_than() {
        let q = quiz();
        assert!(!q.time_limit_exceeded(30 * 60));
        assert!(q.time_limit_exceeded(30 * 60 + 1));

        let unlimited = Quiz { time_limit_minutes: None, ..quiz() };
        assert!(!unlimited.time_limit_exceeded(i64::MAX));
    }
}
