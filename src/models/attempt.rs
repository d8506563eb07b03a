use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "attempt_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    Graded,
    Abandoned,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "IN_PROGRESS",
            AttemptStatus::Submitted => "SUBMITTED",
            AttemptStatus::Graded => "GRADED",
            AttemptStatus::Abandoned => "ABANDONED",
        }
    }

    /// Legal edges of the attempt state machine. `Graded -> Submitted` covers a
    /// regrade that leaves a subjective answer without points again.
    pub fn can_transition_to(self, next: AttemptStatus) -> bool {
        use AttemptStatus::*;
        matches!(
            (self, next),
            (InProgress, Submitted)
                | (InProgress, Graded)
                | (InProgress, Abandoned)
                | (Submitted, Submitted)
                | (Submitted, Graded)
                | (Graded, Graded)
                | (Graded, Submitted)
        )
    }

    /// Submitted or graded; the only states manual grading may touch.
    pub fn is_gradeable(self) -> bool {
        matches!(self, AttemptStatus::Submitted | AttemptStatus::Graded)
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attempt {
    pub id: Uuid,
    pub quiz_id: i64,
    pub student_id: i64,
    pub attempt_number: i32,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub time_spent_seconds: Option<i32>,
    pub total_points: Option<Decimal>,
    pub earned_points: Option<Decimal>,
    pub percentage: Option<Decimal>,
    pub is_passed: Option<bool>,
    pub status: AttemptStatus,
    pub auto_graded_at: Option<DateTime<Utc>>,
    pub manually_graded_at: Option<DateTime<Utc>>,
    pub graded_by: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Optimistic concurrency token; bumped by every successful update.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Attempt {
    pub fn new(
        quiz_id: i64,
        student_id: i64,
        attempt_number: i32,
        started_at: DateTime<Utc>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            quiz_id,
            student_id,
            attempt_number,
            started_at,
            submitted_at: None,
            time_spent_seconds: None,
            total_points: None,
            earned_points: None,
            percentage: None,
            is_passed: None,
            status: AttemptStatus::InProgress,
            auto_graded_at: None,
            manually_graded_at: None,
            graded_by: None,
            ip_address,
            user_agent,
            version: 0,
            created_at: started_at,
            updated_at: started_at,
        }
    }

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_seconds().max(0)
    }

    pub fn transition(&mut self, next: AttemptStatus) -> crate::error::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(crate::error::Error::InvalidState(format!(
                "attempt {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_do_not_reopen() {
        use AttemptStatus::*;
        assert!(InProgress.can_transition_to(Submitted));
        assert!(InProgress.can_transition_to(Abandoned));
        assert!(Submitted.can_transition_to(Graded));
        assert!(!Submitted.can_transition_to(InProgress));
        assert!(!Graded.can_transition_to(InProgress));
        assert!(!Abandoned.can_transition_to(Submitted));
        assert!(!Abandoned.can_transition_to(InProgress));
    }

    #[test]
    fn transition_rejects_illegal_edge() {
        let now = Utc::now();
        let mut attempt = Attempt::new(1, 2, 1, now, None, None);
        attempt.transition(AttemptStatus::Abandoned).unwrap();
        let err = attempt.transition(AttemptStatus::Submitted).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);
        assert_eq!(attempt.status, AttemptStatus::Abandoned);
    }
}
