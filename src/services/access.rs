use crate::database::QuizCatalog;
use crate::error::{Error, Result};
use crate::models::user::Caller;

/// Whether the caller may manage the quiz: its course creator or an admin.
pub async fn owns_quiz(catalog: &dyn QuizCatalog, quiz_id: i64, caller: &Caller) -> Result<bool> {
    if caller.is_privileged() {
        return Ok(true);
    }
    Ok(catalog.quiz_owner(quiz_id).await? == Some(caller.user_id))
}

pub async fn ensure_quiz_owner(catalog: &dyn QuizCatalog, quiz_id: i64, caller: &Caller) -> Result<()> {
    if owns_quiz(catalog, quiz_id, caller).await? {
        Ok(())
    } else {
        tracing::warn!(quiz_id, user_id = caller.user_id, "Quiz ownership check failed");
        Err(Error::Forbidden(format!(
            "user {} does not own quiz {}",
            caller.user_id, quiz_id
        )))
    }
}
