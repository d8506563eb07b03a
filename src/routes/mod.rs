pub mod attempts;
pub mod grading;
pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::auth::{require_bearer_auth, require_grader};
use crate::AppState;

pub fn router(state: AppState) -> Router {
    let attempt_api = Router::new()
        .route(
            "/api/quizzes/:quiz_id/attempts",
            post(attempts::start_attempt).get(attempts::list_attempts),
        )
        .route("/api/attempts/:id/answers", put(attempts::record_answer))
        .route("/api/attempts/:id/submit", post(attempts::submit_attempt))
        .route("/api/attempts/:id/result", get(attempts::get_result))
        .route("/api/attempts/:id/review", get(attempts::review_attempt))
        .route("/api/attempts/:id/summary", get(attempts::get_summary))
        .route("/api/attempts/:id/abandon", post(attempts::abandon_attempt))
        .layer(axum::middleware::from_fn(require_bearer_auth));

    let grading_api = Router::new()
        .route(
            "/api/grading/answers/:answer_id",
            post(grading::grade_answer),
        )
        .route("/api/grading/bulk", post(grading::bulk_grade))
        .route(
            "/api/grading/quizzes/:quiz_id/pending",
            get(grading::list_pending),
        )
        .route(
            "/api/grading/quizzes/:quiz_id/analytics",
            get(grading::quiz_analytics),
        )
        .layer(axum::middleware::from_fn(require_grader));

    Router::new()
        .route("/health", get(health::health))
        .merge(attempt_api)
        .merge(grading_api)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
