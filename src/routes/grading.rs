use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::grading_dto::{BulkGradeRequest, BulkGradeResponse, GradeAnswerRequest};
use crate::error::Result;
use crate::models::user::Caller;
use crate::AppState;

#[axum::debug_handler]
pub async fn grade_answer(
    State(state): State<AppState>,
    Path(answer_id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<GradeAnswerRequest>,
) -> Result<impl IntoResponse> {
    req.validate()?;
    let answer = state
        .grading_service
        .grade_answer(answer_id, req.points, req.feedback, &caller)
        .await?;
    Ok(Json(answer))
}

#[axum::debug_handler]
pub async fn bulk_grade(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<BulkGradeRequest>,
) -> Result<impl IntoResponse> {
    req.validate()?;
    let graded = state.grading_service.bulk_grade(req.grades, &caller).await?;
    Ok(Json(BulkGradeResponse { graded }))
}

#[axum::debug_handler]
pub async fn list_pending(
    State(state): State<AppState>,
    Path(quiz_id): Path<i64>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse> {
    let pending = state.grading_service.list_pending(quiz_id, &caller).await?;
    Ok(Json(pending))
}

#[axum::debug_handler]
pub async fn quiz_analytics(
    State(state): State<AppState>,
    Path(quiz_id): Path<i64>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse> {
    let analytics = state.grading_service.quiz_analytics(quiz_id, &caller).await?;
    Ok(Json(analytics))
}
