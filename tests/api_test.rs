mod common;

use std::env;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use common::*;
use quiz_grading_backend::{
    config::{get_config, init_config},
    middleware::auth::{issue_token, Claims},
    models::question::QuestionType,
    routes,
};
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

fn setup() -> (Harness, Router) {
    env::set_var("SERVER_ADDRESS", "127.0.0.1:0");
    env::set_var("JWT_SECRET", "test_secret_key");
    env::set_var("TRUST_PROXY_HEADERS", "true");
    let _ = init_config();

    let harness = Harness::new();
    harness.seed(
        quiz(1),
        vec![
            single_choice(1, 1, 5),
            question(2, 1, QuestionType::Essay, 10),
        ],
    );
    let app = routes::router(harness.state.clone());
    (harness, app)
}

fn token(user_id: i64, role: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: 4_102_444_800,
        role: Some(role.to_string()),
    };
    issue_token(&claims, &get_config().jwt_secret).expect("sign token")
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<JsonValue>,
) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .header("user-agent", "api-test");
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn decimal(value: &JsonValue) -> Decimal {
    match value {
        JsonValue::String(s) => s.parse().unwrap(),
        other => other.to_string().parse().unwrap(),
    }
}

#[tokio::test]
async fn health_reports_storage() {
    let (_h, app) = setup();
    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "in_memory");
}

#[tokio::test]
async fn requests_without_valid_token_are_rejected() {
    let (_h, app) = setup();

    let (status, body) = call(&app, "POST", "/api/quizzes/1/attempts", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing_authorization");

    let (status, body) =
        call(&app, "POST", "/api/quizzes/1/attempts", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");

    let student = token(STUDENT, "student");
    let (status, body) = call(
        &app,
        "GET",
        "/api/grading/quizzes/1/pending",
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn student_flow_then_manual_grading() {
    let (_h, app) = setup();
    let student = token(STUDENT, "student");
    let teacher = token(TEACHER, "teacher");

    let (status, attempt) =
        call(&app, "POST", "/api/quizzes/1/attempts", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attempt["status"], "IN_PROGRESS");
    assert_eq!(attempt["ip_address"], "203.0.113.7");
    let attempt_id = attempt["id"].as_str().unwrap().to_string();

    let (status, answer) = call(
        &app,
        "PUT",
        &format!("/api/attempts/{}/answers", attempt_id),
        Some(&student),
        Some(json!({ "question_id": 1, "answer_data": right(1), "time_spent_seconds": 12 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answer["is_correct"], true);

    let (status, essay_answer) = call(
        &app,
        "PUT",
        &format!("/api/attempts/{}/answers", attempt_id),
        Some(&student),
        Some(json!({ "question_id": 2, "answer_data": essay("It depends.") })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let essay_id = essay_answer["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/api/attempts/{}/answers", attempt_id),
        Some(&student),
        Some(json!({ "question_id": 1, "answer_data": { "selected_option_id": 999 } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, result) = call(
        &app,
        "POST",
        &format!("/api/attempts/{}/submit", attempt_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["attempt"]["status"], "SUBMITTED");
    assert_eq!(result["provisional"], true);
    assert_eq!(decimal(&result["attempt"]["earned_points"]), Decimal::from(5));

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/attempts/{}/submit", attempt_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state");

    let (status, pending) = call(
        &app,
        "GET",
        "/api/grading/quizzes/1/pending",
        Some(&teacher),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/grading/answers/{}", essay_id),
        Some(&teacher),
        Some(json!({ "points": "11" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, graded) = call(
        &app,
        "POST",
        &format!("/api/grading/answers/{}", essay_id),
        Some(&teacher),
        Some(json!({ "points": "10", "feedback": "Well argued" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(graded["is_correct"], true);

    let (status, result) = call(
        &app,
        "GET",
        &format!("/api/attempts/{}/result", attempt_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["attempt"]["status"], "GRADED");
    assert_eq!(decimal(&result["attempt"]["percentage"]), Decimal::from(100));
    assert_eq!(result["questions"][1]["feedback"], "Well argued");

    let (status, summary) = call(
        &app,
        "GET",
        &format!("/api/attempts/{}/summary", attempt_id),
        Some(&teacher),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["grading"]["fully_graded"], true);
    assert_eq!(summary["questions"]["answered"], 2);
}

#[tokio::test]
async fn bulk_grade_failure_lists_rejected_answers() {
    let (h, app) = setup();
    let svc = h.attempts();
    let attempt = svc
        .start_attempt(1, &student(), Default::default())
        .await
        .unwrap();
    let answer = svc
        .record_answer(attempt.id, 2, &essay("text"), None, &student())
        .await
        .unwrap();
    svc.submit_attempt(attempt.id, &student()).await.unwrap();

    let teacher = token(TEACHER, "teacher");
    let (status, body) = call(
        &app,
        "POST",
        "/api/grading/bulk",
        Some(&teacher),
        Some(json!({ "grades": [{ "answer_id": answer.id, "points": "50" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["failures"][0]["answer_id"], answer.id.to_string());
    assert_eq!(body["applied"], json!([]));

    let (status, body) = call(
        &app,
        "POST",
        "/api/grading/bulk",
        Some(&teacher),
        Some(json!({ "grades": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}
