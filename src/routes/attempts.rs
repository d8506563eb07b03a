use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Extension, Json,
};
use std::net::SocketAddr;
use uuid::Uuid;
use validator::Validate;

use crate::config::get_config;
use crate::dto::attempt_dto::{ClientInfo, ListAttemptsQuery, RecordAnswerRequest};
use crate::error::Result;
use crate::models::user::Caller;
use crate::AppState;

/// The socket peer is the client address unless forwarded headers are trusted.
fn client_info(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> ClientInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let forwarded = || {
        header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
            .filter(|ip| !ip.is_empty())
            .or_else(|| header("x-real-ip"))
    };
    let proxied = if trust_proxy { forwarded() } else { None };
    let ip_address = proxied.or_else(|| peer.map(|addr| addr.ip().to_string()));

    ClientInfo {
        ip_address,
        user_agent: header("user-agent"),
    }
}

#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    Path(quiz_id): Path<i64>,
    Extension(caller): Extension<Caller>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let client = client_info(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        get_config().trust_proxy_headers,
    );
    let attempt = state
        .attempt_service
        .start_attempt(quiz_id, &caller, client)
        .await?;
    Ok(Json(attempt))
}

#[axum::debug_handler]
pub async fn list_attempts(
    State(state): State<AppState>,
    Path(quiz_id): Path<i64>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<ListAttemptsQuery>,
) -> Result<impl IntoResponse> {
    let attempts = state
        .attempt_service
        .list_student_attempts(quiz_id, query.student_id, &caller)
        .await?;
    Ok(Json(attempts))
}

#[axum::debug_handler]
pub async fn record_answer(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<RecordAnswerRequest>,
) -> Result<impl IntoResponse> {
    req.validate()?;
    let answer = state
        .attempt_service
        .record_answer(
            attempt_id,
            req.question_id,
            &req.answer_data,
            req.time_spent_seconds,
            &caller,
        )
        .await?;
    Ok(Json(answer))
}

#[axum::debug_handler]
pub async fn submit_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse> {
    let result = state.attempt_service.submit_attempt(attempt_id, &caller).await?;
    Ok(Json(result))
}

#[axum::debug_handler]
pub async fn get_result(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse> {
    let result = state.attempt_service.get_result(attempt_id, &caller).await?;
    Ok(Json(result))
}

#[axum::debug_handler]
pub async fn review_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse> {
    let review = state.attempt_service.review_attempt(attempt_id, &caller).await?;
    Ok(Json(review))
}

#[axum::debug_handler]
pub async fn get_summary(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse> {
    let summary = state.attempt_service.get_summary(attempt_id, &caller).await?;
    Ok(Json(summary))
}

#[axum::debug_handler]
pub async fn abandon_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse> {
    let attempt = state.attempt_service.abandon_attempt(attempt_id, &caller).await?;
    Ok(Json(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn proxied_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        headers.insert("x-real-ip", HeaderValue::from_static("192.168.1.1"));
        headers.insert("user-agent", HeaderValue::from_static("curl/8"));
        headers
    }

    #[test]
    fn trusted_proxy_uses_first_forwarded_address() {
        let peer: SocketAddr = "172.16.0.9:40000".parse().unwrap();
        let info = client_info(&proxied_headers(), Some(peer), true);
        assert_eq!(info.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(info.user_agent.as_deref(), Some("curl/8"));

        let mut headers = proxied_headers();
        headers.remove("x-forwarded-for");
        let info = client_info(&headers, Some(peer), true);
        assert_eq!(info.ip_address.as_deref(), Some("192.168.1.1"));
    }

    #[test]
    fn forwarded_headers_are_ignored_without_trusted_proxy() {
        let peer: SocketAddr = "198.51.100.4:51234".parse().unwrap();
        let info = client_info(&proxied_headers(), Some(peer), false);
        assert_eq!(info.ip_address.as_deref(), Some("198.51.100.4"));
        assert_eq!(info.user_agent.as_deref(), Some("curl/8"));

        let info = client_info(&proxied_headers(), None, false);
        assert_eq!(info.ip_address, None);
    }
}
