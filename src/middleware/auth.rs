use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::models::user::{Caller, Role};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
}

impl Claims {
    /// A missing role means a student; an unknown role or a non-numeric
    /// subject is rejected.
    pub fn caller(&self) -> Option<Caller> {
        let user_id = self.sub.trim().parse::<i64>().ok()?;
        let role = match self.role.as_deref() {
            None => Role::Student,
            Some(raw) => raw.parse::<Role>().ok()?,
        };
        Some(Caller::new(user_id, role))
    }
}

/// Signs claims with the configured HS256 secret.
pub fn issue_token(claims: &Claims, secret: &str) -> crate::error::Result<String> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| crate::error::Error::Internal(format!("token signing failed: {}", e)))
}

fn reject(status: StatusCode, code: &str) -> Response {
    (status, Json(json!({ "error": code }))).into_response()
}

fn authenticate(req: &Request) -> Result<Caller, Response> {
    let Some(auth_header) = req.headers().get(axum::http::header::AUTHORIZATION) else {
        return Err(reject(StatusCode::UNAUTHORIZED, "missing_authorization"));
    };
    let Ok(auth_str) = auth_header.to_str() else {
        return Err(reject(StatusCode::UNAUTHORIZED, "bad_authorization"));
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return Err(reject(StatusCode::UNAUTHORIZED, "unsupported_scheme"));
    };

    let config = crate::config::get_config();
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|_| reject(StatusCode::UNAUTHORIZED, "invalid_token"))?
    .claims;

    claims
        .caller()
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "invalid_claims"))
}

/// Any authenticated user. Inserts the `Caller` into request extensions.
pub async fn require_bearer_auth(mut req: Request, next: Next) -> Response {
    match authenticate(&req) {
        Ok(caller) => {
            req.extensions_mut().insert(caller);
            next.run(req).await
        }
        Err(resp) => resp,
    }
}

/// Teachers and admins only.
pub async fn require_grader(mut req: Request, next: Next) -> Response {
    match authenticate(&req) {
        Ok(caller) if matches!(caller.role, Role::Teacher | Role::Admin) => {
            req.extensions_mut().insert(caller);
            next.run(req).await
        }
        Ok(caller) => {
            tracing::warn!(user_id = caller.user_id, "Grading endpoint refused for student");
            reject(StatusCode::FORBIDDEN, "forbidden")
        }
        Err(resp) => resp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, role: Option<&str>) -> Claims {
        Claims {
            sub: sub.to_string(),
            exp: 0,
            role: role.map(str::to_string),
        }
    }

    #[test]
    fn claims_map_to_caller() {
        assert_eq!(claims("42", None).caller(), Some(Caller::student(42)));
        assert_eq!(claims("7", Some("teacher")).caller(), Some(Caller::teacher(7)));
        assert_eq!(claims("1", Some("ADMIN")).caller(), Some(Caller::admin(1)));
        assert_eq!(claims("abc", None).caller(), None);
        assert_eq!(claims("3", Some("janitor")).caller(), None);
    }
}
