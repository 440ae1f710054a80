//! Bearer token authentication extractors.

use axum::extract::{FromRequestParts, Query};
use axum::http::{header, request::Parts};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Extractor that requires an `Authorization: Bearer <token>` header
/// resolving to a user.
#[derive(Debug, Clone, Copy)]
pub struct RequireAuth {
    pub user_id: Uuid,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for RequireAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts);
        let user_id = resolve(state, token).await?;
        Ok(RequireAuth { user_id })
    }
}

/// Like [`RequireAuth`], but also accepts `?token=` because browser
/// `EventSource` cannot set headers. Used by the streaming endpoint only.
#[derive(Debug, Clone, Copy)]
pub struct StreamAuth {
    pub user_id: Uuid,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for StreamAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).or_else(|| query_token(parts));
        let user_id = resolve(state, token).await?;
        Ok(StreamAuth { user_id })
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn query_token(parts: &Parts) -> Option<String> {
    let Query(query) = Query::<TokenQuery>::try_from_uri(&parts.uri).ok()?;
    query.token.filter(|t| !t.is_empty())
}

async fn resolve(state: &AppState, token: Option<String>) -> Result<Uuid, ApiError> {
    let token =
        token.ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?;

    match state.identity.resolve(&token).await? {
        Some(user_id) => Ok(user_id),
        None => Err(ApiError::Unauthorized("Invalid or expired token".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[test]
    fn test_bearer_token() {
        let p = parts(Request::get("/").header("authorization", "Bearer pt_abc"));
        assert_eq!(bearer_token(&p).as_deref(), Some("pt_abc"));

        let p = parts(Request::get("/").header("authorization", "Basic dXNlcg=="));
        assert_eq!(bearer_token(&p), None);

        let p = parts(Request::get("/").header("authorization", "Bearer   "));
        assert_eq!(bearer_token(&p), None);
    }

    #[test]
    fn test_query_token() {
        let p = parts(Request::get("/api/v1/stream?x=1&token=pt_abc"));
        assert_eq!(query_token(&p).as_deref(), Some("pt_abc"));

        let p = parts(Request::get("/api/v1/stream?token="));
        assert_eq!(query_token(&p), None);

        let p = parts(Request::get("/api/v1/stream"));
        assert_eq!(query_token(&p), None);
    }

    #[test]
    fn test_query_token_is_percent_decoded() {
        let p = parts(Request::get("/api/v1/stream?token=pt%2Fab%3Dc%26d"));
        assert_eq!(query_token(&p).as_deref(), Some("pt/ab=c&d"));

        let p = parts(Request::get("/api/v1/stream?q=1&token=dev%20token"));
        assert_eq!(query_token(&p).as_deref(), Some("dev token"));
    }
}
