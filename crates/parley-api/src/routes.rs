//! Router and middleware stack.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::handlers::{self, conversations, read_state, stream};
use crate::state::AppState;

/// Request bodies are small JSON documents.
const BODY_LIMIT_BYTES: usize = 64 * 1024;

/// Paths that bypass the global rate limit. Streams are long-lived and would
/// otherwise hold a token for their entire lifetime.
const RATE_LIMIT_EXEMPT: &[&str] = &["/health", "/api/v1/stream"];

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Build the full application router.
pub fn build_router(state: AppState, allowed_origins: Vec<HeaderValue>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/stream", get(stream::stream_events))
        .route(
            "/api/v1/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/api/v1/conversations/:id",
            get(conversations::get_conversation).patch(conversations::update_conversation),
        )
        .route(
            "/api/v1/conversations/:id/participants",
            post(conversations::add_participant),
        )
        .route(
            "/api/v1/conversations/:id/participants/me",
            delete(conversations::leave_conversation),
        )
        .route(
            "/api/v1/conversations/:id/messages",
            get(conversations::list_messages).post(conversations::send_message),
        )
        .route(
            "/api/v1/conversations/:id/messages/:message_id/receipts",
            get(conversations::list_read_receipts),
        )
        .route("/api/v1/conversations/:id/read", post(read_state::mark_read))
        .route("/api/v1/conversations/:id/typing", post(read_state::typing))
        .route("/api/v1/conversations/:id/search", get(read_state::search))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(allowed_origins))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
                .allow_credentials(true)
                .max_age(std::time::Duration::from_secs(3600)),
        )
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

async fn rate_limit_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(limiter) = &state.rate_limiter {
        let exempt = RATE_LIMIT_EXEMPT.contains(&request.uri().path());
        if !exempt && limiter.check().is_err() {
            tracing::warn!(
                subsystem = "api",
                component = "rate_limit",
                path = request.uri().path(),
                "Rate limit exceeded"
            );
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "Too many requests. Please wait before retrying."
                })),
            )
                .into_response();
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use tower::ServiceExt;

    use parley_core::EventBus;
    use parley_db::{MemoryConversationRepository, StaticIdentityResolver};

    use crate::config::RateLimitConfig;

    fn app(rate_limit: RateLimitConfig) -> Router {
        let state = AppState::new(
            Arc::new(MemoryConversationRepository::new()),
            Arc::new(StaticIdentityResolver::new()),
            Arc::new(EventBus::new()),
        )
        .with_rate_limit(&rate_limit);
        build_router(state, vec![HeaderValue::from_static("http://localhost:3000")])
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_has_request_id() {
        let response = app(RateLimitConfig::default())
            .oneshot(get("/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers().get("x-request-id").unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn test_unauthenticated_is_401() {
        let response = app(RateLimitConfig::default())
            .oneshot(get("/api/v1/conversations"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_rate_limit_exempts_health() {
        let app = app(RateLimitConfig {
            enabled: true,
            requests: 1,
            period: std::time::Duration::from_secs(3600),
        });

        let first = app.clone().oneshot(get("/api/v1/conversations")).await.unwrap();
        assert_eq!(first.status(), StatusCode::UNAUTHORIZED);
        let second = app.clone().oneshot(get("/api/v1/conversations")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        let health = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }
}
