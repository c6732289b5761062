//! Gateway Middleware Stack
//!
//! Outermost to innermost: request logging, CORS, then authentication plus
//! rate limiting in one layer. `/health` bypasses authentication so probes
//! need no credentials.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Extension, Request};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;

use super::GatewayState;

/// The authenticated tenant, bound to the request scope by `auth`.
#[derive(Debug, Clone, Copy)]
pub struct UserId(pub i64);

/// Logs method, path, status and latency for every request.
pub async fn logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// Answers CORS preflights and stamps the allow headers on every response.
pub async fn cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::OK.into_response();
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, X-API-Key, X-Consistency"),
    );
}

/// Validates the API key, admits the request through the tenant's token
/// bucket, and binds [`UserId`] to the request. After the response is built,
/// a usage record is handed to the sink on a detached task.
pub async fn auth(
    Extension(state): Extension<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let api_key = request
        .headers()
        .get("X-API-Key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Unauthenticated("Missing X-API-Key header".to_string()))?;

    let user_id = match state.identity.resolve(&api_key).await {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(error = %e, "API key validation failed");
            return Err(ApiError::Unauthenticated("Invalid API key".to_string()));
        }
    };

    if !state.rate_limiter.allow(user_id) {
        return Err(ApiError::RateLimited);
    }

    request.extensions_mut().insert(UserId(user_id));

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    let status = response.status().as_u16();
    let sink = state.usage.clone();
    tokio::spawn(async move {
        sink.record_request(user_id, &method, &path, status).await;
    });

    Ok(response)
}
