//! `POST /llm`: a thin, per-user rate-limited pass-through to the model.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use scorchbook_shared::ScorchbookError;
use scorchbook_storage::RateLimitDecision;
use serde_json::{Value, json};
use tracing::{error, info, instrument, warn};

use crate::auth::bearer_token;
use crate::http::{json_response, message_response, set_cors_headers};
use crate::tastings::authorization;
use crate::{AppState, MAX_BODY_BYTES};

/// Windows outlive their minute so late increments still find the row.
const RATE_WINDOW_TTL_SECS: i64 = 120;

pub async fn preflight() -> Response {
    json_response(StatusCode::OK, json!({ "ok": true }))
}

/// The proxy is open to any origin.
pub async fn cors(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    set_cors_headers(response.headers_mut(), "*", "*", "OPTIONS,POST");
    response
}

#[instrument(skip_all)]
pub async fn invoke(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let user_id = resolve_user_id(&state, &parts).await;

    let limit = state.proxy.rate_limit_per_minute;
    let window_key = format!("{user_id}#{}", Utc::now().format("%Y%m%d%H%M"));
    let count = match state
        .storage
        .increment_rate_limit(&window_key, limit, RATE_WINDOW_TTL_SECS)
        .await
    {
        Ok(RateLimitDecision::Allowed { count }) => count,
        Ok(RateLimitDecision::Exceeded) => {
            warn!(%user_id, limit, "proxy.rate_limited");
            return json_response(
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "message": "Rate limit exceeded", "limit_per_minute": limit }),
            );
        }
        Err(e) => {
            error!(error = %e, "proxy.rate_limit.failed");
            return message_response(StatusCode::INTERNAL_SERVER_ERROR, "Rate limit error");
        }
    };

    let Some(payload) = read_payload(body).await else {
        return message_response(StatusCode::BAD_REQUEST, "Invalid JSON body");
    };
    let Some(messages) = request_messages(&payload) else {
        return message_response(
            StatusCode::BAD_REQUEST,
            "Provide 'prompt' (string) or 'messages' (Anthropic format)",
        );
    };

    let model_body = json!({
        "max_tokens": max_tokens(&payload, state.proxy.default_max_tokens),
        "temperature": temperature(&payload),
        "messages": messages,
    });

    let model_id = state.model.model_id().to_string();
    match state.model.invoke_raw(model_body).await {
        Ok(raw) => {
            let text = raw
                .pointer("/content/0/text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            info!(%user_id, count, "proxy.invoke.complete");
            json_response(
                StatusCode::OK,
                json!({
                    "user_id": user_id,
                    "count_in_window": count,
                    "model_id": model_id,
                    "raw": raw,
                    "text": text,
                }),
            )
        }
        Err(e) => {
            error!(%user_id, error = %e, "proxy.invoke.failed");
            let (status, code) = match e {
                ScorchbookError::ModelAccessDenied(_) => (StatusCode::FORBIDDEN, "AccessDeniedException"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "ModelError"),
            };
            json_response(status, json!({ "message": "Model error", "error": { "code": code } }))
        }
    }
}

/// Caller identity for rate limiting: explicit header, then a verified
/// token's subject, then the peer address.
async fn resolve_user_id(state: &AppState, parts: &Parts) -> String {
    let header_id = parts
        .headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(id) = header_id {
        return id.to_string();
    }

    if let Ok(token) = bearer_token(authorization(&parts.headers)) {
        if let Ok(user) = state.auth.verify_token(token).await {
            return user.sub;
        }
    }

    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    "anonymous".to_string()
}

/// An empty body counts as `{}`.
async fn read_payload(body: axum::body::Body) -> Option<Value> {
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES).await.ok()?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Some(json!({}));
    }
    serde_json::from_slice(&bytes).ok()
}

/// `messages` as given, or a single user turn built from `prompt`.
fn request_messages(payload: &Value) -> Option<Value> {
    match payload.get("messages") {
        Some(messages) if !messages.is_null() => Some(messages.clone()),
        _ => {
            let prompt = payload.get("prompt")?.as_str()?;
            if prompt.trim().is_empty() {
                return None;
            }
            Some(json!([{ "role": "user", "content": prompt }]))
        }
    }
}

fn max_tokens(payload: &Value, default: u32) -> u64 {
    match payload.get("max_tokens") {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 1.0).map(|f| f.trunc() as u64))
            .unwrap_or(u64::from(default)),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(u64::from(default)),
        _ => u64::from(default),
    }
}

fn temperature(payload: &Value) -> f64 {
    match payload.get("temperature") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
