//! Response helpers, error mapping, and the CORS middleware for the
//! tastings routes.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use scorchbook_shared::ScorchbookError;
use serde_json::{Value, json};
use tracing::error;

use crate::AppState;

const ALLOWED_HEADERS: &str = "authorization,content-type";
const ALLOWED_METHODS: &str = "GET,POST,DELETE,OPTIONS";

/// A JSON response with the given status.
pub fn json_response(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

/// `{ "message": .. }` with the given status.
pub fn message_response(status: StatusCode, message: &str) -> Response {
    json_response(status, json!({ "message": message }))
}

/// Error returned by the tastings handlers.
#[derive(Debug)]
pub struct ApiError(pub ScorchbookError);

impl From<ScorchbookError> for ApiError {
    fn from(e: ScorchbookError) -> Self {
        Self(e)
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ScorchbookError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ScorchbookError::Forbidden(_) => StatusCode::FORBIDDEN,
            ScorchbookError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => {
                error!(error = %self.0, "handler.error");
                StatusCode::BAD_REQUEST
            }
        };
        message_response(status, &self.0.public_message())
    }
}

/// Value for `Access-Control-Allow-Origin`: `*` when the allow-list has
/// it, else the request origin when listed, else the first entry.
pub fn resolve_allowed_origin(allowed: &[String], origin: Option<&str>) -> String {
    if allowed.iter().any(|o| o == "*") {
        return "*".to_string();
    }
    if let Some(origin) = origin {
        if allowed.iter().any(|o| o == origin) {
            return origin.to_string();
        }
    }
    allowed.first().cloned().unwrap_or_else(|| "*".to_string())
}

/// Answer preflights with 204 and stamp CORS headers on every response.
pub async fn cors(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let allow_origin = resolve_allowed_origin(&state.allowed_origins, origin.as_deref());
    set_cors_headers(response.headers_mut(), &allow_origin, ALLOWED_HEADERS, ALLOWED_METHODS);
    response
}

pub(crate) fn set_cors_headers(headers: &mut HeaderMap, origin: &str, allow_headers: &'static str, methods: &'static str) {
    if let Ok(origin) = HeaderValue::from_str(origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(allow_headers));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(methods));
}

pub async fn not_found() -> Response {
    message_response(StatusCode::NOT_FOUND, "Not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn origin_resolution() {
        let any = list(&["https://a.example", "*"]);
        assert_eq!(resolve_allowed_origin(&any, Some("https://b.example")), "*");

        let fixed = list(&["https://a.example", "https://b.example"]);
        assert_eq!(resolve_allowed_origin(&fixed, Some("https://b.example")), "https://b.example");
        assert_eq!(resolve_allowed_origin(&fixed, Some("https://evil.example")), "https://a.example");
        assert_eq!(resolve_allowed_origin(&fixed, None), "https://a.example");

        assert_eq!(resolve_allowed_origin(&[], None), "*");
    }

    #[test]
    fn errors_map_to_statuses() {
        let cases = [
            (ScorchbookError::Unauthorized("Invalid token".into()), StatusCode::UNAUTHORIZED),
            (ScorchbookError::Forbidden("Forbidden".into()), StatusCode::FORBIDDEN),
            (ScorchbookError::NotFound("Tasting not found".into()), StatusCode::NOT_FOUND),
            (ScorchbookError::validation("name must be at least 1 characters"), StatusCode::BAD_REQUEST),
            (ScorchbookError::Storage("locked".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }
}
