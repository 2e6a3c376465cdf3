//! HTTP API for Scorchbook.
//!
//! Two surfaces share one router:
//! - `/tastings`: list, create (with media upload), delete, and rerun
//!   processing, behind bearer-token auth for writes
//! - `/llm`: a rate-limited model proxy
//!
//! Processing never runs on the request path; handlers hand a
//! [`ProcessJob`](scorchbook_core::ProcessJob) to the [`JobQueue`].

pub mod auth;
pub mod http;
pub mod proxy;
pub mod tastings;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, header};
use axum::middleware;
use axum::routing::{delete, get, post};
use scorchbook_ai::LanguageModel;
use scorchbook_core::JobQueue;
use scorchbook_shared::{ProxyConfig, Result, ScorchbookError};
use scorchbook_storage::{MediaStore, Storage};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use auth::{Authenticator, CognitoVerifier, StaticAuthenticator, bearer_token, verify_auth};

/// Request bodies carry base64 media; three 10 MB fields plus JSON overhead.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Everything the handlers share.
pub struct AppState {
    pub storage: Arc<Storage>,
    pub media: MediaStore,
    pub queue: JobQueue,
    pub auth: Arc<dyn Authenticator>,
    /// Model behind `/llm`.
    pub model: Arc<dyn LanguageModel>,
    pub allowed_origins: Vec<String>,
    pub proxy: ProxyConfig,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let tastings = Router::new()
        .route("/tastings", get(tastings::list_tastings).post(tastings::create_tasting))
        .route("/tastings/{id}", delete(tastings::delete_tasting))
        .route("/tastings/{id}/rerun", post(tastings::rerun_tasting))
        .method_not_allowed_fallback(http::not_found)
        .fallback(http::not_found)
        .layer(middleware::from_fn_with_state(state.clone(), http::cors));

    let llm = Router::new()
        .route("/llm", post(proxy::invoke).options(proxy::preflight))
        .method_not_allowed_fallback(http::not_found)
        .layer(middleware::from_fn(proxy::cors));

    tastings
        .merge(llm)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}

/// Serve until Ctrl-C.
pub async fn serve(state: Arc<AppState>, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| ScorchbookError::Network(format!("failed to bind {bind}: {e}")))?;
    info!(%bind, "Scorchbook API listening");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .map_err(|e| ScorchbookError::Network(format!("server error: {e}")))
}
