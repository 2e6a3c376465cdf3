//! Bearer token authentication.
//!
//! Requests carry an id token from the Cognito user pool. Signatures are
//! checked against the pool's JWKS document, fetched once and refreshed when
//! a token names a key id the cached set does not contain.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use regex::Regex;
use scorchbook_shared::{AuthConfig, Result, ScorchbookError, UserContext};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const INVALID_TOKEN: &str = "Invalid token";

/// Verifies a bearer token and returns the caller.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<UserContext>;
}

/// Pull the token out of an `Authorization` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str> {
    static BEARER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^Bearer\s+").expect("valid regex"));

    let header = header
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ScorchbookError::Unauthorized("Missing Authorization header".into()))?;
    let token = match BEARER_RE.find(header) {
        Some(prefix) => &header[prefix.end()..],
        None => header,
    };
    let token = token.trim();
    if token.is_empty() {
        return Err(ScorchbookError::Unauthorized("Missing Bearer token".into()));
    }
    Ok(token)
}

/// Resolve the caller for a request's `Authorization` header.
pub async fn verify_auth(auth: &dyn Authenticator, header: Option<&str>) -> Result<UserContext> {
    let token = bearer_token(header)?;
    auth.verify_token(token).await
}

// ---------------------------------------------------------------------------
// Cognito
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    token_use: Option<String>,
}

/// RS256 id token verifier for a Cognito user pool.
pub struct CognitoVerifier {
    config: AuthConfig,
    http: reqwest::Client,
    keys: RwLock<HashMap<String, DecodingKey>>,
}

impl CognitoVerifier {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ScorchbookError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            http,
            keys: RwLock::new(HashMap::new()),
        })
    }

    async fn refresh_keys(&self, jwks_url: &str) -> Result<()> {
        debug!(url = jwks_url, "fetching JWKS");
        let set: JwkSet = self
            .http
            .get(jwks_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ScorchbookError::Network(format!("{jwks_url}: {e}")))?
            .json()
            .await
            .map_err(|e| ScorchbookError::parse(format!("invalid JWKS document: {e}")))?;

        let mut keys = HashMap::new();
        for jwk in &set.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                continue;
            };
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(e) => debug!(%kid, error = %e, "skipping unusable JWK"),
            }
        }
        *self.keys.write().await = keys;
        Ok(())
    }

    async fn key_for(&self, kid: &str, jwks_url: &str) -> Result<DecodingKey> {
        if let Some(key) = self.keys.read().await.get(kid) {
            return Ok(key.clone());
        }
        self.refresh_keys(jwks_url).await?;
        self.keys
            .read()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(|| ScorchbookError::Unauthorized(format!("unknown signing key {kid}")))
    }

    async fn verify(&self, token: &str) -> Result<UserContext> {
        let issuer = self.config.resolved_issuer()?;
        let jwks_url = self.config.resolved_jwks_url()?;
        if self.config.client_id.trim().is_empty() {
            return Err(ScorchbookError::config("Missing Cognito configuration"));
        }

        let header = decode_header(token).map_err(|e| ScorchbookError::Unauthorized(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| ScorchbookError::Unauthorized("token has no key id".into()))?;
        let key = self.key_for(&kid, &jwks_url).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&issuer]);
        validation.set_audience(&[self.config.client_id.trim()]);
        let claims = decode::<IdTokenClaims>(token, &key, &validation)
            .map_err(|e| ScorchbookError::Unauthorized(e.to_string()))?
            .claims;

        if claims.token_use.as_deref() != Some("id") {
            return Err(ScorchbookError::Unauthorized("token is not an id token".into()));
        }
        Ok(UserContext {
            sub: claims.sub,
            email: claims.email,
        })
    }
}

#[async_trait]
impl Authenticator for CognitoVerifier {
    async fn verify_token(&self, token: &str) -> Result<UserContext> {
        self.verify(token).await.map_err(|e| {
            warn!(error = %e, "auth.verify.failed");
            ScorchbookError::Unauthorized(INVALID_TOKEN.into())
        })
    }
}

// ---------------------------------------------------------------------------
// Static tokens
// ---------------------------------------------------------------------------

/// Fixed token table, for local development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthenticator {
    users: HashMap<String, UserContext>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: impl Into<String>, sub: impl Into<String>) -> Self {
        self.users.insert(
            token.into(),
            UserContext {
                sub: sub.into(),
                email: None,
            },
        );
        self
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn verify_token(&self, token: &str) -> Result<UserContext> {
        self.users.get(token).cloned().ok_or_else(|| {
            warn!("auth.verify.failed");
            ScorchbookError::Unauthorized(INVALID_TOKEN.into())
        })
    }
}
