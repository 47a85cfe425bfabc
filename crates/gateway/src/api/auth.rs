//! API authentication middleware.
//!
//! Reads the env var named by `config.server.api_token_env` (default `SA_API_TOKEN`)
//! **once at startup** and caches the SHA-256 digest in `AppState`.
//! - If the env var is set and non-empty, every protected request must carry
//!   `Authorization: Bearer <token>`.
//! - If the env var is unset or empty, the server logs a warning once and
//!   allows unauthenticated access (dev mode).

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Axum middleware that enforces bearer-token authentication on protected
/// routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // `api_token_hash` is `None` in dev mode (no token configured).
    let expected_hash = match &state.api_token_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v: &axum::http::HeaderValue| v.to_str().ok())
        .and_then(|v: &str| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Hash the provided token to a fixed-length digest, then compare
    // in constant time. This avoids leaking the token length.
    let provided_hash = Sha256::digest(provided.as_bytes());

    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid or missing API token" })),
        )
            .into_response();
    }

    next.run(req).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// `osa` surface auth — optional HMAC-SHA256 bearer JWT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Claims carried by an `osa` API bearer JWT. `exp`/`iat` are validated by
/// `jsonwebtoken`; `workspace_id` is optional and defaulted to `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsaClaims {
    pub user_id: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

/// Identity resolved by [`require_osa_auth`] and inserted into request
/// extensions for handlers to read via `Extension<OsaIdentity>`.
#[derive(Debug, Clone)]
pub struct OsaIdentity {
    pub user_id: Option<String>,
    pub workspace_id: Option<String>,
}

fn osa_error(status: axum::http::StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        axum::Json(serde_json::json!({ "error": message, "code": code })),
    )
        .into_response()
}

/// Axum middleware for the `osa` REST surface (`/api/v1/*`). Generalizes
/// [`require_api_token`]'s bearer check to also accept an HMAC-SHA256 JWT
/// (required claims `user_id`, `iat`, `exp`; optional `workspace_id`) when
/// `server.jwt_secret`/`server.jwt_secret_env` is configured. Falls back to
/// the plain static-token comparison otherwise, matching the rest of the
/// gateway's auth behavior (dev mode when nothing is configured).
pub async fn require_osa_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let header = req
        .headers()
        .get("authorization")
        .and_then(|v: &axum::http::HeaderValue| v.to_str().ok())
        .and_then(|v: &str| v.strip_prefix("Bearer "));

    let Some(token) = header else {
        if state.jwt_secret.is_none() && state.api_token_hash.is_none() {
            // Dev mode: no auth configured at all.
            return next.run(req).await;
        }
        return osa_error(
            axum::http::StatusCode::UNAUTHORIZED,
            "MISSING_TOKEN",
            "missing bearer token",
        );
    };

    if let Some(secret) = &state.jwt_secret {
        let decoded = decode::<OsaClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(jsonwebtoken::Algorithm::HS256),
        );
        return match decoded {
            Ok(data) => {
                req.extensions_mut().insert(OsaIdentity {
                    user_id: Some(data.claims.user_id),
                    workspace_id: data.claims.workspace_id,
                });
                next.run(req).await
            }
            Err(_) => osa_error(
                axum::http::StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                "invalid or expired JWT",
            ),
        };
    }

    // No JWT secret configured: fall back to the static-token comparison.
    match &state.api_token_hash {
        Some(expected_hash) => {
            let provided_hash = Sha256::digest(token.as_bytes());
            if bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
                req.extensions_mut().insert(OsaIdentity {
                    user_id: None,
                    workspace_id: None,
                });
                next.run(req).await
            } else {
                osa_error(
                    axum::http::StatusCode::UNAUTHORIZED,
                    "INVALID_TOKEN",
                    "invalid bearer token",
                )
            }
        }
        None => next.run(req).await,
    }
}
