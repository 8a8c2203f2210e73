// Bearer-token authentication for the protected routes

use crate::AppState;
use crate::error::ApiError;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use fetchgate_core::ratelimit::ANONYMOUS_CLIENT;
use subtle::ConstantTimeEq;

/// Identity of the caller, used as the rate-limit key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(pub String);

fn bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

pub fn key_matches(keys: &[String], token: &str) -> bool {
    // Check every key so timing does not reveal which one matched
    keys.iter().fold(false, |found, key| {
        let equal: bool = key.as_bytes().ct_eq(token.as_bytes()).into();
        found | equal
    })
}

/// Rate-limit identity for a request. With no keys configured every caller
/// is `anonymous`, whatever token it sends.
pub fn resolve_client(keys: &[String], token: Option<&str>) -> Result<ClientId, ApiError> {
    if keys.is_empty() {
        return Ok(ClientId(ANONYMOUS_CLIENT.to_string()));
    }
    match token {
        Some(token) if key_matches(keys, token) => Ok(ClientId(token.to_string())),
        Some(_) => Err(ApiError::Unauthorized("Invalid API key".to_string())),
        None => Err(ApiError::Unauthorized("Missing bearer token".to_string())),
    }
}

pub async fn require_api_key(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let keys = state.proxy.api_keys().await;
    let client = resolve_client(&keys, bearer_token(&req))?;

    req.extensions_mut().insert(client);
    Ok(next.run(req).await)
}
