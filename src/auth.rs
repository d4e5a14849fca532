use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct TenantClaims {
    pub sub: String,
    #[allow(dead_code)]
    pub exp: usize,
}

/// Resolve the authenticated tenant user from the request headers.
///
/// Accepts `Authorization: Bearer <jwt>` (HS256, `sub` = tenant user id).
/// Outside production, an `x-tenant-id` header may stand in for a token when
/// dev overrides are enabled.
pub async fn require_tenant_id(state: &AppState, headers: &HeaderMap) -> AppResult<String> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(tenant_id) = headers
            .get("x-tenant-id")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return Ok(tenant_id.to_string());
        }
    }

    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token.".to_string()))?;

    if let Some(tenant_id) = state.auth_cache.get(&token).await {
        return Ok(tenant_id);
    }

    let tenant_id = decode_tenant_token(state, &token)?;
    state.auth_cache.insert(token, tenant_id.clone()).await;
    Ok(tenant_id)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn decode_tenant_token(state: &AppState, token: &str) -> AppResult<String> {
    let secret = state.config.jwt_secret.as_deref().ok_or_else(|| {
        AppError::Dependency("JWT_SECRET is not configured; cannot authenticate.".to_string())
    })?;

    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<TenantClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|error| {
        tracing::debug!(error = %error, "Bearer token rejected");
        AppError::Unauthorized("Invalid or expired token.".to_string())
    })?;

    let tenant_id = data.claims.sub.trim().to_string();
    if tenant_id.is_empty() {
        return Err(AppError::Unauthorized(
            "Token has no subject claim.".to_string(),
        ));
    }
    Ok(tenant_id)
}
