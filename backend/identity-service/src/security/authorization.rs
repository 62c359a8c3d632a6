/// Bearer authentication and role checks for protected operations
use super::session_tokens::SessionTokenManager;
use crate::error::{IdentityError, Result};
use crypto_core::jwt::SessionClaims;
use tracing::{debug, warn};

const BEARER_PREFIX: &str = "Bearer ";

/// Token part of an `Authorization: Bearer <token>` header value
pub fn extract_bearer_token(header: Option<&str>) -> Result<&str> {
    let header = header.ok_or_else(|| {
        debug!("missing authorization header");
        IdentityError::Unauthorized
    })?;

    let token = header
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .filter(|t| !t.is_empty() && !t.contains(char::is_whitespace))
        .ok_or_else(|| {
            debug!("malformed authorization header");
            IdentityError::Unauthorized
        })?;

    Ok(token)
}

/// True when the claims hold any of `required`; an empty list admits everyone.
pub fn has_any_role(claims: &SessionClaims, required: &[&str]) -> bool {
    if required.is_empty() {
        return true;
    }
    let held = claims.roles();
    required.iter().any(|role| held.contains(role))
}

/// Authenticate the header's access token and check its roles.
///
/// Missing or invalid credentials give [`IdentityError::Unauthorized`];
/// a valid token without a required role gives [`IdentityError::Forbidden`].
/// Store failures are propagated unchanged.
pub async fn authorize(
    manager: &SessionTokenManager,
    header: Option<&str>,
    required_roles: &[&str],
) -> Result<SessionClaims> {
    let token = extract_bearer_token(header)?;

    let claims = manager
        .verify_access_token(token)
        .await
        .map_err(|e| match e {
            IdentityError::InvalidToken | IdentityError::TokenExpired => IdentityError::Unauthorized,
            other => other,
        })?;

    if !has_any_role(&claims, required_roles) {
        warn!(subject = %claims.sub, required = ?required_roles, "missing required role");
        return Err(IdentityError::Forbidden);
    }

    Ok(claims)
}
