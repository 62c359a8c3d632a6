use crypto_core::jwt::JwtError;
use crypto_core::ProtectorError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IdentityError>;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IdentityError {
    /// Message safe to return to a remote caller.
    ///
    /// Every cryptographic failure shares one message so the response never
    /// says which check failed.
    pub fn public_message(&self) -> &'static str {
        match self {
            IdentityError::Validation(_) => "The request is invalid.",
            IdentityError::InvalidToken => "The token or code is invalid.",
            IdentityError::TokenExpired => "The token or code has expired.",
            IdentityError::Unauthorized => "You are not authorized to perform this action.",
            IdentityError::Forbidden => "You don't have the necessary permissions.",
            IdentityError::Database(_) | IdentityError::Internal(_) => {
                // Don't leak internal details
                "Internal server error"
            }
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, IdentityError::TokenExpired)
    }
}

// Conversions from external error types
impl From<sqlx::Error> for IdentityError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);
        IdentityError::Database(err.to_string())
    }
}

impl From<JwtError> for IdentityError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Validation(msg) => IdentityError::Validation(msg),
            JwtError::Invalid => IdentityError::InvalidToken,
            JwtError::Encoding(msg) => {
                tracing::error!("JWT encoding error: {}", msg);
                IdentityError::Internal(msg)
            }
        }
    }
}

impl From<ProtectorError> for IdentityError {
    fn from(err: ProtectorError) -> Self {
        if err.is_expired() {
            return IdentityError::TokenExpired;
        }
        if err.is_validation() {
            return IdentityError::Validation(err.to_string());
        }
        match err {
            ProtectorError::KeyDerivation | ProtectorError::Encryption(_) => {
                tracing::error!("Protector error: {}", err);
                IdentityError::Internal(err.to_string())
            }
            other => {
                tracing::warn!(error = %other, "verification envelope rejected");
                IdentityError::InvalidToken
            }
        }
    }
}
