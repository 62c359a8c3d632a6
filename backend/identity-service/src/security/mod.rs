/// Security module for authentication and authorization
///
/// - **session_tokens**: issue, verify, rotate and revoke session token pairs
/// - **authorization**: bearer extraction and role checks
///
/// Token signing lives in `crypto_core::jwt`; envelope tokens and short codes
/// in `crypto_core::protector`.
pub use crypto_core::jwt;
pub use crypto_core::jwt::{ClaimValue, CustomClaims, SessionClaims, TokenKind};

pub mod authorization;
pub mod session_tokens;

pub use authorization::{authorize, extract_bearer_token, has_any_role};
pub use session_tokens::{SessionTokenManager, SessionTokenPolicy, TOKEN_TYPE_BEARER};
