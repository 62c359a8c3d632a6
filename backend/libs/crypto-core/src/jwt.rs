/// Session token codec (HS256)
///
/// Signs and statelessly validates the bearer tokens handed out at sign-in.
/// Revocation is not decided here: callers pair a successful validation with
/// a lookup against their session store.
///
/// ## Security Design
///
/// - **HS256 ONLY**: any other `alg` header is rejected before signature checks
/// - **Typed claims**: tokens decode into [`SessionClaims`]; custom claims are a
///   closed set of scalar shapes, so structured values fail at the boundary
/// - **Registered names are reserved**: custom claims cannot shadow `sub`, `exp`, ...
/// - **One failure**: every verification problem surfaces as [`JwtError::Invalid`];
///   the precise reason is only logged
/// - **No globals**: keys live in a [`JwtCodec`] value built at startup
use crate::clock::SharedClock;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Minimum HS256 secret length in bytes
pub const MIN_SECRET_LEN: usize = 32;

/// JWT algorithm - session tokens are always HS256
const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

/// Claim names owned by the codec
pub const RESERVED_CLAIMS: [&str; 8] = ["iss", "sub", "aud", "exp", "iat", "nbf", "jti", "type"];

pub const ROLES_CLAIM: &str = "roles";

pub type Result<T> = std::result::Result<T, JwtError>;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Rejected before anything was signed
    #[error("validation error: {0}")]
    Validation(String),
    /// Any verification failure; detail is logged, never returned
    #[error("invalid token")]
    Invalid,
    #[error("failed to encode token: {0}")]
    Encoding(String),
}

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value shapes accepted for caller-supplied claims.
///
/// Objects and nested arrays have no variant, so a token carrying them fails
/// to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    TextList(Vec<String>),
}

impl ClaimValue {
    /// Convert an untyped JSON value, refusing anything structured.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        match value {
            Value::Bool(b) => Ok(ClaimValue::Bool(b)),
            Value::Number(n) => n
                .as_i64()
                .map(ClaimValue::Integer)
                .or_else(|| n.as_f64().map(ClaimValue::Float))
                .ok_or_else(|| JwtError::Validation(format!("unsupported number {n}"))),
            Value::String(s) => Ok(ClaimValue::Text(s)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(JwtError::Validation(format!(
                        "claim lists may only hold strings, found {other}"
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(ClaimValue::TextList),
            Value::Null | Value::Object(_) => Err(JwtError::Validation(
                "claims must be scalar values or string lists".to_string(),
            )),
        }
    }
}

impl From<&str> for ClaimValue {
    fn from(value: &str) -> Self {
        ClaimValue::Text(value.to_string())
    }
}

impl From<String> for ClaimValue {
    fn from(value: String) -> Self {
        ClaimValue::Text(value)
    }
}

impl From<bool> for ClaimValue {
    fn from(value: bool) -> Self {
        ClaimValue::Bool(value)
    }
}

impl From<i64> for ClaimValue {
    fn from(value: i64) -> Self {
        ClaimValue::Integer(value)
    }
}

impl From<f64> for ClaimValue {
    fn from(value: f64) -> Self {
        ClaimValue::Float(value)
    }
}

impl From<Vec<String>> for ClaimValue {
    fn from(value: Vec<String>) -> Self {
        ClaimValue::TextList(value)
    }
}

impl From<Vec<&str>> for ClaimValue {
    fn from(value: Vec<&str>) -> Self {
        ClaimValue::TextList(value.into_iter().map(str::to_string).collect())
    }
}

pub type CustomClaims = BTreeMap<String, ClaimValue>;

/// Decoded claims of a session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub iss: String,
    /// Subject (user ID)
    pub sub: String,
    pub aud: Vec<String>,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    /// Unique per token, so two tokens issued in the same second never share a digest
    pub jti: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    #[serde(flatten)]
    pub custom: CustomClaims,
}

impl SessionClaims {
    /// Roles carried in the `roles` claim (a single string or a list).
    pub fn roles(&self) -> Vec<&str> {
        match self.custom.get(ROLES_CLAIM) {
            Some(ClaimValue::Text(role)) => vec![role.as_str()],
            Some(ClaimValue::TextList(roles)) => roles.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn claim(&self, name: &str) -> Option<&ClaimValue> {
        self.custom.get(name)
    }
}

/// Refuse custom claims that would overwrite registered ones, and floats
/// JSON cannot carry (NaN and infinities serialize as `null`).
pub fn validate_custom_claims(claims: &CustomClaims) -> Result<()> {
    if let Some(name) = claims.keys().find(|k| RESERVED_CLAIMS.contains(&k.as_str())) {
        return Err(JwtError::Validation(format!(
            "custom claim '{name}' collides with a registered claim"
        )));
    }
    if let Some((name, _)) = claims
        .iter()
        .find(|(_, value)| matches!(value, ClaimValue::Float(f) if !f.is_finite()))
    {
        return Err(JwtError::Validation(format!(
            "custom claim '{name}' must be a finite number"
        )));
    }
    Ok(())
}

// ============================================================================
// Codec
// ============================================================================

/// HS256 signer/validator bound to one secret, issuer and audience set.
pub struct JwtCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: Vec<String>,
    clock: SharedClock,
}

impl fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtCodec")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl JwtCodec {
    /// ## Errors
    ///
    /// Returns [`JwtError::Validation`] if the secret is shorter than
    /// [`MIN_SECRET_LEN`] bytes.
    pub fn new(
        secret: &[u8],
        issuer: impl Into<String>,
        audience: Vec<String>,
        clock: SharedClock,
    ) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(JwtError::Validation(format!(
                "secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }

        let issuer = issuer.into();
        let mut validation = Validation::new(JWT_ALGORITHM);
        // Time claims are checked against the injected clock instead.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);
        if !issuer.is_empty() {
            validation.set_issuer(&[issuer.as_str()]);
        }
        if audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&audience);
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer,
            audience,
            clock,
        })
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn sign(&self, claims: &SessionClaims) -> Result<String> {
        encode(&Header::new(JWT_ALGORITHM), claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Sign a fresh token of `kind` for `subject`, valid over `[issued_at, expires_at)`.
    pub fn issue(
        &self,
        subject: &str,
        kind: TokenKind,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        custom: CustomClaims,
    ) -> Result<String> {
        if subject.trim().is_empty() {
            return Err(JwtError::Validation("subject is required".to_string()));
        }
        validate_custom_claims(&custom)?;

        let claims = SessionClaims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            aud: self.audience.clone(),
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
            nbf: issued_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            kind,
            custom,
        };
        self.sign(&claims)
    }

    /// Stateless checks only: algorithm, signature, `type`, and time/issuer/audience policy.
    pub fn validate(&self, token: &str, expected: TokenKind) -> Result<SessionClaims> {
        if token.is_empty() {
            debug!("missing token");
            return Err(JwtError::Invalid);
        }

        let header = decode_header(token).map_err(|e| {
            warn!(error = %e, "malformed token header");
            JwtError::Invalid
        })?;
        if header.alg != JWT_ALGORITHM {
            warn!(alg = ?header.alg, "unexpected signing algorithm");
            return Err(JwtError::Invalid);
        }

        let claims = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                warn!(error = %e, "token signature or claims rejected");
                JwtError::Invalid
            })?
            .claims;

        if claims.kind != expected {
            warn!(expected = %expected, actual = %claims.kind, "wrong token type");
            return Err(JwtError::Invalid);
        }

        let now = self.clock.now().timestamp();
        if now >= claims.exp {
            debug!(sub = %claims.sub, exp = claims.exp, "token expired");
            return Err(JwtError::Invalid);
        }
        if claims.nbf > now {
            warn!(sub = %claims.sub, nbf = claims.nbf, "token not valid yet");
            return Err(JwtError::Invalid);
        }
        if claims.iat > now {
            warn!(sub = %claims.sub, iat = claims.iat, "token issued in the future");
            return Err(JwtError::Invalid);
        }
        if claims.sub.trim().is_empty() {
            warn!("token without subject");
            return Err(JwtError::Invalid);
        }

        Ok(claims)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use chrono::Duration;
    use std::sync::Arc;

    const TEST_SECRET: &[u8] = b"test-secret-that-is-at-least-32-bytes!!";

    fn codec(clock: Arc<ManualClock>) -> JwtCodec {
        JwtCodec::new(
            TEST_SECRET,
            "konabra",
            vec!["konabra".to_string()],
            clock,
        )
        .unwrap()
    }

    #[test]
    fn test_short_secret_rejected() {
        let clock = Arc::new(ManualClock::starting_now());
        let result = JwtCodec::new(b"short", "konabra", vec![], clock);
        assert!(matches!(result, Err(JwtError::Validation(_))));
    }

    #[test]
    fn test_issue_and_validate() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec(clock.clone());
        let now = clock.now();

        let mut custom = CustomClaims::new();
        custom.insert("roles".to_string(), vec!["reporter"].into());
        let token = codec
            .issue("user-1", TokenKind::Access, now, now + Duration::minutes(15), custom)
            .unwrap();
        assert_eq!(token.matches('.').count(), 2);

        let claims = codec.validate(&token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.iss, "konabra");
        assert_eq!(claims.aud, vec!["konabra".to_string()]);
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.roles(), vec!["reporter"]);
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec(clock.clone());
        let now = clock.now();
        let token = codec
            .issue("user-1", TokenKind::Refresh, now, now + Duration::days(30), CustomClaims::new())
            .unwrap();

        assert!(matches!(
            codec.validate(&token, TokenKind::Access),
            Err(JwtError::Invalid)
        ));
    }

    #[test]
    fn test_expiry_follows_clock() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec(clock.clone());
        let now = clock.now();
        let token = codec
            .issue("user-1", TokenKind::Access, now, now + Duration::minutes(15), CustomClaims::new())
            .unwrap();

        clock.advance(Duration::minutes(14));
        assert!(codec.validate(&token, TokenKind::Access).is_ok());

        clock.advance(Duration::minutes(2));
        assert!(matches!(
            codec.validate(&token, TokenKind::Access),
            Err(JwtError::Invalid)
        ));
    }

    #[test]
    fn test_reserved_claims_rejected() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec(clock.clone());
        let now = clock.now();

        for name in RESERVED_CLAIMS {
            let mut custom = CustomClaims::new();
            custom.insert(name.to_string(), "spoofed".into());
            let result = codec.issue("user-1", TokenKind::Access, now, now + Duration::minutes(1), custom);
            assert!(matches!(result, Err(JwtError::Validation(_))), "{name}");
        }
    }

    #[test]
    fn test_non_finite_float_claims_rejected() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec(clock.clone());
        let now = clock.now();

        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut custom = CustomClaims::new();
            custom.insert("score".to_string(), ClaimValue::Float(value));
            let result = codec.issue("user-1", TokenKind::Access, now, now + Duration::minutes(1), custom);
            assert!(matches!(result, Err(JwtError::Validation(_))), "{value}");
        }

        let mut finite = CustomClaims::new();
        finite.insert("score".to_string(), ClaimValue::Float(0.75));
        let token = codec
            .issue("user-1", TokenKind::Access, now, now + Duration::minutes(1), finite)
            .unwrap();
        let claims = codec.validate(&token, TokenKind::Access).unwrap();
        assert_eq!(claims.claim("score"), Some(&ClaimValue::Float(0.75)));
    }

    #[test]
    fn test_empty_subject_rejected() {
        let clock = Arc::new(ManualClock::starting_now());
        let codec = codec(clock.clone());
        let now = clock.now();
        let result = codec.issue("  ", TokenKind::Access, now, now + Duration::minutes(1), CustomClaims::new());
        assert!(matches!(result, Err(JwtError::Validation(_))));
    }

    #[test]
    fn test_claim_value_from_json() {
        use serde_json::json;

        assert_eq!(ClaimValue::from_json(json!(true)).unwrap(), ClaimValue::Bool(true));
        assert_eq!(ClaimValue::from_json(json!(42)).unwrap(), ClaimValue::Integer(42));
        assert_eq!(ClaimValue::from_json(json!(1.5)).unwrap(), ClaimValue::Float(1.5));
        assert_eq!(
            ClaimValue::from_json(json!(["a", "b"])).unwrap(),
            ClaimValue::TextList(vec!["a".to_string(), "b".to_string()])
        );
        assert!(ClaimValue::from_json(json!({"nested": 1})).is_err());
        assert!(ClaimValue::from_json(json!([["nested"]])).is_err());
        assert!(ClaimValue::from_json(json!(null)).is_err());
    }
}
