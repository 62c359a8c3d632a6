/// Session token lifecycle
///
/// Issues access/refresh pairs, verifies them against both the signature and
/// the persisted session record, and revokes records on sign-out or rotation.
///
/// ## Security
///
/// - Only SHA-256 digests of issued tokens are persisted
/// - A token is accepted only while its session record exists and is unexpired
/// - Store failures during verification are returned as errors, never as a pass
use crate::db::{SessionFilter, SessionStore, TokenHashMatch};
use crate::error::{IdentityError, Result};
use crate::models::{JwtTokenModel, SessionRecord};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use crypto_core::clock::system_clock;
use crypto_core::hash_token;
use crypto_core::jwt::{CustomClaims, JwtCodec, SessionClaims, TokenKind};
use crypto_core::SharedClock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const TOKEN_TYPE_BEARER: &str = "Bearer";
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60; // 15 minutes
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60; // 30 days

/// Signing secret, claims policy and lifetimes for session tokens
#[derive(Clone)]
pub struct SessionTokenPolicy {
    pub secret: Vec<u8>,
    pub issuer: String,
    pub audience: Vec<String>,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
}

impl SessionTokenPolicy {
    pub fn new(secret: impl Into<Vec<u8>>, issuer: impl Into<String>, audience: Vec<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: issuer.into(),
            audience,
            access_token_ttl: Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECS),
            refresh_token_ttl: Duration::seconds(DEFAULT_REFRESH_TOKEN_TTL_SECS),
        }
    }

    pub fn with_ttls(mut self, access: Duration, refresh: Duration) -> Self {
        self.access_token_ttl = access;
        self.refresh_token_ttl = refresh;
        self
    }
}

impl fmt::Debug for SessionTokenPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokenPolicy")
            .field("secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .finish()
    }
}

pub struct SessionTokenManager {
    codec: JwtCodec,
    store: Arc<dyn SessionStore>,
    clock: SharedClock,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
}

impl fmt::Debug for SessionTokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokenManager")
            .field("codec", &self.codec)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .finish_non_exhaustive()
    }
}

impl SessionTokenManager {
    pub fn new(policy: &SessionTokenPolicy, store: Arc<dyn SessionStore>) -> Result<Self> {
        Self::with_clock(policy, store, system_clock())
    }

    /// ## Errors
    ///
    /// [`IdentityError::Validation`] when the secret is shorter than 32 bytes
    /// or either lifetime is not positive.
    pub fn with_clock(
        policy: &SessionTokenPolicy,
        store: Arc<dyn SessionStore>,
        clock: SharedClock,
    ) -> Result<Self> {
        if policy.access_token_ttl <= Duration::zero() || policy.refresh_token_ttl <= Duration::zero() {
            return Err(IdentityError::Validation(
                "token lifetimes must be positive".to_string(),
            ));
        }

        let codec = JwtCodec::new(
            &policy.secret,
            policy.issuer.clone(),
            policy.audience.clone(),
            clock.clone(),
        )?;

        Ok(Self {
            codec,
            store,
            clock,
            access_token_ttl: policy.access_token_ttl,
            refresh_token_ttl: policy.refresh_token_ttl,
        })
    }

    /// Issue an access/refresh pair and persist its session record.
    ///
    /// `claims` are embedded in the access token only. Nothing is returned
    /// unless the record was stored.
    pub async fn create_token(&self, subject: &str, claims: CustomClaims) -> Result<JwtTokenModel> {
        if subject.trim().is_empty() {
            return Err(IdentityError::Validation("subject is required".to_string()));
        }

        // Tokens carry whole seconds; keep the record aligned with them.
        let now = self.clock.now().trunc_subsecs(0);
        let access_token_expires_at = expiry_after(now, self.access_token_ttl)?;
        let refresh_token_expires_at = expiry_after(now, self.refresh_token_ttl)?;

        let access_token = self.codec.issue(
            subject,
            TokenKind::Access,
            now,
            access_token_expires_at,
            claims,
        )?;
        let refresh_token = self.codec.issue(
            subject,
            TokenKind::Refresh,
            now,
            refresh_token_expires_at,
            CustomClaims::new(),
        )?;

        let record = SessionRecord {
            id: Uuid::new_v4(),
            subject: subject.to_string(),
            token_type: TOKEN_TYPE_BEARER.to_string(),
            issued_at: now,
            access_token_hash: hash_token(&access_token),
            access_token_expires_at,
            refresh_token_hash: hash_token(&refresh_token),
            refresh_token_expires_at,
        };

        self.store.create(&record).await.map_err(|e| {
            warn!(subject = %subject, error = %e, "failed to persist session record");
            e
        })?;

        info!(subject = %subject, session_id = %record.id, "issued session token pair");

        Ok(JwtTokenModel {
            token_type: TOKEN_TYPE_BEARER.to_string(),
            access_token,
            access_token_expires_at,
            refresh_token,
            refresh_token_expires_at,
        })
    }

    pub async fn verify_access_token(&self, token: &str) -> Result<SessionClaims> {
        self.verify(token, TokenKind::Access).await
    }

    pub async fn verify_refresh_token(&self, token: &str) -> Result<SessionClaims> {
        self.verify(token, TokenKind::Refresh).await
    }

    async fn verify(&self, token: &str, kind: TokenKind) -> Result<SessionClaims> {
        let claims = self.codec.validate(token, kind)?;

        let token_hash = hash_token(token);
        let hash_match = match kind {
            TokenKind::Access => TokenHashMatch::Access(token_hash),
            TokenKind::Refresh => TokenHashMatch::Refresh(token_hash),
        };
        let filter = SessionFilter::for_subject(claims.sub.clone()).with_token_hash(hash_match);

        let record = self.store.find_one(&filter).await.map_err(|e| {
            warn!(subject = %claims.sub, error = %e, "session lookup failed during verification");
            e
        })?;

        let Some(record) = record else {
            warn!(subject = %claims.sub, kind = %kind, "no session record for token (revoked or unknown)");
            return Err(IdentityError::InvalidToken);
        };

        let expires_at = match kind {
            TokenKind::Access => record.access_token_expires_at,
            TokenKind::Refresh => record.refresh_token_expires_at,
        };
        if self.clock.now() >= expires_at {
            debug!(subject = %claims.sub, kind = %kind, "session record expired");
            return Err(IdentityError::InvalidToken);
        }

        Ok(claims)
    }

    /// Delete the session holding `token`, then sweep the subject's expired sessions.
    ///
    /// Returns the number of sessions matching `token`. A failed sweep is
    /// logged and does not fail the call.
    pub async fn revoke_token(&self, subject: &str, token: &str) -> Result<u64> {
        let filter = SessionFilter::for_subject(subject)
            .with_token_hash(TokenHashMatch::Any(hash_token(token)));
        let revoked = self.store.delete_where(&filter).await?;

        if let Err(e) = self.revoke_expired_tokens(subject).await {
            warn!(subject = %subject, error = %e, "expired session sweep failed");
        }

        info!(subject = %subject, revoked, "revoked session token");
        Ok(revoked)
    }

    /// Delete every session of `subject` (sign out everywhere).
    pub async fn revoke_all_tokens(&self, subject: &str) -> Result<u64> {
        let revoked = self
            .store
            .delete_where(&SessionFilter::for_subject(subject))
            .await?;
        info!(subject = %subject, revoked, "revoked all sessions");
        Ok(revoked)
    }

    /// Delete sessions whose access and refresh tokens have both expired.
    pub async fn revoke_expired_tokens(&self, subject: &str) -> Result<u64> {
        let now = self.clock.now();
        let filter = SessionFilter::for_subject(subject).expired_as_of(now);
        let purged = self.store.delete_where(&filter).await?;
        if purged > 0 {
            debug!(subject = %subject, purged, "purged expired sessions");
        }
        Ok(purged)
    }

    /// Exchange a valid refresh token for a new pair; the old session is revoked.
    pub async fn rotate(&self, refresh_token: &str, claims: CustomClaims) -> Result<JwtTokenModel> {
        let current = self.verify_refresh_token(refresh_token).await?;

        // Only the caller that actually deleted the session may mint its successor.
        if self.revoke_token(&current.sub, refresh_token).await? == 0 {
            warn!(subject = %current.sub, "refresh token already consumed by a concurrent rotation");
            return Err(IdentityError::InvalidToken);
        }
        self.create_token(&current.sub, claims).await
    }

    /// `global` revokes every session of the subject, otherwise only the one
    /// holding `refresh_token`.
    pub async fn sign_out(&self, subject: &str, refresh_token: &str, global: bool) -> Result<u64> {
        if global {
            self.revoke_all_tokens(subject).await
        } else {
            self.revoke_token(subject, refresh_token).await
        }
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }
}

fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(ttl).ok_or_else(|| {
        IdentityError::Validation("token lifetime exceeds the representable time range".to_string())
    })
}
