/// Explicitly constructed service context
///
/// Owns the components every handler needs. Built once at startup and
/// passed by reference; there is no global state.
use crate::cache::{challenge_key, EphemeralStore};
use crate::config::Settings;
use crate::db::{PgSessionStore, SessionStore};
use crate::error::{IdentityError, Result};
use crate::security::SessionTokenManager;
use chrono::Duration;
use crypto_core::clock::system_clock;
use crypto_core::protector::Metadata;
use crypto_core::{CodeKind, Protector, SharedClock, ShortCodeInfo};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};

/// How long a challenge outlives its code, so late submissions are reported
/// as expired rather than unknown.
pub const CHALLENGE_EXPIRY_GRACE: std::time::Duration = std::time::Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct IdentityContext {
    pub settings: Arc<Settings>,
    pub sessions: Arc<SessionTokenManager>,
    pub protector: Arc<Protector>,
    /// Pending verification envelopes keyed by [`challenge_key`]
    pub challenges: Arc<EphemeralStore>,
}

impl IdentityContext {
    pub fn new(settings: Settings, store: Arc<dyn SessionStore>) -> Result<Self> {
        Self::with_clock(settings, store, system_clock())
    }

    pub fn with_clock(
        settings: Settings,
        store: Arc<dyn SessionStore>,
        clock: SharedClock,
    ) -> Result<Self> {
        let sessions =
            SessionTokenManager::with_clock(&settings.jwt.policy(), store, clock.clone())?;
        let protector = Protector::with_clock(&settings.protector.master_key, clock)?;
        let challenges = EphemeralStore::with_sweep_interval(settings.ephemeral.sweep_interval());

        Ok(Self {
            settings: Arc::new(settings),
            sessions: Arc::new(sessions),
            protector: Arc::new(protector),
            challenges: Arc::new(challenges),
        })
    }

    /// Connect to Postgres, apply migrations and build the context.
    pub async fn connect(settings: Settings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.database.max_connections)
            .connect(&settings.database.url)
            .await?;

        let store = PgSessionStore::new(pool);
        store.migrate().await?;
        info!("Session store ready");

        Self::new(settings, Arc::new(store))
    }

    /// Mint a short code for `subject` and remember its envelope under `purpose`.
    ///
    /// Replaces any challenge still pending for the same subject and purpose.
    /// The returned code must be delivered out of band.
    pub fn start_code_challenge(
        &self,
        subject: &str,
        purpose: &str,
        kind: CodeKind,
        length: usize,
        ttl: Duration,
        mut metadata: Metadata,
    ) -> Result<ShortCodeInfo> {
        metadata
            .entry("purpose".to_string())
            .or_insert_with(|| purpose.to_string());

        let info = self
            .protector
            .generate_short_code(kind, length, ttl, metadata)?;
        let store_ttl = ttl
            .to_std()
            .ok()
            .and_then(|ttl| ttl.checked_add(CHALLENGE_EXPIRY_GRACE))
            .ok_or_else(|| IdentityError::Validation("ttl out of range".to_string()))?;

        self.challenges
            .set_item(&challenge_key(subject, purpose), info.signature.clone(), store_ttl)?;

        Ok(info)
    }

    /// Check a submitted code against the pending challenge and consume it.
    ///
    /// A wrong code leaves the challenge pending; a correct one can only be
    /// redeemed once. Codes submitted after their expiry, but within
    /// [`CHALLENGE_EXPIRY_GRACE`], fail with [`IdentityError::TokenExpired`].
    pub fn complete_code_challenge(
        &self,
        subject: &str,
        purpose: &str,
        submitted: &str,
    ) -> Result<ShortCodeInfo> {
        let key = challenge_key(subject, purpose);
        let signature = self.challenges.peek_item(&key).ok_or_else(|| {
            warn!(subject = %subject, purpose = %purpose, "no pending challenge");
            IdentityError::InvalidToken
        })?;

        let info = self.protector.verify_short_code(&signature, submitted)?;

        // Another request may have redeemed it since the peek.
        if self.challenges.pop_item(&key).as_deref() != Some(signature.as_str()) {
            warn!(subject = %subject, purpose = %purpose, "challenge already consumed");
            return Err(IdentityError::InvalidToken);
        }

        info!(subject = %subject, purpose = %purpose, "verification challenge completed");
        Ok(info)
    }
}
