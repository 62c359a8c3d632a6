//! Configuration management for Identity Service
//!
//! Loads settings from environment variables, with a `.env` file picked up
//! in debug builds.
//!
//! # Example
//!
//! ```no_run
//! use identity_service::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::from_env()?;
//!     println!("JWT issuer: {}", settings.jwt.issuer);
//!     Ok(())
//! }
//! ```

use crate::security::SessionTokenPolicy;
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Duration;
use crypto_core::jwt::MIN_SECRET_LEN;
use crypto_core::protector::MASTER_KEY_LEN;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use tracing::info;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub jwt: JwtSettings,
    pub protector: ProtectorSettings,
    pub ephemeral: EphemeralSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        // Load .env file in development
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }

        Ok(Settings {
            database: DatabaseSettings::from_env()?,
            jwt: JwtSettings::from_env()?,
            protector: ProtectorSettings::from_env()?,
            ephemeral: EphemeralSettings::from_env()?,
        })
    }
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid DATABASE_MAX_CONNECTIONS")?,
        })
    }
}

/// Session token settings
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    #[serde(skip_serializing)]
    pub secret: String,
    pub issuer: String,
    pub audience: Vec<String>,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
}

impl JwtSettings {
    fn from_env() -> Result<Self> {
        let secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if secret.len() < MIN_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_SECRET_LEN} bytes");
        }

        let issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "konabra".to_string());

        let audience_str = env::var("JWT_AUDIENCE").unwrap_or_else(|_| "konabra".to_string());
        let audience = audience_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let access_token_ttl_secs: i64 = env::var("JWT_ACCESS_TOKEN_TTL_SECS")
            .unwrap_or_else(|_| "900".to_string())
            .parse()
            .context("Invalid JWT_ACCESS_TOKEN_TTL_SECS")?;
        let refresh_token_ttl_secs: i64 = env::var("JWT_REFRESH_TOKEN_TTL_SECS")
            .unwrap_or_else(|_| "2592000".to_string())
            .parse()
            .context("Invalid JWT_REFRESH_TOKEN_TTL_SECS")?;
        if access_token_ttl_secs <= 0 || refresh_token_ttl_secs <= 0 {
            bail!("JWT token TTLs must be positive");
        }

        Ok(Self {
            secret,
            issuer,
            audience,
            access_token_ttl_secs,
            refresh_token_ttl_secs,
        })
    }

    pub fn policy(&self) -> SessionTokenPolicy {
        SessionTokenPolicy::new(
            self.secret.as_bytes().to_vec(),
            self.issuer.clone(),
            self.audience.clone(),
        )
        .with_ttls(
            Duration::seconds(self.access_token_ttl_secs),
            Duration::seconds(self.refresh_token_ttl_secs),
        )
    }
}

impl fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSettings")
            .field("secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .finish()
    }
}

/// Master key for verification envelopes
#[derive(Clone, Serialize, Deserialize)]
pub struct ProtectorSettings {
    #[serde(skip_serializing)]
    pub master_key: Vec<u8>,
}

impl ProtectorSettings {
    fn from_env() -> Result<Self> {
        let encoded =
            env::var("PROTECTOR_MASTER_KEY").context("PROTECTOR_MASTER_KEY must be set")?;
        let master_key = STANDARD
            .decode(encoded.trim())
            .context("PROTECTOR_MASTER_KEY must be base64")?;
        if master_key.len() != MASTER_KEY_LEN {
            bail!(
                "PROTECTOR_MASTER_KEY must decode to {MASTER_KEY_LEN} bytes, got {}",
                master_key.len()
            );
        }
        Ok(Self { master_key })
    }
}

impl fmt::Debug for ProtectorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectorSettings")
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralSettings {
    /// Zero disables the background sweep
    pub sweep_interval_secs: u64,
}

impl EphemeralSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            sweep_interval_secs: env::var("EPHEMERAL_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid EPHEMERAL_SWEEP_INTERVAL_SECS")?,
        })
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}
