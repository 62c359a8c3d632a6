//! Envelope protection for short-lived verification secrets.
//!
//! A [`Protector`] mints tamper-evident, time-bounded envelopes around a
//! secret the user must echo back (an emailed link token or an SMS code).
//! The service hands the envelope out as an opaque `signature` string and
//! later proves a submission against it without storing the secret.
//!
//! ## Key Derivation
//!
//! One 64-byte master key is expanded with HKDF-SHA256 into two independent
//! 32-byte subkeys: an AES-256-GCM key and an HMAC-SHA256 key.
//!
//! ## Wire Format
//!
//! ```text
//! payload   = JSON {value, metadata, version, expiresAt(ms)}
//! sealed    = nonce(12) || AES-256-GCM(payload) || tag(16)
//! signature = HMAC-SHA256(base64(sealed) || "|" || version)
//! envelope  = base64(JSON {version, payload: base64(sealed), signature: base64(signature)})
//! ```
//!
//! The MAC covers the version string, so an envelope cannot be relabelled to
//! reach a different decode path. It is checked before any decryption.

use crate::clock::{system_clock, SharedClock};
use crate::codes::{generate_code, CodeKind, MAX_SHORT_CODE_LENGTH, MIN_SHORT_CODE_LENGTH};
use crate::hash::constant_time_eq;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const MASTER_KEY_LEN: usize = 64;
pub const ENVELOPE_VERSION_V1: &str = "v1";

const KEY_DERIVATION_INFO: &[u8] = b"konabra-protector-key-derivation";
const SUBKEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const TOKEN_LENGTH: usize = 32;

pub type Metadata = BTreeMap<String, String>;
pub type Result<T> = std::result::Result<T, ProtectorError>;

#[derive(Debug, thiserror::Error)]
pub enum ProtectorError {
    #[error("master key must be 64 bytes, got {0}")]
    InvalidMasterKey(usize),
    #[error("master key is not valid base64")]
    InvalidMasterKeyEncoding,
    #[error("failed to derive protector keys")]
    KeyDerivation,
    #[error("invalid code kind '{0}'")]
    InvalidCodeKind(String),
    #[error("invalid code length {0}")]
    InvalidCodeLength(usize),
    #[error("ttl must be positive and within the representable time range")]
    InvalidTtl,
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("invalid signature")]
    SignatureInvalid,
    #[error("failed to decrypt payload")]
    DecryptFailure,
    #[error("failed to decode envelope: {0}")]
    Decode(String),
    #[error("ciphertext too short")]
    CiphertextTooShort,
    #[error("envelope has expired")]
    Expired,
    #[error("submitted value does not match")]
    ValueMismatch,
}

impl ProtectorError {
    pub fn is_expired(&self) -> bool {
        matches!(self, ProtectorError::Expired)
    }

    /// Errors raised by bad caller input before anything was sealed or opened.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ProtectorError::InvalidMasterKey(_)
                | ProtectorError::InvalidMasterKeyEncoding
                | ProtectorError::InvalidCodeKind(_)
                | ProtectorError::InvalidCodeLength(_)
                | ProtectorError::InvalidTtl
        )
    }
}

/// The signed container handed to callers (base64 of its JSON form).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub version: String,
    pub payload: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Payload {
    value: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    metadata: Metadata,
    version: String,
    expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub value: String,
    pub metadata: Metadata,
    pub expires_at: DateTime<Utc>,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortCodeInfo {
    pub code: String,
    pub metadata: Metadata,
    pub expires_at: DateTime<Utc>,
    pub signature: String,
}

/// Immutable after construction; safe to share across tasks behind an `Arc`.
pub struct Protector {
    cipher: Aes256Gcm,
    mac: HmacSha256,
    clock: SharedClock,
}

impl fmt::Debug for Protector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protector")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl Protector {
    pub fn new(master_key: &[u8]) -> Result<Self> {
        Self::with_clock(master_key, system_clock())
    }

    pub fn with_clock(master_key: &[u8], clock: SharedClock) -> Result<Self> {
        if master_key.len() != MASTER_KEY_LEN {
            return Err(ProtectorError::InvalidMasterKey(master_key.len()));
        }

        let mut derived = [0u8; SUBKEY_LEN * 2];
        Hkdf::<Sha256>::new(None, master_key)
            .expand(KEY_DERIVATION_INFO, &mut derived)
            .map_err(|_| ProtectorError::KeyDerivation)?;

        let (aes_key, hmac_key) = derived.split_at(SUBKEY_LEN);
        let cipher = Aes256Gcm::new_from_slice(aes_key).map_err(|_| ProtectorError::KeyDerivation)?;
        let mac = <HmacSha256 as Mac>::new_from_slice(hmac_key)
            .map_err(|_| ProtectorError::KeyDerivation)?;
        derived.fill(0);

        Ok(Self { cipher, mac, clock })
    }

    /// Build from the base64 form used in configuration.
    pub fn from_base64(master_key: &str) -> Result<Self> {
        Self::from_base64_with_clock(master_key, system_clock())
    }

    pub fn from_base64_with_clock(master_key: &str, clock: SharedClock) -> Result<Self> {
        let key = STANDARD
            .decode(master_key.trim())
            .map_err(|_| ProtectorError::InvalidMasterKeyEncoding)?;
        Self::with_clock(&key, clock)
    }

    /// Mint a 32-character alphanumeric token valid for `ttl`.
    pub fn generate_token(&self, ttl: Duration, metadata: Metadata) -> Result<TokenInfo> {
        let value = generate_code(CodeKind::Alphanumeric, TOKEN_LENGTH);
        let (expires_at, signature) = self.seal(&value, ttl, &metadata)?;

        Ok(TokenInfo {
            value,
            metadata,
            expires_at,
            signature,
        })
    }

    pub fn verify_token(&self, signature: &str, expected_value: &str) -> Result<TokenInfo> {
        let payload = self.open(signature, expected_value).map_err(|e| {
            debug!(error = %e, "token envelope rejected");
            e
        })?;
        let expires_at = millis_to_datetime(payload.expires_at)?;

        Ok(TokenInfo {
            value: payload.value,
            metadata: payload.metadata,
            expires_at,
            signature: signature.to_string(),
        })
    }

    /// Mint a human-typeable code, typically delivered over SMS.
    pub fn generate_short_code(
        &self,
        kind: CodeKind,
        length: usize,
        ttl: Duration,
        metadata: Metadata,
    ) -> Result<ShortCodeInfo> {
        if !(MIN_SHORT_CODE_LENGTH..=MAX_SHORT_CODE_LENGTH).contains(&length) {
            return Err(ProtectorError::InvalidCodeLength(length));
        }

        let code = generate_code(kind, length);
        let (expires_at, signature) = self.seal(&code, ttl, &metadata)?;

        Ok(ShortCodeInfo {
            code,
            metadata,
            expires_at,
            signature,
        })
    }

    pub fn verify_short_code(&self, signature: &str, expected_code: &str) -> Result<ShortCodeInfo> {
        let payload = self.open(signature, expected_code).map_err(|e| {
            debug!(error = %e, "short code envelope rejected");
            e
        })?;
        let expires_at = millis_to_datetime(payload.expires_at)?;

        Ok(ShortCodeInfo {
            code: payload.value,
            metadata: payload.metadata,
            expires_at,
            signature: signature.to_string(),
        })
    }

    fn seal(
        &self,
        value: &str,
        ttl: Duration,
        metadata: &Metadata,
    ) -> Result<(DateTime<Utc>, String)> {
        if ttl <= Duration::zero() {
            return Err(ProtectorError::InvalidTtl);
        }

        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .ok_or(ProtectorError::InvalidTtl)?
            .trunc_subsecs(3);
        let payload = Payload {
            value: value.to_string(),
            metadata: metadata.clone(),
            version: ENVELOPE_VERSION_V1.to_string(),
            expires_at: expires_at.timestamp_millis(),
        };

        Ok((expires_at, self.encrypt_and_sign(&payload)?))
    }

    /// Expiry is checked before the value so callers can tell "expired" from "incorrect".
    fn open(&self, signature: &str, expected_value: &str) -> Result<Payload> {
        let payload = self.decrypt_and_verify(signature)?;

        if self.clock.now().timestamp_millis() > payload.expires_at {
            return Err(ProtectorError::Expired);
        }

        if !constant_time_eq(payload.value.as_bytes(), expected_value.as_bytes()) {
            return Err(ProtectorError::ValueMismatch);
        }

        Ok(payload)
    }

    fn encrypt_and_sign(&self, payload: &Payload) -> Result<String> {
        let plaintext =
            serde_json::to_vec(payload).map_err(|e| ProtectorError::Encryption(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|e| ProtectorError::Encryption(format!("AES-GCM failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        let payload_b64 = STANDARD.encode(&sealed);
        let signature = self
            .envelope_mac(&payload_b64, &payload.version)
            .finalize()
            .into_bytes();

        let envelope = Envelope {
            version: payload.version.clone(),
            payload: payload_b64,
            signature: STANDARD.encode(signature),
        };
        let envelope_json =
            serde_json::to_vec(&envelope).map_err(|e| ProtectorError::Encryption(e.to_string()))?;

        Ok(STANDARD.encode(envelope_json))
    }

    fn decrypt_and_verify(&self, encoded: &str) -> Result<Payload> {
        let envelope_json = STANDARD
            .decode(encoded)
            .map_err(|e| ProtectorError::Decode(format!("envelope is not base64: {e}")))?;
        let envelope: Envelope = serde_json::from_slice(&envelope_json)
            .map_err(|e| ProtectorError::Decode(format!("malformed envelope: {e}")))?;

        let signature = STANDARD
            .decode(&envelope.signature)
            .map_err(|_| ProtectorError::SignatureInvalid)?;
        self.envelope_mac(&envelope.payload, &envelope.version)
            .verify_slice(&signature)
            .map_err(|_| ProtectorError::SignatureInvalid)?;

        // Authentic from here on; only versions this build understands are opened.
        if envelope.version != ENVELOPE_VERSION_V1 {
            return Err(ProtectorError::Decode(format!(
                "unsupported envelope version '{}'",
                envelope.version
            )));
        }

        let sealed = STANDARD
            .decode(&envelope.payload)
            .map_err(|e| ProtectorError::Decode(format!("payload is not base64: {e}")))?;
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(ProtectorError::CiphertextTooShort);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ProtectorError::DecryptFailure)?;

        let payload: Payload = serde_json::from_slice(&plaintext)
            .map_err(|e| ProtectorError::Decode(format!("malformed payload: {e}")))?;
        if payload.version != envelope.version {
            return Err(ProtectorError::Decode("payload version mismatch".to_string()));
        }

        Ok(payload)
    }

    fn envelope_mac(&self, payload_b64: &str, version: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(payload_b64.as_bytes());
        mac.update(b"|");
        mac.update(version.as_bytes());
        mac
    }
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| ProtectorError::Decode("expiry out of range".to_string()))
}
