/// Time-based one-time codes (RFC 6238, HMAC-SHA1)
///
/// A [`CodeProvider`] turns a per-purpose secret into six digit codes that
/// change every 30 seconds. Secrets are never stored: they are rebuilt from
/// stable account data with [`purpose_secret`], so rotating the account's
/// security stamp invalidates every outstanding code.
use crate::clock::{system_clock, SharedClock};
use crate::hash::constant_time_eq;
use chrono::{DateTime, Utc};
use thiserror::Error;
use totp_lite::{totp_custom, Sha1};
use tracing::debug;

pub const DEFAULT_TIME_STEP_SECS: u64 = 30;
pub const DEFAULT_DIGITS: u32 = 6;
/// Adjacent steps accepted on either side of the current one
pub const DEFAULT_WINDOW: u64 = 1;

const MIN_DIGITS: u32 = 6;
const MAX_DIGITS: u32 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TotpError {
    #[error("totp secret must not be empty")]
    EmptySecret,

    #[error("code length must be between 6 and 8 digits, got {0}")]
    InvalidDigits(u32),

    #[error("time step must be positive")]
    InvalidTimeStep,

    #[error("instant precedes the unix epoch")]
    BeforeEpoch,
}

pub type Result<T> = std::result::Result<T, TotpError>;

/// Secret for one account and purpose, e.g. `user-1-VerifyAccount-<stamp>`.
///
/// `extra` binds the code to request data such as a new username.
pub fn purpose_secret(subject: &str, purpose: &str, security_stamp: &str, extra: Option<&str>) -> Vec<u8> {
    let mut secret = format!("{subject}-{purpose}-{security_stamp}");
    if let Some(extra) = extra {
        secret.push('-');
        secret.push_str(extra);
    }
    secret.into_bytes()
}

pub struct CodeProvider {
    secret: Vec<u8>,
    step: u64,
    digits: u32,
    clock: SharedClock,
}

impl CodeProvider {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self> {
        Self::with_clock(secret, system_clock())
    }

    pub fn with_clock(secret: impl Into<Vec<u8>>, clock: SharedClock) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(TotpError::EmptySecret);
        }
        Ok(Self {
            secret,
            step: DEFAULT_TIME_STEP_SECS,
            digits: DEFAULT_DIGITS,
            clock,
        })
    }

    pub fn with_digits(mut self, digits: u32) -> Result<Self> {
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits) {
            return Err(TotpError::InvalidDigits(digits));
        }
        self.digits = digits;
        Ok(self)
    }

    pub fn with_time_step(mut self, step_secs: u64) -> Result<Self> {
        if step_secs == 0 {
            return Err(TotpError::InvalidTimeStep);
        }
        self.step = step_secs;
        Ok(self)
    }

    /// Code for the current time step
    pub fn generate_code(&self) -> Result<String> {
        self.generate_code_at(self.clock.now())
    }

    pub fn generate_code_at(&self, at: DateTime<Utc>) -> Result<String> {
        Ok(self.code_for_step(self.step_of(at)?))
    }

    /// Accepts codes from the current step and [`DEFAULT_WINDOW`] steps around it.
    pub fn validate_code(&self, code: &str) -> Result<bool> {
        self.validate_code_at(code, self.clock.now(), DEFAULT_WINDOW)
    }

    pub fn validate_code_at(&self, code: &str, at: DateTime<Utc>, window: u64) -> Result<bool> {
        if code.len() != self.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }

        let current = self.step_of(at)?;
        let first = current.saturating_sub(window);
        let last = current.saturating_add(window);

        // No early exit: every candidate in the window is compared.
        let mut matched = false;
        for step in first..=last {
            matched |= constant_time_eq(self.code_for_step(step).as_bytes(), code.as_bytes());
        }

        if !matched {
            debug!(step = current, window, "totp code rejected");
        }
        Ok(matched)
    }

    fn step_of(&self, at: DateTime<Utc>) -> Result<u64> {
        let secs = u64::try_from(at.timestamp()).map_err(|_| TotpError::BeforeEpoch)?;
        Ok(secs / self.step)
    }

    fn code_for_step(&self, step: u64) -> String {
        // totp-lite divides by the step itself; hand it the step's first second.
        totp_custom::<Sha1>(self.step, self.digits, &self.secret, step.saturating_mul(self.step))
    }
}

impl std::fmt::Debug for CodeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeProvider")
            .field("secret", &"[REDACTED]")
            .field("step", &self.step)
            .field("digits", &self.digits)
            .finish()
    }
}
