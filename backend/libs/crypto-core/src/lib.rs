//! Cryptographic primitives shared by the Konabra backend.
//!
//! - `jwt`: HS256 session-token codec with typed claims
//! - `protector`: encrypt-then-MAC envelopes for one-time tokens and codes
//! - `codes`: random numeric / alphanumeric secrets
//! - `totp`: RFC 6238 time-based codes for account flows
//! - `hash`: SHA-256 digests and constant-time comparison
//! - `clock`: injectable time source

pub mod clock;
pub mod codes;
pub mod hash;
pub mod jwt;
pub mod protector;
pub mod totp;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use codes::CodeKind;
pub use hash::{hash_token, sha256};
pub use protector::{Metadata, Protector, ProtectorError, ShortCodeInfo, TokenInfo};
pub use totp::{purpose_secret, CodeProvider, TotpError};
