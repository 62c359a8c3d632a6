/// Identity Service Library
///
/// Session tokens, verification challenges and their persistence for the
/// Konabra backend.
///
/// ## Modules
///
/// - `cache`: Ephemeral in-memory store for pending challenges
/// - `config`: Service configuration
/// - `context`: Explicit composition of the components below
/// - `db`: Session record stores (Postgres, in-memory)
/// - `error`: Error types
/// - `models`: Data models
/// - `security`: Session token lifecycle and authorization
/// - `telemetry`: Log subscriber setup
pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod models;
pub mod security;
pub mod telemetry;

// Re-export commonly used types
pub use context::IdentityContext;
pub use error::{IdentityError, Result};
pub use security::{SessionTokenManager, SessionTokenPolicy};
