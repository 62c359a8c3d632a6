/// Session record persistence for identity service
pub mod memory;
pub mod sessions;

// Re-export commonly used types
pub use memory::InMemorySessionStore;
pub use sessions::{PgSessionStore, SessionFilter, SessionStore, TokenHashMatch};
