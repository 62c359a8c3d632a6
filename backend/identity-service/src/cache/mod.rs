/// In-process caches
pub mod ephemeral;

pub use ephemeral::{challenge_key, EphemeralStore, DEFAULT_SWEEP_INTERVAL};
