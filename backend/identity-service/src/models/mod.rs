/// Data models for sessions and issued tokens
pub mod session;

pub use session::{JwtTokenModel, SessionRecord};
