pub mod session;

// Re-export middleware functions
pub use session::{GuardError, SESSION_KEY_HEADER, SessionGuard, require_session_key};
