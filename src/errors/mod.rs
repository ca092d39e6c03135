pub mod auth_error;
pub mod session_error;

pub use auth_error::{AuthError, AuthResult};
pub use session_error::{SessionError, SessionResult};
