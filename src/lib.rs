pub mod auth;
pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod protocol;
pub mod routes;
pub mod session;
pub mod state;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use errors::auth_error::{AuthError, AuthResult};
pub use errors::session_error::{SessionError, SessionResult};
pub use session::{Session, SessionRegistry};
pub use state::AppState;
