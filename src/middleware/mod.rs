pub mod auth;
pub mod connection_limit;
pub mod root_upgrade;

// Re-export middleware functions
pub use auth::auth_middleware;
pub use connection_limit::{ClientIp, connection_limit_middleware, is_websocket_upgrade};
pub use root_upgrade::root_upgrade_middleware;
