//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `audioconnector` - AudioConnector WebSocket sessions

pub mod api;
pub mod audioconnector;

pub use audioconnector::audioconnector_handler;
