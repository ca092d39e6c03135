//! AudioConnector WebSocket endpoint
//!
//! Any upgrade path is accepted: the path and query string name the bot the
//! caller wants, and the bot service resolves them after `open`.

mod handler;

pub use handler::audioconnector_handler;
