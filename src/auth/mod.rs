//! Upgrade-request authentication
//!
//! Every AudioConnector connection starts as an HTTP upgrade request that
//! carries an `X-API-KEY` header and, usually, an HTTP message signature over
//! a fixed set of components. This module verifies those signatures and turns
//! the outcome into a verdict the transport layer can act on.
//!
//! - `signature` - HTTP message signature parsing, signature base and HMAC check
//! - `secrets` - key identifier to shared secret resolution
//! - `gate` - the AudioConnector policy on top of the verifier

pub mod gate;
pub mod secrets;
pub mod signature;

pub use gate::{
    API_KEY_HEADER, AuthenticationGate, GatePolicy, GateVerdict, REQUIRED_COMPONENTS,
    SESSION_ID_HEADER,
};
pub use secrets::{SecretBytes, SecretResolver, StaticSecretStore};
pub use signature::{
    FailureKind, KeyResolution, KeyResolver, SignatureParameters, SigningParameters,
    VerifyFailure, VerifyOptions, VerifyResult, sign_request, verify_signature,
};

/// Authentication context attached to an accepted upgrade request.
///
/// Handlers read it through `Extension<Auth>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    /// API key the caller presented
    pub key_id: Option<String>,
    /// Whether a signature was present and verified
    pub signed: bool,
}

impl Auth {
    /// Context for a request whose signature was verified.
    pub fn signed(key_id: impl Into<String>) -> Self {
        Self {
            key_id: Some(key_id.into()),
            signed: true,
        }
    }

    /// Context for a request accepted without a signature.
    pub fn unsigned(key_id: Option<String>) -> Self {
        Self {
            key_id,
            signed: false,
        }
    }
}
