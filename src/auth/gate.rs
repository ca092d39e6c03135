//! AudioConnector authentication policy.
//!
//! Sits on top of the generic signature verifier and adds the rules specific
//! to AudioConnector upgrades: the API key header is mandatory, the signature
//! must cover the session identification headers, the nonce must be long
//! enough and the signing key must be the presented API key.

use async_trait::async_trait;
use http::{HeaderMap, Uri};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use subtle::ConstantTimeEq;
use tracing::debug;

use super::secrets::SecretResolver;
use super::signature::{
    FailureKind, KeyResolution, KeyResolver, SignatureParameters, VerifyFailure, VerifyOptions,
    VerifyResult, header_value, verify_signature,
};
use crate::config::ServerConfig;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ORGANIZATION_ID_HEADER: &str = "audiohook-organization-id";
pub const SESSION_ID_HEADER: &str = "audiohook-session-id";
pub const CORRELATION_ID_HEADER: &str = "audiohook-correlation-id";

/// Components every accepted signature must cover.
pub const REQUIRED_COMPONENTS: &[&str] = &[
    "@request-target",
    "@authority",
    ORGANIZATION_ID_HEADER,
    SESSION_ID_HEADER,
    CORRELATION_ID_HEADER,
    API_KEY_HEADER,
];

const REQUEST_TARGET_COMPONENT: &str = "@request-target";

/// Tunables of the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePolicy {
    pub max_signature_age: Duration,
    pub min_nonce_length: usize,
    /// Accept requests that carry no signature at all
    pub allow_unsigned: bool,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            max_signature_age: Duration::from_secs(10),
            min_nonce_length: 22,
            allow_unsigned: true,
        }
    }
}

impl GatePolicy {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_signature_age: Duration::from_secs(config.max_signature_age_seconds),
            min_nonce_length: config.min_nonce_length,
            allow_unsigned: config.allow_unsigned_requests,
        }
    }
}

/// Outcome of [`AuthenticationGate::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    /// The request may be upgraded; `signed` tells whether a signature was checked
    Verified { signed: bool },
    Failed(VerifyFailure),
}

impl GateVerdict {
    pub fn is_verified(&self) -> bool {
        matches!(self, GateVerdict::Verified { .. })
    }
}

/// Decides whether an upgrade request is authentic.
pub struct AuthenticationGate {
    secrets: Arc<dyn SecretResolver>,
    policy: GatePolicy,
}

impl AuthenticationGate {
    pub fn new(secrets: Arc<dyn SecretResolver>, policy: GatePolicy) -> Self {
        Self { secrets, policy }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Verify an upgrade request against the current time.
    pub async fn verify(&self, headers: &HeaderMap, uri: &Uri) -> GateVerdict {
        self.verify_at(headers, uri, SystemTime::now()).await
    }

    /// Verify an upgrade request as if it arrived at `now`.
    pub async fn verify_at(&self, headers: &HeaderMap, uri: &Uri, now: SystemTime) -> GateVerdict {
        let Some(api_key) = header_value(headers, API_KEY_HEADER).filter(|key| !key.is_empty())
        else {
            return GateVerdict::Failed(VerifyFailure::new(
                FailureKind::Precondition,
                "Missing \"X-API-KEY\" header field",
            ));
        };

        let request_target = request_target(uri);
        let derived = move |name: &str| {
            (name == REQUEST_TARGET_COMPONENT).then(|| request_target.clone())
        };

        let resolver = GateKeyResolver {
            api_key: &api_key,
            secrets: self.secrets.as_ref(),
            min_nonce_length: self.policy.min_nonce_length,
        };
        let options = VerifyOptions {
            required_components: REQUIRED_COMPONENTS,
            max_signature_age: self.policy.max_signature_age,
            now,
        };

        match verify_signature(headers, &options, &derived, &resolver).await {
            VerifyResult::Verified => GateVerdict::Verified { signed: true },
            VerifyResult::Unsigned if self.policy.allow_unsigned => {
                debug!(api_key = %api_key, "Accepting unsigned upgrade request");
                GateVerdict::Verified { signed: false }
            }
            VerifyResult::Unsigned => GateVerdict::Failed(VerifyFailure::new(
                FailureKind::Precondition,
                "Request is not signed",
            )),
            VerifyResult::Failed(failure) => GateVerdict::Failed(failure),
        }
    }
}

/// Path and query of the request, `/` when the path is empty.
fn request_target(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .filter(|target| !target.is_empty())
        .unwrap_or_else(|| "/".to_string())
}

struct GateKeyResolver<'a> {
    api_key: &'a str,
    secrets: &'a dyn SecretResolver,
    min_nonce_length: usize,
}

#[async_trait]
impl KeyResolver for GateKeyResolver<'_> {
    async fn resolve_key(&self, parameters: &SignatureParameters) -> KeyResolution {
        match parameters.nonce.as_deref() {
            None => {
                return KeyResolution::Failed(VerifyFailure::new(
                    FailureKind::Precondition,
                    "Missing \"nonce\" signature parameter",
                ));
            }
            Some(nonce) if nonce.chars().count() < self.min_nonce_length => {
                return KeyResolution::Failed(VerifyFailure::new(
                    FailureKind::Precondition,
                    "Provided nonce is too short",
                ));
            }
            Some(_) => {}
        }

        let Some(keyid) = parameters.keyid.as_deref() else {
            return KeyResolution::Failed(VerifyFailure::new(
                FailureKind::Precondition,
                "Missing \"keyid\" signature parameter",
            ));
        };
        if !bool::from(keyid.as_bytes().ct_eq(self.api_key.as_bytes())) {
            return KeyResolution::Failed(VerifyFailure::new(
                FailureKind::KeyMismatch,
                "X-API-KEY header field and signature keyid mismatch",
            ));
        }

        match self.secrets.secret_for_key(keyid).await {
            Some(secret) => KeyResolution::GoodKey(secret),
            None => KeyResolution::BadKey,
        }
    }
}
