//! Shared-secret resolution for signature verification.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use zeroize::Zeroizing;

/// Secret material that is wiped from memory when dropped.
pub type SecretBytes = Zeroizing<Vec<u8>>;

/// Maps a key identifier to its shared secret.
///
/// Implementations backed by a remote secrets manager can do I/O here; the
/// gate awaits the lookup in the middle of verification.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Returns the secret for `key_id`, or `None` when the key is unknown.
    async fn secret_for_key(&self, key_id: &str) -> Option<SecretBytes>;
}

/// In-memory secret store populated from configuration.
#[derive(Default)]
pub struct StaticSecretStore {
    secrets: RwLock<HashMap<String, SecretBytes>>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `(key_id, secret)` pairs.
    pub fn from_entries<I, K, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, S)>,
        K: Into<String>,
        S: AsRef<[u8]>,
    {
        let store = Self::new();
        for (key_id, secret) in entries {
            store.insert(key_id, secret);
        }
        store
    }

    /// Add or replace a secret.
    pub fn insert(&self, key_id: impl Into<String>, secret: impl AsRef<[u8]>) {
        self.secrets
            .write()
            .insert(key_id.into(), Zeroizing::new(secret.as_ref().to_vec()));
    }

    pub fn len(&self) -> usize {
        self.secrets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.read().is_empty()
    }
}

#[async_trait]
impl SecretResolver for StaticSecretStore {
    async fn secret_for_key(&self, key_id: &str) -> Option<SecretBytes> {
        self.secrets
            .read()
            .get(key_id)
            // An empty secret would verify any HMAC computed with an empty key
            .filter(|secret| !secret.is_empty())
            .cloned()
    }
}
