//! Shared application state
//!
//! One [`AppState`] is built at startup and handed to every route through
//! `State<Arc<AppState>>`. It owns the configuration, the upgrade
//! authentication gate, the collaborators every session talks to, the session
//! registry and the WebSocket connection counters.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

use crate::auth::{AuthenticationGate, GatePolicy, StaticSecretStore};
use crate::config::ServerConfig;
use crate::core::{ByteCountRecognizer, SilenceTts, StaticBotService};
use crate::session::{SessionRegistry, SessionServices};

/// Why a WebSocket upgrade was refused for capacity reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionLimitError {
    #[error("global WebSocket connection limit reached")]
    GlobalLimitReached,
    #[error("per-IP connection limit reached")]
    PerIpLimitReached,
}

pub struct AppState {
    pub config: ServerConfig,
    pub gate: AuthenticationGate,
    pub services: Arc<SessionServices>,
    pub sessions: SessionRegistry,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    /// Build the state with the built-in stub collaborators.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let services = Arc::new(SessionServices {
            bots: Arc::new(StaticBotService::new(Arc::new(SilenceTts::default()))),
            recognizer: Arc::new(ByteCountRecognizer::default()),
            collaborator_timeout: config.collaborator_timeout(),
        });
        Self::with_services(config, services)
    }

    /// Build the state around caller-supplied collaborators.
    pub fn with_services(config: ServerConfig, services: Arc<SessionServices>) -> Arc<Self> {
        let secrets = Arc::new(StaticSecretStore::from_entries(config.api_key_secrets()));
        let gate = AuthenticationGate::new(secrets, GatePolicy::from_config(&config));

        Arc::new(Self {
            config,
            gate,
            services,
            sessions: SessionRegistry::new(),
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Reserve a WebSocket slot for `ip`.
    ///
    /// Every successful call must be paired with [`release_connection`].
    ///
    /// [`release_connection`]: AppState::release_connection
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        if let Some(max) = self.config.max_websocket_connections {
            let reserved = self
                .ws_connections
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    (current < max).then_some(current + 1)
                });
            if reserved.is_err() {
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        } else {
            self.ws_connections.fetch_add(1, Ordering::AcqRel);
        }

        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_connections_per_ip {
            drop(per_ip);
            self.ws_connections.fetch_sub(1, Ordering::AcqRel);
            self.ip_connections.remove_if(&ip, |_, count| *count == 0);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *per_ip += 1;
        Ok(())
    }

    /// Give back a slot taken by [`AppState::try_acquire_connection`].
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });

        if let Some(mut count) = self.ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        self.ip_connections.remove_if(&ip, |_, count| *count == 0);
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }
}
