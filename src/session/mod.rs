//! Per-connection AudioConnector session
//!
//! A [`Session`] owns the protocol state of one WebSocket connection:
//! sequence numbers in both directions, the negotiated media, the bound bot
//! and the capture mode that arbitrates between caller audio and DTMF.
//!
//! Sessions never touch the socket directly. Outbound traffic is pushed as
//! [`OutboundFrame`]s into a channel drained by the connection's writer task.
//! Bot calls run in spawned tasks and report back as [`SessionEvent`]s on a
//! second channel that the connection task polls, so every mutation of a
//! session happens on its connection task.
//!
//! - `dispatch` - typed control message handlers
//! - `capture` - caller audio and DTMF arbitration
//! - `outbound` - message stamping, audio chunking, disconnects
//! - `registry` - connection id to session map

mod capture;
mod dispatch;
mod outbound;
pub mod registry;

pub use outbound::chunk_audio;
pub use registry::{ConnectionId, RegistryError, SessionRegistry, SharedSession};

use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{BotError, BotResource, BotResponse, BotService, SpeechRecognizer};
use crate::errors::SessionResult;
use crate::protocol::{ClientEnvelope, DisconnectReason, MediaParameter, VariableMap};

use capture::Accumulator;

pub const INFO_INVALID_CLIENT_SEQ: &str = "Invalid client sequence number.";
pub const INFO_INVALID_SERVER_SEQ: &str = "Invalid server sequence number.";
pub const INFO_INVALID_ID: &str = "Invalid ID specified.";
pub const INFO_MALFORMED_MESSAGE: &str = "Malformed message.";
pub const INFO_INVALID_PARAMETERS: &str = "Invalid request parameters.";
pub const INFO_ALREADY_OPENED: &str = "Session has already been opened.";
pub const INFO_NO_SUPPORTED_MEDIA: &str = "No supported media type was found.";
pub const INFO_BOT_NOT_FOUND: &str = "The specific Bot does not exist.";
pub const INFO_BOT_LOOKUP_FAILED: &str = "Error during Bot lookup.";
pub const INFO_BOT_RESPONSE_FAILED: &str = "Error during Bot response.";
pub const INFO_ASR_FAILED: &str = "Error during Speech Recognition.";
pub const INFO_DTMF_FAILED: &str = "Error during DTMF Capture.";
pub const INFO_SESSION_NOT_FOUND: &str = "Session does not exist.";

/// Which input the session is currently collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    #[default]
    Idle,
    CapturingAudio,
    CapturingDtmf,
}

/// Frames handed to the connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Bytes),
    Close,
}

/// What a bot response answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOrigin {
    Greeting,
    Speech,
    Dtmf,
}

/// Results of collaborator calls, delivered back to the connection task.
pub enum SessionEvent {
    BotLookup(Result<Option<Arc<dyn BotResource>>, BotError>),
    BotResponse {
        origin: ResponseOrigin,
        result: Result<BotResponse, BotError>,
    },
}

/// Collaborators shared by every session.
pub struct SessionServices {
    pub bots: Arc<dyn BotService>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    /// Upper bound for any single bot call
    pub collaborator_timeout: Duration,
}

pub struct Session {
    connection_id: ConnectionId,
    session_id: String,
    request_target: String,
    conversation_id: Option<String>,
    last_client_seq: u64,
    last_server_seq: u64,
    selected_media: Option<MediaParameter>,
    input_variables: VariableMap,
    bot: Option<Arc<dyn BotResource>>,
    capture_mode: CaptureMode,
    accumulator: Accumulator,
    /// Collected digits are with the bot and DTMF mode ends when it answers
    dtmf_response_pending: bool,
    playing: bool,
    disconnecting: bool,
    closed: bool,
    services: Arc<SessionServices>,
    outbound: mpsc::Sender<OutboundFrame>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        connection_id: ConnectionId,
        session_id: impl Into<String>,
        request_target: impl Into<String>,
        services: Arc<SessionServices>,
        outbound: mpsc::Sender<OutboundFrame>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            connection_id,
            session_id: session_id.into(),
            request_target: request_target.into(),
            conversation_id: None,
            last_client_seq: 0,
            last_server_seq: 0,
            selected_media: None,
            input_variables: VariableMap::new(),
            bot: None,
            capture_mode: CaptureMode::Idle,
            accumulator: Accumulator::None,
            dtmf_response_pending: false,
            playing: false,
            disconnecting: false,
            closed: false,
            services,
            outbound,
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn request_target(&self) -> &str {
        &self.request_target
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn last_client_seq(&self) -> u64 {
        self.last_client_seq
    }

    pub fn last_server_seq(&self) -> u64 {
        self.last_server_seq
    }

    pub fn selected_media(&self) -> Option<&MediaParameter> {
        self.selected_media.as_ref()
    }

    pub fn input_variables(&self) -> &VariableMap {
        &self.input_variables
    }

    pub fn has_bot(&self) -> bool {
        self.bot.is_some()
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.capture_mode
    }

    pub fn has_audio_accumulator(&self) -> bool {
        matches!(self.accumulator, Accumulator::Audio(_))
    }

    pub fn has_dtmf_accumulator(&self) -> bool {
        matches!(self.accumulator, Accumulator::Dtmf(_))
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Handle one inbound text frame.
    ///
    /// The envelope is validated (client seq, server seq, session id, in that
    /// order) before any state changes. A violation is answered with a
    /// `disconnect` and the frame is dropped.
    pub async fn process_text_message(&mut self, text: &str) -> SessionResult<()> {
        if self.closed {
            return Ok(());
        }

        let envelope = match ClientEnvelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "Received malformed control message"
                );
                return self.reject_frame(INFO_MALFORMED_MESSAGE).await;
            }
        };

        if envelope.seq != self.last_client_seq + 1 {
            warn!(
                connection_id = %self.connection_id,
                seq = envelope.seq,
                expected = self.last_client_seq + 1,
                "Invalid client sequence number"
            );
            return self.reject_frame(INFO_INVALID_CLIENT_SEQ).await;
        }

        if envelope.serverseq > self.last_server_seq {
            warn!(
                connection_id = %self.connection_id,
                serverseq = envelope.serverseq,
                last_server_seq = self.last_server_seq,
                "Invalid server sequence number"
            );
            return self.reject_frame(INFO_INVALID_SERVER_SEQ).await;
        }

        if envelope.id != self.session_id {
            warn!(
                connection_id = %self.connection_id,
                id = %envelope.id,
                "Invalid client session id"
            );
            return self.reject_frame(INFO_INVALID_ID).await;
        }

        self.last_client_seq = envelope.seq;

        match envelope.message() {
            Ok(message) => self.dispatch(message).await,
            Err(e) => {
                warn!(
                    connection_id = %self.connection_id,
                    seq = envelope.seq,
                    error = %e,
                    "Invalid control message parameters"
                );
                self.reject_frame(INFO_INVALID_PARAMETERS).await
            }
        }
    }

    /// Apply the result of a collaborator call.
    pub async fn handle_event(&mut self, event: SessionEvent) -> SessionResult<()> {
        if self.closed {
            debug!(connection_id = %self.connection_id, "Dropping event for closed session");
            return Ok(());
        }

        match event {
            SessionEvent::BotLookup(result) => self.on_bot_lookup(result).await,
            SessionEvent::BotResponse { origin, result } => {
                self.on_bot_response(origin, result).await
            }
        }
    }

    /// Tear the session down. Safe to call more than once.
    ///
    /// In-flight collaborator calls are cancelled and the writer task is told
    /// to close the socket.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }

        self.closed = true;
        self.cancel.cancel();
        self.accumulator = Accumulator::None;
        self.bot = None;

        if self.outbound.send(OutboundFrame::Close).await.is_err() {
            debug!(connection_id = %self.connection_id, "Writer already gone while closing session");
        }

        info!(
            connection_id = %self.connection_id,
            session_id = %self.session_id,
            "Session closed"
        );
    }

    /// Answer a protocol violation. Every violation gets its own `disconnect`,
    /// including those that arrive while the session is already disconnecting.
    async fn reject_frame(&mut self, info: &str) -> SessionResult<()> {
        self.send_disconnect(DisconnectReason::Error, info, VariableMap::new())
            .await
    }

    async fn on_bot_lookup(
        &mut self,
        result: Result<Option<Arc<dyn BotResource>>, BotError>,
    ) -> SessionResult<()> {
        if self.disconnecting {
            return Ok(());
        }

        let bot = match result {
            Ok(Some(bot)) => bot,
            Ok(None) => {
                info!(
                    connection_id = %self.connection_id,
                    request_target = %self.request_target,
                    "No bot found for connection"
                );
                return self
                    .send_disconnect(DisconnectReason::Error, INFO_BOT_NOT_FOUND, VariableMap::new())
                    .await;
            }
            Err(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "Bot lookup failed");
                return self
                    .send_disconnect(
                        DisconnectReason::Error,
                        INFO_BOT_LOOKUP_FAILED,
                        VariableMap::new(),
                    )
                    .await;
            }
        };

        self.bot = Some(bot.clone());
        self.send_opened().await?;

        self.spawn_collaborator(
            async move { bot.initial_response().await },
            |result| SessionEvent::BotResponse {
                origin: ResponseOrigin::Greeting,
                result,
            },
        );
        Ok(())
    }

    async fn on_bot_response(
        &mut self,
        origin: ResponseOrigin,
        result: Result<BotResponse, BotError>,
    ) -> SessionResult<()> {
        if origin == ResponseOrigin::Dtmf {
            self.dtmf_response_pending = false;
            if self.capture_mode == CaptureMode::CapturingDtmf {
                self.capture_mode = CaptureMode::Idle;
            }
        }

        if self.disconnecting {
            debug!(
                connection_id = %self.connection_id,
                ?origin,
                "Dropping bot response for disconnecting session"
            );
            return Ok(());
        }

        match result {
            Ok(response) => self.relay_bot_response(response).await,
            Err(e) => {
                warn!(
                    connection_id = %self.connection_id,
                    ?origin,
                    error = %e,
                    "Bot response failed"
                );
                self.send_disconnect(
                    DisconnectReason::Error,
                    INFO_BOT_RESPONSE_FAILED,
                    VariableMap::new(),
                )
                .await
            }
        }
    }

    /// Ask the bound bot to answer caller input.
    fn request_bot_response(&self, origin: ResponseOrigin, input: String) {
        let Some(bot) = self.bot.clone() else {
            return;
        };

        self.spawn_collaborator(
            async move { bot.bot_response(&input).await },
            move |result| SessionEvent::BotResponse { origin, result },
        );
    }

    /// Run a collaborator call off the connection task.
    ///
    /// The call is bounded by the collaborator timeout and abandoned when the
    /// session closes. Its result comes back through the event channel.
    fn spawn_collaborator<T, F, W>(&self, call: F, wrap: W)
    where
        T: Send + 'static,
        F: Future<Output = Result<T, BotError>> + Send + 'static,
        W: FnOnce(Result<T, BotError>) -> SessionEvent + Send + 'static,
    {
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let timeout = self.services.collaborator_timeout;
        let connection_id = self.connection_id;

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(connection_id = %connection_id, "Collaborator call cancelled");
                    return;
                }
                result = tokio::time::timeout(timeout, call) => {
                    result.unwrap_or(Err(BotError::Timeout(timeout)))
                }
            };

            if events.send(wrap(result)).await.is_err() {
                debug!(connection_id = %connection_id, "Connection gone before collaborator finished");
            }
        });
    }
}

#[cfg(test)]
mod tests;
