//! Dialogue bot collaborator.
//!
//! A [`BotService`] locates the bot for a connection from the request target
//! (path and query of the upgrade URL) and the `open` input variables. The
//! returned [`BotResource`] produces the greeting and one response per caller
//! turn.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::tts::{TtsError, TtsService};
use crate::protocol::{Disposition, VariableMap};

pub const GREETING_TEXT: &str = "Hello and welcome to AudioConnector.";
pub const RESPONSE_TEXT: &str = "We are unable to help at this time.";

#[derive(Debug, Error)]
pub enum BotError {
    #[error("Bot lookup failed: {0}")]
    Lookup(String),

    #[error("Bot response failed: {0}")]
    Response(String),

    #[error(transparent)]
    Synthesis(#[from] TtsError),

    #[error("Bot call timed out after {0:?}")]
    Timeout(Duration),
}

/// What the bot wants to say and do after a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct BotResponse {
    pub disposition: Disposition,
    pub text: Option<String>,
    pub confidence: Option<f64>,
    pub audio: Option<Bytes>,
    pub end_session: bool,
}

impl BotResponse {
    pub fn new(disposition: Disposition, text: impl Into<String>) -> Self {
        Self {
            disposition,
            text: Some(text.into()),
            confidence: None,
            audio: None,
            end_session: false,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_audio(mut self, audio: Bytes) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_end_session(mut self, end_session: bool) -> Self {
        self.end_session = end_session;
        self
    }
}

#[async_trait]
pub trait BotResource: Send + Sync {
    /// Greeting delivered right after `opened`.
    async fn initial_response(&self) -> Result<BotResponse, BotError>;

    /// Response to a final transcript or a collected DTMF string.
    async fn bot_response(&self, input: &str) -> Result<BotResponse, BotError>;
}

#[async_trait]
pub trait BotService: Send + Sync {
    /// Returns `Ok(None)` when no bot serves this target.
    async fn find_bot(
        &self,
        request_target: &str,
        input_variables: &VariableMap,
    ) -> Result<Option<Arc<dyn BotResource>>, BotError>;
}

/// Bot service stub: every target gets a bot that greets the caller and ends
/// the session after the first turn.
pub struct StaticBotService {
    tts: Arc<dyn TtsService>,
}

impl StaticBotService {
    pub fn new(tts: Arc<dyn TtsService>) -> Self {
        Self { tts }
    }
}

#[async_trait]
impl BotService for StaticBotService {
    async fn find_bot(
        &self,
        _request_target: &str,
        _input_variables: &VariableMap,
    ) -> Result<Option<Arc<dyn BotResource>>, BotError> {
        Ok(Some(Arc::new(StaticBot {
            tts: self.tts.clone(),
        })))
    }
}

struct StaticBot {
    tts: Arc<dyn TtsService>,
}

#[async_trait]
impl BotResource for StaticBot {
    async fn initial_response(&self) -> Result<BotResponse, BotError> {
        let audio = self.tts.synthesize(GREETING_TEXT).await?;
        Ok(BotResponse::new(Disposition::Match, GREETING_TEXT)
            .with_confidence(1.0)
            .with_audio(audio))
    }

    async fn bot_response(&self, _input: &str) -> Result<BotResponse, BotError> {
        let audio = self.tts.synthesize(RESPONSE_TEXT).await?;
        Ok(BotResponse::new(Disposition::Match, RESPONSE_TEXT)
            .with_confidence(1.0)
            .with_end_session(true)
            .with_audio(audio))
    }
}
