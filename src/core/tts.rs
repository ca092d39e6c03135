//! Speech synthesis collaborator.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Encoded µ-law silence.
const MULAW_SILENCE: u8 = 0xFF;

/// 5 seconds of 8 kHz PCMU.
pub const DEFAULT_SILENCE_BYTES: usize = 40_000;

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),
}

/// Turns bot text into PCMU audio for the caller.
#[async_trait]
pub trait TtsService: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Bytes, TtsError>;
}

/// Synthesizer stub that answers every request with silence.
#[derive(Debug, Clone)]
pub struct SilenceTts {
    length: usize,
}

impl Default for SilenceTts {
    fn default() -> Self {
        Self::new(DEFAULT_SILENCE_BYTES)
    }
}

impl SilenceTts {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

#[async_trait]
impl TtsService for SilenceTts {
    async fn synthesize(&self, _text: &str) -> Result<Bytes, TtsError> {
        Ok(Bytes::from(vec![MULAW_SILENCE; self.length]))
    }
}
