//! Speech recognition collaborator.

use super::capture::{CaptureError, CaptureEvent, CaptureState};

/// Audio bytes in 5 seconds of 8 kHz PCMU.
pub const DEFAULT_COMPLETION_BYTES: usize = 40_000;

pub const DEFAULT_TRANSCRIPT: &str = "I would like to check my account balance.";

#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub confidence: f64,
}

/// One speech capture episode.
pub trait TranscriptAccumulator: Send {
    fn state(&self) -> CaptureState;

    /// Consume a chunk of caller audio.
    ///
    /// Returns `Final` exactly once; feeding a `Done` accumulator yields `Errored`.
    fn feed(&mut self, audio: &[u8]) -> CaptureEvent<Transcript>;
}

/// Creates accumulators for new speech capture episodes.
pub trait SpeechRecognizer: Send + Sync {
    fn start(&self) -> Box<dyn TranscriptAccumulator>;
}

/// Recognizer stub that "hears" a fixed utterance once enough audio arrived.
#[derive(Debug, Clone)]
pub struct ByteCountRecognizer {
    completion_bytes: usize,
    transcript: Transcript,
}

impl Default for ByteCountRecognizer {
    fn default() -> Self {
        Self::new(
            DEFAULT_COMPLETION_BYTES,
            Transcript {
                text: DEFAULT_TRANSCRIPT.to_string(),
                confidence: 1.0,
            },
        )
    }
}

impl ByteCountRecognizer {
    pub fn new(completion_bytes: usize, transcript: Transcript) -> Self {
        Self {
            completion_bytes,
            transcript,
        }
    }
}

impl SpeechRecognizer for ByteCountRecognizer {
    fn start(&self) -> Box<dyn TranscriptAccumulator> {
        Box::new(ByteCountAccumulator {
            completion_bytes: self.completion_bytes,
            received: 0,
            state: CaptureState::Idle,
            transcript: self.transcript.clone(),
        })
    }
}

struct ByteCountAccumulator {
    completion_bytes: usize,
    received: usize,
    state: CaptureState,
    transcript: Transcript,
}

impl TranscriptAccumulator for ByteCountAccumulator {
    fn state(&self) -> CaptureState {
        self.state
    }

    fn feed(&mut self, audio: &[u8]) -> CaptureEvent<Transcript> {
        if self.state == CaptureState::Done {
            return CaptureEvent::Errored(CaptureError::RecognitionCompleted);
        }

        self.received += audio.len();
        if self.received >= self.completion_bytes {
            self.state = CaptureState::Done;
            self.received = 0;
            return CaptureEvent::Final(self.transcript.clone());
        }

        self.state = CaptureState::Accumulating;
        CaptureEvent::InProgress
    }
}
