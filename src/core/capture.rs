//! Capture accumulator states and results.

use thiserror::Error;

/// Lifecycle of a capture accumulator.
///
/// `Done` is terminal: the owner must replace the accumulator before the next
/// capture episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Accumulating,
    Done,
}

/// Result of feeding input to an accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent<T> {
    /// More input is needed
    InProgress,
    /// The episode completed with a result
    Final(T),
    /// The episode failed, or the accumulator was fed after completion
    Errored(CaptureError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Speech recognition has already completed.")]
    RecognitionCompleted,

    #[error("DTMF digits already received.")]
    DigitsCompleted,

    #[error("Invalid DTMF digit: {0:?}")]
    InvalidDigit(String),

    #[error("Speech recognition failed: {0}")]
    Recognition(String),
}
