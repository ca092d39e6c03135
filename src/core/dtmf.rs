//! DTMF digit collection.

use super::capture::{CaptureError, CaptureEvent, CaptureState};

/// Digit that ends a collection episode.
pub const TERMINATOR: char = '#';

const VALID_DIGITS: &str = "0123456789*#ABCD";

/// Collects digits until the terminator arrives.
#[derive(Debug, Default)]
pub struct DtmfAccumulator {
    state: CaptureState,
    digits: String,
}

impl DtmfAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Consume one digit.
    ///
    /// The terminator yields the digits collected so far (without it). Any
    /// digit fed after that is an error.
    pub fn feed(&mut self, digit: &str) -> CaptureEvent<String> {
        if self.state == CaptureState::Done {
            return CaptureEvent::Errored(CaptureError::DigitsCompleted);
        }

        let mut chars = digit.chars();
        let c = match (chars.next(), chars.next()) {
            (Some(c), None) if VALID_DIGITS.contains(c) => c,
            _ => return CaptureEvent::Errored(CaptureError::InvalidDigit(digit.to_string())),
        };

        if c == TERMINATOR {
            self.state = CaptureState::Done;
            return CaptureEvent::Final(std::mem::take(&mut self.digits));
        }

        self.state = CaptureState::Accumulating;
        self.digits.push(c);
        CaptureEvent::InProgress
    }
}
