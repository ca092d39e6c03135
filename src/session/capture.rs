//! Capture arbitration between caller audio and DTMF.
//!
//! At most one accumulator exists per session, so audio and DTMF capture can
//! never be active at the same time. Switching to DTMF drops any speech
//! accumulator together with whatever it would have reported.

use tracing::{debug, info, warn};

use super::{
    CaptureMode, INFO_ASR_FAILED, INFO_DTMF_FAILED, ResponseOrigin, Session,
};
use crate::core::{CaptureEvent, CaptureState, DtmfAccumulator, TranscriptAccumulator};
use crate::errors::SessionResult;
use crate::protocol::{DisconnectReason, VariableMap};

/// The session's single in-flight accumulator.
#[derive(Default)]
pub(super) enum Accumulator {
    #[default]
    None,
    Audio(Box<dyn TranscriptAccumulator>),
    Dtmf(DtmfAccumulator),
}

impl Session {
    /// Feed a binary frame of caller audio to speech recognition.
    pub async fn process_audio(&mut self, audio: &[u8]) -> SessionResult<()> {
        if self.disconnecting || self.closed || self.bot.is_none() {
            return Ok(());
        }

        if self.capture_mode == CaptureMode::CapturingDtmf {
            return Ok(());
        }

        // No barge-in: input during playback is dropped with any partial capture
        if self.playing {
            self.discard_accumulators();
            return Ok(());
        }

        let reusable = matches!(
            &self.accumulator,
            Accumulator::Audio(accumulator) if accumulator.state() != CaptureState::Done
        );
        if !reusable {
            self.accumulator = Accumulator::Audio(self.services.recognizer.start());
        }
        let Accumulator::Audio(accumulator) = &mut self.accumulator else {
            return Ok(());
        };

        self.capture_mode = CaptureMode::CapturingAudio;
        match accumulator.feed(audio) {
            CaptureEvent::InProgress => Ok(()),
            CaptureEvent::Final(transcript) => {
                self.capture_mode = CaptureMode::Idle;
                info!(
                    connection_id = %self.connection_id,
                    confidence = transcript.confidence,
                    "Final transcript received"
                );
                self.request_bot_response(ResponseOrigin::Speech, transcript.text);
                Ok(())
            }
            CaptureEvent::Errored(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "Speech recognition failed");
                self.send_disconnect(DisconnectReason::Error, INFO_ASR_FAILED, VariableMap::new())
                    .await
            }
        }
    }

    /// Feed one DTMF digit, switching the session into DTMF capture.
    pub async fn process_dtmf(&mut self, digit: &str) -> SessionResult<()> {
        if self.disconnecting || self.closed || self.bot.is_none() {
            return Ok(());
        }

        if self.playing {
            self.discard_accumulators();
            return Ok(());
        }

        if self.capture_mode != CaptureMode::CapturingDtmf {
            debug!(connection_id = %self.connection_id, "Switching to DTMF capture");
            self.capture_mode = CaptureMode::CapturingDtmf;
            if matches!(self.accumulator, Accumulator::Audio(_)) {
                self.accumulator = Accumulator::None;
            }
        }

        let reusable = matches!(
            &self.accumulator,
            Accumulator::Dtmf(accumulator) if accumulator.state() != CaptureState::Done
        );
        if !reusable {
            self.accumulator = Accumulator::Dtmf(DtmfAccumulator::new());
        }
        let Accumulator::Dtmf(accumulator) = &mut self.accumulator else {
            return Ok(());
        };

        match accumulator.feed(digit) {
            CaptureEvent::InProgress => Ok(()),
            CaptureEvent::Final(digits) => {
                info!(
                    connection_id = %self.connection_id,
                    digits = digits.len(),
                    "DTMF digits collected"
                );
                self.dtmf_response_pending = true;
                self.request_bot_response(ResponseOrigin::Dtmf, digits);
                Ok(())
            }
            CaptureEvent::Errored(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "DTMF capture failed");
                self.send_disconnect(DisconnectReason::Error, INFO_DTMF_FAILED, VariableMap::new())
                    .await
            }
        }
    }

    pub(super) fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    /// Drop any partial capture. DTMF mode survives only while collected
    /// digits are still waiting on the bot.
    fn discard_accumulators(&mut self) {
        self.accumulator = Accumulator::None;
        if !(self.capture_mode == CaptureMode::CapturingDtmf && self.dtmf_response_pending) {
            self.capture_mode = CaptureMode::Idle;
        }
    }
}
