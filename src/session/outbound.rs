use bytes::Bytes;
use tracing::{debug, info};

use super::{OutboundFrame, Session};
use crate::core::BotResponse;
use crate::errors::{SessionError, SessionResult};
use crate::protocol::{
    BotTurnResponseData, DisconnectParameters, DisconnectReason, Disposition, EmptyParameters,
    EventEntity, EventParameters, MAX_BINARY_MESSAGE_SIZE, OpenedParameters, PROTOCOL_VERSION,
    ServerEnvelope, ServerMessage, VariableMap,
};

/// Split `audio` into frames of at most `max_chunk` bytes, in order.
///
/// Payloads that fit in one frame (including empty ones) are returned as a
/// single frame. Chunks share the original buffer.
pub fn chunk_audio(audio: Bytes, max_chunk: usize) -> Vec<Bytes> {
    let max_chunk = max_chunk.max(1);
    if audio.len() <= max_chunk {
        return vec![audio];
    }

    let len = audio.len();
    (0..len)
        .step_by(max_chunk)
        .map(|start| audio.slice(start..(start + max_chunk).min(len)))
        .collect()
}

impl Session {
    /// Stamp a server message with the session id, version and sequence numbers.
    pub fn create_message(&mut self, message: ServerMessage) -> ServerEnvelope {
        self.last_server_seq += 1;
        ServerEnvelope {
            id: self.session_id.clone(),
            version: PROTOCOL_VERSION,
            seq: self.last_server_seq,
            clientseq: self.last_client_seq,
            message,
        }
    }

    pub async fn send(&mut self, message: ServerMessage) -> SessionResult<()> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        let envelope = self.create_message(message);
        let text = serde_json::to_string(&envelope)?;

        match &envelope.message {
            ServerMessage::Event(event) => debug!(
                connection_id = %self.connection_id,
                seq = envelope.seq,
                entity = event.entities.first().map(EventEntity::kind).unwrap_or_default(),
                "Sending event message"
            ),
            other => debug!(
                connection_id = %self.connection_id,
                seq = envelope.seq,
                kind = other.kind(),
                "Sending control message"
            ),
        }

        self.outbound
            .send(OutboundFrame::Text(text))
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }

    /// Send bot audio as binary frames of at most 64,000 bytes.
    pub async fn send_audio(&mut self, audio: Bytes) -> SessionResult<()> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        let total = audio.len();
        let chunks = chunk_audio(audio, MAX_BINARY_MESSAGE_SIZE);
        debug!(
            connection_id = %self.connection_id,
            bytes = total,
            frames = chunks.len(),
            "Sending audio"
        );

        for chunk in chunks {
            self.outbound
                .send(OutboundFrame::Binary(chunk))
                .await
                .map_err(|_| SessionError::ChannelClosed)?;
        }
        Ok(())
    }

    /// Send `disconnect` and stop protocol progress on this session.
    pub async fn send_disconnect(
        &mut self,
        reason: DisconnectReason,
        info: &str,
        output_variables: VariableMap,
    ) -> SessionResult<()> {
        self.disconnecting = true;
        info!(
            connection_id = %self.connection_id,
            session_id = %self.session_id,
            ?reason,
            info,
            "Disconnecting session"
        );

        self.send(ServerMessage::Disconnect(DisconnectParameters {
            reason,
            info: info.to_string(),
            output_variables,
        }))
        .await
    }

    pub async fn send_turn_response(
        &mut self,
        disposition: Disposition,
        text: Option<String>,
        confidence: Option<f64>,
    ) -> SessionResult<()> {
        self.send(ServerMessage::Event(EventParameters {
            entities: vec![EventEntity::BotTurnResponse(BotTurnResponseData {
                disposition,
                text,
                confidence,
            })],
        }))
        .await
    }

    pub(super) async fn send_opened(&mut self) -> SessionResult<()> {
        let media = self.selected_media.clone().into_iter().collect();
        self.send(ServerMessage::Opened(OpenedParameters { media }))
            .await
    }

    pub(super) async fn send_closed(&mut self) -> SessionResult<()> {
        self.send(ServerMessage::Closed(EmptyParameters {})).await
    }

    pub(super) async fn send_pong(&mut self) -> SessionResult<()> {
        self.send(ServerMessage::Pong(EmptyParameters {})).await
    }

    /// Relay a bot turn: text as a `bot_turn_response` event, then audio, then
    /// `disconnect(completed)` when the bot ends the session.
    pub(super) async fn relay_bot_response(&mut self, response: BotResponse) -> SessionResult<()> {
        if response.text.is_some() {
            self.send_turn_response(response.disposition, response.text, response.confidence)
                .await?;
        }

        if let Some(audio) = response.audio
            && !audio.is_empty()
        {
            self.send_audio(audio).await?;
        }

        if response.end_session {
            self.send_disconnect(DisconnectReason::Completed, "", VariableMap::new())
                .await?;
        }
        Ok(())
    }
}
