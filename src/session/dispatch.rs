use tracing::{debug, info, warn};

use super::{
    INFO_ALREADY_OPENED, INFO_NO_SUPPORTED_MEDIA, Session, SessionEvent,
};
use crate::errors::SessionResult;
use crate::protocol::{ClientMessage, DisconnectReason, OpenParameters, VariableMap, select_media};

impl Session {
    /// Route a validated control message to its handler.
    pub(super) async fn dispatch(&mut self, message: ClientMessage) -> SessionResult<()> {
        // After a disconnect only the closing handshake, liveness and a repeated
        // open are honoured
        if self.disconnecting
            && !matches!(
                message,
                ClientMessage::Open(_)
                    | ClientMessage::Close
                    | ClientMessage::Ping
                    | ClientMessage::Error(_)
                    | ClientMessage::PlaybackStarted
                    | ClientMessage::PlaybackCompleted
            )
        {
            debug!(
                connection_id = %self.connection_id,
                kind = message.kind(),
                "Ignoring message on disconnecting session"
            );
            return Ok(());
        }

        match message {
            ClientMessage::Open(parameters) => self.handle_open(parameters).await,
            ClientMessage::Close => {
                info!(connection_id = %self.connection_id, "Received close");
                self.send_closed().await
            }
            ClientMessage::Ping => self.send_pong().await,
            ClientMessage::Dtmf(parameters) => self.process_dtmf(&parameters.digit).await,
            ClientMessage::PlaybackStarted => {
                debug!(connection_id = %self.connection_id, "Playback started");
                self.set_playing(true);
                Ok(())
            }
            ClientMessage::PlaybackCompleted => {
                debug!(connection_id = %self.connection_id, "Playback completed");
                self.set_playing(false);
                Ok(())
            }
            ClientMessage::Error(parameters) => {
                warn!(
                    connection_id = %self.connection_id,
                    code = ?parameters.code,
                    message = parameters.message.as_deref().unwrap_or_default(),
                    "Client reported an error"
                );
                Ok(())
            }
            ClientMessage::Unrecognized(kind) => {
                info!(
                    connection_id = %self.connection_id,
                    kind = %kind,
                    "No handler for message type, ignoring"
                );
                Ok(())
            }
        }
    }

    /// Negotiate media and look up the bot for this connection.
    ///
    /// `opened` is sent once the bot lookup succeeds.
    async fn handle_open(&mut self, parameters: OpenParameters) -> SessionResult<()> {
        if self.conversation_id.is_some() {
            warn!(connection_id = %self.connection_id, "Received a second open");
            return self
                .send_disconnect(DisconnectReason::Error, INFO_ALREADY_OPENED, VariableMap::new())
                .await;
        }

        if self.disconnecting {
            debug!(connection_id = %self.connection_id, "Ignoring open on disconnecting session");
            return Ok(());
        }

        info!(
            connection_id = %self.connection_id,
            conversation_id = %parameters.conversation_id,
            offered = parameters.media.len(),
            "Received open"
        );
        self.conversation_id = Some(parameters.conversation_id);

        let Some(media) = select_media(&parameters.media).cloned() else {
            return self
                .send_disconnect(
                    DisconnectReason::Error,
                    INFO_NO_SUPPORTED_MEDIA,
                    VariableMap::new(),
                )
                .await;
        };
        debug!(connection_id = %self.connection_id, ?media, "Selected media");
        self.selected_media = Some(media);

        if let Some(input_variables) = parameters.input_variables {
            self.input_variables = input_variables;
        }

        let bots = self.services.bots.clone();
        let request_target = self.request_target.clone();
        let input_variables = self.input_variables.clone();
        self.spawn_collaborator(
            async move { bots.find_bot(&request_target, &input_variables).await },
            SessionEvent::BotLookup,
        );
        Ok(())
    }
}
