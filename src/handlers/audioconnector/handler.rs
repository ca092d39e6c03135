//! AudioConnector WebSocket handler
//!
//! Each accepted upgrade gets a [`Session`] in the registry and one task that
//! drives it. The task multiplexes inbound frames with the results of
//! collaborator calls so all session mutation happens in one place. A second
//! task drains the session's outbound channel into the socket.

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, Uri},
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::auth::signature::header_value;
use crate::auth::{Auth, SESSION_ID_HEADER};
use crate::errors::AuthError;
use crate::middleware::ClientIp;
use crate::protocol::{
    DisconnectParameters, DisconnectReason, MAX_BINARY_MESSAGE_SIZE, PROTOCOL_VERSION,
    ServerEnvelope, ServerMessage, VariableMap,
};
use crate::session::{
    ConnectionId, INFO_SESSION_NOT_FOUND, OutboundFrame, Session, SessionEvent,
};
use crate::state::AppState;

/// Outbound frames buffered per connection
const OUTBOUND_BUFFER_SIZE: usize = 256;

/// Collaborator results buffered per connection
const EVENT_BUFFER_SIZE: usize = 32;

/// Largest inbound frame accepted from a client
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Time the writer gets to flush the final frames after the session closes
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// AudioConnector WebSocket handler
///
/// Runs after the signature gate. The upgrade must carry an
/// `audiohook-session-id` header; its value becomes the session id every
/// control message is checked against. The request path and query identify
/// the bot.
pub async fn audioconnector_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<Auth>,
    client_ip: Option<Extension<ClientIp>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = header_value(&headers, SESSION_ID_HEADER).filter(|id| !id.is_empty())
    else {
        warn!(path = %uri.path(), "Upgrade request without a session id");
        return AuthError::MissingSessionId.into_response();
    };

    let request_target = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let client_ip = client_ip.map(|Extension(ip)| ip);

    info!(
        session_id = %session_id,
        key_id = auth.key_id.as_deref().unwrap_or_default(),
        signed = auth.signed,
        request_target = %request_target,
        "AudioConnector upgrade accepted"
    );

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_FRAME_SIZE)
        .on_upgrade(move |socket| {
            handle_audioconnector_socket(socket, state, session_id, request_target, client_ip)
        })
}

/// Drive one AudioConnector connection until either side closes it.
async fn handle_audioconnector_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    session_id: String,
    request_target: String,
    client_ip: Option<ClientIp>,
) {
    let connection_id = ConnectionId::new();
    info!(
        connection_id = %connection_id,
        session_id = %session_id,
        "AudioConnector connection established"
    );

    let (sender, mut receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_BUFFER_SIZE);
    let (events_tx, mut events_rx) = mpsc::channel::<SessionEvent>(EVENT_BUFFER_SIZE);

    let session = Session::new(
        connection_id,
        session_id.clone(),
        request_target,
        state.services.clone(),
        outbound_tx.clone(),
        events_tx,
    );

    let mut writer = tokio::spawn(write_frames(sender, outbound_rx, connection_id));

    if let Err(e) = state.sessions.create(session) {
        error!(connection_id = %connection_id, error = %e, "Failed to register session");
        writer.abort();
        release_slot(&state, client_ip);
        return;
    }

    loop {
        select! {
            frame = receiver.next() => {
                let keep_going = match frame {
                    Some(Ok(Message::Text(text))) => {
                        route_text(&state, connection_id, &session_id, &outbound_tx, text.as_str()).await
                    }
                    Some(Ok(Message::Binary(data))) => {
                        route_binary(&state, connection_id, &session_id, &outbound_tx, &data).await
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(
                            connection_id = %connection_id,
                            code = frame.as_ref().map(|f| f.code),
                            "Client closed the connection"
                        );
                        false
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => true,
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "WebSocket error, closing session");
                        false
                    }
                    None => {
                        info!(connection_id = %connection_id, "WebSocket stream ended");
                        false
                    }
                };

                if !keep_going {
                    break;
                }
            }
            Some(event) = events_rx.recv() => {
                let Ok(session) = state.sessions.lookup(connection_id) else {
                    debug!(connection_id = %connection_id, "Dropping event for unregistered session");
                    continue;
                };
                let result = session.lock().await.handle_event(event).await;
                if let Err(e) = result {
                    warn!(connection_id = %connection_id, error = %e, "Failed to apply collaborator result");
                    break;
                }
            }
        }
    }

    // Exactly one teardown path gets the session out of the registry
    if let Ok(session) = state.sessions.remove(connection_id) {
        session.lock().await.close().await;
    }
    drop(outbound_tx);

    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(connection_id = %connection_id, error = %e, "Writer task failed"),
        Err(_) => {
            warn!(connection_id = %connection_id, "Writer did not drain in time, aborting");
            writer.abort();
        }
    }

    release_slot(&state, client_ip);
    info!(connection_id = %connection_id, "AudioConnector connection terminated");
}

/// Returns `false` when the connection should be torn down.
async fn route_text(
    state: &AppState,
    connection_id: ConnectionId,
    session_id: &str,
    outbound: &mpsc::Sender<OutboundFrame>,
    text: &str,
) -> bool {
    let Ok(session) = state.sessions.lookup(connection_id) else {
        return report_missing_session(connection_id, session_id, outbound).await;
    };

    let result = session.lock().await.process_text_message(text).await;
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(connection_id = %connection_id, error = %e, "Failed to process control message");
            false
        }
    }
}

async fn route_binary(
    state: &AppState,
    connection_id: ConnectionId,
    session_id: &str,
    outbound: &mpsc::Sender<OutboundFrame>,
    audio: &[u8],
) -> bool {
    let Ok(session) = state.sessions.lookup(connection_id) else {
        return report_missing_session(connection_id, session_id, outbound).await;
    };

    let result = session.lock().await.process_audio(audio).await;
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(connection_id = %connection_id, error = %e, "Failed to process audio frame");
            false
        }
    }
}

/// A live connection without a session means the registry lost track of it.
async fn report_missing_session(
    connection_id: ConnectionId,
    session_id: &str,
    outbound: &mpsc::Sender<OutboundFrame>,
) -> bool {
    error!(
        connection_id = %connection_id,
        "Invariant violation: frame received for a connection with no session"
    );

    match missing_session_disconnect(session_id) {
        Ok(text) => outbound.send(OutboundFrame::Text(text)).await.is_ok(),
        Err(e) => {
            error!(connection_id = %connection_id, error = %e, "Failed to serialize disconnect");
            false
        }
    }
}

/// A standalone `disconnect` for a connection that has no session state.
pub(crate) fn missing_session_disconnect(session_id: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ServerEnvelope {
        id: session_id.to_string(),
        version: PROTOCOL_VERSION,
        seq: 1,
        clientseq: 0,
        message: ServerMessage::Disconnect(DisconnectParameters {
            reason: DisconnectReason::Error,
            info: INFO_SESSION_NOT_FOUND.to_string(),
            output_variables: VariableMap::new(),
        }),
    })
}

/// Writer task: drains outbound frames into the socket.
async fn write_frames(
    mut sender: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<OutboundFrame>,
    connection_id: ConnectionId,
) {
    while let Some(frame) = frames.recv().await {
        let result = match frame {
            OutboundFrame::Text(text) => sender.send(Message::Text(text.into())).await,
            OutboundFrame::Binary(data) => {
                debug_assert!(data.len() <= MAX_BINARY_MESSAGE_SIZE);
                sender.send(Message::Binary(data)).await
            }
            OutboundFrame::Close => {
                debug!(connection_id = %connection_id, "Closing WebSocket");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        };

        if let Err(e) = result {
            warn!(connection_id = %connection_id, error = %e, "Failed to send WebSocket frame");
            break;
        }
    }
}

fn release_slot(state: &AppState, client_ip: Option<ClientIp>) {
    if let Some(ClientIp(ip)) = client_ip {
        state.release_connection(ip);
    }
}
