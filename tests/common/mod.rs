//! Shared helpers for the integration suites.
//!
//! Spins up the real router on an ephemeral port and speaks the
//! AudioConnector protocol to it through a `tokio-tungstenite` client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use audioconnector_gateway::auth::{
    REQUIRED_COMPONENTS, SigningParameters, sign_request,
};
use audioconnector_gateway::config::ApiKeyEntry;
use audioconnector_gateway::{ServerConfig, routes, state::AppState};

pub const API_KEY: &str = "ApiKey1";
pub const SECRET: &str = "Secret1";
pub const SESSION_ID: &str = "e160e428-53e2-487c-977d-96989bf5c99d";
pub const ORGANIZATION_ID: &str = "d7934305-0972-4844-938e-9060eef73d05";
pub const CORRELATION_ID: &str = "f3a8b6b4-8b4a-4a0e-9f0c-000000000001";
pub const NONCE: &str = "VGhpc0lzQVVuaXF1ZU5vbmNl";
pub const TARGET: &str = "/api/v1/audiohook/ws?bot=billing";

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration with one API key and rate limiting off.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.allow_unsigned_requests = false;
    config.rate_limit_requests_per_second = 100_000;
    config.api_keys.push(ApiKeyEntry {
        key_id: API_KEY.to_string(),
        secret: SECRET.to_string(),
    });
    config
}

/// Serve the full application on an ephemeral local port.
pub async fn start_server(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes::create_app(state);

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    addr
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Upgrade request carrying the AudioConnector identification headers.
pub fn unsigned_request(addr: SocketAddr) -> Request {
    unsigned_request_to(addr, TARGET)
}

/// Upgrade request for an arbitrary path and query.
pub fn unsigned_request_to(addr: SocketAddr, target: &str) -> Request {
    let mut request = format!("ws://{addr}{target}").into_client_request().unwrap();
    let headers = request.headers_mut();
    headers.insert("x-api-key", HeaderValue::from_static(API_KEY));
    headers.insert("audiohook-organization-id", HeaderValue::from_static(ORGANIZATION_ID));
    headers.insert("audiohook-session-id", HeaderValue::from_static(SESSION_ID));
    headers.insert("audiohook-correlation-id", HeaderValue::from_static(CORRELATION_ID));
    request
}

/// Sign `request` the way an AudioConnector client does.
pub fn sign(request: &mut Request, secret: &[u8]) {
    sign_target(request, TARGET, secret);
}

/// Sign `request` with `target` as the covered `@request-target`.
pub fn sign_target(request: &mut Request, target: &str, secret: &[u8]) {
    let signing = SigningParameters {
        label: "sig1".to_string(),
        components: REQUIRED_COMPONENTS.iter().map(|c| c.to_string()).collect(),
        keyid: API_KEY.to_string(),
        nonce: NONCE.to_string(),
        created: now(),
        expires: None,
    };
    let (input, signature) = sign_request(request.headers(), target, &signing, secret).unwrap();
    let headers = request.headers_mut();
    headers.insert("signature-input", HeaderValue::from_str(&input).unwrap());
    headers.insert("signature", HeaderValue::from_str(&signature).unwrap());
}

pub fn signed_request(addr: SocketAddr) -> Request {
    let mut request = unsigned_request(addr);
    sign(&mut request, SECRET.as_bytes());
    request
}

/// HTTP status of a refused upgrade.
pub async fn rejected_status(request: Request) -> u16 {
    match connect_async(request).await {
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(e) => panic!("unexpected handshake error: {e}"),
        Ok(_) => panic!("upgrade unexpectedly accepted"),
    }
}

/// An AudioConnector client that tracks sequence numbers.
pub struct Client {
    pub socket: ClientSocket,
    pub seq: u64,
    pub server_seq: u64,
}

impl Client {
    pub async fn connect(request: Request) -> Self {
        let (socket, response) = connect_async(request).await.unwrap();
        assert_eq!(response.status().as_u16(), 101);
        Self {
            socket,
            seq: 0,
            server_seq: 0,
        }
    }

    pub async fn send(&mut self, kind: &str, parameters: Value) {
        self.seq += 1;
        let text = json!({
            "version": "2",
            "id": SESSION_ID,
            "seq": self.seq,
            "serverseq": self.server_seq,
            "type": kind,
            "parameters": parameters,
        });
        self.send_raw(text.to_string()).await;
    }

    pub async fn send_raw(&mut self, text: String) {
        self.socket.send(Message::text(text)).await.unwrap();
    }

    pub async fn send_audio(&mut self, audio: Vec<u8>) {
        self.socket.send(Message::binary(audio)).await.unwrap();
    }

    pub async fn open(&mut self) {
        self.send(
            "open",
            json!({
                "organizationId": ORGANIZATION_ID,
                "conversationId": "090eaa2f-72fa-480a-83e0-8667ff89c0ec",
                "media": [{"type": "audio", "format": "PCMU", "channels": ["external"], "rate": 8000}],
                "inputVariables": {"account": "42"}
            }),
        )
        .await;
    }

    /// Next frame that is not a WebSocket ping or pong.
    pub async fn next_frame(&mut self) -> Message {
        loop {
            let frame = timeout(RECEIVE_TIMEOUT, self.socket.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("socket closed")
                .expect("socket error");
            if !matches!(frame, Message::Ping(_) | Message::Pong(_)) {
                return frame;
            }
        }
    }

    /// Next control message; records its `seq` as the last server seq.
    pub async fn recv_json(&mut self) -> Value {
        match self.next_frame().await {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                self.server_seq = value["seq"].as_u64().unwrap();
                value
            }
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    /// Collect binary frames until `total` bytes have arrived.
    pub async fn recv_audio(&mut self, total: usize) -> Vec<u8> {
        let mut audio = Vec::with_capacity(total);
        while audio.len() < total {
            match self.next_frame().await {
                Message::Binary(data) => audio.extend_from_slice(&data),
                other => panic!("expected a binary frame, got {other:?}"),
            }
        }
        audio
    }

    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}

/// Poll until `check` holds or the receive timeout passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + RECEIVE_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
