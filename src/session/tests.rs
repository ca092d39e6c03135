use super::*;
use crate::core::{
    BotResponse, ByteCountRecognizer, SilenceTts, StaticBotService,
    bot::{GREETING_TEXT, RESPONSE_TEXT},
};
use crate::protocol::Disposition;
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::timeout;

const SESSION_ID: &str = "e160e428-53e2-487c-977d-96989bf5c99d";
const GREETING_AUDIO_BYTES: usize = 100;

struct Harness {
    session: Session,
    outbound: mpsc::Receiver<OutboundFrame>,
    events: mpsc::Receiver<SessionEvent>,
    seq: u64,
}

impl Harness {
    fn new() -> Self {
        let tts = Arc::new(SilenceTts::new(GREETING_AUDIO_BYTES));
        Self::with_bots(Arc::new(StaticBotService::new(tts)), Duration::from_secs(5))
    }

    fn with_bots(bots: Arc<dyn BotService>, collaborator_timeout: Duration) -> Self {
        let services = Arc::new(SessionServices {
            bots,
            recognizer: Arc::new(ByteCountRecognizer::default()),
            collaborator_timeout,
        });
        let (outbound_tx, outbound) = mpsc::channel(64);
        let (events_tx, events) = mpsc::channel(64);
        let session = Session::new(
            ConnectionId::new(),
            SESSION_ID,
            "/bot?name=billing",
            services,
            outbound_tx,
            events_tx,
        );
        Self {
            session,
            outbound,
            events,
            seq: 0,
        }
    }

    /// Send a well-formed control message with the next client seq.
    async fn send(&mut self, kind: &str, parameters: Value) {
        self.seq += 1;
        let text = json!({
            "version": "2",
            "id": SESSION_ID,
            "seq": self.seq,
            "serverseq": self.session.last_server_seq(),
            "type": kind,
            "parameters": parameters,
        })
        .to_string();
        self.session.process_text_message(&text).await.unwrap();
    }

    async fn raw(&mut self, text: &str) {
        self.session.process_text_message(text).await.unwrap();
    }

    /// Wait for one collaborator result and apply it.
    async fn pump(&mut self) {
        let event = timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("collaborator result in time")
            .expect("event channel open");
        self.session.handle_event(event).await.unwrap();
    }

    fn frames(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn messages(&mut self) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                OutboundFrame::Text(text) => Some(serde_json::from_str(&text).unwrap()),
                _ => None,
            })
            .collect()
    }

    /// Run `open` through bot lookup and greeting.
    async fn open(&mut self) -> Vec<OutboundFrame> {
        self.send("open", open_parameters()).await;
        self.pump().await;
        self.pump().await;
        self.frames()
    }
}

fn open_parameters() -> Value {
    json!({
        "organizationId": "d7934305-0972-4844-938e-9060eef73d05",
        "conversationId": "c1",
        "media": [{ "type": "audio", "format": "PCMU", "channels": ["external"], "rate": 8000 }],
        "inputVariables": { "tier": "gold" }
    })
}

fn text_messages(frames: &[OutboundFrame]) -> Vec<Value> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            OutboundFrame::Text(text) => Some(serde_json::from_str(text).unwrap()),
            _ => None,
        })
        .collect()
}

fn assert_disconnect(message: &Value, reason: &str, info: &str) {
    assert_eq!(message["type"], "disconnect");
    assert_eq!(message["parameters"]["reason"], reason);
    assert_eq!(message["parameters"]["info"], info);
    assert_eq!(message["parameters"]["outputVariables"], json!({}));
}

#[tokio::test]
async fn test_open_negotiates_media_and_greets() {
    let mut h = Harness::new();
    let frames = h.open().await;

    let messages = text_messages(&frames);
    assert_eq!(messages.len(), 2);

    let opened = &messages[0];
    assert_eq!(opened["type"], "opened");
    assert_eq!(opened["id"], SESSION_ID);
    assert_eq!(opened["version"], "2");
    assert_eq!(opened["seq"], 1);
    assert_eq!(opened["clientseq"], 1);
    assert_eq!(
        opened["parameters"]["media"],
        json!([{ "type": "audio", "format": "PCMU", "channels": ["external"], "rate": 8000 }])
    );

    let greeting = &messages[1];
    assert_eq!(greeting["type"], "event");
    assert_eq!(greeting["seq"], 2);
    let entity = &greeting["parameters"]["entities"][0];
    assert_eq!(entity["type"], "bot_turn_response");
    assert_eq!(entity["data"]["disposition"], "match");
    assert_eq!(entity["data"]["text"], GREETING_TEXT);

    assert_eq!(
        frames.last(),
        Some(&OutboundFrame::Binary(Bytes::from(vec![0xFF; GREETING_AUDIO_BYTES])))
    );

    assert_eq!(h.session.conversation_id(), Some("c1"));
    assert_eq!(h.session.selected_media().unwrap().format, "PCMU");
    assert_eq!(
        h.session.input_variables().get("tier").map(String::as_str),
        Some("gold")
    );
    assert!(h.session.has_bot());
    assert!(!h.session.is_disconnecting());
}

#[tokio::test]
async fn test_client_seq_gap_disconnects_without_advancing() {
    let mut h = Harness::new();
    h.raw(&json!({"version":"2","id":SESSION_ID,"seq":2,"serverseq":0,"type":"ping","parameters":{}}).to_string())
        .await;

    let messages = h.messages();
    assert_eq!(messages.len(), 1);
    assert_disconnect(&messages[0], "error", INFO_INVALID_CLIENT_SEQ);
    assert_eq!(messages[0]["clientseq"], 0);
    assert_eq!(h.session.last_client_seq(), 0);
    assert!(h.session.is_disconnecting());
}

#[tokio::test]
async fn test_repeated_seq_is_rejected() {
    let mut h = Harness::new();
    h.send("ping", json!({})).await;
    assert_eq!(h.messages()[0]["type"], "pong");

    h.raw(&json!({"version":"2","id":SESSION_ID,"seq":1,"serverseq":1,"type":"ping","parameters":{}}).to_string())
        .await;
    let messages = h.messages();
    assert_disconnect(&messages[0], "error", INFO_INVALID_CLIENT_SEQ);
    assert_eq!(h.session.last_client_seq(), 1);
}

#[tokio::test]
async fn test_server_seq_ahead_disconnects() {
    let mut h = Harness::new();
    h.raw(&json!({"version":"2","id":SESSION_ID,"seq":1,"serverseq":5,"type":"ping","parameters":{}}).to_string())
        .await;

    let messages = h.messages();
    assert_disconnect(&messages[0], "error", INFO_INVALID_SERVER_SEQ);
    assert_eq!(h.session.last_client_seq(), 0);
}

#[tokio::test]
async fn test_wrong_session_id_disconnects() {
    let mut h = Harness::new();
    h.raw(&json!({"version":"2","id":"someone-else","seq":1,"serverseq":0,"type":"ping","parameters":{}}).to_string())
        .await;

    let messages = h.messages();
    assert_disconnect(&messages[0], "error", INFO_INVALID_ID);
    assert_eq!(h.session.last_client_seq(), 0);
}

#[tokio::test]
async fn test_malformed_message_disconnects() {
    let mut h = Harness::new();
    h.raw("{ this is not json").await;

    let messages = h.messages();
    assert_disconnect(&messages[0], "error", INFO_MALFORMED_MESSAGE);
}

#[tokio::test]
async fn test_invalid_parameters_disconnect() {
    let mut h = Harness::new();
    h.send("dtmf", json!({ "key": "1" })).await;

    let messages = h.messages();
    assert_disconnect(&messages[0], "error", INFO_INVALID_PARAMETERS);
    assert_eq!(h.session.last_client_seq(), 1);
}

#[tokio::test]
async fn test_every_violation_disconnects() {
    let mut h = Harness::new();
    h.open().await;

    for seq in [9, 11] {
        let text = json!({
            "version": "2",
            "id": SESSION_ID,
            "seq": seq,
            "serverseq": h.session.last_server_seq(),
            "type": "ping",
            "parameters": {},
        })
        .to_string();
        h.raw(&text).await;
    }
    h.raw("garbage").await;

    let messages = h.messages();
    assert_eq!(messages.len(), 3);
    assert_disconnect(&messages[0], "error", INFO_INVALID_CLIENT_SEQ);
    assert_disconnect(&messages[1], "error", INFO_INVALID_CLIENT_SEQ);
    assert_disconnect(&messages[2], "error", INFO_MALFORMED_MESSAGE);
    assert_eq!(h.session.last_client_seq(), 1);
}

#[tokio::test]
async fn test_open_after_failed_open_disconnects_again() {
    let mut h = Harness::new();
    h.send(
        "open",
        json!({ "conversationId": "c1", "media": [{ "format": "L16", "rate": 16000 }] }),
    )
    .await;
    h.send("open", open_parameters()).await;

    let messages = h.messages();
    assert_eq!(messages.len(), 2);
    assert_disconnect(&messages[0], "error", INFO_NO_SUPPORTED_MEDIA);
    assert_disconnect(&messages[1], "error", INFO_ALREADY_OPENED);
    // No renegotiation and no bot lookup
    assert!(h.session.selected_media().is_none());
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_server_seq_strictly_increasing() {
    let mut h = Harness::new();
    h.open().await;
    for _ in 0..3 {
        h.send("ping", json!({})).await;
    }
    h.send("close", json!({})).await;

    let messages = h.messages();
    let seqs: Vec<u64> = messages.iter().map(|m| m["seq"].as_u64().unwrap()).collect();
    assert_eq!(seqs, vec![3, 4, 5, 6]);
    assert_eq!(messages[3]["type"], "closed");
    assert_eq!(messages[3]["clientseq"], 5);
}

#[tokio::test]
async fn test_no_supported_media() {
    let mut h = Harness::new();
    h.send(
        "open",
        json!({
            "conversationId": "c1",
            "media": [{ "format": "L16", "rate": 16000 }, { "format": "PCMU", "rate": 16000 }]
        }),
    )
    .await;

    let messages = h.messages();
    assert_eq!(messages.len(), 1);
    assert_disconnect(&messages[0], "error", INFO_NO_SUPPORTED_MEDIA);
    assert!(h.session.selected_media().is_none());
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_first_matching_media_is_selected() {
    let mut h = Harness::new();
    h.send(
        "open",
        json!({
            "conversationId": "c1",
            "media": [
                { "format": "PCMA", "rate": 8000 },
                { "format": "PCMU", "rate": 8000, "channels": ["external", "internal"] },
                { "format": "PCMU", "rate": 8000, "channels": ["external"] }
            ]
        }),
    )
    .await;
    h.pump().await;

    let messages = h.messages();
    assert_eq!(
        messages[0]["parameters"]["media"][0]["channels"],
        json!(["external", "internal"])
    );
}

#[tokio::test]
async fn test_second_open_disconnects_and_keeps_media() {
    let mut h = Harness::new();
    h.open().await;

    h.send(
        "open",
        json!({ "conversationId": "c2", "media": [{ "format": "PCMU", "rate": 8000 }] }),
    )
    .await;

    let messages = h.messages();
    assert_disconnect(&messages[0], "error", INFO_ALREADY_OPENED);
    assert_eq!(h.session.conversation_id(), Some("c1"));
    assert_eq!(
        h.session.selected_media().unwrap().channels,
        Some(vec!["external".to_string()])
    );
}

#[tokio::test]
async fn test_ping_and_close() {
    let mut h = Harness::new();
    h.send("ping", json!({})).await;
    h.send("close", json!({})).await;

    let messages = h.messages();
    assert_eq!(messages[0]["type"], "pong");
    assert_eq!(messages[0]["parameters"], json!({}));
    assert_eq!(messages[1]["type"], "closed");
}

#[tokio::test]
async fn test_unknown_type_is_ignored() {
    let mut h = Harness::new();
    h.send("update", json!({ "anything": 1 })).await;
    h.send("pong", json!({})).await;

    assert!(h.messages().is_empty());
    assert_eq!(h.session.last_client_seq(), 2);
    assert!(!h.session.is_disconnecting());
}

#[tokio::test]
async fn test_client_error_is_logged_only() {
    let mut h = Harness::new();
    h.send("error", json!({ "code": 500, "message": "boom" })).await;

    assert!(h.messages().is_empty());
    assert!(!h.session.is_disconnecting());
}

#[tokio::test]
async fn test_audio_turn_ends_session() {
    let mut h = Harness::new();
    h.open().await;

    h.session.process_audio(&vec![0u8; 40_000]).await.unwrap();
    assert_eq!(h.session.capture_mode(), CaptureMode::Idle);
    h.pump().await;

    let frames = h.frames();
    let messages = text_messages(&frames);
    assert_eq!(messages.len(), 2);

    let entity = &messages[0]["parameters"]["entities"][0];
    assert_eq!(entity["type"], "bot_turn_response");
    assert_eq!(entity["data"]["text"], RESPONSE_TEXT);
    assert_eq!(entity["data"]["confidence"], 1.0);

    assert!(matches!(frames[1], OutboundFrame::Binary(_)));
    assert_disconnect(&messages[1], "completed", "");
    assert!(h.session.is_disconnecting());
}

#[tokio::test]
async fn test_audio_before_bot_is_ignored() {
    let mut h = Harness::new();
    h.session.process_audio(&vec![0u8; 40_000]).await.unwrap();

    assert!(!h.session.has_audio_accumulator());
    assert!(h.frames().is_empty());
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_partial_audio_keeps_accumulating() {
    let mut h = Harness::new();
    h.open().await;

    h.session.process_audio(&[0u8; 20_000]).await.unwrap();
    assert_eq!(h.session.capture_mode(), CaptureMode::CapturingAudio);
    assert!(h.session.has_audio_accumulator());
    h.session.process_audio(&[0u8; 20_000]).await.unwrap();
    h.pump().await;

    assert_eq!(text_messages(&h.frames()).len(), 2);
}

#[tokio::test]
async fn test_dtmf_takes_over_from_audio() {
    let mut h = Harness::new();
    h.open().await;

    h.session.process_audio(&[0u8; 20_000]).await.unwrap();
    assert!(h.session.has_audio_accumulator());

    h.send("dtmf", json!({ "digit": "1" })).await;
    assert_eq!(h.session.capture_mode(), CaptureMode::CapturingDtmf);
    assert!(h.session.has_dtmf_accumulator());
    assert!(!h.session.has_audio_accumulator());

    // Audio is ignored while collecting digits
    h.session.process_audio(&vec![0u8; 40_000]).await.unwrap();
    assert!(h.session.has_dtmf_accumulator());
    assert!(h.events.try_recv().is_err());

    h.send("dtmf", json!({ "digit": "2" })).await;
    h.send("dtmf", json!({ "digit": "#" })).await;
    assert_eq!(h.session.capture_mode(), CaptureMode::CapturingDtmf);

    h.pump().await;
    assert_eq!(h.session.capture_mode(), CaptureMode::Idle);

    let messages = h.messages();
    assert_eq!(
        messages[0]["parameters"]["entities"][0]["data"]["text"],
        RESPONSE_TEXT
    );
    assert_disconnect(&messages[1], "completed", "");
}

#[tokio::test]
async fn test_invalid_dtmf_digit_disconnects() {
    let mut h = Harness::new();
    h.open().await;

    h.send("dtmf", json!({ "digit": "Z" })).await;
    let messages = h.messages();
    assert_disconnect(&messages[0], "error", INFO_DTMF_FAILED);
}

#[tokio::test]
async fn test_playback_discards_accumulators() {
    let mut h = Harness::new();
    h.open().await;

    h.session.process_audio(&[0u8; 30_000]).await.unwrap();
    h.send("playback_started", json!({})).await;
    assert!(h.session.is_playing());

    h.session.process_audio(&[0u8; 30_000]).await.unwrap();
    assert!(!h.session.has_audio_accumulator());
    assert_eq!(h.session.capture_mode(), CaptureMode::Idle);

    h.send("dtmf", json!({ "digit": "1" })).await;
    assert!(!h.session.has_dtmf_accumulator());

    h.send("playback_completed", json!({})).await;
    assert!(!h.session.is_playing());

    // The discarded 30,000 bytes do not count towards the next capture
    h.session.process_audio(&[0u8; 30_000]).await.unwrap();
    assert!(h.session.has_audio_accumulator());
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_playback_ends_partial_dtmf_episode() {
    let mut h = Harness::new();
    h.open().await;

    h.send("dtmf", json!({ "digit": "1" })).await;
    assert_eq!(h.session.capture_mode(), CaptureMode::CapturingDtmf);

    h.send("playback_started", json!({})).await;
    h.send("dtmf", json!({ "digit": "2" })).await;
    h.send("playback_completed", json!({})).await;
    assert!(!h.session.has_dtmf_accumulator());
    assert_eq!(h.session.capture_mode(), CaptureMode::Idle);

    // Speech is captured again and reaches the bot
    h.session.process_audio(&vec![0u8; 40_000]).await.unwrap();
    h.pump().await;
    let messages = h.messages();
    assert_eq!(
        messages[0]["parameters"]["entities"][0]["data"]["text"],
        RESPONSE_TEXT
    );
}

#[tokio::test]
async fn test_playback_keeps_dtmf_mode_while_digits_are_with_the_bot() {
    let mut h = Harness::new();
    h.open().await;

    h.send("dtmf", json!({ "digit": "7" })).await;
    h.send("dtmf", json!({ "digit": "#" })).await;
    h.send("playback_started", json!({})).await;
    h.send("dtmf", json!({ "digit": "8" })).await;
    assert_eq!(h.session.capture_mode(), CaptureMode::CapturingDtmf);

    h.pump().await;
    assert_eq!(h.session.capture_mode(), CaptureMode::Idle);
}

#[tokio::test]
async fn test_disconnecting_session_ignores_input() {
    let mut h = Harness::new();
    h.open().await;
    h.raw("garbage").await;
    h.frames();

    h.session.process_audio(&vec![0u8; 40_000]).await.unwrap();
    h.session.process_dtmf("#").await.unwrap();
    assert!(!h.session.has_audio_accumulator());
    assert!(!h.session.has_dtmf_accumulator());
    assert!(h.events.try_recv().is_err());

    // The closing handshake still works
    h.send("close", json!({})).await;
    assert_eq!(h.messages()[0]["type"], "closed");
}

struct NoBotService;

#[async_trait]
impl BotService for NoBotService {
    async fn find_bot(
        &self,
        _request_target: &str,
        _input_variables: &VariableMap,
    ) -> Result<Option<Arc<dyn BotResource>>, BotError> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_missing_bot_disconnects() {
    let mut h = Harness::with_bots(Arc::new(NoBotService), Duration::from_secs(5));
    h.send("open", open_parameters()).await;
    h.pump().await;

    let messages = h.messages();
    assert_eq!(messages.len(), 1);
    assert_disconnect(&messages[0], "error", INFO_BOT_NOT_FOUND);
    assert!(!h.session.has_bot());
}

struct StalledBotService;

#[async_trait]
impl BotService for StalledBotService {
    async fn find_bot(
        &self,
        _request_target: &str,
        _input_variables: &VariableMap,
    ) -> Result<Option<Arc<dyn BotResource>>, BotError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_stalled_bot_times_out() {
    let mut h = Harness::with_bots(Arc::new(StalledBotService), Duration::from_millis(50));
    h.send("open", open_parameters()).await;
    h.pump().await;

    let messages = h.messages();
    assert_disconnect(&messages[0], "error", INFO_BOT_LOOKUP_FAILED);
}

struct FailingBot;

#[async_trait]
impl BotResource for FailingBot {
    async fn initial_response(&self) -> Result<BotResponse, BotError> {
        Ok(BotResponse::new(Disposition::Match, "hi"))
    }

    async fn bot_response(&self, _input: &str) -> Result<BotResponse, BotError> {
        Err(BotError::Response("no brain".to_string()))
    }
}

struct FailingBotService;

#[async_trait]
impl BotService for FailingBotService {
    async fn find_bot(
        &self,
        _request_target: &str,
        _input_variables: &VariableMap,
    ) -> Result<Option<Arc<dyn BotResource>>, BotError> {
        Ok(Some(Arc::new(FailingBot)))
    }
}

#[tokio::test]
async fn test_failed_bot_response_disconnects() {
    let mut h = Harness::with_bots(Arc::new(FailingBotService), Duration::from_secs(5));
    let frames = h.open().await;
    // Greeting without audio is text only
    assert_eq!(frames.len(), 2);

    h.send("dtmf", json!({ "digit": "#" })).await;
    h.pump().await;

    let messages = h.messages();
    assert_disconnect(&messages[0], "error", INFO_BOT_RESPONSE_FAILED);
    assert_eq!(h.session.capture_mode(), CaptureMode::Idle);
}

#[tokio::test]
async fn test_close_is_idempotent_and_final() {
    let mut h = Harness::new();
    h.open().await;

    h.session.close().await;
    h.session.close().await;
    assert!(h.session.is_closed());
    assert_eq!(h.frames(), vec![OutboundFrame::Close]);

    h.send("ping", json!({})).await;
    h.session.process_audio(&vec![0u8; 40_000]).await.unwrap();
    assert!(h.frames().is_empty());
    assert!(matches!(
        h.session.send_pong().await,
        Err(crate::errors::SessionError::Closed)
    ));
}

#[tokio::test]
async fn test_close_cancels_pending_collaborators() {
    let mut h = Harness::with_bots(Arc::new(StalledBotService), Duration::from_secs(30));
    h.send("open", open_parameters()).await;
    h.session.close().await;

    // The spawned lookup is cancelled and drops its event sender
    drop(h.session);
    let next = timeout(Duration::from_secs(1), h.events.recv()).await.unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn test_late_event_after_close_is_dropped() {
    let mut h = Harness::new();
    h.send("open", open_parameters()).await;
    let event = timeout(Duration::from_secs(2), h.events.recv())
        .await
        .unwrap()
        .unwrap();

    h.session.close().await;
    h.frames();
    h.session.handle_event(event).await.unwrap();
    assert!(h.frames().is_empty());
    assert!(!h.session.has_bot());
}
