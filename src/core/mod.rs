//! Session collaborators
//!
//! The session engine talks to speech recognition, DTMF collection, the
//! dialogue bot and speech synthesis only through the traits defined here.
//! Each module also ships a stub implementation so the gateway runs end to
//! end without external services.

pub mod asr;
pub mod bot;
pub mod capture;
pub mod dtmf;
pub mod tts;

pub use asr::{ByteCountRecognizer, SpeechRecognizer, Transcript, TranscriptAccumulator};
pub use bot::{BotError, BotResource, BotResponse, BotService, StaticBotService};
pub use capture::{CaptureError, CaptureEvent, CaptureState};
pub use dtmf::DtmfAccumulator;
pub use tts::{SilenceTts, TtsError, TtsService};
