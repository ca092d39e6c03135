//! AudioConnector wire protocol
//!
//! Control messages travel as JSON text frames inside a common envelope
//! (`id`, `version`, `seq`, `serverseq`/`clientseq`, `type`, `parameters`);
//! audio travels as raw binary frames.
//!
//! Inbound frames are decoded in two stages. [`ClientEnvelope::parse`] only
//! checks the envelope so the session can validate sequencing before looking
//! at the payload, then [`ClientEnvelope::message`] turns the `type` and
//! `parameters` into a typed [`ClientMessage`].

pub mod messages;

pub use messages::{
    BotTurnResponseData, ClientEnvelope, ClientMessage, DisconnectParameters, DisconnectReason,
    Disposition, DtmfParameters, EmptyParameters, ErrorParameters, EventEntity, EventParameters,
    MediaParameter, OpenParameters, OpenedParameters, ProtocolError, ServerEnvelope,
    ServerMessage, VariableMap,
};

/// Protocol version stamped on every outbound message.
pub const PROTOCOL_VERSION: &str = "2";

/// Largest binary frame the gateway sends.
pub const MAX_BINARY_MESSAGE_SIZE: usize = 64_000;

/// The only media format the gateway accepts.
pub const SUPPORTED_MEDIA_FORMAT: &str = "PCMU";

/// The only sample rate the gateway accepts.
pub const SUPPORTED_MEDIA_RATE: u32 = 8000;

/// Pick the first offered descriptor the gateway can handle.
pub fn select_media(offered: &[MediaParameter]) -> Option<&MediaParameter> {
    offered
        .iter()
        .find(|media| media.format == SUPPORTED_MEDIA_FORMAT && media.rate == SUPPORTED_MEDIA_RATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(format: &str, rate: u32) -> MediaParameter {
        MediaParameter {
            kind: Some("audio".to_string()),
            format: format.to_string(),
            channels: Some(vec!["external".to_string()]),
            rate,
        }
    }

    #[test]
    fn test_select_first_pcmu_8000() {
        let offered = vec![
            media("L16", 16000),
            media("PCMU", 16000),
            media("PCMU", 8000),
            media("PCMU", 8000),
        ];
        let selected = select_media(&offered).unwrap();
        assert!(std::ptr::eq(selected, &offered[2]));
    }

    #[test]
    fn test_no_supported_media() {
        let offered = vec![media("L16", 8000), media("pcmu", 8000)];
        assert!(select_media(&offered).is_none());
        assert!(select_media(&[]).is_none());
    }
}
