//! Text messages exchanged over the job socket.
//!
//! Binary messages carry segments and are handled by [`crate::codec`].

use serde::Deserialize;
use thiserror::Error;

const NEW_FRAMES: &str = "new_frames";
const NO_SEGMENT: &str = "no_seg";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("bad availability announcement {payload:?}: {reason}")]
    BadAnnouncement { payload: String, reason: String },
    #[error("bad segment id in {0:?}")]
    BadSegmentId(String),
}

/// Body of a `new_frames` announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Availability {
    /// Latest segment ready on the server.
    #[serde(rename = "l")]
    pub latest: u32,
    /// Total segments the job will produce.
    #[serde(rename = "f")]
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Queued,
    NewFrames(Availability),
    SegmentNotReady(u32),
    /// Cancellation acknowledged.
    Cancelled,
    Failed,
    /// Anything else. Logged and ignored.
    Unknown(String),
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        match text {
            "queued" => return Ok(Self::Queued),
            "cancel" => return Ok(Self::Cancelled),
            "failed" => return Ok(Self::Failed),
            _ => {}
        }
        if let Some(payload) = text.strip_prefix(NEW_FRAMES) {
            return serde_json::from_str(payload)
                .map(Self::NewFrames)
                .map_err(|e| ProtocolError::BadAnnouncement {
                    payload: payload.to_string(),
                    reason: e.to_string(),
                });
        }
        if let Some(id) = text.strip_prefix(NO_SEGMENT) {
            return id
                .trim()
                .parse()
                .map(Self::SegmentNotReady)
                .map_err(|_| ProtocolError::BadSegmentId(text.to_string()));
        }
        Ok(Self::Unknown(text.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Serialised configuration, see [`crate::codec::encode_submission`].
    Submit(String),
    Cancel,
    RequestSegment(u32),
}

impl ClientMessage {
    pub fn into_text(self) -> String {
        match self {
            Self::Submit(payload) => payload,
            Self::Cancel => "cancel".to_string(),
            Self::RequestSegment(id) => id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_words() {
        assert_eq!(ServerMessage::parse("queued"), Ok(ServerMessage::Queued));
        assert_eq!(ServerMessage::parse("cancel"), Ok(ServerMessage::Cancelled));
        assert_eq!(ServerMessage::parse("failed"), Ok(ServerMessage::Failed));
        assert_eq!(
            ServerMessage::parse("hello"),
            Ok(ServerMessage::Unknown("hello".to_string()))
        );
    }

    #[test]
    fn parses_availability() {
        assert_eq!(
            ServerMessage::parse(r#"new_frames{"l":2,"f":30}"#),
            Ok(ServerMessage::NewFrames(Availability {
                latest: 2,
                total: 30
            }))
        );
        assert!(matches!(
            ServerMessage::parse("new_frames{\"l\":2}"),
            Err(ProtocolError::BadAnnouncement { .. })
        ));
    }

    #[test]
    fn parses_not_ready() {
        assert_eq!(
            ServerMessage::parse("no_seg7"),
            Ok(ServerMessage::SegmentNotReady(7))
        );
        assert_eq!(
            ServerMessage::parse("no_segx"),
            Err(ProtocolError::BadSegmentId("no_segx".to_string()))
        );
    }

    #[test]
    fn client_messages_render_as_text() {
        assert_eq!(ClientMessage::RequestSegment(12).into_text(), "12");
        assert_eq!(ClientMessage::Cancel.into_text(), "cancel");
        assert_eq!(ClientMessage::Submit("{}".into()).into_text(), "{}");
    }
}
