//! Frame classification and construction over RFC6455 frames.
//!
//! Kept pure and stateless so the rest of the crate never sees
//! `tokio_tungstenite`-specific shapes directly: everything above this module
//! talks [`Frame`], not `tungstenite::Message`.

use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use crate::Error;

/// A classified close reason, decoupled from `tungstenite`'s frame type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close status code. `1000` is normal closure.
    pub code: u16,
    /// Server-supplied reason text, possibly empty.
    pub reason: String,
}

/// A classified inbound or constructed outbound WebSocket frame.
///
/// Continuation frames are assumed to be reassembled by the transport layer
/// before reaching this crate; `classify` never yields a `Continuation`
/// fragment on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text payload (JSON-RPC envelopes travel as this).
    Text(String),
    /// Opaque binary payload.
    Binary(Vec<u8>),
    /// Ping control frame with its echo payload.
    Ping(Vec<u8>),
    /// Pong control frame with its echo payload.
    Pong(Vec<u8>),
    /// Close frame. `None` when the peer closed without a reason.
    Close(Option<CloseReason>),
}

impl Frame {
    /// Classifies a raw `tungstenite` message into a [`Frame`].
    ///
    /// Fails with [`Error::MalformedFrame`] only for frame kinds this crate
    /// does not expect to see post-reassembly (raw `Frame` variant messages).
    pub fn classify(raw: Message) -> Result<Self, Error> {
        match raw {
            Message::Text(text) => Ok(Frame::Text(text.to_string())),
            Message::Binary(bytes) => Ok(Frame::Binary(bytes.to_vec())),
            Message::Ping(bytes) => Ok(Frame::Ping(bytes.to_vec())),
            Message::Pong(bytes) => Ok(Frame::Pong(bytes.to_vec())),
            Message::Close(frame) => Ok(Frame::Close(frame.map(|f| CloseReason {
                code: f.code.into(),
                reason: f.reason.to_string(),
            }))),
            Message::Frame(_) => Err(Error::MalformedFrame),
        }
    }

    /// Returns `true` for `Ping`, `Pong`, and `Close` frames.
    pub fn is_control(&self) -> bool {
        matches!(self, Frame::Ping(_) | Frame::Pong(_) | Frame::Close(_))
    }

    pub(crate) fn into_message(self) -> Message {
        match self {
            Frame::Text(text) => Message::text(text),
            Frame::Binary(bytes) => Message::binary(bytes),
            Frame::Ping(bytes) => Message::Ping(bytes.into()),
            Frame::Pong(bytes) => Message::Pong(bytes.into()),
            Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
                code: CloseCode::from(r.code),
                reason: r.reason.into(),
            })),
        }
    }
}

/// Constructs a text frame.
pub fn text(payload: impl Into<String>) -> Frame {
    Frame::Text(payload.into())
}

/// Constructs a binary frame.
pub fn binary(payload: impl Into<Vec<u8>>) -> Frame {
    Frame::Binary(payload.into())
}

/// Constructs a ping frame.
pub fn ping(payload: impl Into<Vec<u8>>) -> Frame {
    Frame::Ping(payload.into())
}

/// Constructs a pong frame, normally echoing the payload of a received ping.
pub fn pong(payload: impl Into<Vec<u8>>) -> Frame {
    Frame::Pong(payload.into())
}

/// Constructs a close frame. `code = 1000` is normal closure.
pub fn close(code: u16, reason: impl Into<String>) -> Frame {
    Frame::Close(Some(CloseReason {
        code,
        reason: reason.into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_then_construct_round_trips_text() {
        let frame = text("hello");
        let msg = frame.clone().into_message();
        assert_eq!(Frame::classify(msg).unwrap(), frame);
    }

    #[test]
    fn classify_then_construct_round_trips_binary() {
        let frame = binary(vec![1, 2, 3]);
        let msg = frame.clone().into_message();
        assert_eq!(Frame::classify(msg).unwrap(), frame);
    }

    #[test]
    fn classify_then_construct_round_trips_ping_pong() {
        for frame in [ping(vec![9]), pong(vec![9])] {
            let msg = frame.clone().into_message();
            assert_eq!(Frame::classify(msg).unwrap(), frame);
        }
    }

    #[test]
    fn classify_then_construct_round_trips_close() {
        let frame = close(1000, "bye");
        let msg = frame.clone().into_message();
        assert_eq!(Frame::classify(msg).unwrap(), frame);
    }

    #[test]
    fn control_frames_are_identified() {
        assert!(ping(vec![]).is_control());
        assert!(pong(vec![]).is_control());
        assert!(close(1000, "").is_control());
        assert!(!text("x").is_control());
        assert!(!binary(vec![]).is_control());
    }
}
