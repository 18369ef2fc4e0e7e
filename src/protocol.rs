//! Signaling Protocol
//!
//! Defines the events exchanged between clients and the relay, and the
//! length-prefixed JSON framing they travel in.
//!
//! Several event names are shared by both directions with different payloads
//! (`offer` carries `room` inbound and `senderId` outbound), so requests and
//! notifications are separate enums.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::room::{ConnectionId, RoomId};

/// Default upper bound on a single frame's JSON body
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
}

/// Media capability toggled by a status update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Client -> relay requests
///
/// `room` is optional on the wire so a missing id reaches the relay and is
/// dropped there instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    CreateRoom,
    JoinRoom {
        room_id: RoomId,
    },
    Ready {
        room: Option<RoomId>,
    },
    Offer {
        payload: Value,
        room: Option<RoomId>,
    },
    Answer {
        payload: Value,
        room: Option<RoomId>,
    },
    IceCandidate {
        candidate: Value,
        room: Option<RoomId>,
    },
    Hangup {
        room: Option<RoomId>,
    },
    StatusUpdate {
        room: Option<RoomId>,
        kind: MediaKind,
        enabled: bool,
    },
    Reaction {
        room: Option<RoomId>,
        payload: Value,
    },
}

impl ClientEvent {
    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::CreateRoom => "create-room",
            ClientEvent::JoinRoom { .. } => "join-room",
            ClientEvent::Ready { .. } => "ready",
            ClientEvent::Offer { .. } => "offer",
            ClientEvent::Answer { .. } => "answer",
            ClientEvent::IceCandidate { .. } => "ice-candidate",
            ClientEvent::Hangup { .. } => "hangup",
            ClientEvent::StatusUpdate { .. } => "status-update",
            ClientEvent::Reaction { .. } => "reaction",
        }
    }
}

/// Relay -> client notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    RoomCreated {
        room_id: RoomId,
    },
    RoomJoined {
        room_id: RoomId,
    },
    RoomNotFound {
        room_id: RoomId,
    },
    RoomFull {
        room_id: RoomId,
    },
    PeerJoined {
        sender_id: ConnectionId,
    },
    Ready {
        sender_id: ConnectionId,
    },
    Offer {
        payload: Value,
        sender_id: ConnectionId,
    },
    Answer {
        payload: Value,
        sender_id: ConnectionId,
    },
    IceCandidate {
        candidate: Value,
        sender_id: ConnectionId,
    },
    Hangup {
        sender_id: ConnectionId,
    },
    PeerDisconnected {
        connection_id: ConnectionId,
        room: RoomId,
    },
    StatusUpdate {
        kind: MediaKind,
        enabled: bool,
        sender_id: ConnectionId,
    },
    Reaction {
        payload: Value,
        sender_id: ConnectionId,
    },
    /// Internal fault surfaced to the requester
    Error {
        message: String,
    },
}

/// JSON encoding shared by both event directions
pub trait WireEvent: Serialize + DeserializeOwned {
    /// Serialize the event to JSON bytes
    fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize an event from JSON bytes
    fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Create a framed event with length prefix (4 bytes, big-endian)
    fn to_framed(&self) -> Result<Vec<u8>, serde_json::Error> {
        let data = self.to_bytes()?;
        let len = (data.len() as u32).to_be_bytes();
        let mut framed = Vec::with_capacity(4 + data.len());
        framed.extend_from_slice(&len);
        framed.extend_from_slice(&data);
        Ok(framed)
    }
}

impl WireEvent for ClientEvent {}
impl WireEvent for ServerEvent {}

/// Read one frame body. Returns `Ok(None)` when the peer closed the stream
/// between frames.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(ProtocolError::FrameTooLarge { len, max: max_len });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Encode `event` as a frame whose body is at most `max_len` bytes
pub fn encode_frame<E: WireEvent>(event: &E, max_len: usize) -> Result<Vec<u8>, ProtocolError> {
    let framed = event.to_framed()?;
    let len = framed.len() - 4;
    if len > max_len {
        return Err(ProtocolError::FrameTooLarge { len, max: max_len });
    }
    Ok(framed)
}

/// Write one event as a frame
pub async fn write_frame<W, E>(writer: &mut W, event: &E) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    E: WireEvent,
{
    let data = event.to_framed()?;
    write_encoded(writer, &data).await
}

/// Write an already encoded frame
pub async fn write_encoded<W>(writer: &mut W, frame: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_wire_names() {
        let parsed = ClientEvent::from_bytes(br#"{"event":"create-room"}"#).unwrap();
        assert_eq!(parsed, ClientEvent::CreateRoom);

        let parsed =
            ClientEvent::from_bytes(br#"{"event":"join-room","roomId":"ab12cd"}"#).unwrap();
        assert_eq!(
            parsed,
            ClientEvent::JoinRoom {
                room_id: RoomId::from("AB12CD"),
            }
        );

        let parsed = ClientEvent::from_bytes(
            br#"{"event":"status-update","room":"AB12CD","kind":"video","enabled":false}"#,
        )
        .unwrap();
        assert_eq!(parsed.name(), "status-update");
    }

    #[test]
    fn test_missing_room_still_parses() {
        let parsed =
            ClientEvent::from_bytes(br#"{"event":"offer","payload":{"sdp":"x"}}"#).unwrap();
        assert_eq!(
            parsed,
            ClientEvent::Offer {
                payload: json!({"sdp": "x"}),
                room: None,
            }
        );
    }

    #[test]
    fn test_server_event_shape() {
        let sender = ConnectionId::new();
        let event = ServerEvent::IceCandidate {
            candidate: json!({"candidate": "candidate:1 1 UDP 2130706431 10.0.0.1 5000 typ host"}),
            sender_id: sender,
        };
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "ice-candidate");
        assert_eq!(value["senderId"], sender.to_string());
        assert!(value["candidate"]["candidate"].is_string());

        let event = ServerEvent::PeerDisconnected {
            connection_id: sender,
            room: RoomId::from("QWERTY"),
        };
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "peer-disconnected");
        assert_eq!(value["connectionId"], sender.to_string());
        assert_eq!(value["room"], "QWERTY");
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(ClientEvent::from_bytes(br#"{"event":"peer-joined","senderId":"x"}"#).is_err());
        assert!(ClientEvent::from_bytes(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_frame_io() {
        let event = ServerEvent::RoomCreated {
            room_id: RoomId::from("ROOM42"),
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &event).await.unwrap();

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len() - 4);

        let mut reader = buf.as_slice();
        let body = read_frame(&mut reader, MAX_FRAME_BYTES).await.unwrap().unwrap();
        assert_eq!(ServerEvent::from_bytes(&body).unwrap(), event);
        assert!(read_frame(&mut reader, MAX_FRAME_BYTES).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_refused() {
        let mut framed = (1024u32).to_be_bytes().to_vec();
        framed.extend(std::iter::repeat(b' ').take(1024));
        let mut reader = framed.as_slice();

        let result = read_frame(&mut reader, 512).await;
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooLarge { len: 1024, max: 512 })
        ));
    }

    #[test]
    fn test_encode_frame_respects_limit() {
        let event = ServerEvent::Reaction {
            payload: json!("x".repeat(64)),
            sender_id: ConnectionId::new(),
        };
        let body_len = event.to_bytes().unwrap().len();

        let framed = encode_frame(&event, body_len).unwrap();
        assert_eq!(framed.len(), body_len + 4);
        assert!(matches!(
            encode_frame(&event, body_len - 1),
            Err(ProtocolError::FrameTooLarge { len, .. }) if len == body_len
        ));
    }
}
