//! Pairlink - two-party room signaling
//!
//! This library pairs two clients into a short-lived room and relays the
//! offer/answer/candidate messages they need to set up a direct media
//! session. Payloads are forwarded verbatim and never inspected.

pub mod call;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod relay;
pub mod room;
pub mod tls;

pub use call::{CallAction, CallSession, CallState, Role};
pub use config::{ClientConfig, ServerConfig};
pub use connection::{serve, Connection};
pub use protocol::{ClientEvent, MediaKind, ServerEvent};
pub use relay::Relay;
pub use room::{ConnectionId, JoinOutcome, RoomError, RoomId, RoomRegistry};
