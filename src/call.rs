//! Call Negotiation
//!
//! Client-side view of a room: which role this client plays and how far the
//! offer/answer exchange has progressed. The session turns relay notifications
//! into [`CallAction`]s for the media layer and builds outbound requests
//! addressed to the current room.
//!
//! The role is never a free-standing flag. `room-created` means this client is
//! the room's first member and therefore the initiator; `room-joined` means it
//! is the responder.

use serde_json::Value;

use crate::protocol::{ClientEvent, MediaKind, ServerEvent};
use crate::room::{ConnectionId, RoomId};

/// Which side of the negotiation this client is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Logical negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Not in a room
    Empty,
    /// Room created, no peer yet
    AwaitingPeer,
    /// Both members present, no offer exchanged yet
    Ready,
    Negotiating,
    /// Terminal for this room; a fresh room is needed to call again
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    LocalHangup,
    PeerHangup(ConnectionId),
    PeerDisconnected(ConnectionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRejection {
    NotFound,
    Full,
}

/// Work the media layer has to do in response to a notification
#[derive(Debug, Clone, PartialEq)]
pub enum CallAction {
    /// Responder: tell the initiator local media is prepared
    SendReady,
    /// Initiator: produce an offer and send it via [`CallSession::offer`]
    CreateOffer,
    /// Responder: apply the offer and reply via [`CallSession::answer`]
    CreateAnswer { offer: Value },
    ApplyAnswer { answer: Value },
    AddCandidate { candidate: Value },
    PeerStatus { kind: MediaKind, enabled: bool },
    PeerReaction { payload: Value },
    JoinRejected { room_id: RoomId, reason: JoinRejection },
    Ended(EndReason),
    ServerError(String),
}

/// Negotiation state for one client
#[derive(Debug, Clone)]
pub struct CallSession {
    state: CallState,
    role: Option<Role>,
    room: Option<RoomId>,
    peer: Option<ConnectionId>,
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            state: CallState::Empty,
            role: None,
            room: None,
            peer: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    pub fn peer(&self) -> Option<ConnectionId> {
        self.peer
    }

    /// Request a new room
    pub fn create_room(&self) -> ClientEvent {
        ClientEvent::CreateRoom
    }

    /// Request to join `room_id`
    pub fn join_room(&self, room_id: RoomId) -> ClientEvent {
        ClientEvent::JoinRoom { room_id }
    }

    /// Apply a relay notification
    pub fn on_event(&mut self, event: ServerEvent) -> Vec<CallAction> {
        match event {
            ServerEvent::RoomCreated { room_id } => {
                self.enter_room(room_id, Role::Initiator, CallState::AwaitingPeer);
                Vec::new()
            }
            ServerEvent::RoomJoined { room_id } => {
                // An idempotent re-join keeps whatever role we already hold.
                if self.room.as_ref() == Some(&room_id) && self.state != CallState::Ended {
                    return Vec::new();
                }
                self.enter_room(room_id, Role::Responder, CallState::Ready);
                vec![CallAction::SendReady]
            }
            ServerEvent::RoomNotFound { room_id } => vec![CallAction::JoinRejected {
                room_id,
                reason: JoinRejection::NotFound,
            }],
            ServerEvent::RoomFull { room_id } => vec![CallAction::JoinRejected {
                room_id,
                reason: JoinRejection::Full,
            }],
            ServerEvent::PeerJoined { sender_id } | ServerEvent::Ready { sender_id } => {
                self.peer_present(sender_id)
            }
            ServerEvent::Offer { payload, sender_id } => {
                if !self.in_call() || self.role != Some(Role::Responder) {
                    return Vec::new();
                }
                self.peer = Some(sender_id);
                self.state = CallState::Negotiating;
                vec![CallAction::CreateAnswer { offer: payload }]
            }
            ServerEvent::Answer { payload, .. } => {
                if self.state != CallState::Negotiating || self.role != Some(Role::Initiator) {
                    return Vec::new();
                }
                vec![CallAction::ApplyAnswer { answer: payload }]
            }
            ServerEvent::IceCandidate { candidate, .. } => {
                if self.state != CallState::Negotiating {
                    return Vec::new();
                }
                vec![CallAction::AddCandidate { candidate }]
            }
            ServerEvent::StatusUpdate { kind, enabled, .. } => {
                if !self.in_call() {
                    return Vec::new();
                }
                vec![CallAction::PeerStatus { kind, enabled }]
            }
            ServerEvent::Reaction { payload, .. } => {
                if !self.in_call() {
                    return Vec::new();
                }
                vec![CallAction::PeerReaction { payload }]
            }
            ServerEvent::Hangup { sender_id } => {
                if !self.in_call() {
                    return Vec::new();
                }
                self.end(EndReason::PeerHangup(sender_id))
            }
            ServerEvent::PeerDisconnected {
                connection_id,
                room,
            } => {
                if !self.in_call() || self.room.as_ref() != Some(&room) {
                    return Vec::new();
                }
                self.end(EndReason::PeerDisconnected(connection_id))
            }
            ServerEvent::Error { message } => vec![CallAction::ServerError(message)],
        }
    }

    /// Readiness notice for the current room
    pub fn ready(&self) -> Option<ClientEvent> {
        Some(ClientEvent::Ready {
            room: Some(self.room.clone()?),
        })
    }

    pub fn offer(&self, payload: Value) -> Option<ClientEvent> {
        Some(ClientEvent::Offer {
            payload,
            room: Some(self.room.clone()?),
        })
    }

    pub fn answer(&self, payload: Value) -> Option<ClientEvent> {
        Some(ClientEvent::Answer {
            payload,
            room: Some(self.room.clone()?),
        })
    }

    pub fn candidate(&self, candidate: Value) -> Option<ClientEvent> {
        Some(ClientEvent::IceCandidate {
            candidate,
            room: Some(self.room.clone()?),
        })
    }

    pub fn status(&self, kind: MediaKind, enabled: bool) -> Option<ClientEvent> {
        Some(ClientEvent::StatusUpdate {
            room: Some(self.room.clone()?),
            kind,
            enabled,
        })
    }

    pub fn reaction(&self, payload: Value) -> Option<ClientEvent> {
        Some(ClientEvent::Reaction {
            room: Some(self.room.clone()?),
            payload,
        })
    }

    /// End the call locally; returns the hangup request if we were in a room
    pub fn hangup(&mut self) -> Option<ClientEvent> {
        if !self.in_call() {
            return None;
        }
        let room = self.room.clone();
        self.end(EndReason::LocalHangup);
        Some(ClientEvent::Hangup { room })
    }

    fn in_call(&self) -> bool {
        self.room.is_some() && self.state != CallState::Ended
    }

    fn enter_room(&mut self, room_id: RoomId, role: Role, state: CallState) {
        self.room = Some(room_id);
        self.role = Some(role);
        self.state = state;
        self.peer = None;
    }

    /// peer-joined and ready both mean the peer can answer; only the first
    /// one starts negotiation.
    fn peer_present(&mut self, peer: ConnectionId) -> Vec<CallAction> {
        if !self.in_call() {
            return Vec::new();
        }
        self.peer = Some(peer);

        match (self.role, self.state) {
            (Some(Role::Initiator), CallState::AwaitingPeer | CallState::Ready) => {
                self.state = CallState::Negotiating;
                vec![CallAction::CreateOffer]
            }
            _ => Vec::new(),
        }
    }

    fn end(&mut self, reason: EndReason) -> Vec<CallAction> {
        self.state = CallState::Ended;
        self.room = None;
        self.role = None;
        self.peer = None;
        vec![CallAction::Ended(reason)]
    }
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room() -> RoomId {
        RoomId::from("K3J9QX")
    }

    #[test]
    fn test_initiator_offers_exactly_once() {
        let mut session = CallSession::new();
        let peer = ConnectionId::new();

        assert!(session
            .on_event(ServerEvent::RoomCreated { room_id: room() })
            .is_empty());
        assert_eq!(session.state(), CallState::AwaitingPeer);
        assert_eq!(session.role(), Some(Role::Initiator));

        assert_eq!(
            session.on_event(ServerEvent::PeerJoined { sender_id: peer }),
            vec![CallAction::CreateOffer]
        );
        assert!(session
            .on_event(ServerEvent::Ready { sender_id: peer })
            .is_empty());
        assert_eq!(session.state(), CallState::Negotiating);
        assert_eq!(session.peer(), Some(peer));
    }

    #[test]
    fn test_ready_alone_starts_negotiation() {
        let mut session = CallSession::new();
        session.on_event(ServerEvent::RoomCreated { room_id: room() });

        let peer = ConnectionId::new();
        assert_eq!(
            session.on_event(ServerEvent::Ready { sender_id: peer }),
            vec![CallAction::CreateOffer]
        );
        assert!(session
            .on_event(ServerEvent::PeerJoined { sender_id: peer })
            .is_empty());
    }

    #[test]
    fn test_responder_flow() {
        let mut session = CallSession::new();
        let initiator = ConnectionId::new();

        assert_eq!(
            session.on_event(ServerEvent::RoomJoined { room_id: room() }),
            vec![CallAction::SendReady]
        );
        assert_eq!(session.role(), Some(Role::Responder));
        assert_eq!(
            session.ready(),
            Some(ClientEvent::Ready { room: Some(room()) })
        );

        let offer = json!({"type": "offer", "sdp": "v=0"});
        assert_eq!(
            session.on_event(ServerEvent::Offer {
                payload: offer.clone(),
                sender_id: initiator,
            }),
            vec![CallAction::CreateAnswer { offer }]
        );
        assert_eq!(session.state(), CallState::Negotiating);

        let candidate = json!({"candidate": "candidate:0 1 UDP 1 127.0.0.1 9 typ host"});
        assert_eq!(
            session.on_event(ServerEvent::IceCandidate {
                candidate: candidate.clone(),
                sender_id: initiator,
            }),
            vec![CallAction::AddCandidate { candidate }]
        );

        // A duplicate join confirmation does not restart the handshake
        assert!(session
            .on_event(ServerEvent::RoomJoined { room_id: room() })
            .is_empty());
        assert_eq!(session.state(), CallState::Negotiating);
    }

    #[test]
    fn test_responder_never_initiates() {
        let mut session = CallSession::new();
        session.on_event(ServerEvent::RoomJoined { room_id: room() });
        let initiator = ConnectionId::new();
        assert!(session
            .on_event(ServerEvent::PeerJoined {
                sender_id: initiator,
            })
            .is_empty());
        assert!(session
            .on_event(ServerEvent::Ready {
                sender_id: initiator,
            })
            .is_empty());
        assert_eq!(session.state(), CallState::Ready);
        assert_eq!(session.peer(), Some(initiator));
    }

    #[test]
    fn test_candidates_before_offer_are_ignored() {
        let mut session = CallSession::new();
        session.on_event(ServerEvent::RoomJoined { room_id: room() });
        assert!(session
            .on_event(ServerEvent::IceCandidate {
                candidate: json!({}),
                sender_id: ConnectionId::new(),
            })
            .is_empty());
    }

    #[test]
    fn test_peer_disconnect_ends_call() {
        let mut session = CallSession::new();
        let peer = ConnectionId::new();
        session.on_event(ServerEvent::RoomCreated { room_id: room() });
        session.on_event(ServerEvent::PeerJoined { sender_id: peer });

        let other_room = ServerEvent::PeerDisconnected {
            connection_id: peer,
            room: RoomId::from("OTHER1"),
        };
        assert!(session.on_event(other_room).is_empty());

        assert_eq!(
            session.on_event(ServerEvent::PeerDisconnected {
                connection_id: peer,
                room: room(),
            }),
            vec![CallAction::Ended(EndReason::PeerDisconnected(peer))]
        );
        assert_eq!(session.state(), CallState::Ended);
        assert!(session.room().is_none());
        assert!(session.offer(json!({})).is_none());
    }

    #[test]
    fn test_local_hangup() {
        let mut session = CallSession::new();
        assert!(session.hangup().is_none());

        session.on_event(ServerEvent::RoomCreated { room_id: room() });
        assert_eq!(
            session.hangup(),
            Some(ClientEvent::Hangup { room: Some(room()) })
        );
        assert_eq!(session.state(), CallState::Ended);
        assert!(session.hangup().is_none());

        let peer = ConnectionId::new();
        assert!(session
            .on_event(ServerEvent::Hangup { sender_id: peer })
            .is_empty());
    }

    #[test]
    fn test_new_room_after_end() {
        let mut session = CallSession::new();
        let peer = ConnectionId::new();
        session.on_event(ServerEvent::RoomJoined { room_id: room() });
        session.on_event(ServerEvent::Hangup { sender_id: peer });
        assert_eq!(session.state(), CallState::Ended);

        session.on_event(ServerEvent::RoomCreated {
            room_id: RoomId::from("FRESH1"),
        });
        assert_eq!(session.state(), CallState::AwaitingPeer);
        assert_eq!(session.role(), Some(Role::Initiator));
    }

    #[test]
    fn test_join_rejections() {
        let mut session = CallSession::new();
        assert_eq!(
            session.on_event(ServerEvent::RoomFull { room_id: room() }),
            vec![CallAction::JoinRejected {
                room_id: room(),
                reason: JoinRejection::Full,
            }]
        );
        assert_eq!(session.state(), CallState::Empty);
    }
}
