//! Signaling Relay
//!
//! Applies client requests to the [`RoomRegistry`] and forwards negotiation
//! traffic to the other member of the sender's room. Nothing is ever echoed
//! back to the sender.
//!
//! Relay-type requests carry the room the client believes it is in. The relay
//! resolves the sender's real room through the registry and drops the request
//! if the two differ.

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::protocol::{ClientEvent, ServerEvent};
use crate::room::{ConnectionId, Departure, JoinOutcome, RoomId, RoomRegistry};

/// Outbound queue of a single connection
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

/// Shared relay state, one per server
pub struct Relay {
    registry: RoomRegistry,
    connections: RwLock<HashMap<ConnectionId, EventSender>>,
}

impl Relay {
    pub fn new(registry: RoomRegistry) -> Self {
        Self {
            registry,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Register a new connection and return its id and outbound queue
    pub fn connect(&self) -> (ConnectionId, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        self.connections.write().insert(id, tx);
        debug!("Connection {} registered", id);
        (id, rx)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Handle one request from `sender`
    pub fn handle(&self, sender: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::CreateRoom => self.create_room(sender),
            ClientEvent::JoinRoom { room_id } => self.join_room(sender, &room_id),
            ClientEvent::Ready { room } => {
                self.relay_to_peer(
                    sender,
                    room.as_ref(),
                    "ready",
                    ServerEvent::Ready { sender_id: sender },
                );
            }
            ClientEvent::Offer { payload, room } => {
                self.relay_to_peer(
                    sender,
                    room.as_ref(),
                    "offer",
                    ServerEvent::Offer {
                        payload,
                        sender_id: sender,
                    },
                );
            }
            ClientEvent::Answer { payload, room } => {
                self.relay_to_peer(
                    sender,
                    room.as_ref(),
                    "answer",
                    ServerEvent::Answer {
                        payload,
                        sender_id: sender,
                    },
                );
            }
            ClientEvent::IceCandidate { candidate, room } => {
                self.relay_to_peer(
                    sender,
                    room.as_ref(),
                    "ice-candidate",
                    ServerEvent::IceCandidate {
                        candidate,
                        sender_id: sender,
                    },
                );
            }
            ClientEvent::Hangup { room } => self.hangup(sender, room.as_ref()),
            ClientEvent::StatusUpdate {
                room,
                kind,
                enabled,
            } => {
                self.relay_to_peer(
                    sender,
                    room.as_ref(),
                    "status-update",
                    ServerEvent::StatusUpdate {
                        kind,
                        enabled,
                        sender_id: sender,
                    },
                );
            }
            ClientEvent::Reaction { room, payload } => {
                self.relay_to_peer(
                    sender,
                    room.as_ref(),
                    "reaction",
                    ServerEvent::Reaction {
                        payload,
                        sender_id: sender,
                    },
                );
            }
        }
    }

    /// Transport for `connection` closed. Safe to call more than once.
    pub fn disconnect(&self, connection: ConnectionId) {
        match self
            .registry
            .leave_with(connection, |departure| self.notify_departure(connection, departure))
        {
            Ok(departure) => info!(
                "Connection {} dropped out of room {}",
                connection, departure.room_id
            ),
            Err(_) => debug!("Connection {} was not in a room", connection),
        }
        self.connections.write().remove(&connection);
    }

    fn create_room(&self, sender: ConnectionId) {
        let result = self.registry.create_room_with(sender, |created| {
            if let Some(previous) = &created.previous {
                self.notify_departure(sender, previous);
            }
            self.deliver(
                sender,
                ServerEvent::RoomCreated {
                    room_id: created.room_id.clone(),
                },
            );
        });

        if let Err(e) = result {
            error!("Failed to create room for {}: {}", sender, e);
            self.deliver(
                sender,
                ServerEvent::Error {
                    message: e.to_string(),
                },
            );
        }
    }

    fn join_room(&self, sender: ConnectionId, room_id: &RoomId) {
        self.registry
            .join_room_with(sender, room_id, |outcome| match outcome {
                JoinOutcome::Joined {
                    room_id,
                    peer,
                    previous,
                } => {
                    if let Some(previous) = previous {
                        self.notify_departure(sender, previous);
                    }
                    self.deliver(
                        sender,
                        ServerEvent::RoomJoined {
                            room_id: room_id.clone(),
                        },
                    );
                    self.deliver(*peer, ServerEvent::PeerJoined { sender_id: sender });
                }
                JoinOutcome::AlreadyJoined { room_id } => {
                    info!("Connection {} re-joined room {}", sender, room_id);
                    self.deliver(
                        sender,
                        ServerEvent::RoomJoined {
                            room_id: room_id.clone(),
                        },
                    );
                }
                JoinOutcome::NotFound { room_id } => {
                    info!("Connection {} tried to join missing room {}", sender, room_id);
                    self.deliver(
                        sender,
                        ServerEvent::RoomNotFound {
                            room_id: room_id.clone(),
                        },
                    );
                }
                JoinOutcome::Full { room_id } => {
                    info!("Connection {} tried to join full room {}", sender, room_id);
                    self.deliver(
                        sender,
                        ServerEvent::RoomFull {
                            room_id: room_id.clone(),
                        },
                    );
                }
            });
    }

    fn hangup(&self, sender: ConnectionId, claimed: Option<&RoomId>) {
        if self.resolve_room(sender, claimed, "hangup").is_none() {
            return;
        }

        let result = self.registry.leave_with(sender, |departure| {
            for peer in &departure.remaining {
                self.deliver(*peer, ServerEvent::Hangup { sender_id: sender });
            }
        });
        if let Ok(departure) = result {
            info!("Connection {} hung up in room {}", sender, departure.room_id);
        }
    }

    /// Forward `event` to every other member of the sender's room
    fn relay_to_peer(
        &self,
        sender: ConnectionId,
        claimed: Option<&RoomId>,
        name: &str,
        event: ServerEvent,
    ) {
        if self.resolve_room(sender, claimed, name).is_none() {
            return;
        }

        let delivered = self.registry.with_room_of(sender, |room| {
            let peers = room.peers_of(sender);
            for peer in &peers {
                self.deliver(*peer, event.clone());
            }
            peers.len()
        });
        debug!(
            "Relayed {} from {} to {} peer(s)",
            name,
            sender,
            delivered.unwrap_or(0)
        );
    }

    /// The sender's actual room, if it matches the one it claimed
    fn resolve_room(
        &self,
        sender: ConnectionId,
        claimed: Option<&RoomId>,
        name: &str,
    ) -> Option<RoomId> {
        let Some(claimed) = claimed else {
            warn!("{} from {} without room id, dropping", name, sender);
            return None;
        };

        match self.registry.room_of(sender) {
            Some(actual) if actual == *claimed => Some(actual),
            Some(actual) => {
                warn!(
                    "{} from {} names room {} but sender is in {}, dropping",
                    name, sender, claimed, actual
                );
                None
            }
            None => {
                warn!(
                    "{} from {} names room {} but sender is in no room, dropping",
                    name, sender, claimed
                );
                None
            }
        }
    }

    fn notify_departure(&self, departed: ConnectionId, departure: &Departure) {
        for peer in &departure.remaining {
            self.deliver(
                *peer,
                ServerEvent::PeerDisconnected {
                    connection_id: departed,
                    room: departure.room_id.clone(),
                },
            );
        }
    }

    /// Fire-and-forget delivery; a gone peer is the same as an absent one
    fn deliver(&self, to: ConnectionId, event: ServerEvent) {
        match self.connections.read().get(&to) {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!("Connection {} is closing, event dropped", to);
                }
            }
            None => debug!("Connection {} not registered, event dropped", to),
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(RoomRegistry::default())
    }
}
