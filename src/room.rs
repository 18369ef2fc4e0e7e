//! Room Management
//!
//! Owns the two-party rooms, the reverse index from connection to room, and
//! room code generation. Both maps live behind one lock so they never disagree.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A room never holds more than this many connections.
pub const MAX_MEMBERS: usize = 2;

/// Shortest room code the registry will hand out.
pub const MIN_CODE_LENGTH: usize = 6;

/// Draws attempted before room creation gives up.
pub const MAX_CODE_ATTEMPTS: usize = 64;

/// Process-unique identifier of a live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Room code, always trimmed and upper-cased
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RoomId {
    fn from(raw: String) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }
}

impl From<&str> for RoomId {
    fn from(raw: &str) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a random upper-case alphanumeric room code
pub fn generate_room_code(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length.max(MIN_CODE_LENGTH))
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect()
}

/// A two-party room. The first member is the initiator.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub created_at: DateTime<Utc>,
    members: Vec<ConnectionId>,
}

impl Room {
    fn new(id: RoomId, creator: ConnectionId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            members: vec![creator],
        }
    }

    /// Members in join order
    pub fn members(&self) -> &[ConnectionId] {
        &self.members
    }

    /// The member responsible for sending the first offer
    pub fn initiator(&self) -> Option<ConnectionId> {
        self.members.first().copied()
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.members.contains(&connection)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= MAX_MEMBERS
    }

    /// Every member except `connection`
    pub fn peers_of(&self, connection: ConnectionId) -> Vec<ConnectionId> {
        self.members
            .iter()
            .copied()
            .filter(|id| *id != connection)
            .collect()
    }
}

/// Room-related errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("Connection is not in a room")]
    NotInRoom,
    #[error("No free room code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: usize },
}

/// A connection's removal from its room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room_id: RoomId,
    /// Members still present, at most one
    pub remaining: Vec<ConnectionId>,
}

impl Departure {
    pub fn room_deleted(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Result of a successful create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub room_id: RoomId,
    /// Set when the creator was still a member of another room
    pub previous: Option<Departure>,
}

/// Result of a join attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Appended as second member; `peer` is the existing member to notify
    Joined {
        room_id: RoomId,
        peer: ConnectionId,
        previous: Option<Departure>,
    },
    AlreadyJoined { room_id: RoomId },
    NotFound { room_id: RoomId },
    Full { room_id: RoomId },
}

#[derive(Default)]
struct RegistryState {
    rooms: HashMap<RoomId, Room>,
    /// Maps connection ID to room ID
    memberships: HashMap<ConnectionId, RoomId>,
}

impl RegistryState {
    fn remove_member(&mut self, connection: ConnectionId) -> Option<Departure> {
        let room_id = self.memberships.remove(&connection)?;
        let room = self.rooms.get_mut(&room_id)?;
        room.members.retain(|id| *id != connection);
        let remaining = room.members.clone();

        if remaining.is_empty() {
            if let Some(room) = self.rooms.remove(&room_id) {
                let lifetime = Utc::now() - room.created_at;
                log::info!(
                    "Deleted empty room {} after {}s",
                    room_id,
                    lifetime.num_seconds()
                );
            }
        } else {
            log::info!("Connection {} left room {}", connection, room_id);
        }

        Some(Departure { room_id, remaining })
    }

    fn join(&mut self, connection: ConnectionId, room_id: &RoomId) -> JoinOutcome {
        let Some(room) = self.rooms.get(room_id) else {
            return JoinOutcome::NotFound {
                room_id: room_id.clone(),
            };
        };

        let peer = match room.members() {
            [existing] if *existing != connection => *existing,
            members if members.contains(&connection) => {
                return JoinOutcome::AlreadyJoined {
                    room_id: room_id.clone(),
                }
            }
            _ => {
                return JoinOutcome::Full {
                    room_id: room_id.clone(),
                }
            }
        };

        let previous = self.remove_member(connection);
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.members.push(connection);
        }
        self.memberships.insert(connection, room_id.clone());
        log::info!("Connection {} joined room {}", connection, room_id);

        JoinOutcome::Joined {
            room_id: room_id.clone(),
            peer,
            previous,
        }
    }
}

type CodeSource = Box<dyn Fn() -> String + Send + Sync>;

/// Manages all rooms and the connection-to-room index
pub struct RoomRegistry {
    state: Mutex<RegistryState>,
    next_code: CodeSource,
}

impl RoomRegistry {
    pub fn new(code_length: usize) -> Self {
        Self::with_code_source(move || generate_room_code(code_length))
    }

    /// Use a custom room code source, e.g. a fixed sequence in tests
    pub fn with_code_source<F>(source: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            state: Mutex::new(RegistryState::default()),
            next_code: Box::new(source),
        }
    }

    /// Create a room with `connection` as its only member
    pub fn create_room(&self, connection: ConnectionId) -> Result<Created, RoomError> {
        self.create_room_with(connection, |_| {})
    }

    /// Like [`create_room`](Self::create_room), running `notify` under the registry lock
    pub fn create_room_with<F>(
        &self,
        connection: ConnectionId,
        notify: F,
    ) -> Result<Created, RoomError>
    where
        F: FnOnce(&Created),
    {
        let mut state = self.state.lock();

        let room_id = (0..MAX_CODE_ATTEMPTS)
            .map(|_| RoomId::from((self.next_code)()))
            .find(|candidate| {
                !candidate.as_str().is_empty() && !state.rooms.contains_key(candidate)
            })
            .ok_or(RoomError::CodeSpaceExhausted {
                attempts: MAX_CODE_ATTEMPTS,
            })?;

        let previous = state.remove_member(connection);
        state
            .rooms
            .insert(room_id.clone(), Room::new(room_id.clone(), connection));
        state.memberships.insert(connection, room_id.clone());
        log::info!("Connection {} created room {}", connection, room_id);

        let created = Created { room_id, previous };
        notify(&created);
        Ok(created)
    }

    /// Try to add `connection` as the second member of `room_id`
    pub fn join_room(&self, connection: ConnectionId, room_id: &RoomId) -> JoinOutcome {
        self.join_room_with(connection, room_id, |_| {})
    }

    /// Like [`join_room`](Self::join_room), running `notify` under the registry lock
    pub fn join_room_with<F>(
        &self,
        connection: ConnectionId,
        room_id: &RoomId,
        notify: F,
    ) -> JoinOutcome
    where
        F: FnOnce(&JoinOutcome),
    {
        let mut state = self.state.lock();
        let outcome = state.join(connection, room_id);
        notify(&outcome);
        outcome
    }

    /// Remove `connection` from its room, deleting the room if it empties
    pub fn leave(&self, connection: ConnectionId) -> Result<Departure, RoomError> {
        self.leave_with(connection, |_| {})
    }

    /// Like [`leave`](Self::leave), running `notify` under the registry lock
    pub fn leave_with<F>(&self, connection: ConnectionId, notify: F) -> Result<Departure, RoomError>
    where
        F: FnOnce(&Departure),
    {
        let mut state = self.state.lock();
        let departure = state
            .remove_member(connection)
            .ok_or(RoomError::NotInRoom)?;
        notify(&departure);
        Ok(departure)
    }

    /// The room `connection` currently belongs to
    pub fn room_of(&self, connection: ConnectionId) -> Option<RoomId> {
        self.state.lock().memberships.get(&connection).cloned()
    }

    /// Run `f` on the room `connection` belongs to, under the registry lock
    pub fn with_room_of<F, R>(&self, connection: ConnectionId, f: F) -> Option<R>
    where
        F: FnOnce(&Room) -> R,
    {
        let state = self.state.lock();
        let room_id = state.memberships.get(&connection)?;
        state.rooms.get(room_id).map(f)
    }

    /// Members of `room_id` in join order
    pub fn members(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        self.state
            .lock()
            .rooms
            .get(room_id)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    pub fn initiator(&self, room_id: &RoomId) -> Option<ConnectionId> {
        self.state.lock().rooms.get(room_id)?.initiator()
    }

    pub fn is_initiator(&self, connection: ConnectionId) -> bool {
        self.with_room_of(connection, |room| room.initiator() == Some(connection))
            .unwrap_or(false)
    }

    pub fn room_count(&self) -> usize {
        self.state.lock().rooms.len()
    }

    /// Check that the room table and the membership index agree
    pub fn is_consistent(&self) -> bool {
        let state = self.state.lock();
        let rooms_ok = state.rooms.iter().all(|(id, room)| {
            !room.members.is_empty()
                && room.members.len() <= MAX_MEMBERS
                && room.id == *id
                && room
                    .members
                    .iter()
                    .all(|member| state.memberships.get(member) == Some(id))
        });
        let index_ok = state.memberships.iter().all(|(connection, id)| {
            state
                .rooms
                .get(id)
                .is_some_and(|room| room.contains(*connection))
        });
        rooms_ok && index_ok
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(MIN_CODE_LENGTH)
    }
}
