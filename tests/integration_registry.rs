//! Registry invariants under randomized and concurrent use
//!
//! - No room ever exceeds two members
//! - The room table and membership index always agree
//! - Racing joins admit exactly one peer
//! - A join racing a leave never leaves a ghost member behind

use pairlink::room::{Departure, MAX_MEMBERS};
use pairlink::{ConnectionId, JoinOutcome, RoomId, RoomRegistry};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Barrier};
use std::thread;

fn assert_invariants(registry: &RoomRegistry, connections: &[ConnectionId]) {
    assert!(registry.is_consistent());
    for connection in connections {
        if let Some(room_id) = registry.room_of(*connection) {
            let members = registry.members(&room_id);
            assert!(members.len() <= MAX_MEMBERS);
            assert!(members.contains(connection));
        }
    }
}

#[test]
fn test_random_operation_sequences() {
    for seed in 0..200u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let registry = RoomRegistry::default();
        let connections: Vec<ConnectionId> = (0..6).map(|_| ConnectionId::new()).collect();
        let mut known_rooms: Vec<RoomId> = vec![RoomId::from("MISSING")];

        for _ in 0..150 {
            let actor = connections[rng.gen_range(0..connections.len())];
            match rng.gen_range(0..4) {
                0 => {
                    let created = registry.create_room(actor).unwrap();
                    assert_eq!(registry.members(&created.room_id), vec![actor]);
                    known_rooms.push(created.room_id);
                }
                1 | 2 => {
                    let room_id = known_rooms[rng.gen_range(0..known_rooms.len())].clone();
                    let before = registry.members(&room_id);
                    match registry.join_room(actor, &room_id) {
                        JoinOutcome::Joined { peer, .. } => {
                            assert_eq!(before.len(), 1);
                            assert_eq!(registry.members(&room_id), vec![peer, actor]);
                        }
                        JoinOutcome::AlreadyJoined { .. } => {
                            assert!(before.contains(&actor));
                            assert_eq!(registry.members(&room_id), before);
                        }
                        JoinOutcome::Full { .. } => {
                            assert_eq!(before.len(), MAX_MEMBERS);
                            assert_eq!(registry.members(&room_id), before);
                        }
                        JoinOutcome::NotFound { .. } => {
                            assert!(before.is_empty());
                            assert!(registry.members(&room_id).is_empty());
                        }
                    }
                }
                _ => {
                    let was_in = registry.room_of(actor);
                    match registry.leave(actor) {
                        Ok(Departure { room_id, remaining }) => {
                            assert_eq!(Some(room_id.clone()), was_in);
                            assert!(!remaining.contains(&actor));
                            assert_eq!(registry.members(&room_id), remaining);
                        }
                        Err(_) => assert!(was_in.is_none()),
                    }
                }
            }
            assert_invariants(&registry, &connections);
        }
    }
}

#[test]
fn test_concurrent_joins_admit_one() {
    for _ in 0..50 {
        let registry = Arc::new(RoomRegistry::default());
        let creator = ConnectionId::new();
        let room_id = registry.create_room(creator).unwrap().room_id;

        let joiners: Vec<ConnectionId> = (0..8).map(|_| ConnectionId::new()).collect();
        let barrier = Arc::new(Barrier::new(joiners.len()));

        let outcomes: Vec<JoinOutcome> = thread::scope(|scope| {
            let handles: Vec<_> = joiners
                .iter()
                .map(|joiner| {
                    let registry = registry.clone();
                    let barrier = barrier.clone();
                    let room_id = room_id.clone();
                    let joiner = *joiner;
                    scope.spawn(move || {
                        barrier.wait();
                        registry.join_room(joiner, &room_id)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let joined = outcomes
            .iter()
            .filter(|o| matches!(o, JoinOutcome::Joined { .. }))
            .count();
        let full = outcomes
            .iter()
            .filter(|o| matches!(o, JoinOutcome::Full { .. }))
            .count();
        assert_eq!(joined, 1);
        assert_eq!(full, joiners.len() - 1);
        assert_eq!(registry.members(&room_id).len(), MAX_MEMBERS);

        let mut everyone = joiners.clone();
        everyone.push(creator);
        assert_invariants(&registry, &everyone);
    }
}

#[test]
fn test_join_racing_leave_leaves_no_ghost() {
    for _ in 0..200 {
        let registry = Arc::new(RoomRegistry::default());
        let creator = ConnectionId::new();
        let joiner = ConnectionId::new();
        let room_id = registry.create_room(creator).unwrap().room_id;
        let barrier = Arc::new(Barrier::new(2));

        thread::scope(|scope| {
            let leaving = {
                let registry = registry.clone();
                let barrier = barrier.clone();
                scope.spawn(move || {
                    barrier.wait();
                    registry.leave(creator)
                })
            };
            let joining = {
                let registry = registry.clone();
                let barrier = barrier.clone();
                let room_id = room_id.clone();
                scope.spawn(move || {
                    barrier.wait();
                    registry.join_room(joiner, &room_id)
                })
            };

            let departure = leaving.join().unwrap().unwrap();
            match joining.join().unwrap() {
                JoinOutcome::Joined { .. } => {
                    // Join won: the creator left a room that still holds the joiner
                    assert_eq!(departure.remaining, vec![joiner]);
                    assert_eq!(registry.members(&room_id), vec![joiner]);
                    assert_eq!(registry.initiator(&room_id), Some(joiner));
                }
                JoinOutcome::NotFound { .. } => {
                    assert!(departure.room_deleted());
                    assert_eq!(registry.room_of(joiner), None);
                    assert_eq!(registry.room_count(), 0);
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        });

        assert_invariants(&registry, &[creator, joiner]);
    }
}

#[test]
fn test_many_rooms_have_unique_codes() {
    let registry = RoomRegistry::default();
    let mut codes = std::collections::HashSet::new();
    for _ in 0..2000 {
        let created = registry.create_room(ConnectionId::new()).unwrap();
        assert!(codes.insert(created.room_id));
    }
    assert_eq!(registry.room_count(), 2000);
}
