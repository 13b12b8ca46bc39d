//! Per-room state and membership storage.
//!
//! The [`RoomStore`] trait is the seam between the relay and its backing
//! storage. The relay only ever talks to the trait, so a different backing
//! can be plugged in through [`Relay::with_store`](crate::relay::Relay::with_store)
//! without touching the event handlers.
//!
//! Every operation is total: reads of a room that was never joined return
//! empty/default values instead of failing.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::types::{AuctionState, SessionId, DEFAULT_TIMER_SECS};

/// Storage for room snapshots and membership sets.
pub trait RoomStore: Send {
    /// Returns the room's snapshot, creating a default one if absent.
    fn get_or_create(&mut self, room_id: &str) -> &mut AuctionState;

    /// Returns a copy of the room's snapshot without allocating a room.
    fn snapshot(&self, room_id: &str) -> Option<AuctionState>;

    /// Replaces the room's snapshot wholesale if the room exists.
    ///
    /// Returns `false` when the room does not exist.
    fn replace(&mut self, room_id: &str, state: AuctionState) -> bool;

    /// Session ids currently joined to the room.
    fn members(&self, room_id: &str) -> HashSet<SessionId>;

    /// Admin subset of the room's members.
    fn admins(&self, room_id: &str) -> HashSet<SessionId>;

    /// Adds a session to the room's membership and sets whether it is in
    /// the admin set. Adding a current member again only updates the latter.
    fn add_member(&mut self, room_id: &str, session_id: SessionId, is_admin: bool);

    /// Removes a session from the room's membership and admin sets.
    ///
    /// Returns `true` if the room has no members left afterwards.
    fn remove_member(&mut self, room_id: &str, session_id: SessionId) -> bool;

    /// Purges the snapshot, membership and admin sets of a room in one step.
    fn remove(&mut self, room_id: &str);

    /// Returns `true` if any state exists for the room.
    fn contains(&self, room_id: &str) -> bool;

    /// Number of rooms currently holding state.
    fn room_count(&self) -> usize;

    /// Ids of every room currently holding state, in no particular order.
    fn room_ids(&self) -> Vec<String>;
}

/// Everything the registry keeps for a single room.
#[derive(Debug, Clone)]
struct RoomEntry {
    state: AuctionState,
    members: HashSet<SessionId>,
    admins: HashSet<SessionId>,
}

impl RoomEntry {
    fn new(timer: u32) -> Self {
        Self {
            state: AuctionState::with_timer(timer),
            members: HashSet::new(),
            admins: HashSet::new(),
        }
    }
}

/// Process-local [`RoomStore`] backed by a `HashMap`.
///
/// Keeping snapshot and membership in one entry means a room is always
/// present or absent as a whole.
#[derive(Debug, Clone)]
pub struct InMemoryRoomStore {
    rooms: HashMap<String, RoomEntry>,
    default_timer: u32,
}

impl InMemoryRoomStore {
    /// Creates an empty store whose new rooms start with the default timer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_timer(DEFAULT_TIMER_SECS)
    }

    /// Creates an empty store whose new rooms start with `timer` seconds.
    #[must_use]
    pub fn with_default_timer(timer: u32) -> Self {
        Self {
            rooms: HashMap::new(),
            default_timer: timer,
        }
    }

    fn entry(&mut self, room_id: &str) -> &mut RoomEntry {
        let timer = self.default_timer;
        self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            debug!(room_id = %room_id, "Creating room");
            RoomEntry::new(timer)
        })
    }
}

impl Default for InMemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomStore for InMemoryRoomStore {
    fn get_or_create(&mut self, room_id: &str) -> &mut AuctionState {
        &mut self.entry(room_id).state
    }

    fn snapshot(&self, room_id: &str) -> Option<AuctionState> {
        self.rooms.get(room_id).map(|entry| entry.state.clone())
    }

    fn replace(&mut self, room_id: &str, state: AuctionState) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(entry) => {
                entry.state = state;
                true
            }
            None => false,
        }
    }

    fn members(&self, room_id: &str) -> HashSet<SessionId> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.members.clone())
            .unwrap_or_default()
    }

    fn admins(&self, room_id: &str) -> HashSet<SessionId> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.admins.clone())
            .unwrap_or_default()
    }

    fn add_member(&mut self, room_id: &str, session_id: SessionId, is_admin: bool) {
        let entry = self.entry(room_id);
        entry.members.insert(session_id);
        if is_admin {
            entry.admins.insert(session_id);
        } else {
            entry.admins.remove(&session_id);
        }
        trace!(
            room_id = %room_id,
            session_id = %session_id,
            members = entry.members.len(),
            "Member added"
        );
    }

    fn remove_member(&mut self, room_id: &str, session_id: SessionId) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(entry) => {
                entry.members.remove(&session_id);
                entry.admins.remove(&session_id);
                entry.members.is_empty()
            }
            None => true,
        }
    }

    fn remove(&mut self, room_id: &str) {
        if self.rooms.remove(room_id).is_some() {
            debug!(room_id = %room_id, "Room purged");
        }
    }

    fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn room_ids(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }
}
