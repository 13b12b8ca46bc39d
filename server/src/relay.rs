//! Role-gated event routing and room lifecycle.
//!
//! [`Relay`] owns everything the server knows about rooms: the
//! [`RoomStore`], the [`SessionTable`] and the [`Broadcaster`]. Every
//! operation takes `&mut self` and runs to completion without awaiting, so
//! when the relay sits behind a single lock each inbound event is applied
//! atomically with respect to every other one.
//!
//! # Role gating
//!
//! | Operation | Role | Extra check |
//! |-----------|------|-------------|
//! | `update-auction-state` | admin | - |
//! | `trigger-animation` | admin | - |
//! | `broadcast-team-analysis` | admin | - |
//! | `end-room` | admin | payload room matches the session's room |
//! | `place-bid` | team | payload team matches the session's team |
//! | `use-rtm` | team | payload team matches the session's team |
//!
//! Admin authority comes from the room's admin set, not from the role the
//! session asked for.
//!
//! Refused operations change nothing and broadcast nothing. They come back
//! as [`MutationOutcome::Rejected`], and [`Relay::dispatch`] additionally
//! reports them to the sender as `operation-rejected` when enabled.
//!
//! # Lifecycle
//!
//! A room comes to life with its first admitted join. It is purged as soon
//! as its last member leaves or disconnects, or immediately when its admin
//! sends `end-room`, which evicts every member first.

use std::collections::HashSet;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, trace};

use crate::broadcast::{Broadcaster, ConnectionTx};
use crate::config::Config;
use crate::error::RejectReason;
use crate::protocol::{
    BidRequest, ClientEvent, EndRoomRequest, Rejection, RoomEnded, RoomJoined, RtmUsage,
    ServerEvent,
};
use crate::registry::{InMemoryRoomStore, RoomStore};
use crate::session::{admit, ConnectionSession, JoinOutcome, JoinRequest, SessionTable};
use crate::types::{
    AnimationPatch, AuctionState, AuctionStatePatch, Bid, Role, RoomStats, SessionId,
};

/// Message sent with `room-ended`.
const ROOM_ENDED_MESSAGE: &str = "The auction room has been ended by the admin";

/// Result of a mutation handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl MutationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Tunables of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// Team slots per room.
    pub max_teams: usize,
    /// Countdown value of a fresh or reset room.
    pub default_timer: u32,
    /// Whether [`Relay::dispatch`] reports refusals to the sender.
    pub notify_rejections: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RelaySettings {
    fn from(config: &Config) -> Self {
        Self {
            max_teams: config.max_teams,
            default_timer: config.default_timer,
            notify_rejections: config.notify_rejections,
        }
    }
}

/// The room-scoped relay.
pub struct Relay {
    store: Box<dyn RoomStore>,
    sessions: SessionTable,
    broadcaster: Broadcaster,
    settings: RelaySettings,
    bid_sequence: u64,
}

impl Relay {
    /// Creates a relay backed by an [`InMemoryRoomStore`].
    #[must_use]
    pub fn new(settings: RelaySettings) -> Self {
        let store = InMemoryRoomStore::with_default_timer(settings.default_timer);
        Self::with_store(settings, Box::new(store))
    }

    /// Creates a relay backed by the given store.
    #[must_use]
    pub fn with_store(settings: RelaySettings, store: Box<dyn RoomStore>) -> Self {
        Self {
            store,
            sessions: SessionTable::new(),
            broadcaster: Broadcaster::new(),
            settings,
            bid_sequence: 0,
        }
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Registers a freshly opened connection. It joins no room yet.
    pub fn connect(&mut self, session_id: SessionId, tx: ConnectionTx) {
        self.broadcaster.register(session_id, tx);
    }

    /// Tears down a closed connection, leaving its room if it had one.
    pub fn disconnect(&mut self, session_id: SessionId) {
        if self.sessions.get(&session_id).is_some() {
            self.leave(session_id);
        }
        self.broadcaster.unregister(&session_id);
    }

    /// Decodes a text frame and dispatches it.
    pub fn handle_text(&mut self, session_id: SessionId, text: &str) -> MutationOutcome {
        match ClientEvent::parse(text) {
            Ok(event) => self.dispatch(session_id, event),
            Err(err) => {
                debug!(session_id = %session_id, error = %err, "Undecodable frame");
                let operation = err.event().unwrap_or("unknown").to_string();
                let reason = err.into_reject_reason();
                self.notify_rejection(session_id, &operation, &reason);
                MutationOutcome::Rejected(reason)
            }
        }
    }

    /// Routes a decoded event to its handler.
    pub fn dispatch(&mut self, session_id: SessionId, event: ClientEvent) -> MutationOutcome {
        let operation = event.name();
        if !self.broadcaster.is_connected(&session_id) {
            debug!(session_id = %session_id, operation, "Ignoring event from dropped connection");
            return MutationOutcome::Rejected(RejectReason::Disconnected);
        }
        trace!(session_id = %session_id, operation, "Dispatching event");

        let outcome = match event {
            ClientEvent::JoinRoom(request) => match self.join(session_id, request) {
                JoinOutcome::Rejected(reason) => MutationOutcome::Rejected(reason),
                JoinOutcome::Joined(_) | JoinOutcome::Downgraded { .. } => MutationOutcome::Accepted,
            },
            ClientEvent::LeaveRoom => self.leave(session_id),
            ClientEvent::UpdateAuctionState(patch) => self.update_auction_state(session_id, patch),
            ClientEvent::TriggerAnimation(patch) => self.trigger_animation(session_id, patch),
            ClientEvent::PlaceBid(request) => self.place_bid(session_id, request),
            ClientEvent::UseRtm(usage) => self.use_rtm(session_id, usage),
            ClientEvent::BroadcastTeamAnalysis(payload) => {
                self.broadcast_team_analysis(session_id, payload)
            }
            ClientEvent::EndRoom(request) => self.end_room(session_id, request),
        };

        if let MutationOutcome::Rejected(reason) = &outcome {
            self.notify_rejection(session_id, operation, reason);
        }
        outcome
    }

    fn notify_rejection(&mut self, session_id: SessionId, operation: &str, reason: &RejectReason) {
        debug!(
            session_id = %session_id,
            operation,
            reason = %reason,
            "Operation rejected"
        );
        if self.settings.notify_rejections {
            let event = ServerEvent::OperationRejected(Rejection::new(operation, reason.clone()));
            self.broadcaster.send_to(&session_id, &event);
        }
    }

    // ------------------------------------------------------------------
    // Join / leave
    // ------------------------------------------------------------------

    /// Admits a session into a room.
    ///
    /// A session already joined to a different room leaves it once the new
    /// join has been admitted. Joining the room it is already in updates its
    /// role and team in place, so the room keeps its state. A refused join
    /// leaves the session where it was.
    pub fn join(&mut self, session_id: SessionId, request: JoinRequest) -> JoinOutcome {
        let outcome = admit(
            &request,
            self.sessions
                .in_room(&request.room_id)
                .filter(|occupant| occupant.session_id != session_id),
            self.settings.max_teams,
        );

        let Some(role) = outcome.granted_role() else {
            return outcome;
        };

        let moving = self
            .sessions
            .get(&session_id)
            .is_some_and(|session| session.room_id != request.room_id);
        if moving {
            self.leave(session_id);
        }

        let team_name = request.team_name.map(|name| name.trim().to_string());
        let room_id = request.room_id;
        self.sessions
            .insert(ConnectionSession::new(session_id, room_id.clone(), role, team_name));
        self.store.add_member(&room_id, session_id, role == Role::Admin);

        let snapshot = self.store.get_or_create(&room_id).clone();
        self.broadcaster.send_to(
            &session_id,
            &ServerEvent::RoomJoined(RoomJoined {
                room_id: room_id.clone(),
                role,
                requested_role: request.role,
            }),
        );
        self.broadcaster
            .send_to(&session_id, &ServerEvent::AuctionState(snapshot));

        info!(
            session_id = %session_id,
            room_id = %room_id,
            role = %role,
            requested_role = %request.role,
            "Session joined room"
        );
        self.broadcast_stats(&room_id);

        outcome
    }

    /// Removes a session from its room, purging the room if it empties.
    pub fn leave(&mut self, session_id: SessionId) -> MutationOutcome {
        let Some(session) = self.sessions.remove(&session_id) else {
            return MutationOutcome::Rejected(RejectReason::NotJoined);
        };

        let room_id = session.room_id;
        let now_empty = self.store.remove_member(&room_id, session_id);
        info!(
            session_id = %session_id,
            room_id = %room_id,
            role = %session.role,
            "Session left room"
        );

        if now_empty {
            self.store.remove(&room_id);
            info!(room_id = %room_id, "Room empty, state purged");
        } else {
            self.broadcast_stats(&room_id);
        }
        MutationOutcome::Accepted
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Admin: shallow-merges a partial state into the room's snapshot.
    pub fn update_auction_state(
        &mut self,
        session_id: SessionId,
        patch: AuctionStatePatch,
    ) -> MutationOutcome {
        let session = match self.authorize(&session_id, Role::Admin) {
            Ok(session) => session,
            Err(reason) => return MutationOutcome::Rejected(reason),
        };

        self.store.get_or_create(&session.room_id).apply(patch);
        self.broadcast_state(&session.room_id);
        MutationOutcome::Accepted
    }

    /// Admin: merges overlay flags and relays the patch alone.
    pub fn trigger_animation(
        &mut self,
        session_id: SessionId,
        patch: AnimationPatch,
    ) -> MutationOutcome {
        let session = match self.authorize(&session_id, Role::Admin) {
            Ok(session) => session,
            Err(reason) => return MutationOutcome::Rejected(reason),
        };
        if patch.is_empty() {
            return MutationOutcome::Rejected(RejectReason::malformed(
                "animation patch names no overlay",
            ));
        }

        self.store
            .get_or_create(&session.room_id)
            .animations
            .apply(&patch);
        self.broadcast_room(&session.room_id, &ServerEvent::AnimationTrigger(patch));
        MutationOutcome::Accepted
    }

    /// Team: records a bid for the sender's own team.
    pub fn place_bid(&mut self, session_id: SessionId, request: BidRequest) -> MutationOutcome {
        let session = match self.authorize_team(&session_id, &request.team_name) {
            Ok(session) => session,
            Err(reason) => return MutationOutcome::Rejected(reason),
        };
        if let Err(message) = request.validate() {
            return MutationOutcome::Rejected(RejectReason::malformed(message));
        }

        let mut extra = request.extra;
        for field in Bid::ASSIGNED_FIELDS {
            extra.remove(field);
        }

        self.bid_sequence += 1;
        let timestamp = Utc::now();
        let bid = Bid {
            id: format!(
                "bid-{}-{}-{}",
                timestamp.timestamp_millis(),
                self.bid_sequence,
                session_id.simple()
            ),
            player_id: request.player_id,
            player_name: request.player_name,
            team_id: request.team_id,
            team_name: request.team_name.trim().to_string(),
            amount: request.amount,
            timestamp,
            origin_session_id: session_id,
            extra,
        };

        info!(
            room_id = %session.room_id,
            bid_id = %bid.id,
            team = %bid.team_name,
            player_id = %bid.player_id,
            amount = bid.amount,
            "Bid placed"
        );

        self.store
            .get_or_create(&session.room_id)
            .record_bid(bid.clone());
        self.broadcast_state(&session.room_id);
        self.broadcast_room(&session.room_id, &ServerEvent::NewBid(bid));
        MutationOutcome::Accepted
    }

    /// Team: announces a right-to-match for the sender's own team.
    pub fn use_rtm(&mut self, session_id: SessionId, usage: RtmUsage) -> MutationOutcome {
        let session = match self.authorize_team(&session_id, &usage.team_name) {
            Ok(session) => session,
            Err(reason) => return MutationOutcome::Rejected(reason),
        };

        self.broadcast_room(&session.room_id, &ServerEvent::RtmUsed(usage));
        MutationOutcome::Accepted
    }

    /// Admin: relays a team analysis overlay to the room.
    pub fn broadcast_team_analysis(
        &mut self,
        session_id: SessionId,
        payload: Value,
    ) -> MutationOutcome {
        let session = match self.authorize(&session_id, Role::Admin) {
            Ok(session) => session,
            Err(reason) => return MutationOutcome::Rejected(reason),
        };

        self.broadcast_room(&session.room_id, &ServerEvent::ShowTeamAnalysis(payload));
        MutationOutcome::Accepted
    }

    /// Admin: ends the room, evicting every member and purging its state.
    pub fn end_room(&mut self, session_id: SessionId, request: EndRoomRequest) -> MutationOutcome {
        let session = match self.authorize(&session_id, Role::Admin) {
            Ok(session) => session,
            Err(reason) => return MutationOutcome::Rejected(reason),
        };
        if request.room_id != session.room_id {
            return MutationOutcome::Rejected(RejectReason::RoomMismatch);
        }

        let room_id = session.room_id;
        let members = self.store.members(&room_id);
        self.broadcaster.broadcast(
            &members,
            &ServerEvent::RoomEnded(RoomEnded {
                room_id: room_id.clone(),
                message: ROOM_ENDED_MESSAGE.to_string(),
            }),
        );

        for member in &members {
            self.sessions.remove(member);
        }
        self.store.remove(&room_id);

        info!(
            room_id = %room_id,
            ended_by = %session_id,
            evicted = members.len(),
            "Room ended by admin"
        );
        MutationOutcome::Accepted
    }

    // ------------------------------------------------------------------
    // Request/response accessors
    // ------------------------------------------------------------------

    /// The room's snapshot, or the default snapshot if the room does not exist.
    #[must_use]
    pub fn snapshot(&self, room_id: &str) -> AuctionState {
        self.store
            .snapshot(room_id)
            .unwrap_or_else(|| AuctionState::with_timer(self.settings.default_timer))
    }

    /// Role breakdown of the room's current members.
    #[must_use]
    pub fn room_stats(&self, room_id: &str) -> RoomStats {
        let mut stats = RoomStats::default();
        for member in self.store.members(room_id) {
            if let Some(session) = self.sessions.get(&member) {
                stats.count(session.role);
            }
        }
        stats
    }

    /// Replaces an existing room's state with the default snapshot and
    /// broadcasts it. Rooms that do not exist are left unallocated.
    pub fn reset_room(&mut self, room_id: &str) -> AuctionState {
        let fresh = AuctionState::with_timer(self.settings.default_timer);
        if self.store.replace(room_id, fresh.clone()) {
            info!(room_id = %room_id, "Auction state reset");
            self.broadcast_room(room_id, &ServerEvent::AuctionState(fresh.clone()));
        } else {
            debug!(room_id = %room_id, "Reset requested for inactive room");
        }
        fresh
    }

    /// The joined session record, if any.
    #[must_use]
    pub fn session(&self, session_id: &SessionId) -> Option<&ConnectionSession> {
        self.sessions.get(session_id)
    }

    /// Admin sessions of the room.
    #[must_use]
    pub fn room_admins(&self, room_id: &str) -> HashSet<SessionId> {
        self.store.admins(room_id)
    }

    /// Returns `true` if any state exists for the room.
    #[must_use]
    pub fn has_room(&self, room_id: &str) -> bool {
        self.store.contains(room_id)
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.store.room_count()
    }

    /// Ids of every room holding state.
    #[must_use]
    pub fn room_ids(&self) -> Vec<String> {
        self.store.room_ids()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.broadcaster.connection_count()
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Looks up the sender's session and checks its role.
    fn authorize(
        &self,
        session_id: &SessionId,
        required: Role,
    ) -> Result<ConnectionSession, RejectReason> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(RejectReason::NotJoined)?;
        let permitted = match required {
            Role::Admin => self.room_admins(&session.room_id).contains(session_id),
            Role::Team | Role::Spectator => session.role == required,
        };
        if !permitted {
            return Err(RejectReason::Forbidden { required });
        }
        Ok(session.clone())
    }

    /// Like [`authorize`](Self::authorize) for teams, also matching the team name.
    fn authorize_team(
        &self,
        session_id: &SessionId,
        team_name: &str,
    ) -> Result<ConnectionSession, RejectReason> {
        let session = self.authorize(session_id, Role::Team)?;
        if !session.is_team(team_name.trim()) {
            return Err(RejectReason::TeamMismatch);
        }
        Ok(session)
    }

    fn broadcast_room(&mut self, room_id: &str, event: &ServerEvent) -> usize {
        let members = self.store.members(room_id);
        self.broadcaster.broadcast(&members, event)
    }

    fn broadcast_state(&mut self, room_id: &str) {
        if let Some(state) = self.store.snapshot(room_id) {
            self.broadcast_room(room_id, &ServerEvent::AuctionState(state));
        }
    }

    fn broadcast_stats(&mut self, room_id: &str) {
        let stats = self.room_stats(room_id);
        self.broadcast_room(room_id, &ServerEvent::ClientsUpdate(stats));
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(RelaySettings::default())
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("rooms", &self.store.room_count())
            .field("sessions", &self.sessions.len())
            .field("connections", &self.broadcaster.connection_count())
            .field("settings", &self.settings)
            .finish()
    }
}
