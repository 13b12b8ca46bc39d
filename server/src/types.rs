//! Shared auction data types for the BidRoom server.
//!
//! This module defines the per-room auction snapshot and the typed partial
//! updates that admins send to it. Field names use `camelCase` to match the
//! JSON contract consumed by the auction UI.
//!
//! Domain records (teams, players, the player on the block) keep any fields
//! the relay does not interpret in a flattened `extra` map, so the UI can
//! carry its own attributes through the relay untouched.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

/// Transport-assigned identifier of a single WebSocket connection.
pub type SessionId = Uuid;

/// Default countdown value (in seconds) of a freshly created room.
pub const DEFAULT_TIMER_SECS: u32 = 30;

/// The role a session plays inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Team,
    Spectator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Admin => "admin",
            Self::Team => "team",
            Self::Spectator => "spectator",
        };
        f.write_str(name)
    }
}

/// Identifier of a player or team record.
///
/// Static player and team data uses both string and numeric ids, so either
/// form is accepted and written back out unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Text(String),
    Number(Number),
}

impl RecordId {
    /// Returns `true` for an empty or whitespace-only string id.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(id) => id.trim().is_empty(),
            Self::Number(_) => false,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(id) => f.write_str(id),
            Self::Number(id) => write!(f, "{id}"),
        }
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self::Number(id.into())
    }
}

/// The player currently being auctioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerOnBlock {
    pub id: RecordId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_bid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_bidder: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A team's roster and budget as tracked by the admin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamState {
    pub id: RecordId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An entry in the room's player pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: RecordId,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single accepted bid. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub id: String,
    pub player_id: RecordId,
    pub player_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<RecordId>,
    pub team_name: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub origin_session_id: SessionId,
    /// Fields of the `place-bid` payload the relay does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Bid {
    /// Keys the relay assigns itself; a client cannot supply them as extras.
    pub const ASSIGNED_FIELDS: [&'static str; 3] = ["id", "timestamp", "originSessionId"];
}

/// Visibility and payload of one celebratory overlay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimationFlag {
    pub show: bool,
    #[serde(default)]
    pub data: Option<Value>,
}

/// The four overlays the UI can display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimationFlags {
    pub sold: AnimationFlag,
    pub rtm: AnimationFlag,
    pub retained: AnimationFlag,
    pub unsold: AnimationFlag,
}

impl AnimationFlags {
    /// Overwrites every flag present in `patch`, leaving the others as-is.
    pub fn apply(&mut self, patch: &AnimationPatch) {
        if let Some(flag) = &patch.sold {
            self.sold = flag.clone();
        }
        if let Some(flag) = &patch.rtm {
            self.rtm = flag.clone();
        }
        if let Some(flag) = &patch.retained {
            self.retained = flag.clone();
        }
        if let Some(flag) = &patch.unsold {
            self.unsold = flag.clone();
        }
    }
}

/// Partial update of [`AnimationFlags`], sent by `trigger-animation`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnimationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sold: Option<AnimationFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtm: Option<AnimationFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retained: Option<AnimationFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsold: Option<AnimationFlag>,
}

impl AnimationPatch {
    pub fn is_empty(&self) -> bool {
        self.sold.is_none() && self.rtm.is_none() && self.retained.is_none() && self.unsold.is_none()
    }
}

/// The full per-room auction snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionState {
    pub current_player: Option<PlayerOnBlock>,
    pub teams: Vec<TeamState>,
    pub players: Vec<PlayerRecord>,
    /// Most recent bid first.
    pub bids: Vec<Bid>,
    pub is_auction_active: bool,
    pub timer: u32,
    pub animations: AnimationFlags,
}

impl AuctionState {
    /// Creates the default snapshot with the given countdown value.
    #[must_use]
    pub fn with_timer(timer: u32) -> Self {
        Self {
            current_player: None,
            teams: Vec::new(),
            players: Vec::new(),
            bids: Vec::new(),
            is_auction_active: false,
            timer,
            animations: AnimationFlags::default(),
        }
    }

    /// Shallow merge: every field present in `patch` replaces the stored one.
    pub fn apply(&mut self, patch: AuctionStatePatch) {
        if let Some(current_player) = patch.current_player {
            self.current_player = current_player;
        }
        if let Some(teams) = patch.teams {
            self.teams = teams;
        }
        if let Some(players) = patch.players {
            self.players = players;
        }
        if let Some(bids) = patch.bids {
            self.bids = bids;
        }
        if let Some(is_auction_active) = patch.is_auction_active {
            self.is_auction_active = is_auction_active;
        }
        if let Some(timer) = patch.timer {
            self.timer = timer;
        }
        if let Some(animations) = patch.animations {
            self.animations = animations;
        }
    }

    /// Records an accepted bid at the front of the history and mirrors it
    /// onto the player on the block, if there is one.
    pub fn record_bid(&mut self, bid: Bid) {
        if let Some(player) = self.current_player.as_mut() {
            player.current_bid = Some(bid.amount);
            player.current_bidder = Some(bid.team_name.clone());
        }
        self.bids.insert(0, bid);
    }
}

impl Default for AuctionState {
    fn default() -> Self {
        Self::with_timer(DEFAULT_TIMER_SECS)
    }
}

/// Partial update of [`AuctionState`], sent by `update-auction-state`.
///
/// `currentPlayer` distinguishes "absent" (keep) from `null` (clear the block).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuctionStatePatch {
    #[serde(default, deserialize_with = "deserialize_present")]
    pub current_player: Option<Option<PlayerOnBlock>>,
    #[serde(default)]
    pub teams: Option<Vec<TeamState>>,
    #[serde(default)]
    pub players: Option<Vec<PlayerRecord>>,
    #[serde(default)]
    pub bids: Option<Vec<Bid>>,
    #[serde(default)]
    pub is_auction_active: Option<bool>,
    #[serde(default)]
    pub timer: Option<u32>,
    #[serde(default)]
    pub animations: Option<AnimationFlags>,
}

/// Wraps any present value (including `null`) in `Some`.
fn deserialize_present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Membership counts of a room, broadcast as `clients-update`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStats {
    pub total: usize,
    pub admins: usize,
    pub teams: usize,
    pub spectators: usize,
}

impl RoomStats {
    /// Counts one more session of the given role.
    pub fn count(&mut self, role: Role) {
        self.total += 1;
        match role {
            Role::Admin => self.admins += 1,
            Role::Team => self.teams += 1,
            Role::Spectator => self.spectators += 1,
        }
    }
}
