//! WebSocket wire protocol.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`. Inbound frames are decoded into
//! a [`ClientEvent`] with a typed payload per event; outbound frames are
//! encoded from a [`ServerEvent`].
//!
//! Decoding is strict: unknown events, missing fields and unknown keys in
//! state patches are refused before anything reaches the room state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::RejectReason;
use crate::session::JoinRequest;
use crate::types::{
    AnimationPatch, AuctionState, AuctionStatePatch, Bid, RecordId, Role, RoomStats,
};

/// Errors raised while decoding an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame is not a JSON envelope.
    #[error("invalid JSON frame: {0}")]
    InvalidJson(String),

    /// The envelope names an event the server does not handle.
    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    /// The payload does not match the event's schema.
    #[error("invalid payload for '{event}': {message}")]
    InvalidPayload { event: String, message: String },
}

impl ProtocolError {
    /// The event name the frame claimed, if it got that far.
    pub fn event(&self) -> Option<&str> {
        match self {
            Self::InvalidJson(_) => None,
            Self::UnknownEvent(event) | Self::InvalidPayload { event, .. } => Some(event),
        }
    }

    /// Converts the decoding failure into the reason reported to the client.
    pub fn into_reject_reason(self) -> RejectReason {
        match self {
            Self::InvalidJson(message) => RejectReason::malformed(message),
            Self::UnknownEvent(event) => RejectReason::UnknownEvent { event },
            Self::InvalidPayload { message, .. } => RejectReason::malformed(message),
        }
    }
}

/// Raw envelope before the payload is typed.
#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Payload of `place-bid`.
///
/// Fields beyond the ones the relay interprets are kept in `extra` and
/// carried through to the recorded [`Bid`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidRequest {
    pub team_name: String,
    pub amount: f64,
    pub player_id: RecordId,
    pub player_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<RecordId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BidRequest {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(format!("bid amount must be a positive number, got {}", self.amount));
        }
        if self.team_name.trim().is_empty() {
            return Err("teamName cannot be empty".to_string());
        }
        if self.player_id.is_blank() {
            return Err("playerId cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Payload of `use-rtm`, relayed as `rtm-used`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtmUsage {
    pub team_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload of `end-room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndRoomRequest {
    pub room_id: String,
}

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinRoom(JoinRequest),
    LeaveRoom,
    UpdateAuctionState(AuctionStatePatch),
    TriggerAnimation(AnimationPatch),
    PlaceBid(BidRequest),
    UseRtm(RtmUsage),
    BroadcastTeamAnalysis(Value),
    EndRoom(EndRoomRequest),
}

impl ClientEvent {
    pub const JOIN_ROOM: &'static str = "join-room";
    pub const LEAVE_ROOM: &'static str = "leave-room";
    pub const UPDATE_AUCTION_STATE: &'static str = "update-auction-state";
    pub const TRIGGER_ANIMATION: &'static str = "trigger-animation";
    pub const PLACE_BID: &'static str = "place-bid";
    pub const USE_RTM: &'static str = "use-rtm";
    pub const BROADCAST_TEAM_ANALYSIS: &'static str = "broadcast-team-analysis";
    pub const END_ROOM: &'static str = "end-room";

    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the frame is not an envelope, the event
    /// is unknown, or the payload does not fit the event's schema.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|err| ProtocolError::InvalidJson(err.to_string()))?;
        Self::from_parts(envelope.event, envelope.data)
    }

    fn from_parts(event: String, data: Value) -> Result<Self, ProtocolError> {
        let decoded = match event.as_str() {
            Self::JOIN_ROOM => typed(data).map(Self::JoinRoom),
            Self::LEAVE_ROOM => Ok(Self::LeaveRoom),
            Self::UPDATE_AUCTION_STATE => typed(data).map(Self::UpdateAuctionState),
            Self::TRIGGER_ANIMATION => typed(data).map(Self::TriggerAnimation),
            Self::PLACE_BID => typed::<BidRequest>(data)
                .and_then(|bid| bid.validate().map(|()| bid))
                .map(Self::PlaceBid),
            Self::USE_RTM => typed(data).map(Self::UseRtm),
            Self::BROADCAST_TEAM_ANALYSIS => Ok(Self::BroadcastTeamAnalysis(data)),
            Self::END_ROOM => typed(data).map(Self::EndRoom),
            _ => return Err(ProtocolError::UnknownEvent(event)),
        };

        decoded.map_err(|message| ProtocolError::InvalidPayload { event, message })
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => Self::JOIN_ROOM,
            Self::LeaveRoom => Self::LEAVE_ROOM,
            Self::UpdateAuctionState(_) => Self::UPDATE_AUCTION_STATE,
            Self::TriggerAnimation(_) => Self::TRIGGER_ANIMATION,
            Self::PlaceBid(_) => Self::PLACE_BID,
            Self::UseRtm(_) => Self::USE_RTM,
            Self::BroadcastTeamAnalysis(_) => Self::BROADCAST_TEAM_ANALYSIS,
            Self::EndRoom(_) => Self::END_ROOM,
        }
    }
}

fn typed<T: for<'de> Deserialize<'de>>(data: Value) -> Result<T, String> {
    serde_json::from_value(data).map_err(|err| err.to_string())
}

/// Sent to a session right after its join is admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    pub room_id: String,
    pub role: Role,
    pub requested_role: Role,
}

/// Sent to every member when an admin ends the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEnded {
    pub room_id: String,
    pub message: String,
}

/// Sent to the originator of a refused operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub operation: String,
    pub reason: RejectReason,
    pub message: String,
}

impl Rejection {
    pub fn new(operation: impl Into<String>, reason: RejectReason) -> Self {
        Self {
            operation: operation.into(),
            message: reason.to_string(),
            reason,
        }
    }
}

/// An outbound event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    RoomJoined(RoomJoined),
    AuctionState(AuctionState),
    AnimationTrigger(AnimationPatch),
    NewBid(Bid),
    RtmUsed(RtmUsage),
    ShowTeamAnalysis(Value),
    ClientsUpdate(RoomStats),
    RoomEnded(RoomEnded),
    OperationRejected(Rejection),
}

impl ServerEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RoomJoined(_) => "room-joined",
            Self::AuctionState(_) => "auction-state",
            Self::AnimationTrigger(_) => "animation-trigger",
            Self::NewBid(_) => "new-bid",
            Self::RtmUsed(_) => "rtm-used",
            Self::ShowTeamAnalysis(_) => "show-team-analysis",
            Self::ClientsUpdate(_) => "clients-update",
            Self::RoomEnded(_) => "room-ended",
            Self::OperationRejected(_) => "operation-rejected",
        }
    }

    /// Encodes the event as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error only if a payload contains a non-finite number.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
