//! Connection sessions and the join admission policy.
//!
//! A [`ConnectionSession`] binds one WebSocket connection to a room and a
//! role. It is created when a join is admitted and dropped on leave,
//! disconnect or `end-room`. Its room never changes: moving to another room
//! means leaving and joining again.
//!
//! [`admit`] decides whether a join request is accepted as asked, downgraded
//! (a second admin becomes a spectator) or refused outright.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::RejectReason;
use crate::types::{Role, SessionId};

/// Payload of an inbound `join-room` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub room_id: String,
    #[serde(rename = "type")]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
}

/// Identity of a joined connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSession {
    pub session_id: SessionId,
    pub role: Role,
    /// Present if and only if `role` is [`Role::Team`].
    pub team_name: Option<String>,
    pub room_id: String,
    pub joined_at: DateTime<Utc>,
}

impl ConnectionSession {
    pub fn new(
        session_id: SessionId,
        room_id: impl Into<String>,
        role: Role,
        team_name: Option<String>,
    ) -> Self {
        Self {
            session_id,
            role,
            team_name: if role == Role::Team { team_name } else { None },
            room_id: room_id.into(),
            joined_at: Utc::now(),
        }
    }

    /// Returns `true` if this session plays as `team_name`.
    pub fn is_team(&self, team_name: &str) -> bool {
        self.role == Role::Team && self.team_name.as_deref() == Some(team_name)
    }
}

/// Result of a join attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Admitted with the requested role.
    Joined(Role),
    /// Admitted, but with a lesser role than requested.
    Downgraded { requested: Role, granted: Role },
    /// Not admitted; nothing was registered.
    Rejected(RejectReason),
}

impl JoinOutcome {
    /// The role the session ends up with, if admitted.
    pub fn granted_role(&self) -> Option<Role> {
        match self {
            Self::Joined(role) => Some(*role),
            Self::Downgraded { granted, .. } => Some(*granted),
            Self::Rejected(_) => None,
        }
    }
}

/// Decides how a join request is admitted given the room's current sessions.
///
/// `occupants` must only contain sessions of the requested room, excluding
/// the joining session itself.
pub fn admit<'a>(
    request: &JoinRequest,
    occupants: impl IntoIterator<Item = &'a ConnectionSession>,
    max_teams: usize,
) -> JoinOutcome {
    if request.room_id.trim().is_empty() {
        return JoinOutcome::Rejected(RejectReason::InvalidRoomId);
    }

    let team_name = request
        .team_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());

    if request.role == Role::Team && team_name.is_none() {
        return JoinOutcome::Rejected(RejectReason::MissingTeamName);
    }

    let mut has_admin = false;
    let mut team_count = 0;
    let mut team_taken = false;
    for occupant in occupants {
        match occupant.role {
            Role::Admin => has_admin = true,
            Role::Team => {
                team_count += 1;
                if team_name.is_some_and(|name| occupant.is_team(name)) {
                    team_taken = true;
                }
            }
            Role::Spectator => {}
        }
    }

    match request.role {
        Role::Admin if has_admin => JoinOutcome::Downgraded {
            requested: Role::Admin,
            granted: Role::Spectator,
        },
        Role::Team if team_taken => JoinOutcome::Rejected(RejectReason::TeamTaken {
            team: team_name.unwrap_or_default().to_string(),
        }),
        Role::Team if team_count >= max_teams => {
            JoinOutcome::Rejected(RejectReason::RoomFull { max_teams })
        }
        role => JoinOutcome::Joined(role),
    }
}

/// All joined sessions, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SessionId, ConnectionSession>,
}

impl SessionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: ConnectionSession) {
        trace!(
            session_id = %session.session_id,
            room_id = %session.room_id,
            role = ?session.role,
            "Session recorded"
        );
        self.sessions.insert(session.session_id, session);
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&ConnectionSession> {
        self.sessions.get(session_id)
    }

    pub fn remove(&mut self, session_id: &SessionId) -> Option<ConnectionSession> {
        self.sessions.remove(session_id)
    }

    /// Sessions joined to `room_id`.
    pub fn in_room<'a>(&'a self, room_id: &'a str) -> impl Iterator<Item = &'a ConnectionSession> {
        self.sessions
            .values()
            .filter(move |session| session.room_id == room_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
