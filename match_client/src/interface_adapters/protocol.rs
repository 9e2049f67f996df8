// Wire DTOs for the match socket and the HTTP API, plus conversions into domain types.

use crate::domain::{JoinedMatch, MatchAssignment, Opcode, Presence, PresenceEvent, Session};
use serde::{Deserialize, Serialize};

/// Frames the client sends over the match socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientFrame {
    MatchJoin {
        match_id: String,
    },
    MatchLeave {
        match_id: String,
    },
    // `data` is base64 of the opaque payload bytes.
    MatchDataSend {
        match_id: String,
        op_code: Opcode,
        data: String,
    },
}

/// Frames the server pushes over the match socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerFrame {
    MatchJoined {
        match_id: String,
        #[serde(default)]
        self_presence: Option<PresenceDto>,
        #[serde(default)]
        presences: Vec<PresenceDto>,
    },
    MatchData {
        match_id: String,
        op_code: Opcode,
        #[serde(default)]
        data: String,
        // Sender, when the server relays on behalf of another participant.
        #[serde(default)]
        presence: Option<PresenceDto>,
    },
    MatchPresence {
        match_id: String,
        #[serde(default)]
        joins: Vec<PresenceDto>,
        #[serde(default)]
        leaves: Vec<PresenceDto>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceDto {
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub username: String,
}

impl From<PresenceDto> for Presence {
    fn from(dto: PresenceDto) -> Self {
        Self {
            user_id: dto.user_id,
            session_id: dto.session_id,
            username: dto.username,
        }
    }
}

impl From<&Presence> for PresenceDto {
    fn from(presence: &Presence) -> Self {
        Self {
            user_id: presence.user_id.clone(),
            session_id: presence.session_id.clone(),
            username: presence.username.clone(),
        }
    }
}

pub fn presence_event(joins: Vec<PresenceDto>, leaves: Vec<PresenceDto>) -> PresenceEvent {
    PresenceEvent {
        joins: joins.into_iter().map(Presence::from).collect(),
        leaves: leaves.into_iter().map(Presence::from).collect(),
    }
}

pub fn joined_match(
    match_id: String,
    self_presence: Option<PresenceDto>,
    presences: Vec<PresenceDto>,
) -> JoinedMatch {
    JoinedMatch {
        match_id,
        self_presence: self_presence.map(Presence::from),
        presences: presences.into_iter().map(Presence::from).collect(),
    }
}

/// Body for `POST /v2/account/authenticate/device`.
#[derive(Debug, Serialize)]
pub struct DeviceAuthRequest<'a> {
    pub device_id: &'a str,
    pub create: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionResponse {
    pub token: String,
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    pub expires_at: u64,
}

impl From<SessionResponse> for Session {
    fn from(response: SessionResponse) -> Self {
        Self {
            token: response.token,
            user_id: response.user_id,
            username: response.username,
            expires_at: response.expires_at,
        }
    }
}

/// Match RPC response. The backend module emits camelCase keys, so both
/// spellings are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchRpcResponse {
    #[serde(default, alias = "matchId")]
    pub match_id: String,
    #[serde(default, alias = "serverTime")]
    pub server_time: i64,
    #[serde(default, alias = "minElo")]
    pub min_elo: i32,
    #[serde(default, alias = "maxElo")]
    pub max_elo: i32,
    #[serde(default, alias = "currentPlayers")]
    pub current_players: u32,
    #[serde(default, alias = "maxPlayers")]
    pub max_players: u32,
}

impl From<MatchRpcResponse> for MatchAssignment {
    fn from(response: MatchRpcResponse) -> Self {
        Self {
            match_id: response.match_id,
            server_time: response.server_time,
            min_elo: response.min_elo,
            max_elo: response.max_elo,
            current_players: response.current_players,
            max_players: response.max_players,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}
