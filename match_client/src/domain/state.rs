// Domain-level match state: positions, entities, presences and sessions.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Last known state of one remote participant.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntityState {
    pub identity: String,
    pub position: Position,
}

impl RemoteEntityState {
    pub fn new(identity: impl Into<String>, position: Position) -> Self {
        Self {
            identity: identity.into(),
            position,
        }
    }
}

/// Opaque id handed to the render side for a spawned remote entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(pub u64);

/// The locally controlled entity. Driven by input only, never by the network.
#[derive(Debug, Clone, Default)]
pub struct LocalEntityState {
    pub position: Position,
}

impl LocalEntityState {
    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.position.x += dx;
        self.position.y += dy;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub user_id: String,
    pub session_id: String,
    pub username: String,
}

impl Presence {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: String::new(),
            username: String::new(),
        }
    }
}

/// Identities joining and leaving the match, as reported by the server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceEvent {
    pub joins: Vec<Presence>,
    pub leaves: Vec<Presence>,
}

/// Authenticated identity returned by the auth service.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub username: String,
    pub expires_at: u64,
}

impl Session {
    /// True once `now` is within `margin` of the expiry.
    pub fn is_expired(&self, now_epoch_seconds: u64, margin: Duration) -> bool {
        now_epoch_seconds.saturating_add(margin.as_secs()) >= self.expires_at
    }
}

/// Membership in one match; exists from join until leave or disposal.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSession {
    pub match_id: String,
    pub connected: bool,
}

/// Match assignment handed out by the matchmaking RPC.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchAssignment {
    pub match_id: String,
    pub server_time: i64,
    pub min_elo: i32,
    pub max_elo: i32,
    pub current_players: u32,
    pub max_players: u32,
}

/// Socket-level confirmation that the connection joined a match.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedMatch {
    pub match_id: String,
    pub self_presence: Option<Presence>,
    pub presences: Vec<Presence>,
}

/// Everything the flow learned while joining.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchJoinResult {
    pub match_id: String,
    pub self_presence: Option<Presence>,
    // Participants already present when we joined.
    pub presences: Vec<Presence>,
    // Only set when the match came from the matchmaking RPC.
    pub assignment: Option<MatchAssignment>,
}
