use async_trait::async_trait;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

use crate::domain::errors::{BoxError, TransportError};
use crate::domain::opcode::Opcode;
use crate::domain::state::{JoinedMatch, MatchAssignment, PresenceEvent, Session};

/// One inbound match-state frame. Built per frame and consumed by dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
    // Set when the server relays a frame on behalf of another participant.
    pub sender: Option<String>,
}

/// Events a connection delivers from its own task.
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    MatchState {
        match_id: String,
        envelope: InboundEnvelope,
    },
    MatchPresence {
        match_id: String,
        event: PresenceEvent,
    },
    Disconnected {
        reason: Option<String>,
    },
}

// Port for the persistent duplex socket to the match server.
// The protocol depends on this trait, not on a concrete socket.
#[async_trait]
pub trait WireConnection: Send + Sync {
    /// New receiver for every inbound event from this point on.
    fn subscribe(&self) -> broadcast::Receiver<WireEvent>;

    fn is_connected(&self) -> bool;

    async fn join_match(&self, match_id: &str) -> Result<JoinedMatch, TransportError>;

    async fn leave_match(&self, match_id: &str) -> Result<(), TransportError>;

    async fn send_match_state(
        &self,
        match_id: &str,
        opcode: Opcode,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

// Port for opening a socket on behalf of an authenticated session.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, session: &Session) -> Result<Arc<dyn WireConnection>, TransportError>;
}

// Port for acquiring a session from the auth service.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate_device(&self, device_id: &str) -> Result<Session, BoxError>;
}

// Port for asking the backend which match to join.
#[async_trait]
pub trait MatchmakerProvider: Send + Sync {
    async fn request_match(
        &self,
        session: &Session,
        rpc_name: &str,
    ) -> Result<MatchAssignment, BoxError>;
}

// Port for retrieving the current time.
pub trait Clock: Send + Sync {
    fn now_epoch_seconds(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}
