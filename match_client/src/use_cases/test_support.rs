use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::{
    AuthProvider, BoxError, Clock, Connector, JoinedMatch, MatchAssignment, MatchmakerProvider,
    Opcode, Presence, Session, TransportError, WireConnection, WireEvent,
};

// Shared fixed time source for deterministic use-case tests.
pub(crate) struct FixedClock(pub(crate) u64);

impl Clock for FixedClock {
    fn now_epoch_seconds(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SentFrame {
    pub match_id: String,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

// In-memory connection that records outbound calls and lets tests inject events.
pub(crate) struct RecordingConnection {
    events: broadcast::Sender<WireEvent>,
    connected: AtomicBool,
    sent: Mutex<Vec<SentFrame>>,
    send_failure: Mutex<Option<TransportError>>,
    join_failure: Mutex<Option<TransportError>>,
    presences: Mutex<Vec<Presence>>,
    joined: Mutex<Vec<String>>,
    left: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl RecordingConnection {
    pub(crate) fn connected() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            send_failure: Mutex::new(None),
            join_failure: Mutex::new(None),
            presences: Mutex::new(Vec::new()),
            joined: Mutex::new(Vec::new()),
            left: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_presences(self, presences: Vec<Presence>) -> Self {
        *self.presences.lock().expect("presences mutex poisoned") = presences;
        self
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn fail_sends(&self, err: TransportError) {
        *self.send_failure.lock().expect("failure mutex poisoned") = Some(err);
    }

    pub(crate) fn fail_joins(&self, err: TransportError) {
        *self.join_failure.lock().expect("failure mutex poisoned") = Some(err);
    }

    pub(crate) fn emit(&self, event: WireEvent) {
        // No subscribers is fine; the event is simply lost.
        let _ = self.events.send(event);
    }

    pub(crate) fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().expect("sent mutex poisoned").clone()
    }

    pub(crate) fn joined(&self) -> Vec<String> {
        self.joined.lock().expect("joined mutex poisoned").clone()
    }

    pub(crate) fn left(&self) -> Vec<String> {
        self.left.lock().expect("left mutex poisoned").clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WireConnection for RecordingConnection {
    fn subscribe(&self) -> broadcast::Receiver<WireEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn join_match(&self, match_id: &str) -> Result<JoinedMatch, TransportError> {
        if let Some(err) = self.join_failure.lock().expect("failure mutex poisoned").clone() {
            return Err(err);
        }
        self.joined
            .lock()
            .expect("joined mutex poisoned")
            .push(match_id.to_string());
        Ok(JoinedMatch {
            match_id: match_id.to_string(),
            self_presence: Some(Presence::new("self")),
            presences: self.presences.lock().expect("presences mutex poisoned").clone(),
        })
    }

    async fn leave_match(&self, match_id: &str) -> Result<(), TransportError> {
        self.left
            .lock()
            .expect("left mutex poisoned")
            .push(match_id.to_string());
        Ok(())
    }

    async fn send_match_state(
        &self,
        match_id: &str,
        opcode: Opcode,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if let Some(err) = self.send_failure.lock().expect("failure mutex poisoned").clone() {
            return Err(err);
        }
        self.sent.lock().expect("sent mutex poisoned").push(SentFrame {
            match_id: match_id.to_string(),
            opcode,
            payload,
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn test_session(expires_at: u64) -> Session {
    Session {
        token: "token-1".to_string(),
        user_id: "u1".to_string(),
        username: "pilot".to_string(),
        expires_at,
    }
}

pub(crate) struct FakeAuth {
    pub calls: AtomicUsize,
    pub expires_at: u64,
    pub fail: bool,
}

impl FakeAuth {
    pub(crate) fn new(expires_at: u64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            expires_at,
            fail: false,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0)
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn authenticate_device(&self, _device_id: &str) -> Result<Session, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("invalid device".into());
        }
        Ok(test_session(self.expires_at))
    }
}

pub(crate) struct FakeMatchmaker {
    pub calls: AtomicUsize,
    pub match_id: String,
    pub fail: bool,
}

impl FakeMatchmaker {
    pub(crate) fn new(match_id: impl Into<String>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            match_id: match_id.into(),
            fail: false,
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MatchmakerProvider for FakeMatchmaker {
    async fn request_match(
        &self,
        _session: &Session,
        _rpc_name: &str,
    ) -> Result<MatchAssignment, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("rpc unavailable".into());
        }
        Ok(MatchAssignment {
            match_id: self.match_id.clone(),
            server_time: 0,
            min_elo: 0,
            max_elo: 2000,
            current_players: 1,
            max_players: 8,
        })
    }
}

// Fails the first `failures` attempts, then hands out the shared connection.
pub(crate) struct FakeConnector {
    pub connection: Arc<RecordingConnection>,
    failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub(crate) fn new(connection: Arc<RecordingConnection>, failures: usize) -> Self {
        Self {
            connection,
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _session: &Session) -> Result<Arc<dyn WireConnection>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        self.connection.set_connected(true);
        Ok(self.connection.clone() as Arc<dyn WireConnection>)
    }
}
