// Connection flow: authenticate, open the socket, join a match, hand out the protocol.

use crate::domain::{
    AuthProvider, Clock, Connector, FlowError, MatchJoinResult, MatchSession, MatchmakerProvider,
    Session, TransportError, WireConnection,
};
use crate::use_cases::protocol::MatchProtocol;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub device_id: String,
    pub rpc_name: String,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    pub backoff_cap: Duration,
    pub session_refresh_margin: Duration,
}

struct ActiveMatch {
    session: MatchSession,
    protocol: Arc<MatchProtocol>,
}

/// Owns the session, the socket and the current match membership.
///
/// A `MatchProtocol` only exists once a join has been confirmed, so nothing can
/// listen to a match the client is not in. It is handed out idle: events are
/// buffered until the caller has attached handlers and starts listening.
pub struct ConnectionFlow {
    auth: Arc<dyn AuthProvider>,
    matchmaker: Arc<dyn MatchmakerProvider>,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn Clock>,
    settings: FlowSettings,
    session: Option<Session>,
    connection: Option<Arc<dyn WireConnection>>,
    current: Option<ActiveMatch>,
    disposed: bool,
}

impl ConnectionFlow {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        matchmaker: Arc<dyn MatchmakerProvider>,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
        settings: FlowSettings,
    ) -> Self {
        Self {
            auth,
            matchmaker,
            connector,
            clock,
            settings,
            session: None,
            connection: None,
            current: None,
            disposed: false,
        }
    }

    /// Restores or acquires a session, then opens the socket with retries.
    pub async fn connect(&mut self) -> Result<Session, FlowError> {
        if self.disposed {
            return Err(FlowError::Disposed);
        }

        let session = self.ensure_session().await?;

        if let Some(connection) = &self.connection {
            if connection.is_connected() {
                return Ok(session);
            }
        }

        let connection = self.connect_socket(&session).await?;
        self.connection = Some(connection);
        Ok(session)
    }

    async fn ensure_session(&mut self) -> Result<Session, FlowError> {
        let now = self.clock.now_epoch_seconds();
        if let Some(session) = &self.session {
            if !session.is_expired(now, self.settings.session_refresh_margin) {
                info!(user_id = %session.user_id, "restored session");
                return Ok(session.clone());
            }
            info!(user_id = %session.user_id, "session expired; re-authenticating");
        }

        // Authentication failures are not retried.
        let session = self
            .auth
            .authenticate_device(&self.settings.device_id)
            .await
            .map_err(FlowError::Auth)?;
        info!(user_id = %session.user_id, username = %session.username, "authenticated");
        self.session = Some(session.clone());
        Ok(session)
    }

    async fn connect_socket(&self, session: &Session) -> Result<Arc<dyn WireConnection>, FlowError> {
        let attempts = self.settings.connect_attempts.max(1);
        let mut delay = self.settings.connect_backoff;

        for attempt in 1..=attempts {
            match self.connector.connect(session).await {
                Ok(connection) => {
                    info!(attempt, "socket connected");
                    return Ok(connection);
                }
                Err(err) if attempt < attempts => {
                    warn!(
                        attempt,
                        error = %err,
                        retry_in_ms = delay.as_millis(),
                        "socket connect failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2).min(self.settings.backoff_cap);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "socket connect failed; giving up");
                    return Err(FlowError::Transport(err));
                }
            }
        }

        Err(FlowError::Transport(TransportError::NotConnected))
    }

    /// Joins `match_id`, or asks the match RPC for one when it is absent or empty.
    pub async fn join_or_create_match(
        &mut self,
        match_id: Option<&str>,
    ) -> Result<MatchJoinResult, FlowError> {
        if self.disposed {
            return Err(FlowError::Disposed);
        }
        if let Some(active) = &self.current {
            return Err(FlowError::AlreadyInMatch {
                match_id: active.session.match_id.clone(),
            });
        }

        let connection = match &self.connection {
            Some(connection) if connection.is_connected() => Arc::clone(connection),
            _ => return Err(FlowError::Transport(TransportError::NotConnected)),
        };
        let session = self
            .session
            .clone()
            .ok_or(FlowError::Transport(TransportError::NotConnected))?;

        let (target, assignment) = match match_id.filter(|id| !id.is_empty()) {
            Some(id) => (id.to_string(), None),
            None => {
                let assignment = self
                    .matchmaker
                    .request_match(&session, &self.settings.rpc_name)
                    .await
                    .map_err(FlowError::Rpc)?;
                if assignment.match_id.is_empty() {
                    return Err(FlowError::InvalidRpcResponse(
                        "match rpc returned an empty match id".to_string(),
                    ));
                }
                info!(
                    match_id = %assignment.match_id,
                    current_players = assignment.current_players,
                    max_players = assignment.max_players,
                    "match assigned"
                );
                (assignment.match_id.clone(), Some(assignment))
            }
        };

        // Subscribe before joining so nothing sent right after the ack is missed.
        let events = connection.subscribe();
        let joined = connection.join_match(&target).await?;

        let protocol = Arc::new(MatchProtocol::with_subscription(
            Arc::clone(&connection),
            joined.match_id.clone(),
            events,
        ));

        info!(
            match_id = %joined.match_id,
            presences = joined.presences.len(),
            "joined match"
        );
        self.current = Some(ActiveMatch {
            session: MatchSession {
                match_id: joined.match_id.clone(),
                connected: true,
            },
            protocol,
        });

        Ok(MatchJoinResult {
            match_id: joined.match_id,
            self_presence: joined.self_presence,
            presences: joined.presences,
            assignment,
        })
    }

    pub fn protocol(&self) -> Option<Arc<MatchProtocol>> {
        self.current
            .as_ref()
            .map(|active| Arc::clone(&active.protocol))
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn match_session(&self) -> Option<&MatchSession> {
        self.current.as_ref().map(|active| &active.session)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Stops dispatch, tells the server we left, then tears the protocol down.
    pub async fn leave(&mut self) -> Result<(), FlowError> {
        let Some(active) = self.current.take() else {
            return Err(FlowError::NotInMatch);
        };
        let match_id = active.session.match_id;

        active.protocol.stop_listening().await;
        let result = match &self.connection {
            Some(connection) => connection.leave_match(&match_id).await,
            None => Err(TransportError::NotConnected),
        };
        active.protocol.dispose().await;

        match result {
            Ok(()) => {
                info!(%match_id, "left match");
                Ok(())
            }
            Err(err) => {
                warn!(%match_id, error = %err, "leave not acknowledged");
                Err(FlowError::Transport(err))
            }
        }
    }

    /// Leaves any match, closes the socket and drops the session. Idempotent.
    pub async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if self.current.is_some() {
            if let Err(err) = self.leave().await {
                warn!(error = %err, "leave during dispose failed");
            }
        }
        if let Some(connection) = self.connection.take() {
            if let Err(err) = connection.close().await {
                warn!(error = %err, "socket close failed");
            }
        }
        self.session = None;
        info!("connection flow disposed");
    }
}
