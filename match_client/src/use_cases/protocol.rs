// Match protocol: opcode dispatch over one wire connection plus typed sends.

use crate::domain::{
    InboundEnvelope, Opcode, OpcodeAssignment, PresenceEvent, ProtocolError, WireConnection,
    WireEvent,
};
use crate::use_cases::registry::{HandlerResult, OpcodeHandler, OpcodeRegistry};
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Match-level events re-exposed to subscribers. The protocol does not act on them.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    Presence(PresenceEvent),
    Disconnected {
        reason: Option<String>,
    },
    /// A registration replaced the handler another key had installed.
    HandlerReplaced {
        opcode: Opcode,
        key: String,
        previous_key: String,
    },
}

pub type ProtocolListener = Arc<dyn Fn(&ProtocolEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// State shared between the protocol handle and its delivery task.
struct Dispatcher {
    match_id: Arc<str>,
    registry: RwLock<OpcodeRegistry>,
    listeners: RwLock<Vec<(ListenerId, ProtocolListener)>>,
    next_listener: AtomicU64,
}

impl Dispatcher {
    fn handle(&self, event: WireEvent) {
        match event {
            WireEvent::MatchState { match_id, envelope } => {
                if *match_id != *self.match_id {
                    debug!(%match_id, opcode = envelope.opcode, "dropping frame for another match");
                    return;
                }
                self.dispatch(&envelope);
            }
            WireEvent::MatchPresence { match_id, event } => {
                if *match_id != *self.match_id {
                    debug!(%match_id, "dropping presence for another match");
                    return;
                }
                self.notify(&ProtocolEvent::Presence(event));
            }
            WireEvent::Disconnected { reason } => {
                warn!(reason = reason.as_deref().unwrap_or("none"), "connection lost");
                self.notify(&ProtocolEvent::Disconnected { reason });
            }
        }
    }

    fn dispatch(&self, envelope: &InboundEnvelope) {
        // Clone the handler out so it runs without holding the table lock.
        let handler = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handler(envelope.opcode);

        let Some(handler) = handler else {
            warn!(opcode = envelope.opcode, "received unhandled opcode");
            return;
        };

        match catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(opcode = envelope.opcode, error = %err, "handler error"),
            Err(_) => error!(opcode = envelope.opcode, "handler panicked"),
        }
    }

    fn notify(&self, event: &ProtocolEvent) {
        let listeners: Vec<ProtocolListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!("protocol listener panicked");
            }
        }
    }
}

struct Listening {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Dispatcher and sender for one joined match.
///
/// Built by the connection flow once a match is joined, so listening can never
/// start before membership is confirmed. Whoever attaches the handlers starts
/// listening.
pub struct MatchProtocol {
    connection: Arc<dyn WireConnection>,
    dispatcher: Arc<Dispatcher>,
    // Receiver taken before the join; buffers events until listening starts.
    early_events: Mutex<Option<broadcast::Receiver<WireEvent>>>,
    listening: Mutex<Option<Listening>>,
    disposed: AtomicBool,
}

impl MatchProtocol {
    pub fn new(connection: Arc<dyn WireConnection>, match_id: impl Into<String>) -> Self {
        Self::build(connection, match_id.into(), None)
    }

    /// Like `new`, but the first `start_listening` replays everything `events`
    /// buffered since it was subscribed.
    pub fn with_subscription(
        connection: Arc<dyn WireConnection>,
        match_id: impl Into<String>,
        events: broadcast::Receiver<WireEvent>,
    ) -> Self {
        Self::build(connection, match_id.into(), Some(events))
    }

    fn build(
        connection: Arc<dyn WireConnection>,
        match_id: String,
        events: Option<broadcast::Receiver<WireEvent>>,
    ) -> Self {
        Self {
            connection,
            dispatcher: Arc::new(Dispatcher {
                match_id: Arc::from(match_id.as_str()),
                registry: RwLock::new(OpcodeRegistry::new()),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
            early_events: Mutex::new(events),
            listening: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn match_id(&self) -> &str {
        &self.dispatcher.match_id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn is_listening(&self) -> bool {
        self.listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Subscribes to the connection's inbound events. Calling it again while
    /// already listening does nothing.
    pub fn start_listening(&self) -> Result<(), ProtocolError> {
        if self.is_disposed() {
            return Err(ProtocolError::Disposed);
        }

        let mut listening = self.listening.lock().unwrap_or_else(PoisonError::into_inner);
        if listening.is_some() {
            return Ok(());
        }

        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ProtocolError::NoRuntime)?;
        let events = self
            .early_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| self.connection.subscribe());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = runtime.spawn(delivery_loop(
            Arc::clone(&self.dispatcher),
            events,
            shutdown_rx,
        ));

        *listening = Some(Listening { shutdown_tx, task });
        info!(match_id = %self.dispatcher.match_id, "started listening to match events");
        Ok(())
    }

    /// Unsubscribes and waits for the delivery task to finish, so no handler
    /// runs after this returns. A no-op when not listening.
    pub async fn stop_listening(&self) {
        let listening = self
            .listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Listening { shutdown_tx, task }) = listening else {
            return;
        };

        let _ = shutdown_tx.send(());
        if let Err(err) = task.await {
            warn!(error = %err, "delivery task ended abnormally");
        }
        info!(match_id = %self.dispatcher.match_id, "stopped listening to match events");
    }

    pub fn register_opcode<F>(&self, key: &str, handler: F) -> Result<Opcode, ProtocolError>
    where
        F: Fn(&InboundEnvelope) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(key, OpcodeAssignment::Derived, Arc::new(handler))
    }

    /// Registers `key` under a fixed opcode, for wire contracts that hard-code
    /// the number.
    pub fn register_opcode_explicit<F>(
        &self,
        key: &str,
        opcode: Opcode,
        handler: F,
    ) -> Result<(), ProtocolError>
    where
        F: Fn(&InboundEnvelope) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(key, OpcodeAssignment::Pinned(opcode), Arc::new(handler))
            .map(|_| ())
    }

    /// Re-registering an opcode replaces its handler and emits
    /// `ProtocolEvent::HandlerReplaced` to listeners.

    fn register(
        &self,
        key: &str,
        assignment: OpcodeAssignment,
        handler: OpcodeHandler,
    ) -> Result<Opcode, ProtocolError> {
        if self.is_disposed() {
            return Err(ProtocolError::Disposed);
        }
        let registered = self
            .dispatcher
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(key, assignment, handler)?;

        if let Some(previous_key) = registered.displaced {
            self.dispatcher.notify(&ProtocolEvent::HandlerReplaced {
                opcode: registered.opcode,
                key: key.to_string(),
                previous_key,
            });
        }
        Ok(registered.opcode)
    }

    pub fn unregister_opcode(&self, key: &str) {
        self.dispatcher
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(key);
    }

    pub fn clear_handlers(&self) {
        self.dispatcher
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("cleared all opcode handlers");
    }

    pub fn opcode(&self, key: &str) -> Option<Opcode> {
        self.dispatcher
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .opcode(key)
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.opcode(key).is_some()
    }

    /// Subscribes to presence and disconnect events. Listeners run on the
    /// delivery task and must not touch simulation state directly.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ProtocolEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.dispatcher.next_listener.fetch_add(1, Ordering::Relaxed));
        self.dispatcher
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns false if the listener was already removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .dispatcher
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Dispatches one frame synchronously on the caller's thread.
    pub fn dispatch(&self, envelope: &InboundEnvelope) {
        self.dispatcher.dispatch(envelope);
    }

    pub async fn send<T>(&self, key: &str, message: &T) -> Result<(), ProtocolError>
    where
        T: Serialize + ?Sized,
    {
        if self.is_disposed() {
            error!(key, "cannot send: protocol is disposed");
            return Err(ProtocolError::Disposed);
        }

        let Some(opcode) = self.opcode(key) else {
            error!(key, "opcode key not registered");
            return Err(ProtocolError::UnregisteredKey(key.to_string()));
        };

        let payload = serde_json::to_vec(message).map_err(|err| {
            error!(key, opcode, error = %err, "failed to serialize message");
            ProtocolError::Serialization(err.to_string())
        })?;

        self.send_raw_bytes(opcode, payload).await
    }

    /// Sends pre-encoded bytes under an opcode that has no local key.
    pub async fn send_raw_bytes(&self, opcode: Opcode, payload: Vec<u8>) -> Result<(), ProtocolError> {
        if self.is_disposed() {
            error!(opcode, "cannot send: protocol is disposed");
            return Err(ProtocolError::Disposed);
        }
        if !self.connection.is_connected() {
            debug!(opcode, "cannot send: connection is not available");
            return Err(ProtocolError::NotConnected);
        }

        self.connection
            .send_match_state(&self.dispatcher.match_id, opcode, payload)
            .await
            .map_err(|err| {
                error!(opcode, error = %err, "send failed");
                ProtocolError::Transport(err)
            })
    }

    /// Unsubscribes first, then clears handlers and listeners. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.stop_listening().await;
        self.clear_handlers();
        self.dispatcher
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!(match_id = %self.dispatcher.match_id, "protocol disposed");
    }
}

async fn delivery_loop(
    dispatcher: Arc<Dispatcher>,
    mut events: broadcast::Receiver<WireEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            event = events.recv() => match event {
                Ok(event) => dispatcher.handle(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "match events lagged; frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("connection event stream closed");
                    break;
                }
            },
        }
    }
}
