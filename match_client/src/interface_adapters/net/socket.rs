use crate::domain::{
    Connector, InboundEnvelope, JoinedMatch, Opcode, Session, TransportError, WireConnection,
    WireEvent,
};
use crate::interface_adapters::protocol::{ClientFrame, ServerFrame, joined_match, presence_event};
use crate::interface_adapters::utils::rng::rand_id;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Opens authenticated match sockets.
#[derive(Debug, Clone)]
pub struct WsConnector {
    socket_url: String,
    event_capacity: usize,
    join_timeout: Duration,
}

impl WsConnector {
    pub fn new(socket_url: impl Into<String>, event_capacity: usize, join_timeout: Duration) -> Self {
        Self {
            socket_url: socket_url.into(),
            event_capacity,
            join_timeout,
        }
    }

    fn socket_url_for(&self, session: &Session) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.socket_url)
            .map_err(|err| TransportError::Connect(format!("invalid socket url: {err}")))?;
        url.query_pairs_mut().append_pair("token", &session.token);
        Ok(url)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, session: &Session) -> Result<Arc<dyn WireConnection>, TransportError> {
        let url = self.socket_url_for(session)?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let connection = WsConnection::start(stream, self.event_capacity, self.join_timeout);
        Ok(Arc::new(connection))
    }
}

struct PendingJoin {
    match_id: String,
    reply: oneshot::Sender<Result<JoinedMatch, TransportError>>,
}

// State the reader task shares with the connection handle.
struct Shared {
    events: broadcast::Sender<WireEvent>,
    connected: AtomicBool,
    pending_join: Mutex<Option<PendingJoin>>,
}

impl Shared {
    fn take_pending_join(&self) -> Option<PendingJoin> {
        self.pending_join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn publish(&self, event: WireEvent) {
        // Nobody listening yet is not an error.
        let _ = self.events.send(event);
    }
}

/// WebSocket-backed `WireConnection`. A reader task turns server frames into
/// `WireEvent`s; writes go through the sink half.
pub struct WsConnection {
    conn_id: u64,
    sink: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    join_timeout: Duration,
}

impl WsConnection {
    fn start(stream: WsStream, event_capacity: usize, join_timeout: Duration) -> Self {
        let conn_id = rand_id();
        let (sink, stream) = stream.split();
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let shared = Arc::new(Shared {
            events,
            connected: AtomicBool::new(true),
            pending_join: Mutex::new(None),
        });

        let span = info_span!("conn", conn_id);
        let reader = tokio::spawn(read_loop(stream, Arc::clone(&shared)).instrument(span));
        info!(conn_id, "match socket connected");

        Self {
            conn_id,
            sink: tokio::sync::Mutex::new(sink),
            shared,
            reader: Mutex::new(Some(reader)),
            join_timeout,
        }
    }

    async fn send_frame(&self, frame: &ClientFrame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let text = serde_json::to_string(frame).map_err(|err| TransportError::Send(err.to_string()))?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }
}

#[async_trait]
impl WireConnection for WsConnection {
    fn subscribe(&self) -> broadcast::Receiver<WireEvent> {
        self.shared.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    async fn join_match(&self, match_id: &str) -> Result<JoinedMatch, TransportError> {
        let (reply, response) = oneshot::channel();
        {
            let mut pending = self
                .shared
                .pending_join
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if pending.is_some() {
                return Err(TransportError::Rejected("a join is already in progress".to_string()));
            }
            *pending = Some(PendingJoin {
                match_id: match_id.to_string(),
                reply,
            });
        }

        let frame = ClientFrame::MatchJoin {
            match_id: match_id.to_string(),
        };
        if let Err(err) = self.send_frame(&frame).await {
            self.shared.take_pending_join();
            return Err(err);
        }

        match tokio::time::timeout(self.join_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.shared.take_pending_join();
                warn!(conn_id = self.conn_id, match_id, "match join timed out");
                Err(TransportError::Timeout)
            }
        }
    }

    async fn leave_match(&self, match_id: &str) -> Result<(), TransportError> {
        self.send_frame(&ClientFrame::MatchLeave {
            match_id: match_id.to_string(),
        })
        .await
    }

    async fn send_match_state(
        &self,
        match_id: &str,
        opcode: Opcode,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.send_frame(&ClientFrame::MatchDataSend {
            match_id: match_id.to_string(),
            op_code: opcode,
            data: STANDARD.encode(payload),
        })
        .await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.shared.connected.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self
            .sink
            .lock()
            .await
            .close()
            .await
            .map_err(|err| TransportError::Send(err.to_string()));

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }
        info!(conn_id = self.conn_id, "match socket closed");
        result
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        if let Some(reader) = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
    }
}

async fn read_loop(mut stream: SplitStream<WsStream>, shared: Arc<Shared>) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => handle_text(&shared, text.as_str()),
            Some(Ok(Message::Close(frame))) => {
                break frame.map(|frame| frame.reason.to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!(error = %err, "match socket read failed");
                break Some(err.to_string());
            }
            None => break None,
        }
    };

    shared.connected.store(false, Ordering::Release);
    if let Some(pending) = shared.take_pending_join() {
        let _ = pending.reply.send(Err(TransportError::Closed));
    }
    info!(reason = reason.as_deref().unwrap_or("none"), "match socket disconnected");
    shared.publish(WireEvent::Disconnected { reason });
}

fn handle_text(shared: &Shared, text: &str) {
    let frame: ServerFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "dropping unparseable server frame");
            return;
        }
    };

    match frame {
        ServerFrame::MatchJoined {
            match_id,
            self_presence,
            presences,
        } => {
            let Some(pending) = shared.take_pending_join() else {
                debug!(%match_id, "unsolicited match joined frame");
                return;
            };
            // Servers may hand back a canonical id different from the requested one.
            if pending.match_id != match_id {
                debug!(requested = %pending.match_id, %match_id, "joined under a different match id");
            }
            let _ = pending
                .reply
                .send(Ok(joined_match(match_id, self_presence, presences)));
        }
        ServerFrame::MatchData {
            match_id,
            op_code,
            data,
            presence,
        } => {
            let payload = match STANDARD.decode(data.as_bytes()) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(opcode = op_code, error = %err, "dropping frame with invalid base64 data");
                    return;
                }
            };
            shared.publish(WireEvent::MatchState {
                match_id,
                envelope: InboundEnvelope {
                    opcode: op_code,
                    payload,
                    sender: presence.map(|presence| presence.user_id),
                },
            });
        }
        ServerFrame::MatchPresence {
            match_id,
            joins,
            leaves,
        } => {
            shared.publish(WireEvent::MatchPresence {
                match_id,
                event: presence_event(joins, leaves),
            });
        }
        ServerFrame::Error { message } => match shared.take_pending_join() {
            Some(pending) => {
                let _ = pending.reply.send(Err(TransportError::Rejected(message)));
            }
            None => warn!(%message, "server reported an error"),
        },
    }
}
