// In-process match relay shared by the integration tests.
#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt};
use match_client::interface_adapters::protocol::{ClientFrame, PresenceDto, ServerFrame};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::sync::mpsc;

// Base URL published once the relay thread has bound its port.
static SERVER_URL: OnceLock<String> = OnceLock::new();
// One-time guard so the relay bootstrap runs once per test binary.
static SERVER_READY: OnceLock<()> = OnceLock::new();

pub const DYNAMIC_MATCH_ID: &str = "relay-dynamic";

struct Member {
    match_id: String,
    presence: PresenceDto,
    tx: mpsc::UnboundedSender<ServerFrame>,
}

#[derive(Clone, Default)]
struct RelayState {
    // Keyed by user id; one socket per user.
    members: Arc<Mutex<HashMap<String, Member>>>,
}

impl RelayState {
    fn join(&self, user_id: &str, match_id: String, tx: mpsc::UnboundedSender<ServerFrame>) {
        let presence = presence(user_id);
        let mut members = self.members.lock().expect("members mutex poisoned");

        let others: Vec<PresenceDto> = members
            .values()
            .filter(|member| member.match_id == match_id)
            .map(|member| member.presence.clone())
            .collect();
        for member in members.values().filter(|member| member.match_id == match_id) {
            let _ = member.tx.send(ServerFrame::MatchPresence {
                match_id: match_id.clone(),
                joins: vec![presence.clone()],
                leaves: Vec::new(),
            });
        }

        let _ = tx.send(ServerFrame::MatchJoined {
            match_id: match_id.clone(),
            self_presence: Some(presence.clone()),
            presences: others,
        });
        members.insert(
            user_id.to_string(),
            Member {
                match_id,
                presence,
                tx,
            },
        );
    }

    fn leave(&self, user_id: &str) {
        let mut members = self.members.lock().expect("members mutex poisoned");
        let Some(member) = members.remove(user_id) else {
            return;
        };
        for other in members.values().filter(|other| other.match_id == member.match_id) {
            let _ = other.tx.send(ServerFrame::MatchPresence {
                match_id: member.match_id.clone(),
                joins: Vec::new(),
                leaves: vec![member.presence.clone()],
            });
        }
    }

    fn relay(&self, user_id: &str, match_id: String, op_code: i64, data: String) {
        let members = self.members.lock().expect("members mutex poisoned");
        for (other_id, other) in members.iter() {
            if other_id == user_id || other.match_id != match_id {
                continue;
            }
            let _ = other.tx.send(ServerFrame::MatchData {
                match_id: match_id.clone(),
                op_code,
                data: data.clone(),
                presence: Some(presence(user_id)),
            });
        }
    }
}

fn presence(user_id: &str) -> PresenceDto {
    PresenceDto {
        user_id: user_id.to_string(),
        session_id: format!("session-{user_id}"),
        username: user_id.to_string(),
    }
}

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

async fn authenticate_device(Json(body): Json<serde_json::Value>) -> impl IntoResponse {
    let device_id = body
        .get("device_id")
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string();
    Json(serde_json::json!({
        "token": format!("tok-{device_id}"),
        "user_id": device_id,
        "username": device_id,
        "expires_at": now_seconds() + 3600,
    }))
}

async fn request_match(Path(_rpc_name): Path<String>) -> impl IntoResponse {
    // camelCase, as the backend module emits it.
    Json(serde_json::json!({
        "matchId": DYNAMIC_MATCH_ID,
        "serverTime": now_seconds(),
        "minElo": 0,
        "maxElo": 2000,
        "currentPlayers": 1,
        "maxPlayers": 8,
    }))
}

#[derive(serde::Deserialize)]
struct SocketQuery {
    token: String,
}

async fn socket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<SocketQuery>,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    let user_id = query
        .token
        .strip_prefix("tok-")
        .unwrap_or(&query.token)
        .to_string();
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: RelayState, user_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = serde_json::to_string(&frame).expect("serialize server frame");
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<ClientFrame>(text.as_str()) else {
            let _ = tx.send(ServerFrame::Error {
                message: "bad frame".to_string(),
            });
            continue;
        };
        match frame {
            ClientFrame::MatchJoin { match_id } => state.join(&user_id, match_id, tx.clone()),
            ClientFrame::MatchLeave { .. } => state.leave(&user_id),
            ClientFrame::MatchDataSend {
                match_id,
                op_code,
                data,
            } => state.relay(&user_id, match_id, op_code, data),
        }
    }

    state.leave(&user_id);
    writer.abort();
}

fn relay_router() -> Router {
    Router::new()
        .route("/v2/account/authenticate/device", post(authenticate_device))
        .route("/v2/rpc/{rpc_name}", post(request_match))
        .route("/ws", get(socket_handler))
        .with_state(RelayState::default())
}

// Ensure the relay is running and return its HTTP base URL.
pub fn ensure_server() -> &'static str {
    SERVER_READY.get_or_init(|| {
        let published_url = Arc::new(OnceLock::<String>::new());
        let published_url_thread = Arc::clone(&published_url);
        // Own OS thread and runtime so the relay outlives individual `#[tokio::test]` runtimes.
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("test runtime");
            runtime.block_on(async move {
                // Ephemeral port to avoid collisions with local services.
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind ephemeral test port");
                let addr = listener.local_addr().expect("get local addr");
                let _ = published_url_thread.set(format!("http://{}", addr));
                axum::serve(listener, relay_router())
                    .await
                    .expect("relay failed");
            });
        });
        wait_for_server_url_and_readiness(published_url);
    });

    SERVER_URL
        .get()
        .expect("server url should be initialized")
        .as_str()
}

pub fn socket_url(base_url: &str) -> String {
    format!("{}/ws", base_url.replacen("http://", "ws://", 1))
}

// Wait for URL publication, then for the relay socket to accept TCP connections.
fn wait_for_server_url_and_readiness(published_url: Arc<OnceLock<String>>) {
    let base_url = loop {
        if let Some(url) = published_url.get() {
            break url.clone();
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let _ = SERVER_URL.set(base_url.clone());

    let addr = base_url
        .strip_prefix("http://")
        .expect("base url should use http://");

    for _ in 0..100 {
        if std::net::TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    panic!("relay did not become ready in time");
}
