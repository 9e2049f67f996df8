use std::{env, time::Duration};

// Runtime/client constants (not gameplay tuning).

pub fn api_url() -> String {
    env::var("MATCH_API_URL").unwrap_or_else(|_| "http://127.0.0.1:7350".to_string())
}

pub fn socket_url() -> String {
    env::var("MATCH_SOCKET_URL").unwrap_or_else(|_| "ws://127.0.0.1:7350/ws".to_string())
}

// Stable per-install device id; a fresh one means a fresh account.
pub fn device_id() -> String {
    env::var("MATCH_DEVICE_ID")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

// Empty or unset asks the match RPC for a dynamic match.
pub fn match_id() -> Option<String> {
    env::var("MATCH_ID")
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub fn rpc_name() -> String {
    env::var("MATCH_RPC_NAME").unwrap_or_else(|_| "request_dynamic_match".to_string())
}

pub fn http_timeout() -> Duration {
    let millis = env::var("MATCH_HTTP_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(5000);
    Duration::from_millis(millis)
}

pub fn connect_attempts() -> u32 {
    env::var("MATCH_CONNECT_ATTEMPTS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(5)
}

pub fn connect_backoff() -> Duration {
    let millis = env::var("MATCH_CONNECT_BACKOFF_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(250);
    Duration::from_millis(millis)
}

pub const SEND_INTERVAL: Duration = Duration::from_millis(100);
pub const TICK_INTERVAL: Duration = Duration::from_millis(1000 / 60);
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
pub const SESSION_REFRESH_MARGIN: Duration = Duration::from_secs(60);
pub const CONNECT_BACKOFF_CAP: Duration = Duration::from_secs(5);
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
// Radius and angular speed of the scripted local movement in the headless client.
pub const ORBIT_RADIUS: f32 = 3.0;
pub const ORBIT_SPEED: f32 = 1.0;
