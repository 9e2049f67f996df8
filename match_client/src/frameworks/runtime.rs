// Framework bootstrap for the headless match client.

use crate::domain::{Position, SystemClock};
use crate::frameworks::config;
use crate::interface_adapters::clients::ApiClient;
use crate::interface_adapters::net::WsConnector;
use crate::use_cases::{ConnectionFlow, EntityEvent, FlowSettings, MatchSync, SyncSettings};

use std::future::Future;
use std::io::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let flow = build_flow()?;
    run(flow, config::match_id(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await
}

pub fn build_flow() -> Result<ConnectionFlow> {
    let api_url = config::api_url();
    let http_timeout = config::http_timeout();
    let api = ApiClient::new(api_url.clone(), http_timeout)
        .map_err(|e| Error::other(format!("failed to initialize api client: {e}")))?;
    debug!(
        api_url = %api_url,
        http_timeout_ms = http_timeout.as_millis(),
        "api client configured"
    );

    let socket_url = config::socket_url();
    let connector = WsConnector::new(
        socket_url.clone(),
        config::EVENT_CHANNEL_CAPACITY,
        config::JOIN_TIMEOUT,
    );
    debug!(socket_url = %socket_url, "socket connector configured");

    let api = Arc::new(api);
    Ok(ConnectionFlow::new(
        api.clone(),
        api,
        Arc::new(connector),
        Arc::new(SystemClock),
        FlowSettings {
            device_id: config::device_id(),
            rpc_name: config::rpc_name(),
            connect_attempts: config::connect_attempts(),
            connect_backoff: config::connect_backoff(),
            backoff_cap: config::CONNECT_BACKOFF_CAP,
            session_refresh_margin: config::SESSION_REFRESH_MARGIN,
        },
    ))
}

/// Connects, joins, then runs the simulation loop until `shutdown` resolves.
/// The match is left and the flow disposed on the way out.
pub async fn run<S>(mut flow: ConnectionFlow, match_id: Option<String>, shutdown: S) -> Result<()>
where
    S: Future<Output = ()>,
{
    let session = flow.connect().await.map_err(|e| {
        tracing::error!(error = %e, "failed to connect");
        Error::other(e.to_string())
    })?;

    let joined = match flow.join_or_create_match(match_id.as_deref()).await {
        Ok(joined) => joined,
        Err(e) => {
            tracing::error!(error = %e, "failed to join match");
            flow.dispose().await;
            return Err(Error::other(e.to_string()));
        }
    };

    let Some(protocol) = flow.protocol() else {
        flow.dispose().await;
        return Err(Error::other("joined match without a protocol"));
    };

    let settings = SyncSettings {
        send_interval: config::SEND_INTERVAL,
        ..SyncSettings::default()
    };
    let mut sync = match MatchSync::new(protocol, session.user_id.clone(), settings) {
        Ok(sync) => sync,
        Err(e) => {
            flow.dispose().await;
            return Err(Error::other(e.to_string()));
        }
    };
    sync.seed_presences(&joined.presences);
    info!(match_id = %joined.match_id, user_id = %session.user_id, "simulation started");

    simulate(&mut sync, shutdown).await;

    sync.shutdown();
    if let Err(e) = flow.leave().await {
        warn!(error = %e, "failed to leave match cleanly");
    }
    flow.dispose().await;
    Ok(())
}

async fn simulate<S>(sync: &mut MatchSync, shutdown: S)
where
    S: Future<Output = ()>,
{
    // Drive the fixed-step loop at the configured tick rate.
    let mut interval = tokio::time::interval(config::TICK_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = Instant::now();
    let mut last = started;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            _ = interval.tick() => {
                let now = Instant::now();
                let dt = now - last;
                last = now;

                // Scripted input: circle the origin.
                let angle = (now - started).as_secs_f32() * config::ORBIT_SPEED;
                let target = Position::new(
                    config::ORBIT_RADIUS * angle.cos(),
                    config::ORBIT_RADIUS * angle.sin(),
                );
                let local = sync.local_mut();
                let (dx, dy) = (target.x - local.position.x, target.y - local.position.y);
                local.translate(dx, dy);

                let report = sync.tick(dt);
                if report.failed > 0 {
                    debug!(failed = report.failed, executed = report.executed, "tick had failed actions");
                }
                for event in sync.drain_render_events() {
                    render(&event);
                }
            }
        }
    }
}

// Stand-in for a renderer: log what would be drawn.
fn render(event: &EntityEvent) {
    match event {
        EntityEvent::Spawned {
            identity,
            handle,
            position,
        } => info!(%identity, handle = handle.0, x = position.x, y = position.y, "spawn remote"),
        EntityEvent::Moved {
            identity,
            handle,
            position,
        } => debug!(%identity, handle = handle.0, x = position.x, y = position.y, "move remote"),
        EntityEvent::Despawned { identity, handle } => {
            info!(%identity, handle = handle.0, "despawn remote")
        }
    }
}
