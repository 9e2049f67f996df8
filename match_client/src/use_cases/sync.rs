// Simulation-side match sync: network callbacks enqueue, the tick drains and sends.

use crate::domain::{
    LocalEntityState, OPCODE_PLAYER_MOVE, Opcode, Presence, PresenceEvent, ProtocolError, keys,
};
use crate::use_cases::protocol::{ListenerId, MatchProtocol, ProtocolEvent};
use crate::use_cases::queue::MainThreadQueue;
use crate::use_cases::reconcile::{EntityEvent, EntityReconciler, RemoteEntities};
use crate::use_cases::snapshot;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub send_interval: Duration,
    pub move_key: String,
    pub move_opcode: Opcode,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_millis(100),
            move_key: keys::PLAYER_MOVE.to_string(),
            move_opcode: OPCODE_PLAYER_MOVE,
        }
    }
}

/// State only the simulation thread touches. Queued actions run against it.
pub struct SyncContext {
    pub remotes: RemoteEntities,
    pub reconciler: EntityReconciler,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub executed: usize,
    pub failed: usize,
    pub position_sent: bool,
}

// Outbound movement carries position only; the server attaches identity.
#[derive(Debug, Serialize)]
struct PlayerMove {
    x: f32,
    y: f32,
}

pub struct MatchSync {
    protocol: Arc<MatchProtocol>,
    queue: Arc<MainThreadQueue<SyncContext>>,
    context: SyncContext,
    local: LocalEntityState,
    settings: SyncSettings,
    since_send: Duration,
    runtime: Handle,
    listener: ListenerId,
    // Cleared by the listener when the connection drops.
    connected: Arc<AtomicBool>,
}

impl MatchSync {
    pub fn new(
        protocol: Arc<MatchProtocol>,
        local_identity: impl Into<String>,
        settings: SyncSettings,
    ) -> Result<Self, ProtocolError> {
        let runtime = Handle::try_current().map_err(|_| ProtocolError::NoRuntime)?;
        let queue: Arc<MainThreadQueue<SyncContext>> = Arc::new(MainThreadQueue::new());

        let frames = Arc::clone(&queue);
        protocol.register_opcode_explicit(&settings.move_key, settings.move_opcode, move |envelope| {
            let payload = envelope.payload.clone();
            let sender = envelope.sender.clone();
            frames.enqueue(move |ctx: &mut SyncContext| {
                let snapshot = snapshot::decode(&payload, sender.as_deref())?;
                ctx.reconciler.apply_snapshot(&snapshot, &mut ctx.remotes);
                Ok(())
            });
            Ok(())
        })?;

        let presences = Arc::clone(&queue);
        let connected = Arc::new(AtomicBool::new(true));
        let link = Arc::clone(&connected);
        let listener = protocol.add_listener(move |event| match event {
            ProtocolEvent::Presence(presence) => {
                let presence = presence.clone();
                presences.enqueue(move |ctx: &mut SyncContext| {
                    ctx.reconciler.apply_presence(&presence, &mut ctx.remotes);
                    Ok(())
                });
            }
            ProtocolEvent::Disconnected { reason } => {
                link.store(false, Ordering::Release);
                warn!(reason = reason.as_deref().unwrap_or("none"), "match connection dropped");
            }
            ProtocolEvent::HandlerReplaced { .. } => {}
        });

        // Handlers are in place; buffered events can flow now.
        if let Err(err) = protocol.start_listening() {
            protocol.remove_listener(listener);
            protocol.unregister_opcode(&settings.move_key);
            return Err(err);
        }

        Ok(Self {
            protocol,
            queue,
            context: SyncContext {
                remotes: RemoteEntities::new(),
                reconciler: EntityReconciler::new(local_identity),
            },
            local: LocalEntityState::default(),
            settings,
            since_send: Duration::ZERO,
            runtime,
            listener,
            connected,
        })
    }

    /// Spawns participants that were already in the match when we joined.
    pub fn seed_presences(&mut self, presences: &[Presence]) {
        let event = PresenceEvent {
            joins: presences.to_vec(),
            leaves: Vec::new(),
        };
        self.context
            .reconciler
            .apply_presence(&event, &mut self.context.remotes);
    }

    /// One simulation step: apply everything the network queued, then send the
    /// local position if the interval elapsed and the connection is still up.
    pub fn tick(&mut self, dt: Duration) -> TickReport {
        self.context.remotes.begin_cycle();
        let drained = self.queue.drain_and_execute_all(&mut self.context);

        // Missed intervals are not caught up; only the latest position matters.
        self.since_send += dt;
        let mut position_sent = false;
        if self.since_send >= self.settings.send_interval {
            self.since_send = Duration::ZERO;
            if self.is_connected() {
                self.send_position();
                position_sent = true;
            }
        }

        TickReport {
            executed: drained.executed,
            failed: drained.failed,
            position_sent,
        }
    }

    fn send_position(&self) {
        let protocol = Arc::clone(&self.protocol);
        let key = self.settings.move_key.clone();
        let message = PlayerMove {
            x: self.local.position.x,
            y: self.local.position.y,
        };

        self.runtime.spawn(async move {
            if let Err(err) = protocol.send(&key, &message).await {
                debug!(error = %err, "position send dropped");
            }
        });
    }

    pub fn local(&self) -> &LocalEntityState {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut LocalEntityState {
        &mut self.local
    }

    pub fn local_identity(&self) -> &str {
        self.context.reconciler.local_identity()
    }

    pub fn remotes(&self) -> &RemoteEntities {
        &self.context.remotes
    }

    pub fn drain_render_events(&mut self) -> Vec<EntityEvent> {
        self.context.remotes.drain_events()
    }

    pub fn pending_actions(&self) -> usize {
        self.queue.len()
    }

    /// False once the protocol reported a disconnect.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Detaches from the protocol. Nothing is queued after this returns.
    pub fn shutdown(&self) {
        self.protocol.unregister_opcode(&self.settings.move_key);
        self.protocol.remove_listener(self.listener);
        info!(match_id = %self.protocol.match_id(), "match sync detached");
    }
}
