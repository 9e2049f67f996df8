// Remote entity lifecycle: snapshot/presence reconciliation and the simulation-owned entity set.

use crate::domain::{EntityHandle, Position, PresenceEvent};
use crate::use_cases::snapshot::NormalizedSnapshot;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum EntityAction {
    Spawn { identity: String },
    Update { identity: String, position: Position },
    Despawn { identity: String },
}

/// Applied actions as seen by the render side.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityEvent {
    Spawned {
        identity: String,
        handle: EntityHandle,
        position: Position,
    },
    Moved {
        identity: String,
        handle: EntityHandle,
        position: Position,
    },
    Despawned {
        identity: String,
        handle: EntityHandle,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    pub handle: EntityHandle,
    pub position: Position,
}

/// Known remote entities. Lives on the simulation thread only.
#[derive(Debug, Default)]
pub struct RemoteEntities {
    entities: BTreeMap<String, RemoteEntity>,
    // Identities removed by a presence leave during the current drain cycle.
    departed: HashSet<String>,
    events: Vec<EntityEvent>,
    next_handle: u64,
}

impl RemoteEntities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a drain cycle. Leaves from earlier cycles no longer block updates.
    pub fn begin_cycle(&mut self) {
        self.departed.clear();
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entities.contains_key(identity)
    }

    pub fn get(&self, identity: &str) -> Option<&RemoteEntity> {
        self.entities.get(identity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RemoteEntity)> {
        self.entities
            .iter()
            .map(|(identity, entity)| (identity.as_str(), entity))
    }

    pub fn departed_this_cycle(&self, identity: &str) -> bool {
        self.departed.contains(identity)
    }

    /// Applies actions in order. Spawning a known identity and despawning an
    /// unknown one are no-ops; an update for an unknown identity is dropped.
    pub fn apply(&mut self, actions: &[EntityAction]) {
        for action in actions {
            match action {
                EntityAction::Spawn { identity } => self.spawn(identity),
                EntityAction::Update { identity, position } => self.update(identity, *position),
                EntityAction::Despawn { identity } => self.despawn(identity),
            }
        }
    }

    pub fn drain_events(&mut self) -> Vec<EntityEvent> {
        std::mem::take(&mut self.events)
    }

    fn spawn(&mut self, identity: &str) {
        if self.entities.contains_key(identity) {
            return;
        }
        self.next_handle += 1;
        let entity = RemoteEntity {
            handle: EntityHandle(self.next_handle),
            position: Position::default(),
        };
        info!(identity, handle = entity.handle.0, "remote entity spawned");
        self.events.push(EntityEvent::Spawned {
            identity: identity.to_string(),
            handle: entity.handle,
            position: entity.position,
        });
        self.departed.remove(identity);
        self.entities.insert(identity.to_string(), entity);
    }

    fn update(&mut self, identity: &str, position: Position) {
        let Some(entity) = self.entities.get_mut(identity) else {
            debug!(identity, "update for unknown entity dropped");
            return;
        };
        entity.position = position;
        self.events.push(EntityEvent::Moved {
            identity: identity.to_string(),
            handle: entity.handle,
            position,
        });
    }

    fn despawn(&mut self, identity: &str) {
        let Some(entity) = self.entities.remove(identity) else {
            return;
        };
        info!(identity, handle = entity.handle.0, "remote entity despawned");
        self.events.push(EntityEvent::Despawned {
            identity: identity.to_string(),
            handle: entity.handle,
        });
    }
}

/// Derives entity actions for one local participant.
#[derive(Debug, Clone)]
pub struct EntityReconciler {
    local_identity: String,
}

impl EntityReconciler {
    pub fn new(local_identity: impl Into<String>) -> Self {
        Self {
            local_identity: local_identity.into(),
        }
    }

    pub fn local_identity(&self) -> &str {
        &self.local_identity
    }

    pub fn reconcile(&self, snapshot: &NormalizedSnapshot, known: &RemoteEntities) -> Vec<EntityAction> {
        let mut actions = Vec::new();

        for entry in &snapshot.entries {
            let identity = entry.identity.as_str();
            if identity == self.local_identity {
                continue;
            }

            // A leave earlier in this drain wins over an update for the same identity.
            if known.departed_this_cycle(identity) {
                debug!(identity, "update for departed entity dropped");
                continue;
            }

            if !known.contains(identity) {
                actions.push(EntityAction::Spawn {
                    identity: identity.to_string(),
                });
            }
            actions.push(EntityAction::Update {
                identity: identity.to_string(),
                position: entry.position,
            });
        }

        if snapshot.is_complete() {
            for (identity, _) in known.iter() {
                // Malformed records still name present entities.
                if identity != self.local_identity && !snapshot.mentions(identity) {
                    actions.push(EntityAction::Despawn {
                        identity: identity.to_string(),
                    });
                }
            }
        }

        actions
    }

    pub fn apply_snapshot(&self, snapshot: &NormalizedSnapshot, known: &mut RemoteEntities) -> Vec<EntityAction> {
        let actions = self.reconcile(snapshot, known);
        known.apply(&actions);
        actions
    }

    /// Presence joins spawn and leaves despawn immediately. A leave also blocks
    /// snapshot updates for that identity until the next cycle.
    pub fn apply_presence(&self, event: &PresenceEvent, known: &mut RemoteEntities) -> Vec<EntityAction> {
        let mut actions = Vec::new();

        for presence in &event.joins {
            let identity = presence.user_id.as_str();
            if identity.is_empty() || identity == self.local_identity {
                continue;
            }
            actions.push(EntityAction::Spawn {
                identity: identity.to_string(),
            });
        }
        for presence in &event.leaves {
            let identity = presence.user_id.as_str();
            if identity.is_empty() || identity == self.local_identity {
                continue;
            }
            actions.push(EntityAction::Despawn {
                identity: identity.to_string(),
            });
        }

        known.apply(&actions);
        for action in &actions {
            if let EntityAction::Despawn { identity } = action {
                known.departed.insert(identity.clone());
            }
        }
        actions
    }
}
