// Opcode registry: symbolic key <-> numeric opcode <-> handler.

use crate::domain::{BoxError, InboundEnvelope, Opcode, OpcodeAssignment, ProtocolError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub type HandlerResult = Result<(), BoxError>;

/// Callback invoked from the connection's delivery task for one opcode.
pub type OpcodeHandler = Arc<dyn Fn(&InboundEnvelope) -> HandlerResult + Send + Sync>;

struct Registration {
    // Key that installed the current handler.
    key: String,
    handler: OpcodeHandler,
}

/// Outcome of a registration. `displaced` names the key whose handler was
/// replaced, if the opcode already had one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    pub opcode: Opcode,
    pub displaced: Option<String>,
}

/// Single table of opcode registrations.
///
/// At most one handler exists per opcode. Registering an opcode that already has
/// a handler replaces it and logs a warning.
#[derive(Default)]
pub struct OpcodeRegistry {
    handlers: HashMap<Opcode, Registration>,
    keys: HashMap<String, Opcode>,
}

impl OpcodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        key: &str,
        assignment: OpcodeAssignment,
        handler: OpcodeHandler,
    ) -> Result<Registered, ProtocolError> {
        if key.is_empty() {
            return Err(ProtocolError::EmptyKey);
        }

        let opcode = assignment.resolve(key);

        // Re-keying drops the handler this key owned under its old opcode.
        if let Some(previous) = self.keys.get(key).copied() {
            if previous != opcode && self.owned_by(previous, key) {
                self.handlers.remove(&previous);
            }
        }

        let displaced = self
            .handlers
            .insert(
                opcode,
                Registration {
                    key: key.to_string(),
                    handler,
                },
            )
            .map(|existing| existing.key);
        if let Some(previous_key) = &displaced {
            warn!(opcode, key, %previous_key, "opcode already registered; overwriting handler");
        }
        self.keys.insert(key.to_string(), opcode);

        debug!(key, opcode, ?assignment, "registered opcode");
        Ok(Registered { opcode, displaced })
    }

    /// Removes the key and, if this key still owns it, the handler.
    /// Returns false for unknown keys.
    pub fn unregister(&mut self, key: &str) -> bool {
        let Some(opcode) = self.keys.remove(key) else {
            return false;
        };
        if self.owned_by(opcode, key) {
            self.handlers.remove(&opcode);
        }
        debug!(key, opcode, "unregistered opcode");
        true
    }

    pub fn opcode(&self, key: &str) -> Option<Opcode> {
        self.keys.get(key).copied()
    }

    pub fn handler(&self, opcode: Opcode) -> Option<OpcodeHandler> {
        self.handlers
            .get(&opcode)
            .map(|registration| Arc::clone(&registration.handler))
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn owned_by(&self, opcode: Opcode, key: &str) -> bool {
        self.handlers
            .get(&opcode)
            .is_some_and(|registration| registration.key == key)
    }
}
