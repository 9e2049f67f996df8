// Domain layer: match state types, opcodes, errors and ports.

pub mod errors;
pub mod opcode;
pub mod ports;
pub mod state;

pub use errors::{BoxError, DecodeError, FlowError, ProtocolError, TransportError};
pub use opcode::{OPCODE_PLAYER_MOVE, Opcode, OpcodeAssignment, derive_opcode, keys};
pub use ports::{
    AuthProvider, Clock, Connector, InboundEnvelope, MatchmakerProvider, SystemClock,
    WireConnection, WireEvent,
};
pub use state::{
    EntityHandle, JoinedMatch, LocalEntityState, MatchAssignment, MatchJoinResult, MatchSession,
    Position, Presence, PresenceEvent, RemoteEntityState, Session,
};
