// Domain-level errors for the match protocol, decoding and connection flow.

use std::fmt;

/// Boxed error used by ports and deferred work where the concrete type varies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures reported by a wire connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    Connect(String),
    Send(String),
    NotConnected,
    Closed,
    Timeout,
    // Server answered with an explicit error frame.
    Rejected(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(reason) => write!(f, "connect failed: {reason}"),
            TransportError::Send(reason) => write!(f, "send failed: {reason}"),
            TransportError::NotConnected => write!(f, "connection is not open"),
            TransportError::Closed => write!(f, "connection closed"),
            TransportError::Timeout => write!(f, "timed out waiting for the server"),
            TransportError::Rejected(message) => write!(f, "server rejected request: {message}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Misuse and send failures surfaced by the match protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    EmptyKey,
    UnregisteredKey(String),
    Disposed,
    NotConnected,
    // start_listening / MatchSync need a tokio runtime to spawn onto.
    NoRuntime,
    Serialization(String),
    Transport(TransportError),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::EmptyKey => write!(f, "opcode key cannot be empty"),
            ProtocolError::UnregisteredKey(key) => write!(f, "opcode key '{key}' is not registered"),
            ProtocolError::Disposed => write!(f, "protocol is disposed"),
            ProtocolError::NotConnected => write!(f, "connection is not available"),
            ProtocolError::NoRuntime => write!(f, "no tokio runtime available"),
            ProtocolError::Serialization(reason) => write!(f, "failed to serialize message: {reason}"),
            ProtocolError::Transport(err) => write!(f, "transport error: {err}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<TransportError> for ProtocolError {
    fn from(err: TransportError) -> Self {
        ProtocolError::Transport(err)
    }
}

/// Movement payload that matched none of the known shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    NotUtf8,
    UnrecognizedShape { bytes: usize, sender: Option<String> },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NotUtf8 => write!(f, "payload is not valid UTF-8"),
            DecodeError::UnrecognizedShape { bytes, sender } => match sender {
                Some(sender) => write!(
                    f,
                    "unrecognized movement payload ({bytes} bytes) from {sender}"
                ),
                None => write!(f, "unrecognized movement payload ({bytes} bytes)"),
            },
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors returned by the connection flow.
#[derive(Debug)]
pub enum FlowError {
    Disposed,
    AlreadyInMatch { match_id: String },
    NotInMatch,
    Auth(BoxError),
    Rpc(BoxError),
    InvalidRpcResponse(String),
    Transport(TransportError),
    Protocol(ProtocolError),
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::Disposed => write!(f, "connection flow is disposed"),
            FlowError::AlreadyInMatch { match_id } => write!(f, "already in match {match_id}"),
            FlowError::NotInMatch => write!(f, "not in a match"),
            FlowError::Auth(err) => write!(f, "authentication failed: {err}"),
            FlowError::Rpc(err) => write!(f, "match request failed: {err}"),
            FlowError::InvalidRpcResponse(reason) => write!(f, "invalid match response: {reason}"),
            FlowError::Transport(err) => write!(f, "transport error: {err}"),
            FlowError::Protocol(err) => write!(f, "protocol error: {err}"),
        }
    }
}

impl std::error::Error for FlowError {}

impl From<TransportError> for FlowError {
    fn from(err: TransportError) -> Self {
        FlowError::Transport(err)
    }
}

impl From<ProtocolError> for FlowError {
    fn from(err: ProtocolError) -> Self {
        FlowError::Protocol(err)
    }
}
