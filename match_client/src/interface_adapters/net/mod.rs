// Network adapters for the match server socket.

pub mod socket;

pub use socket::{WsConnection, WsConnector};
