// Interface adapters: wire DTOs, the match socket and the HTTP API client.

pub mod clients;
pub mod net;
pub mod protocol;
pub mod utils;
