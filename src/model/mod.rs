//! Model Session Client (spec §4.3): the upstream generative-model
//! WebSocket, its wire protocol, and bounded reconnection policy.

mod client;
mod protocol;

pub use client::{ModelSession, SetupFailureReason};
pub use protocol::parse_server_frame;
