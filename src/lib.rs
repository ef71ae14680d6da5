//! voxbridge — real-time telephony-to-generative-model voice bridge.
//!
//! Bridges a telephony carrier's media WebSocket to a generative model's
//! bidirectional realtime WebSocket: decodes/resamples caller audio, runs a
//! voice-activity/turn-taking state machine, forwards audio to the model,
//! and streams the model's spoken response back to the carrier.

pub mod codec;
pub mod error;
pub mod types;
pub mod config;
pub mod carrier;
pub mod model;
pub mod conversation;
pub mod filler;
pub mod cache;
pub mod telephony;
pub mod transcript;
pub mod orchestrator;
pub mod server;
pub mod cli;
