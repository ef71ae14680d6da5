//! Error taxonomy for the voice bridge
//!
//! `BridgeError` covers every failure category named in the design: network
//! hiccups on either socket, malformed upstream protocol frames, setup
//! handshake failures, bad carrier payloads, and timeout-driven state
//! transitions. Recovery is preferred to reporting; reporting is preferred
//! to aborting.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// PCM byte slice length is not a multiple of 2 (not whole `i16` samples).
    #[error("invalid PCM length: {0} bytes")]
    InvalidPcmLength(usize),

    /// WebSocket read/write failure with no close code, or a retryable close
    /// code (1001, 1006, 1011, 1013).
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Malformed upstream message / unparseable JSON.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Three consecutive `ProtocolError`s with no usable frame in between.
    #[error("fatal upstream error after repeated protocol failures")]
    FatalUpstream,

    /// The model never acknowledged `setup` within the setup budget.
    #[error("setup timeout: {0}")]
    SetupTimeout(String),

    /// The model rejected the requested model/voice/cache at setup time.
    #[error("setup rejected: {0}")]
    SetupRejected(String),

    /// Carrier sent a payload that failed to decode (bad base64 / odd length).
    #[error("audio decode error: {0}")]
    AudioDecodeError(String),

    /// A cache handle failed validation or was rejected at setup.
    #[error("cache handle invalid: {0}")]
    CacheInvalid(String),

    /// Credentials or quota failure during setup — no retry.
    #[error("quota or auth error: {0}")]
    QuotaOrAuth(String),

    /// 15s with no model audio while PROCESSING.
    #[error("response timeout waiting for model audio")]
    ResponseTimeout,

    /// Max call duration reached.
    #[error("call timeout: max duration exceeded")]
    CallTimeout,

    /// Carrier closed the media stream.
    #[error("carrier closed the stream")]
    CarrierClosed,

    /// The reconnection budget (3 attempts) was exhausted.
    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Classifies a close code the way the Model Session Client's reconnection
/// policy needs to: transient (retry) vs. intentional/terminal (don't).
pub fn is_retryable_close_code(code: u16) -> bool {
    matches!(code, 1001 | 1006 | 1011 | 1013)
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abnormal_closure_1006_is_retryable() {
        assert!(is_retryable_close_code(1006));
    }

    #[test]
    fn normal_closure_1000_is_not_retryable() {
        assert!(!is_retryable_close_code(1000));
    }

    #[test]
    fn policy_violation_1008_is_not_retryable() {
        assert!(!is_retryable_close_code(1008));
    }
}
