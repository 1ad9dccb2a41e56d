// Error taxonomy for the live feed subsystem
use thiserror::Error;

/// Failures observed while keeping a live feed connected.
///
/// `IncompleteParams` and `MalformedPayload` are absorbed where they occur;
/// only the connection-lifecycle variants reach the error channel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    #[error("addressing parameters are incomplete")]
    IncompleteParams,
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("failed to open live feed {key}: {reason}")]
    ConnectFailure { key: String, reason: String },
    #[error("live feed {key} failed: {reason}")]
    TransportError { key: String, reason: String },
    #[error("stream manager is closed")]
    Closed,
}
