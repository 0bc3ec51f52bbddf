//! Endpoint error taxonomy

use thiserror::Error;

/// Errors surfaced by underlying queue endpoints.
///
/// The fault-tolerance layer classifies these into retryable dispatch
/// failures and terminal routing failures. Anything it cannot classify is
/// treated as retryable, preferring availability over precision.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The route table has no destination for the message topic
    #[error("no route for topic: {topic}")]
    NoRoute { topic: String },

    /// Broker/connection level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The message handler rejected or failed to process a delivery
    #[error("handler failed: {0}")]
    Handler(String),

    /// The endpoint or its underlying channel has been shut down
    #[error("endpoint closed: {0}")]
    Closed(String),

    /// No endpoint is configured under the requested client name
    #[error("unknown client: {0}")]
    UnknownClient(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EndpointError {
    /// Whether a retry could plausibly change the outcome.
    ///
    /// A missing route is a table lookup; retrying cannot change it. An
    /// unknown client is a wiring error. Everything else is assumed
    /// transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EndpointError::NoRoute { .. } | EndpointError::UnknownClient(_)
        )
    }
}
