//! Fault-tolerance error taxonomy
//!
//! Breaker denial (`CircuitOpen`) is deliberately distinct from retry
//! exhaustion (`*Failed`) so callers and monitoring can tell "downstream is
//! known-bad" apart from "downstream is flaky and retries ran out".

use thiserror::Error;

use qg_common::EndpointKind;
use qg_queue::EndpointError;

#[derive(Debug, Error)]
pub enum FaultError {
    /// The breaker denied the call; no underlying operation was attempted
    /// for this iteration and the retry loop has terminated
    #[error("circuit breaker is open for {client}.{kind}")]
    CircuitOpen { client: String, kind: EndpointKind },

    /// Consume retries exhausted; wraps the last underlying error
    #[error("consume failed for client {client} after {attempts} attempt(s)")]
    ConsumeFailed {
        client: String,
        attempts: u32,
        #[source]
        source: EndpointError,
    },

    /// Send retries exhausted; wraps the last underlying error
    #[error("send failed for client {client} after {attempts} attempt(s)")]
    SendFailed {
        client: String,
        attempts: u32,
        #[source]
        source: EndpointError,
    },

    /// Routing failed terminally, either a non-retryable routing error or
    /// exhausted dispatch retries
    #[error("route failed for client {client} after {attempts} attempt(s)")]
    RouteFailed {
        client: String,
        attempts: u32,
        #[source]
        source: EndpointError,
    },

    /// Registry lookup for an unknown key
    #[error("no fault-tolerant endpoint registered under key: {key}")]
    NotFound { key: String },

    /// Two registrations under the same key during startup wiring
    #[error("duplicate registry key: {key}")]
    DuplicateKey { key: String },

    /// The underlying client factory could not supply an endpoint
    #[error("failed to build endpoints for client {client}")]
    Setup {
        client: String,
        #[source]
        source: EndpointError,
    },
}
