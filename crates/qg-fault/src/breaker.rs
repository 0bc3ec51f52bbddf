//! Circuit breaker capability
//!
//! The breaker is an external collaborator. Its internal policy — failure
//! counting, cool-down, Closed/Open/HalfOpen transitions — is opaque here;
//! any conforming implementation can be supplied by reference, one shared
//! process-wide or one per client.

/// Three-method circuit breaker contract.
///
/// Implementations must be safe under concurrent `allow`/`on_success`/
/// `on_failure` calls from multiple decorated endpoints.
pub trait CircuitBreaker: Send + Sync {
    /// Whether a call may proceed right now
    fn allow(&self) -> bool;

    /// Record a successful underlying call
    fn on_success(&self);

    /// Record a failed underlying call
    fn on_failure(&self);
}
