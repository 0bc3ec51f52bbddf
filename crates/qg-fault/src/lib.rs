//! QueueGuard fault-tolerance layer
//!
//! Decorates queue client endpoints with a shared circuit breaker and
//! bounded retry:
//! - FaultTolerantConsumer: receive/handle under breaker + retry discipline
//! - FaultTolerantProducer: send with a defensive payload copy per attempt
//! - FaultTolerantRouterProcessor: routing with retry on dispatch failures only
//! - EndpointRegistry: name → decorated endpoint lookup, built once at startup
//! - RetryPolicy: pure timeout/attempt-bound retry decision
//!
//! The circuit breaker itself is an external capability consumed through the
//! three-method `CircuitBreaker` trait; this crate never drives its state
//! transitions, it only reacts to `allow()`.

pub mod breaker;
pub mod copy;
pub mod error;
pub mod registry;
pub mod retry;

mod consumer;
mod producer;
mod router;

pub use breaker::CircuitBreaker;
pub use consumer::FaultTolerantConsumer;
pub use copy::{DeepCopy, SerdeDeepCopy};
pub use error::FaultError;
pub use producer::FaultTolerantProducer;
pub use registry::{build_registry, EndpointRegistry, RegisteredEndpoint, RegistryBuilder};
pub use retry::RetryPolicy;
pub use router::FaultTolerantRouterProcessor;

pub type Result<T> = std::result::Result<T, FaultError>;
