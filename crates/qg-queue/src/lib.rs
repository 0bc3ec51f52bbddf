//! Queue endpoint boundary
//!
//! Defines the narrow interfaces the fault-tolerance layer decorates:
//! - QueueProducer: send(message)
//! - QueueConsumer: receive a delivery and run it through a handler
//! - RouterProcessor: pick a destination for a message and dispatch it
//! - QueueClientFactory: resolve the three endpoints for a named client
//!
//! Transports live behind these traits. The in-memory broker is always
//! available for development and tests; the AMQP transport is behind the
//! `amqp` feature.

pub mod error;
pub mod memory;

#[cfg(feature = "amqp")]
pub mod amqp;

use std::sync::Arc;
use async_trait::async_trait;

use qg_common::{ConsumeOutcome, Message, RouteOutcome};

pub use error::EndpointError;
pub use memory::{MemoryBroker, MemoryConsumer, MemoryProducer, MemoryRouter};

/// Sends messages to a queue
#[async_trait]
pub trait QueueProducer: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), EndpointError>;
}

/// Receives deliveries and hands them to a handler.
///
/// Acknowledgment and requeue semantics belong entirely to the
/// implementation; callers only decide whether to invoke again.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    async fn consume_once(
        &self,
        handler: &dyn MessageHandler,
    ) -> Result<ConsumeOutcome, EndpointError>;
}

/// Routes a message to its downstream destination
#[async_trait]
pub trait RouterProcessor: Send + Sync {
    async fn route(&self, message: Message) -> Result<RouteOutcome, EndpointError>;
}

/// Application callback invoked for each consumed message
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), EndpointError>;
}

/// Resolves the underlying endpoints for a named client configuration.
///
/// Called once per client during startup wiring; lookups after that go
/// through the fault-tolerance registry, not this factory.
pub trait QueueClientFactory: Send + Sync {
    fn consumer(&self, client: &str) -> Result<Arc<dyn QueueConsumer>, EndpointError>;
    fn producer(&self, client: &str) -> Result<Arc<dyn QueueProducer>, EndpointError>;
    fn router_processor(&self, client: &str) -> Result<Arc<dyn RouterProcessor>, EndpointError>;
}
