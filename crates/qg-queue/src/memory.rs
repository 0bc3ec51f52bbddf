//! In-memory broker
//!
//! Embedded stand-in for a real message broker, used by the dev binary and
//! tests. Queues are plain FIFO buffers; the route table maps topics to
//! destination queues. Handler failures requeue the delivery at the front,
//! mimicking broker redelivery.

use std::collections::VecDeque;
use std::sync::Arc;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use qg_common::{ConsumeOutcome, Message, RouteOutcome};

use crate::error::EndpointError;
use crate::{MessageHandler, QueueClientFactory, QueueConsumer, QueueProducer, RouterProcessor};

struct MemoryQueue {
    messages: Mutex<VecDeque<Message>>,
}

impl MemoryQueue {
    fn new() -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
        }
    }
}

struct BrokerInner {
    queues: DashMap<String, Arc<MemoryQueue>>,
    routes: DashMap<String, String>,
}

/// Cheaply cloneable handle to the shared broker state
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                queues: DashMap::new(),
                routes: DashMap::new(),
            }),
        }
    }

    /// Map a topic to a destination queue for router dispatch
    pub fn bind_route(&self, topic: impl Into<String>, destination: impl Into<String>) {
        self.inner.routes.insert(topic.into(), destination.into());
    }

    pub fn queue_depth(&self, queue: &str) -> usize {
        self.inner
            .queues
            .get(queue)
            .map(|q| q.messages.lock().len())
            .unwrap_or(0)
    }

    fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        self.inner
            .queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryQueue::new()))
            .clone()
    }

    fn push_back(&self, queue: &str, message: Message) {
        self.queue(queue).messages.lock().push_back(message);
    }

    fn push_front(&self, queue: &str, message: Message) {
        self.queue(queue).messages.lock().push_front(message);
    }

    fn pop(&self, queue: &str) -> Option<Message> {
        self.queue(queue).messages.lock().pop_front()
    }

    fn resolve_route(&self, topic: &str) -> Option<String> {
        self.inner.routes.get(topic).map(|d| d.clone())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends messages to a single queue
pub struct MemoryProducer {
    broker: MemoryBroker,
    queue: String,
}

impl MemoryProducer {
    pub fn new(broker: MemoryBroker, queue: impl Into<String>) -> Self {
        Self {
            broker,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl QueueProducer for MemoryProducer {
    async fn send(&self, message: Message) -> Result<(), EndpointError> {
        debug!(queue = %self.queue, message_id = %message.id, "Enqueued message");
        self.broker.push_back(&self.queue, message);
        Ok(())
    }
}

/// Pops deliveries from a single queue and runs them through the handler
pub struct MemoryConsumer {
    broker: MemoryBroker,
    queue: String,
}

impl MemoryConsumer {
    pub fn new(broker: MemoryBroker, queue: impl Into<String>) -> Self {
        Self {
            broker,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl QueueConsumer for MemoryConsumer {
    async fn consume_once(
        &self,
        handler: &dyn MessageHandler,
    ) -> Result<ConsumeOutcome, EndpointError> {
        let message = match self.broker.pop(&self.queue) {
            Some(m) => m,
            None => return Ok(ConsumeOutcome::Idle),
        };

        match handler.handle(message.clone()).await {
            Ok(()) => {
                debug!(queue = %self.queue, message_id = %message.id, "Delivery handled");
                Ok(ConsumeOutcome::Processed)
            }
            Err(e) => {
                // Requeue at the front so redelivery preserves ordering
                self.broker.push_front(&self.queue, message);
                Err(e)
            }
        }
    }
}

/// Dispatches messages to the queue mapped to their topic
pub struct MemoryRouter {
    broker: MemoryBroker,
}

impl MemoryRouter {
    pub fn new(broker: MemoryBroker) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl RouterProcessor for MemoryRouter {
    async fn route(&self, message: Message) -> Result<RouteOutcome, EndpointError> {
        let destination = self
            .broker
            .resolve_route(&message.topic)
            .ok_or_else(|| EndpointError::NoRoute {
                topic: message.topic.clone(),
            })?;

        let message_id = message.id.clone();
        debug!(topic = %message.topic, destination = %destination, message_id = %message_id, "Routed message");
        self.broker.push_back(&destination, message);

        Ok(RouteOutcome {
            message_id,
            destination,
        })
    }
}

impl QueueClientFactory for MemoryBroker {
    fn consumer(&self, client: &str) -> Result<Arc<dyn QueueConsumer>, EndpointError> {
        Ok(Arc::new(MemoryConsumer::new(self.clone(), client)))
    }

    fn producer(&self, client: &str) -> Result<Arc<dyn QueueProducer>, EndpointError> {
        Ok(Arc::new(MemoryProducer::new(self.clone(), client)))
    }

    fn router_processor(&self, _client: &str) -> Result<Arc<dyn RouterProcessor>, EndpointError> {
        // The route table is broker-wide; every client shares it
        Ok(Arc::new(MemoryRouter::new(self.clone())))
    }
}
