//! AMQP transport (lapin)
//!
//! One channel per client endpoint, queues named after the client, publisher
//! confirms on every send. All endpoints for the configured clients are built
//! up front at connect time so lookups afterwards are synchronous.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;
use tracing::{debug, info};

use qg_common::{ConsumeOutcome, Message, RouteOutcome};

use crate::error::EndpointError;
use crate::{MessageHandler, QueueClientFactory, QueueConsumer, QueueProducer, RouterProcessor};

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

fn amqp_err(e: lapin::Error) -> EndpointError {
    EndpointError::Transport(e.to_string())
}

async fn declare_queue(channel: &Channel, queue: &str) -> Result<(), EndpointError> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(amqp_err)?;
    Ok(())
}

async fn publish(channel: &Channel, queue: &str, message: &Message) -> Result<(), EndpointError> {
    let payload = serde_json::to_vec(message)?;
    channel
        .basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            &payload,
            BasicProperties::default(),
        )
        .await
        .map_err(amqp_err)?
        .await
        .map_err(amqp_err)?;
    Ok(())
}

/// Publishes to the client's queue with publisher confirms
pub struct AmqpProducer {
    channel: Channel,
    queue: String,
}

#[async_trait]
impl QueueProducer for AmqpProducer {
    async fn send(&self, message: Message) -> Result<(), EndpointError> {
        debug!(queue = %self.queue, message_id = %message.id, "Publishing message");
        publish(&self.channel, &self.queue, &message).await
    }
}

/// Pulls one delivery from the consume stream per call.
///
/// Returns `Idle` when nothing arrives within the poll timeout. Handled
/// deliveries are acked; handler failures are nacked with requeue;
/// unparseable payloads are nacked without requeue so they cannot be
/// redelivered forever.
pub struct AmqpConsumer {
    consumer: Mutex<lapin::Consumer>,
    queue: String,
    poll_timeout: Duration,
}

#[async_trait]
impl QueueConsumer for AmqpConsumer {
    async fn consume_once(
        &self,
        handler: &dyn MessageHandler,
    ) -> Result<ConsumeOutcome, EndpointError> {
        let mut consumer = self.consumer.lock().await;

        let delivery = match tokio::time::timeout(self.poll_timeout, consumer.next()).await {
            Err(_) => return Ok(ConsumeOutcome::Idle),
            Ok(None) => return Err(EndpointError::Closed(self.queue.clone())),
            Ok(Some(Err(e))) => return Err(amqp_err(e)),
            Ok(Some(Ok(delivery))) => delivery,
        };

        let message: Message = match serde_json::from_slice(&delivery.data) {
            Ok(m) => m,
            Err(e) => {
                delivery
                    .nack(BasicNackOptions::default())
                    .await
                    .map_err(amqp_err)?;
                return Err(EndpointError::Serialization(e));
            }
        };

        match handler.handle(message).await {
            Ok(()) => {
                delivery
                    .ack(BasicAckOptions::default())
                    .await
                    .map_err(amqp_err)?;
                Ok(ConsumeOutcome::Processed)
            }
            Err(e) => {
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..BasicNackOptions::default()
                    })
                    .await
                    .map_err(amqp_err)?;
                Err(e)
            }
        }
    }
}

/// Republishes messages to the queue mapped to their topic
pub struct AmqpRouter {
    channel: Channel,
    routes: HashMap<String, String>,
}

#[async_trait]
impl RouterProcessor for AmqpRouter {
    async fn route(&self, message: Message) -> Result<RouteOutcome, EndpointError> {
        let destination = self
            .routes
            .get(&message.topic)
            .cloned()
            .ok_or_else(|| EndpointError::NoRoute {
                topic: message.topic.clone(),
            })?;

        let message_id = message.id.clone();
        publish(&self.channel, &destination, &message).await?;
        debug!(topic = %message.topic, destination = %destination, message_id = %message_id, "Routed message");

        Ok(RouteOutcome {
            message_id,
            destination,
        })
    }
}

/// AMQP-backed client factory.
///
/// All endpoints for the configured clients are created at connect time;
/// the `QueueClientFactory` lookups only hand out shared references.
pub struct AmqpClientFactory {
    _connection: Connection,
    producers: HashMap<String, Arc<AmqpProducer>>,
    consumers: HashMap<String, Arc<AmqpConsumer>>,
    routers: HashMap<String, Arc<AmqpRouter>>,
}

impl AmqpClientFactory {
    /// Connect and build endpoints for every named client.
    ///
    /// `routes` maps topics to destination queues for router dispatch; the
    /// destinations are declared alongside the client queues.
    pub async fn connect(
        uri: &str,
        clients: &[String],
        routes: HashMap<String, String>,
    ) -> Result<Self, EndpointError> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(amqp_err)?;
        info!(clients = clients.len(), "Connected to AMQP broker");

        let mut producers = HashMap::new();
        let mut consumers = HashMap::new();
        let mut routers = HashMap::new();

        for client in clients {
            let channel = connection.create_channel().await.map_err(amqp_err)?;
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(amqp_err)?;
            declare_queue(&channel, client).await?;

            let consumer = channel
                .basic_consume(
                    client,
                    &format!("qg-{}", client),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(amqp_err)?;

            producers.insert(
                client.clone(),
                Arc::new(AmqpProducer {
                    channel: channel.clone(),
                    queue: client.clone(),
                }),
            );
            consumers.insert(
                client.clone(),
                Arc::new(AmqpConsumer {
                    consumer: Mutex::new(consumer),
                    queue: client.clone(),
                    poll_timeout: DEFAULT_POLL_TIMEOUT,
                }),
            );
            routers.insert(
                client.clone(),
                Arc::new(AmqpRouter {
                    channel,
                    routes: routes.clone(),
                }),
            );
        }

        if !routes.is_empty() {
            let channel = connection.create_channel().await.map_err(amqp_err)?;
            for destination in routes.values() {
                declare_queue(&channel, destination).await?;
            }
        }

        Ok(Self {
            _connection: connection,
            producers,
            consumers,
            routers,
        })
    }
}

impl QueueClientFactory for AmqpClientFactory {
    fn consumer(&self, client: &str) -> Result<Arc<dyn QueueConsumer>, EndpointError> {
        self.consumers
            .get(client)
            .cloned()
            .map(|c| c as Arc<dyn QueueConsumer>)
            .ok_or_else(|| EndpointError::UnknownClient(client.to_string()))
    }

    fn producer(&self, client: &str) -> Result<Arc<dyn QueueProducer>, EndpointError> {
        self.producers
            .get(client)
            .cloned()
            .map(|p| p as Arc<dyn QueueProducer>)
            .ok_or_else(|| EndpointError::UnknownClient(client.to_string()))
    }

    fn router_processor(&self, client: &str) -> Result<Arc<dyn RouterProcessor>, EndpointError> {
        self.routers
            .get(client)
            .cloned()
            .map(|r| r as Arc<dyn RouterProcessor>)
            .ok_or_else(|| EndpointError::UnknownClient(client.to_string()))
    }
}
