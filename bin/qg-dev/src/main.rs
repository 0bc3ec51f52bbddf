//! QueueGuard Development Harness
//!
//! All-in-one binary for local development containing:
//! - In-memory broker standing in for the real message broker
//! - Fault-tolerant decorators for every configured client
//! - A dev circuit breaker (consecutive-failure threshold + cooldown)
//! - Demo traffic: publish, consume, and route a few messages

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use parking_lot::Mutex;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use qg_common::{BreakerScope, ClientConfig, Message};
use qg_config::FaultToleranceConfig;
use qg_fault::{build_registry, CircuitBreaker};
use qg_queue::{EndpointError, MemoryBroker, MessageHandler};

/// QueueGuard Development Harness
#[derive(Parser, Debug)]
#[command(name = "qg-dev")]
#[command(about = "QueueGuard dev harness - decorated in-memory queue clients")]
struct Args {
    /// Path to a fault-tolerance TOML config; defaults to a built-in
    /// two-client setup when omitted
    #[arg(long, env = "QG_CONFIG")]
    config: Option<String>,

    /// Number of demo messages to publish per client
    #[arg(long, env = "QG_DEMO_MESSAGES", default_value = "3")]
    demo_messages: u32,

    /// Consecutive failures before the dev breaker opens
    #[arg(long, env = "QG_BREAKER_THRESHOLD", default_value = "5")]
    breaker_threshold: u32,

    /// Dev breaker cooldown in milliseconds
    #[arg(long, env = "QG_BREAKER_COOLDOWN_MS", default_value = "10000")]
    breaker_cooldown_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting QueueGuard Dev Harness");

    // 1. Resolve client configuration
    let (clients, scope) = match &args.config {
        Some(path) => {
            let config = FaultToleranceConfig::load(path)?;
            (config.resolved_clients(), config.breaker_scope)
        }
        None => (default_clients(), BreakerScope::Shared),
    };
    if clients.is_empty() {
        warn!("No clients configured, nothing to decorate");
        return Ok(());
    }
    info!(clients = clients.len(), scope = ?scope, "Client configuration resolved");

    // 2. In-memory broker with a route per client topic
    let broker = MemoryBroker::new();
    for client in &clients {
        broker.bind_route(format!("{}.events", client.name), client.name.clone());
    }

    // 3. Build the registry of decorated endpoints
    let threshold = args.breaker_threshold;
    let cooldown = Duration::from_millis(args.breaker_cooldown_ms);
    let breaker_factory =
        move || Arc::new(ThresholdBreaker::new(threshold, cooldown)) as Arc<dyn CircuitBreaker>;
    let registry = build_registry(&clients, scope, &breaker_factory, &broker)?;
    info!(endpoints = registry.len(), "Endpoint registry built");

    // 4. Start a consume loop per client
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut consumer_handles = Vec::new();
    for client in &clients {
        let consumer = registry.consumer(&client.name)?;
        let shutdown_rx = shutdown_tx.subscribe();
        consumer_handles.push(tokio::spawn(async move {
            if let Err(e) = consumer.consume(&LoggingHandler, shutdown_rx).await {
                error!(client = consumer.client(), error = %e, "Consume loop failed");
            }
        }));
    }

    // 5. Demo traffic: publish and route through the decorated endpoints
    for client in &clients {
        let producer = registry.producer(&client.name)?;
        for n in 0..args.demo_messages {
            let message = Message::new(
                format!("{}.events", client.name),
                serde_json::json!({"seq": n}),
            )
            .with_header("origin", "qg-dev");
            producer.send(&message).await?;
        }

        let router = registry.router_processor(&client.name)?;
        let routed = router
            .route(&Message::new(
                format!("{}.events", client.name),
                serde_json::json!({"routed": true}),
            ))
            .await?;
        info!(
            client = %client.name,
            destination = %routed.destination,
            "Demo message routed"
        );

        // Unmapped topic: surfaces RouteFailed without retrying
        if let Err(e) = router
            .route(&Message::new("unmapped.topic", serde_json::json!({})))
            .await
        {
            info!(client = %client.name, error = %e, "Expected routing failure");
        }
    }

    info!("QueueGuard Dev Harness started");
    info!("Press Ctrl+C to shutdown");

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    let _ = shutdown_tx.send(());
    let shutdown_timeout = Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        for handle in consumer_handles {
            let _ = handle.await;
        }
    })
    .await;

    info!("QueueGuard Dev Harness shutdown complete");
    Ok(())
}

fn default_clients() -> Vec<ClientConfig> {
    vec![
        ClientConfig::new("orders", Duration::from_secs(2)),
        ClientConfig::new("billing", Duration::from_secs(5)).with_retry_attempts(10),
    ]
}

/// Handler that logs each delivery
struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: Message) -> Result<(), EndpointError> {
        info!(
            message_id = %message.id,
            topic = %message.topic,
            "Handled delivery"
        );
        Ok(())
    }
}

/// Dev-only circuit breaker: opens after a run of consecutive failures,
/// allows a half-open trial once the cooldown elapses.
///
/// Stands in for a real breaker implementation the same way the in-memory
/// broker stands in for a real broker.
struct ThresholdBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl ThresholdBreaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }
}

impl CircuitBreaker for ThresholdBreaker {
    fn allow(&self) -> bool {
        let state = self.state.lock();
        match state.opened_at {
            // Half-open trial once the cooldown has elapsed
            Some(opened_at) => opened_at.elapsed() >= self.cooldown,
            None => true,
        }
    }

    fn on_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    fn on_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            if state.opened_at.is_none() {
                warn!(
                    failures = state.consecutive_failures,
                    "Dev breaker opened"
                );
            }
            state.opened_at = Some(Instant::now());
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
