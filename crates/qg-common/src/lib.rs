use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

// ============================================================================
// Core Message Types
// ============================================================================

/// The message structure that flows through producers, consumers, and routers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Logical topic used by router processors to pick a destination
    pub topic: String,
    /// Transport headers; brokers may stamp delivery metadata in here
    pub headers: HashMap<String, String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            headers: HashMap::new(),
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a single consume cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// A message was received and handed to the handler
    Processed,
    /// No message was waiting
    Idle,
}

/// Outcome of a successful routing decision and dispatch
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub message_id: String,
    /// Destination the message was dispatched to
    pub destination: String,
}

// ============================================================================
// Endpoint Identification
// ============================================================================

/// The three endpoint kinds a queue client exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointKind {
    Consumer,
    Producer,
    RouterProcessor,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Consumer => "consumer",
            EndpointKind::Producer => "producer",
            EndpointKind::RouterProcessor => "router_processor",
        }
    }

    pub const ALL: [EndpointKind; 3] = [
        EndpointKind::Consumer,
        EndpointKind::Producer,
        EndpointKind::RouterProcessor,
    ];
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry lookup key: `{client}.{kind}`, unique per process
pub fn registry_key(client: &str, kind: EndpointKind) -> String {
    format!("{}.{}", client, kind)
}

// ============================================================================
// Client Configuration
// ============================================================================

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Whether one circuit breaker instance serves every decorated endpoint in
/// the process or each client gets its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerScope {
    #[default]
    Shared,
    PerClient,
}

/// Validated per-client fault-tolerance settings.
///
/// Built once from static configuration at startup and immutable afterwards.
/// Parsing and validation live in `qg-config`; the core consumes these values
/// as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Unique name identifying one queue-client configuration
    pub name: String,
    /// Total retry window per operation invocation
    pub retry_timeout: Duration,
    /// Optional hard cap on attempts, checked alongside the timeout
    pub retry_attempts: Option<u32>,
    /// Pause between attempts, clamped to the remaining retry window
    pub retry_delay: Duration,
}

impl ClientConfig {
    pub fn new(name: impl Into<String>, retry_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            retry_timeout,
            retry_attempts: None,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}
