//! Fault-tolerant router-processor decorator

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, warn};

use qg_common::{EndpointKind, Message, RouteOutcome};
use qg_queue::{EndpointError, RouterProcessor};

use crate::breaker::CircuitBreaker;
use crate::error::FaultError;
use crate::retry::RetryPolicy;
use crate::Result;

/// Wraps a router processor with breaker gating and bounded retry.
///
/// Failures are classified before retrying: a routing failure (no matching
/// route) is surfaced after a single attempt, since retrying cannot change
/// the route table. Dispatch failures — and anything unclassifiable — are
/// retried under the shared policy.
pub struct FaultTolerantRouterProcessor {
    client: String,
    inner: Arc<dyn RouterProcessor>,
    breaker: Arc<dyn CircuitBreaker>,
    policy: RetryPolicy,
}

impl FaultTolerantRouterProcessor {
    pub fn new(
        client: impl Into<String>,
        inner: Arc<dyn RouterProcessor>,
        breaker: Arc<dyn CircuitBreaker>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client: client.into(),
            inner,
            breaker,
            policy,
        }
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub async fn route(&self, message: &Message) -> Result<RouteOutcome> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if !self.breaker.allow() {
                warn!(
                    client = %self.client,
                    kind = %EndpointKind::RouterProcessor,
                    message_id = %message.id,
                    attempts = attempt,
                    "Circuit open, refusing route"
                );
                return Err(FaultError::CircuitOpen {
                    client: self.client.clone(),
                    kind: EndpointKind::RouterProcessor,
                });
            }

            attempt += 1;
            match self.inner.route(message.clone()).await {
                Ok(outcome) => {
                    self.breaker.on_success();
                    return Ok(outcome);
                }
                Err(e) => {
                    self.breaker.on_failure();
                    let elapsed = started.elapsed();
                    warn!(
                        client = %self.client,
                        kind = %EndpointKind::RouterProcessor,
                        message_id = %message.id,
                        attempt = attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %e,
                        "Route attempt failed"
                    );

                    if !e.is_retryable() {
                        error!(
                            client = %self.client,
                            kind = %EndpointKind::RouterProcessor,
                            message_id = %message.id,
                            attempts = attempt,
                            error = %e,
                            "Routing failure, not retrying"
                        );
                        return Err(self.route_failed(attempt, e));
                    }

                    if !self.policy.should_retry(attempt, elapsed) {
                        error!(
                            client = %self.client,
                            kind = %EndpointKind::RouterProcessor,
                            message_id = %message.id,
                            attempts = attempt,
                            error = %e,
                            "Route retries exhausted"
                        );
                        return Err(self.route_failed(attempt, e));
                    }

                    self.policy.pause_before_retry(elapsed).await;
                    if !self.policy.should_retry(attempt, started.elapsed()) {
                        error!(
                            client = %self.client,
                            kind = %EndpointKind::RouterProcessor,
                            message_id = %message.id,
                            attempts = attempt,
                            error = %e,
                            "Route retry window closed"
                        );
                        return Err(self.route_failed(attempt, e));
                    }
                }
            }
        }
    }

    fn route_failed(&self, attempts: u32, source: EndpointError) -> FaultError {
        FaultError::RouteFailed {
            client: self.client.clone(),
            attempts,
            source,
        }
    }
}
