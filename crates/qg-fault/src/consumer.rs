//! Fault-tolerant consumer decorator

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use qg_common::{ConsumeOutcome, EndpointKind};
use qg_queue::{MessageHandler, QueueConsumer};

use crate::breaker::CircuitBreaker;
use crate::error::FaultError;
use crate::retry::RetryPolicy;
use crate::Result;

/// Wraps a queue consumer with breaker gating and bounded retry.
///
/// Acknowledgment and requeue semantics stay with the wrapped consumer; this
/// decorator only decides whether to re-invoke it.
pub struct FaultTolerantConsumer {
    client: String,
    inner: Arc<dyn QueueConsumer>,
    breaker: Arc<dyn CircuitBreaker>,
    policy: RetryPolicy,
}

impl FaultTolerantConsumer {
    pub fn new(
        client: impl Into<String>,
        inner: Arc<dyn QueueConsumer>,
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

    /// Run one receive/handle cycle under the fault policy.
    ///
    /// Breaker denial fails immediately with `CircuitOpen` — no underlying
    /// receive is attempted and no retry loop is entered. Failed attempts
    /// are retried while the policy allows; the terminal failure wraps the
    /// last underlying error.
    pub async fn consume_once(&self, handler: &dyn MessageHandler) -> Result<ConsumeOutcome> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if !self.breaker.allow() {
                warn!(
                    client = %self.client,
                    kind = %EndpointKind::Consumer,
                    attempts = attempt,
                    "Circuit open, refusing consume"
                );
                return Err(FaultError::CircuitOpen {
                    client: self.client.clone(),
                    kind: EndpointKind::Consumer,
                });
            }

            attempt += 1;
            match self.inner.consume_once(handler).await {
                Ok(outcome) => {
                    self.breaker.on_success();
                    return Ok(outcome);
                }
                Err(e) => {
                    self.breaker.on_failure();
                    let elapsed = started.elapsed();
                    warn!(
                        client = %self.client,
                        kind = %EndpointKind::Consumer,
                        attempt = attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %e,
                        "Consume attempt failed"
                    );

                    if !self.policy.should_retry(attempt, elapsed) {
                        error!(
                            client = %self.client,
                            kind = %EndpointKind::Consumer,
                            attempts = attempt,
                            error = %e,
                            "Consume retries exhausted"
                        );
                        return Err(FaultError::ConsumeFailed {
                            client: self.client.clone(),
                            attempts: attempt,
                            source: e,
                        });
                    }

                    self.policy.pause_before_retry(elapsed).await;
                    if !self.policy.should_retry(attempt, started.elapsed()) {
                        error!(
                            client = %self.client,
                            kind = %EndpointKind::Consumer,
                            attempts = attempt,
                            error = %e,
                            "Consume retry window closed"
                        );
                        return Err(FaultError::ConsumeFailed {
                            client: self.client.clone(),
                            attempts: attempt,
                            source: e,
                        });
                    }
                }
            }
        }
    }

    /// Continuous consumption loop until the shutdown signal fires.
    ///
    /// Each cycle applies the fault policy independently; terminal failures
    /// are logged by `consume_once` and the loop backs off for one retry
    /// delay before polling again, so a bad spell (or an open breaker) does
    /// not spin the worker.
    pub async fn consume(
        &self,
        handler: &dyn MessageHandler,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!(client = %self.client, "Starting consume loop");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(client = %self.client, "Consume loop shutting down");
                    return Ok(());
                }
                result = self.consume_once(handler) => {
                    match result {
                        Ok(ConsumeOutcome::Processed) => {}
                        Ok(ConsumeOutcome::Idle) | Err(_) => {
                            tokio::time::sleep(self.policy.delay()).await;
                        }
                    }
                }
            }
        }
    }
}
