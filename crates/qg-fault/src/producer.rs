//! Fault-tolerant producer decorator

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, warn};

use qg_common::{EndpointKind, Message};
use qg_queue::QueueProducer;

use crate::breaker::CircuitBreaker;
use crate::copy::DeepCopy;
use crate::error::FaultError;
use crate::retry::RetryPolicy;
use crate::Result;

/// Wraps a queue producer with breaker gating, bounded retry, and a
/// defensive payload copy per attempt.
///
/// The transport receives a fresh copy of the caller's message on every
/// attempt, so delivery metadata stamped during one send cannot corrupt the
/// next, and the caller's message is never mutated by internal retries.
pub struct FaultTolerantProducer {
    client: String,
    inner: Arc<dyn QueueProducer>,
    breaker: Arc<dyn CircuitBreaker>,
    copier: Arc<dyn DeepCopy>,
    policy: RetryPolicy,
}

impl FaultTolerantProducer {
    pub fn new(
        client: impl Into<String>,
        inner: Arc<dyn QueueProducer>,
        breaker: Arc<dyn CircuitBreaker>,
        copier: Arc<dyn DeepCopy>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client: client.into(),
            inner,
            breaker,
            copier,
            policy,
        }
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub async fn send(&self, message: &Message) -> Result<()> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if !self.breaker.allow() {
                warn!(
                    client = %self.client,
                    kind = %EndpointKind::Producer,
                    message_id = %message.id,
                    attempts = attempt,
                    "Circuit open, refusing send"
                );
                return Err(FaultError::CircuitOpen {
                    client: self.client.clone(),
                    kind: EndpointKind::Producer,
                });
            }

            attempt += 1;
            let payload = self.copier.copy(message);
            match self.inner.send(payload).await {
                Ok(()) => {
                    self.breaker.on_success();
                    return Ok(());
                }
                Err(e) => {
                    self.breaker.on_failure();
                    let elapsed = started.elapsed();
                    warn!(
                        client = %self.client,
                        kind = %EndpointKind::Producer,
                        message_id = %message.id,
                        attempt = attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %e,
                        "Send attempt failed"
                    );

                    if !self.policy.should_retry(attempt, elapsed) {
                        error!(
                            client = %self.client,
                            kind = %EndpointKind::Producer,
                            message_id = %message.id,
                            attempts = attempt,
                            error = %e,
                            "Send retries exhausted"
                        );
                        return Err(FaultError::SendFailed {
                            client: self.client.clone(),
                            attempts: attempt,
                            source: e,
                        });
                    }

                    self.policy.pause_before_retry(elapsed).await;
                    if !self.policy.should_retry(attempt, started.elapsed()) {
                        error!(
                            client = %self.client,
                            kind = %EndpointKind::Producer,
                            message_id = %message.id,
                            attempts = attempt,
                            error = %e,
                            "Send retry window closed"
                        );
                        return Err(FaultError::SendFailed {
                            client: self.client.clone(),
                            attempts: attempt,
                            source: e,
                        });
                    }
                }
            }
        }
    }
}
