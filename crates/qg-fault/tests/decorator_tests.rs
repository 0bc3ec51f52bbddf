//! End-to-end tests for the fault-tolerant decorators against scripted
//! endpoints and breakers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use qg_common::{
    registry_key, BreakerScope, ClientConfig, ConsumeOutcome, EndpointKind, Message,
};
use qg_fault::{
    build_registry, CircuitBreaker, FaultError, FaultTolerantConsumer, FaultTolerantProducer,
    FaultTolerantRouterProcessor, RetryPolicy, SerdeDeepCopy,
};
use qg_queue::{
    EndpointError, MemoryBroker, MessageHandler, QueueConsumer, QueueProducer, RouterProcessor,
};

// ============================================================================
// Scripted collaborators
// ============================================================================

/// Breaker that allows the first `allow_calls` permission checks, then
/// denies, counting every outcome notification
struct ScriptedBreaker {
    allow_calls: u32,
    allows: AtomicU32,
    successes: AtomicU32,
    failures: AtomicU32,
}

impl ScriptedBreaker {
    fn always_allowing() -> Self {
        Self::denying_after(u32::MAX)
    }

    fn always_denying() -> Self {
        Self::denying_after(0)
    }

    fn denying_after(allow_calls: u32) -> Self {
        Self {
            allow_calls,
            allows: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            failures: AtomicU32::new(0),
        }
    }

    fn successes(&self) -> u32 {
        self.successes.load(Ordering::SeqCst)
    }

    fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}

impl CircuitBreaker for ScriptedBreaker {
    fn allow(&self) -> bool {
        self.allows.fetch_add(1, Ordering::SeqCst) < self.allow_calls
    }

    fn on_success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failure(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

/// Producer that fails the first `fail_first` sends, recording every payload
/// it receives and stamping delivery metadata on it the way a transport does
struct FlakyProducer {
    fail_first: u32,
    calls: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
    received: Mutex<Vec<Message>>,
}

impl FlakyProducer {
    fn new(fail_first: u32) -> Self {
        Self {
            fail_first,
            calls: AtomicU32::new(0),
            call_times: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueProducer for FlakyProducer {
    async fn send(&self, mut message: Message) -> Result<(), EndpointError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.call_times.lock().push(Instant::now());
        message
            .headers
            .insert("x-delivery-attempt".to_string(), attempt.to_string());
        self.received.lock().push(message);

        if attempt <= self.fail_first {
            Err(EndpointError::Transport("broker unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Consumer that fails the first `fail_first` cycles, then processes
struct FlakyConsumer {
    fail_first: u32,
    calls: AtomicU32,
}

impl FlakyConsumer {
    fn new(fail_first: u32) -> Self {
        Self {
            fail_first,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueConsumer for FlakyConsumer {
    async fn consume_once(
        &self,
        _handler: &dyn MessageHandler,
    ) -> Result<ConsumeOutcome, EndpointError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_first {
            Err(EndpointError::Transport("connection reset".to_string()))
        } else {
            Ok(ConsumeOutcome::Processed)
        }
    }
}

/// Router scripted with a fixed error kind for the first `fail_first` calls
struct ScriptedRouter {
    fail_first: u32,
    no_route: bool,
    calls: AtomicU32,
}

impl ScriptedRouter {
    fn no_route() -> Self {
        Self {
            fail_first: u32::MAX,
            no_route: true,
            calls: AtomicU32::new(0),
        }
    }

    fn dispatch_failing(fail_first: u32) -> Self {
        Self {
            fail_first,
            no_route: false,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouterProcessor for ScriptedRouter {
    async fn route(
        &self,
        message: Message,
    ) -> Result<qg_common::RouteOutcome, EndpointError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_first {
            if self.no_route {
                return Err(EndpointError::NoRoute {
                    topic: message.topic.clone(),
                });
            }
            return Err(EndpointError::Transport("downstream unavailable".to_string()));
        }
        Ok(qg_common::RouteOutcome {
            message_id: message.id,
            destination: "downstream".to_string(),
        })
    }
}

struct NoopHandler;

#[async_trait]
impl MessageHandler for NoopHandler {
    async fn handle(&self, _message: Message) -> Result<(), EndpointError> {
        Ok(())
    }
}

fn policy(timeout_ms: u64, delay_ms: u64) -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(timeout_ms))
        .with_delay(Duration::from_millis(delay_ms))
}

fn test_message() -> Message {
    Message::new("orders.created", serde_json::json!({"order_id": 42}))
}

// ============================================================================
// Breaker gating
// ============================================================================

#[tokio::test]
async fn test_open_breaker_blocks_send_without_invoking_transport() {
    let producer = Arc::new(FlakyProducer::new(0));
    let breaker = Arc::new(ScriptedBreaker::always_denying());
    let decorated = FaultTolerantProducer::new(
        "orders",
        producer.clone(),
        breaker.clone(),
        Arc::new(SerdeDeepCopy),
        policy(2000, 10),
    );

    let err = decorated.send(&test_message()).await.err().unwrap();
    assert!(matches!(
        err,
        FaultError::CircuitOpen {
            kind: EndpointKind::Producer,
            ..
        }
    ));
    assert_eq!(producer.calls(), 0);
    assert_eq!(breaker.successes(), 0);
    assert_eq!(breaker.failures(), 0);
}

#[tokio::test]
async fn test_open_breaker_blocks_consume_without_invoking_receive() {
    let consumer = Arc::new(FlakyConsumer::new(0));
    let breaker = Arc::new(ScriptedBreaker::always_denying());
    let decorated =
        FaultTolerantConsumer::new("orders", consumer.clone(), breaker, policy(2000, 10));

    let err = decorated.consume_once(&NoopHandler).await.err().unwrap();
    assert!(matches!(
        err,
        FaultError::CircuitOpen {
            kind: EndpointKind::Consumer,
            ..
        }
    ));
    assert_eq!(consumer.calls(), 0);
}

#[tokio::test]
async fn test_breaker_denial_mid_loop_terminates_retries() {
    // One allowed attempt, then the breaker opens: the loop must stop
    // without burning the rest of the retry window.
    let producer = Arc::new(FlakyProducer::new(u32::MAX));
    let breaker = Arc::new(ScriptedBreaker::denying_after(1));
    let decorated = FaultTolerantProducer::new(
        "orders",
        producer.clone(),
        breaker.clone(),
        Arc::new(SerdeDeepCopy),
        policy(60_000, 1),
    );

    let started = Instant::now();
    let err = decorated.send(&test_message()).await.err().unwrap();
    assert!(matches!(err, FaultError::CircuitOpen { .. }));
    assert_eq!(producer.calls(), 1);
    assert_eq!(breaker.failures(), 1);
    assert!(started.elapsed() < Duration::from_secs(10));
}

// ============================================================================
// Breaker notifications
// ============================================================================

#[tokio::test]
async fn test_success_reports_exactly_one_on_success() {
    let producer = Arc::new(FlakyProducer::new(0));
    let breaker = Arc::new(ScriptedBreaker::always_allowing());
    let decorated = FaultTolerantProducer::new(
        "orders",
        producer,
        breaker.clone(),
        Arc::new(SerdeDeepCopy),
        policy(2000, 10),
    );

    decorated.send(&test_message()).await.unwrap();
    assert_eq!(breaker.successes(), 1);
    assert_eq!(breaker.failures(), 0);
}

// ============================================================================
// Retry window
// ============================================================================

#[tokio::test]
async fn test_no_attempt_starts_after_retry_window() {
    let timeout = Duration::from_millis(250);
    let producer = Arc::new(FlakyProducer::new(u32::MAX));
    let breaker = Arc::new(ScriptedBreaker::always_allowing());
    let decorated = FaultTolerantProducer::new(
        "orders",
        producer.clone(),
        breaker.clone(),
        Arc::new(SerdeDeepCopy),
        policy(250, 40),
    );

    let started = Instant::now();
    let err = decorated.send(&test_message()).await.err().unwrap();
    assert!(matches!(err, FaultError::SendFailed { .. }));
    assert!(producer.calls() >= 2);
    assert_eq!(breaker.failures(), producer.calls());

    // Every attempt began inside the window
    let slack = Duration::from_millis(50);
    for call_time in producer.call_times.lock().iter() {
        assert!(call_time.duration_since(started) < timeout + slack);
    }
}

#[tokio::test]
async fn test_attempt_bound_caps_retries_before_timeout() {
    let producer = Arc::new(FlakyProducer::new(u32::MAX));
    let breaker = Arc::new(ScriptedBreaker::always_allowing());
    let decorated = FaultTolerantProducer::new(
        "orders",
        producer.clone(),
        breaker,
        Arc::new(SerdeDeepCopy),
        policy(60_000, 1).with_max_attempts(3),
    );

    let err = decorated.send(&test_message()).await.err().unwrap();
    match err {
        FaultError::SendFailed { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected SendFailed, got {:?}", other),
    }
    assert_eq!(producer.calls(), 3);
}

#[tokio::test]
async fn test_consumer_retries_then_succeeds() {
    let consumer = Arc::new(FlakyConsumer::new(2));
    let breaker = Arc::new(ScriptedBreaker::always_allowing());
    let decorated =
        FaultTolerantConsumer::new("orders", consumer.clone(), breaker.clone(), policy(2000, 10));

    let outcome = decorated.consume_once(&NoopHandler).await.unwrap();
    assert_eq!(outcome, ConsumeOutcome::Processed);
    assert_eq!(consumer.calls(), 3);
    assert_eq!(breaker.failures(), 2);
    assert_eq!(breaker.successes(), 1);
}

#[tokio::test]
async fn test_consume_exhaustion_wraps_last_error() {
    let consumer = Arc::new(FlakyConsumer::new(u32::MAX));
    let breaker = Arc::new(ScriptedBreaker::always_allowing());
    let decorated =
        FaultTolerantConsumer::new("orders", consumer, breaker, policy(100, 20));

    let err = decorated.consume_once(&NoopHandler).await.err().unwrap();
    match err {
        FaultError::ConsumeFailed { client, source, .. } => {
            assert_eq!(client, "orders");
            assert!(matches!(source, EndpointError::Transport(_)));
        }
        other => panic!("expected ConsumeFailed, got {:?}", other),
    }
}

// ============================================================================
// Producer payload copying
// ============================================================================

#[tokio::test]
async fn test_each_attempt_sends_an_independent_copy() {
    // "orders" scenario: attempts 1 and 2 fail, attempt 3 succeeds well
    // inside the 2s window.
    let producer = Arc::new(FlakyProducer::new(2));
    let breaker = Arc::new(ScriptedBreaker::always_allowing());
    let decorated = FaultTolerantProducer::new(
        "orders",
        producer.clone(),
        breaker.clone(),
        Arc::new(SerdeDeepCopy),
        policy(2000, 10),
    );

    let original = test_message();
    decorated.send(&original).await.unwrap();

    assert_eq!(breaker.failures(), 2);
    assert_eq!(breaker.successes(), 1);

    // Three structurally distinct copies reached the transport; the stamp
    // each attempt wrote never leaked into the next attempt's payload.
    let received = producer.received.lock();
    assert_eq!(received.len(), 3);
    for (i, sent) in received.iter().enumerate() {
        assert_eq!(
            sent.headers.get("x-delivery-attempt").map(String::as_str),
            Some(format!("{}", i + 1).as_str())
        );
        assert_eq!(sent.id, original.id);
        assert_eq!(sent.payload, original.payload);
    }

    // The caller's message was never mutated
    assert!(original.headers.get("x-delivery-attempt").is_none());
}

// ============================================================================
// Router failure classification
// ============================================================================

#[tokio::test]
async fn test_no_route_is_never_retried() {
    let router = Arc::new(ScriptedRouter::no_route());
    let breaker = Arc::new(ScriptedBreaker::always_allowing());
    let decorated = FaultTolerantRouterProcessor::new(
        "orders",
        router.clone(),
        breaker.clone(),
        policy(60_000, 1),
    );

    let err = decorated.route(&test_message()).await.err().unwrap();
    match err {
        FaultError::RouteFailed { attempts, source, .. } => {
            assert_eq!(attempts, 1);
            assert!(matches!(source, EndpointError::NoRoute { .. }));
        }
        other => panic!("expected RouteFailed, got {:?}", other),
    }
    assert_eq!(router.calls(), 1);
    assert_eq!(breaker.failures(), 1);
}

#[tokio::test]
async fn test_dispatch_failure_is_retried() {
    let router = Arc::new(ScriptedRouter::dispatch_failing(1));
    let breaker = Arc::new(ScriptedBreaker::always_allowing());
    let decorated =
        FaultTolerantRouterProcessor::new("orders", router.clone(), breaker.clone(), policy(2000, 10));

    let outcome = decorated.route(&test_message()).await.unwrap();
    assert_eq!(outcome.destination, "downstream");
    assert_eq!(router.calls(), 2);
    assert_eq!(breaker.failures(), 1);
    assert_eq!(breaker.successes(), 1);
}

// ============================================================================
// Registry end to end
// ============================================================================

#[tokio::test]
async fn test_registry_producer_is_bound_to_its_client_queue() {
    let broker = MemoryBroker::new();
    let configs = vec![
        ClientConfig::new("orders", Duration::from_secs(2)),
        ClientConfig::new("billing", Duration::from_secs(2)),
    ];
    let breaker_factory =
        || Arc::new(ScriptedBreaker::always_allowing()) as Arc<dyn CircuitBreaker>;
    let registry =
        build_registry(&configs, BreakerScope::Shared, &breaker_factory, &broker).unwrap();

    let producer = registry.producer("orders").unwrap();
    producer.send(&test_message()).await.unwrap();

    assert_eq!(broker.queue_depth("orders"), 1);
    assert_eq!(broker.queue_depth("billing"), 0);

    let err = registry
        .resolve(&registry_key("unknown", EndpointKind::Consumer))
        .err()
        .unwrap();
    assert!(matches!(err, FaultError::NotFound { .. }));
}

// ============================================================================
// Continuous consumption
// ============================================================================

#[tokio::test]
async fn test_consume_loop_exits_on_shutdown_signal() {
    let broker = MemoryBroker::new();
    let consumer = Arc::new(qg_queue::MemoryConsumer::new(broker.clone(), "orders"));
    let breaker = Arc::new(ScriptedBreaker::always_allowing());
    let decorated = Arc::new(FaultTolerantConsumer::new(
        "orders",
        consumer,
        breaker,
        policy(500, 10),
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = {
        let decorated = decorated.clone();
        tokio::spawn(async move { decorated.consume(&NoopHandler, shutdown_rx).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("consume loop did not stop")
        .expect("consume task panicked");
    assert!(result.is_ok());
}
