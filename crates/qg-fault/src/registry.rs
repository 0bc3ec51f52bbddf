//! Endpoint registry
//!
//! Maps `{client}.{kind}` keys to decorated endpoints. Built once at startup
//! from the set of configured clients — an explicit, immutable mapping in
//! place of a mutable service-locator container — and read lock-free
//! afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use qg_common::{registry_key, BreakerScope, ClientConfig, EndpointKind};
use qg_queue::QueueClientFactory;

use crate::breaker::CircuitBreaker;
use crate::consumer::FaultTolerantConsumer;
use crate::copy::SerdeDeepCopy;
use crate::error::FaultError;
use crate::producer::FaultTolerantProducer;
use crate::retry::RetryPolicy;
use crate::router::FaultTolerantRouterProcessor;
use crate::Result;

/// One decorated endpoint held by the registry
pub enum RegisteredEndpoint {
    Consumer(Arc<FaultTolerantConsumer>),
    Producer(Arc<FaultTolerantProducer>),
    RouterProcessor(Arc<FaultTolerantRouterProcessor>),
}

impl RegisteredEndpoint {
    pub fn kind(&self) -> EndpointKind {
        match self {
            RegisteredEndpoint::Consumer(_) => EndpointKind::Consumer,
            RegisteredEndpoint::Producer(_) => EndpointKind::Producer,
            RegisteredEndpoint::RouterProcessor(_) => EndpointKind::RouterProcessor,
        }
    }
}

/// Startup-only builder; `register` is never called concurrently with
/// `resolve` because the registry does not exist until `build`
pub struct RegistryBuilder {
    entries: HashMap<String, RegisteredEndpoint>,
}

impl RegistryBuilder {
    pub fn register(
        &mut self,
        key: impl Into<String>,
        endpoint: RegisteredEndpoint,
    ) -> Result<()> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(FaultError::DuplicateKey { key });
        }
        self.entries.insert(key, endpoint);
        Ok(())
    }

    pub fn build(self) -> EndpointRegistry {
        EndpointRegistry {
            entries: self.entries,
        }
    }
}

/// Immutable key → decorated endpoint mapping, safe for concurrent lookup
pub struct EndpointRegistry {
    entries: HashMap<String, RegisteredEndpoint>,
}

impl EndpointRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            entries: HashMap::new(),
        }
    }

    pub fn resolve(&self, key: &str) -> Result<&RegisteredEndpoint> {
        self.entries.get(key).ok_or_else(|| FaultError::NotFound {
            key: key.to_string(),
        })
    }

    pub fn consumer(&self, client: &str) -> Result<Arc<FaultTolerantConsumer>> {
        let key = registry_key(client, EndpointKind::Consumer);
        match self.resolve(&key)? {
            RegisteredEndpoint::Consumer(consumer) => Ok(consumer.clone()),
            _ => Err(FaultError::NotFound { key }),
        }
    }

    pub fn producer(&self, client: &str) -> Result<Arc<FaultTolerantProducer>> {
        let key = registry_key(client, EndpointKind::Producer);
        match self.resolve(&key)? {
            RegisteredEndpoint::Producer(producer) => Ok(producer.clone()),
            _ => Err(FaultError::NotFound { key }),
        }
    }

    pub fn router_processor(&self, client: &str) -> Result<Arc<FaultTolerantRouterProcessor>> {
        let key = registry_key(client, EndpointKind::RouterProcessor);
        match self.resolve(&key)? {
            RegisteredEndpoint::RouterProcessor(router) => Ok(router.clone()),
            _ => Err(FaultError::NotFound { key }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Construct one consumer/producer/router trio per configured client.
///
/// Each decorator is bound to the client's own underlying endpoints and to a
/// breaker from `breaker_factory`: one shared instance for the whole process
/// or one per client, per `scope`.
pub fn build_registry(
    configs: &[ClientConfig],
    scope: BreakerScope,
    breaker_factory: &dyn Fn() -> Arc<dyn CircuitBreaker>,
    clients: &dyn QueueClientFactory,
) -> Result<EndpointRegistry> {
    let mut builder = EndpointRegistry::builder();
    let shared_breaker = match scope {
        BreakerScope::Shared => Some(breaker_factory()),
        BreakerScope::PerClient => None,
    };

    for config in configs {
        let breaker = shared_breaker
            .clone()
            .unwrap_or_else(|| breaker_factory());
        let policy = RetryPolicy::from_config(config);
        let setup = |source| FaultError::Setup {
            client: config.name.clone(),
            source,
        };

        let consumer = clients.consumer(&config.name).map_err(setup)?;
        builder.register(
            registry_key(&config.name, EndpointKind::Consumer),
            RegisteredEndpoint::Consumer(Arc::new(FaultTolerantConsumer::new(
                &config.name,
                consumer,
                breaker.clone(),
                policy.clone(),
            ))),
        )?;

        let producer = clients.producer(&config.name).map_err(setup)?;
        builder.register(
            registry_key(&config.name, EndpointKind::Producer),
            RegisteredEndpoint::Producer(Arc::new(FaultTolerantProducer::new(
                &config.name,
                producer,
                breaker.clone(),
                Arc::new(SerdeDeepCopy),
                policy.clone(),
            ))),
        )?;

        let router = clients.router_processor(&config.name).map_err(setup)?;
        builder.register(
            registry_key(&config.name, EndpointKind::RouterProcessor),
            RegisteredEndpoint::RouterProcessor(Arc::new(FaultTolerantRouterProcessor::new(
                &config.name,
                router,
                breaker,
                policy,
            ))),
        )?;

        info!(
            client = %config.name,
            retry_timeout_ms = config.retry_timeout.as_millis() as u64,
            retry_attempts = ?config.retry_attempts,
            "Registered fault-tolerant endpoints"
        );
    }

    Ok(builder.build())
}
