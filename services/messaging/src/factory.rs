//! Configuration-driven construction of producers and consumers.
//!
//! A [`MessagingFactory`] is built once from [`MessagingSettings`]. It owns
//! the topic registry and the producer/consumer connection configurations,
//! and hands out typed [`EventProducer`]s and [`EventConsumer`]s keyed by the
//! message type tag. Producers of the same type share one broker client;
//! every consumer gets its own connection.

use crate::client::{ClientError, ConsumerClient, ProducerClient};
use crate::codec::{JsonCodec, MessageCodec, TypedMessage};
use crate::config::{ConfigError, ConnectionConfig, MessagingSettings};
use crate::consumer::{ConsumerError, EventConsumer};
use crate::kafka::{KafkaConsumerClient, KafkaProducerClient};
use crate::producer::{EventProducer, ProducerError};
use crate::topics::TopicRegistry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Opens broker connections
pub trait Connector: Send + Sync {
    type Consumer: ConsumerClient;

    fn producer(&self, config: &ConnectionConfig) -> Result<Arc<dyn ProducerClient>, ClientError>;

    fn consumer(&self, config: &ConnectionConfig) -> Result<Self::Consumer, ClientError>;
}

/// Connects to Kafka through rdkafka
#[derive(Debug, Clone, Copy, Default)]
pub struct KafkaConnector;

impl Connector for KafkaConnector {
    type Consumer = KafkaConsumerClient;

    fn producer(&self, config: &ConnectionConfig) -> Result<Arc<dyn ProducerClient>, ClientError> {
        Ok(Arc::new(KafkaProducerClient::new(config)?))
    }

    fn consumer(&self, config: &ConnectionConfig) -> Result<Self::Consumer, ClientError> {
        KafkaConsumerClient::new(config)
    }
}

pub struct MessagingFactory<X: Connector = KafkaConnector> {
    connector: X,
    registry: Arc<TopicRegistry>,
    producer_config: ConnectionConfig,
    consumer_config: ConnectionConfig,
    producer_clients: Mutex<HashMap<&'static str, Arc<dyn ProducerClient>>>,
}

impl MessagingFactory<KafkaConnector> {
    pub fn new(settings: &MessagingSettings) -> Result<Self, ConfigError> {
        Self::with_connector(settings, KafkaConnector)
    }
}

impl<X: Connector> MessagingFactory<X> {
    pub fn with_connector(settings: &MessagingSettings, connector: X) -> Result<Self, ConfigError> {
        let producer_config = ConnectionConfig::for_producer(&settings.producer_options())?;
        let consumer_config = ConnectionConfig::for_consumer(&settings.consumer_options())?;
        let registry = Arc::new(TopicRegistry::new(settings.kafka.topics.clone()));

        info!(
            brokers = %producer_config.bootstrap_servers(),
            bindings = registry.bindings().len(),
            "Messaging factory ready"
        );

        Ok(Self {
            connector,
            registry,
            producer_config,
            consumer_config,
            producer_clients: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    pub fn connector(&self) -> &X {
        &self.connector
    }

    pub fn producer_config(&self) -> &ConnectionConfig {
        &self.producer_config
    }

    pub fn consumer_config(&self) -> &ConnectionConfig {
        &self.consumer_config
    }

    /// JSON producer for `T`. Fails if `T` has no topic binding.
    pub fn producer<T>(&self) -> Result<EventProducer<T>, ProducerError>
    where
        T: TypedMessage,
        JsonCodec: MessageCodec<T>,
    {
        self.producer_with_codec(JsonCodec)
    }

    pub fn producer_with_codec<T, C>(&self, codec: C) -> Result<EventProducer<T, C>, ProducerError>
    where
        T: TypedMessage,
        C: MessageCodec<T>,
    {
        self.registry.resolve(T::MESSAGE_TYPE)?;
        let client = self.producer_client(T::MESSAGE_TYPE)?;
        Ok(EventProducer::new(client, self.registry.clone(), codec))
    }

    /// JSON consumer for `T` on a fresh connection. Fails if `T` has no
    /// topic binding.
    pub fn consumer<T>(&self) -> Result<EventConsumer<T, X::Consumer>, ConsumerError>
    where
        T: TypedMessage,
        JsonCodec: MessageCodec<T>,
    {
        self.consumer_with_codec(JsonCodec)
    }

    pub fn consumer_with_codec<T, C>(
        &self,
        codec: C,
    ) -> Result<EventConsumer<T, X::Consumer, C>, ConsumerError>
    where
        T: TypedMessage,
        C: MessageCodec<T>,
    {
        self.registry.resolve(T::MESSAGE_TYPE)?;
        let client = self.connector.consumer(&self.consumer_config)?;
        Ok(EventConsumer::new(client, self.registry.clone(), codec))
    }

    fn producer_client(
        &self,
        message_type: &'static str,
    ) -> Result<Arc<dyn ProducerClient>, ProducerError> {
        let mut clients = self.producer_clients.lock();
        if let Some(client) = clients.get(message_type) {
            return Ok(client.clone());
        }

        debug!(message_type, "Opening producer connection");
        let client = self
            .connector
            .producer(&self.producer_config)
            .map_err(|e| ProducerError::CreationError(e.to_string()))?;
        clients.insert(message_type, client.clone());
        Ok(client)
    }
}
