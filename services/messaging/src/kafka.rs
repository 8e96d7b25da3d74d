//! rdkafka-backed broker clients.

use crate::client::{
    ClientError, ConsumerClient, DeliveryFailure, DeliveryReport, InboundRecord, OutboundRecord,
    ProducerClient, SendError,
};
use crate::config::ConnectionConfig;
use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long `send_async` waits before retrying a saturated queue
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Flush budget when a producer client is dropped
const SHUTDOWN_FLUSH: Duration = Duration::from_secs(5);

/// Error text older librdkafka builds report for a saturated queue
const LEGACY_QUEUE_FULL: &str = "Local: Queue full";

/// Producer context that logs delivery reports on the polling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryReporter;

impl ClientContext for DeliveryReporter {}

impl ProducerContext for DeliveryReporter {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _: Self::DeliveryOpaque) {
        delivery_report(delivery_result).log();
    }
}

fn delivery_report(result: &DeliveryResult<'_>) -> DeliveryReport {
    match result {
        Ok(message) => DeliveryReport {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            failure: None,
        },
        Err((error, message)) => DeliveryReport {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            failure: Some(DeliveryFailure {
                error_code: error.rdkafka_error_code().unwrap_or(RDKafkaErrorCode::Fail),
                reason: error.to_string(),
            }),
        },
    }
}

/// Map a send failure to its retry class by error code
fn classify(error: &KafkaError) -> SendError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::QueueFull) => SendError::QueueFull(error.to_string()),
        Some(_) => SendError::Fatal(error.to_string()),
        None => {
            let message = error.to_string();
            if message.contains(LEGACY_QUEUE_FULL) {
                SendError::QueueFull(message)
            } else {
                SendError::Fatal(message)
            }
        }
    }
}

/// Kafka producer client built on a `ThreadedProducer`
pub struct KafkaProducerClient {
    producer: ThreadedProducer<DeliveryReporter>,
}

impl KafkaProducerClient {
    pub fn new(config: &ConnectionConfig) -> Result<Self, ClientError> {
        info!(brokers = %config.bootstrap_servers(), "Creating Kafka producer");

        let producer = config
            .to_client_config()
            .create_with_context(DeliveryReporter)
            .map_err(|e| ClientError::Creation(e.to_string()))?;

        Ok(Self { producer })
    }
}

#[async_trait]
impl ProducerClient for KafkaProducerClient {
    fn send(&self, record: OutboundRecord<'_>) -> Result<(), SendError> {
        let mut base: BaseRecord<'_, [u8], [u8]> =
            BaseRecord::to(record.topic).payload(record.payload);
        if let Some(key) = record.key {
            base = base.key(key);
        }

        self.producer.send(base).map_err(|(e, _)| classify(&e))
    }

    async fn send_async(&self, record: OutboundRecord<'_>) -> Result<(), SendError> {
        loop {
            match ProducerClient::send(self, record) {
                Err(SendError::QueueFull(_)) => {
                    debug!(topic = record.topic, "Queue full, waiting for space");
                    tokio::time::sleep(QUEUE_POLL_INTERVAL).await;
                }
                result => return result,
            }
        }
    }

    fn flush(&self, timeout: Option<Duration>) -> Result<(), SendError> {
        let timeout = timeout.map_or(Timeout::Never, Timeout::After);
        self.producer.flush(timeout).map_err(|e| classify(&e))
    }
}

impl Drop for KafkaProducerClient {
    fn drop(&mut self) {
        info!("Shutting down Kafka producer");
        if let Err(e) = self.producer.flush(Timeout::After(SHUTDOWN_FLUSH)) {
            warn!("Failed to flush producer on shutdown: {}", e);
        }
    }
}

/// Kafka consumer client built on a `StreamConsumer`
pub struct KafkaConsumerClient {
    consumer: StreamConsumer,
}

impl KafkaConsumerClient {
    pub fn new(config: &ConnectionConfig) -> Result<Self, ClientError> {
        info!(
            brokers = %config.bootstrap_servers(),
            group = config.group_id.as_deref().unwrap_or_default(),
            "Creating Kafka consumer"
        );

        let consumer: StreamConsumer = config
            .to_client_config()
            .create()
            .map_err(|e| ClientError::Creation(e.to_string()))?;

        Ok(Self { consumer })
    }
}

#[async_trait]
impl ConsumerClient for KafkaConsumerClient {
    fn subscribe(&mut self, topic: &str) -> Result<(), ClientError> {
        info!(topic, "Subscribing to topic");
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| ClientError::Subscription {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    async fn recv(&mut self) -> Result<InboundRecord, ClientError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| ClientError::Receive(e.to_string()))?;
        Ok(convert_message(&message))
    }

    fn close(&mut self) {
        info!("Closing Kafka consumer");
        self.consumer.unsubscribe();
    }
}

/// Convert a borrowed Kafka message to an owned record
fn convert_message<M: Message>(msg: &M) -> InboundRecord {
    InboundRecord {
        payload: msg.payload().unwrap_or(&[]).to_vec(),
        key: msg.key().map(|k| k.to_vec()),
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        timestamp: msg.timestamp().to_millis(),
    }
}
