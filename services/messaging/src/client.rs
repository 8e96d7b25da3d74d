//! Broker client seams used by producers and consumers.
//!
//! The rdkafka implementations live in [`crate::kafka`]; anything that can
//! queue records, flush, and receive records can stand in for them.

use async_trait::async_trait;
use rdkafka::types::RDKafkaErrorCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, trace};

/// Result of handing a record to the client's send path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The local outbound queue is saturated; the record was not queued
    #[error("Local queue full: {0}")]
    QueueFull(String),

    /// Any other failure; retrying will not help
    #[error("{0}")]
    Fatal(String),
}

impl SendError {
    pub fn is_queue_full(&self) -> bool {
        matches!(self, SendError::QueueFull(_))
    }
}

/// Errors raised while opening or using a consumer connection
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("Failed to create client: {0}")]
    Creation(String),

    #[error("Failed to subscribe to topic {topic}: {message}")]
    Subscription { topic: String, message: String },

    #[error("Failed to receive message: {0}")]
    Receive(String),
}

/// A record ready to be queued
#[derive(Debug, Clone, Copy)]
pub struct OutboundRecord<'a> {
    pub topic: &'a str,
    pub key: Option<&'a [u8]>,
    pub payload: &'a [u8],
}

/// A record received from the broker
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRecord {
    /// Raw message payload
    pub payload: Vec<u8>,
    /// Message key (if present)
    pub key: Option<Vec<u8>>,
    /// Topic the message was received from
    pub topic: String,
    /// Partition the message was received from
    pub partition: i32,
    /// Offset of the message in the partition
    pub offset: i64,
    /// Broker timestamp in milliseconds
    pub timestamp: Option<i64>,
}

/// Why the broker failed to deliver a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub error_code: RDKafkaErrorCode,
    pub reason: String,
}

/// Asynchronous outcome of one queued record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub failure: Option<DeliveryFailure>,
}

impl DeliveryReport {
    /// Log the report. Runs on the client's callback thread, so it must not block.
    pub fn log(&self) {
        match &self.failure {
            Some(failure) => error!(
                topic = %self.topic,
                partition = self.partition,
                error_code = %failure.error_code,
                error_reason = %failure.reason,
                "Failed to deliver message"
            ),
            None => trace!(
                topic = %self.topic,
                partition = self.partition,
                offset = self.offset,
                "Message delivered"
            ),
        }
    }
}

/// Producer side of a broker connection
#[async_trait]
pub trait ProducerClient: Send + Sync {
    /// Queue a record without blocking. Delivery is reported later through
    /// the client's delivery callback.
    fn send(&self, record: OutboundRecord<'_>) -> Result<(), SendError>;

    /// Queue a record, waiting for queue space instead of failing with
    /// [`SendError::QueueFull`].
    async fn send_async(&self, record: OutboundRecord<'_>) -> Result<(), SendError>;

    /// Wait for queued records to be handed to the broker. `None` waits
    /// without a deadline.
    fn flush(&self, timeout: Option<Duration>) -> Result<(), SendError>;
}

/// Consumer side of a broker connection
#[async_trait]
pub trait ConsumerClient: Send + 'static {
    fn subscribe(&mut self, topic: &str) -> Result<(), ClientError>;

    /// Wait for the next record
    async fn recv(&mut self) -> Result<InboundRecord, ClientError>;

    /// Release the connection
    fn close(&mut self);
}
