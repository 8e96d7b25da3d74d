//! Courier Messaging - typed Kafka producers and consumers
//!
//! This library binds message types to Kafka topics and provides:
//!
//! - Topic resolution by message type, configured once and shared
//! - Producers that retry on local queue saturation and log delivery failures
//! - Cancellable consumers that run one handler at a time on a background task
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_messaging::prelude::*;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct OrderEvent {
//!     order_id: u64,
//! }
//!
//! impl TypedMessage for OrderEvent {
//!     const MESSAGE_TYPE: &'static str = "OrderEvent";
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = MessagingSettings::from_env()?;
//!     let factory = MessagingFactory::new(&settings)?;
//!
//!     let producer = factory.producer::<OrderEvent>()?;
//!     producer.produce(&OrderEvent { order_id: 1 })?;
//!     producer.flush()?;
//!
//!     let handler = FnHandler::new(|order: OrderEvent| {
//!         println!("order {}", order.order_id);
//!         Ok::<(), HandlerError>(())
//!     });
//!     let consumer = factory.consumer::<OrderEvent>()?;
//!     consumer.consume(Arc::new(handler), CancellationToken::new()).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod factory;
pub mod kafka;
pub mod producer;
pub mod topics;

#[cfg(test)]
mod testing;

// Re-export main types
pub use client::{
    ClientError, ConsumerClient, DeliveryFailure, DeliveryReport, InboundRecord, OutboundRecord,
    ProducerClient, SendError,
};
pub use codec::{CodecError, JsonCodec, MessageCodec, TypedMessage};
pub use config::{
    AutoOffsetReset, BrokerOptions, ClientRole, ConfigError, ConnectionConfig, ConsumerOptions,
    MessagingSettings, ProducerOptions, SecurityProtocol, ServiceConfig,
};
pub use consumer::{
    ConsumerError, ConsumerState, ConsumerStatus, EventConsumer, FnHandler, HandlerError,
    MessageHandler,
};
pub use factory::{Connector, KafkaConnector, MessagingFactory};
pub use kafka::{KafkaConsumerClient, KafkaProducerClient};
pub use producer::{EventProducer, ProducerError};
pub use topics::{TopicBinding, TopicRegistry};

pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::codec::TypedMessage;
    pub use crate::config::MessagingSettings;
    pub use crate::consumer::{
        ConsumerError, ConsumerState, EventConsumer, FnHandler, HandlerError, MessageHandler,
    };
    pub use crate::factory::MessagingFactory;
    pub use crate::producer::{EventProducer, ProducerError};
    pub use async_trait::async_trait;
    pub use tokio_util::sync::CancellationToken;
}
