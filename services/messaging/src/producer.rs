//! Typed event producer.
//!
//! An [`EventProducer`] is bound to one message type. Each send resolves the
//! topic from the type's binding (unless an override is given), encodes the
//! value with the producer's codec, and queues it on the broker client.
//! Delivery failures are reported by the client's delivery callback and are
//! never returned to the caller.

use crate::client::{OutboundRecord, ProducerClient, SendError};
use crate::codec::{CodecError, JsonCodec, MessageCodec, TypedMessage};
use crate::config::ConfigError;
use crate::topics::TopicRegistry;
use std::borrow::Borrow;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info_span, instrument, trace, warn, Instrument, Span};

/// Retries after a queue-full send before giving up
pub const MAX_QUEUE_FULL_RETRIES: u32 = 10;

/// Flush budget between queue-full retries
pub const QUEUE_FULL_FLUSH: Duration = Duration::from_millis(250);

const COMPONENT: &str = "event_producer";

/// Errors that can occur during message production
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("Failed to create producer: {0}")]
    CreationError(String),

    #[error("Failed to serialize message: {0}")]
    SerializationError(#[source] CodecError),

    #[error("Failed to send message to topic {topic}: {source}")]
    SendError {
        topic: String,
        #[source]
        source: SendError,
    },

    #[error("Failed to flush producer: {0}")]
    FlushError(#[source] SendError),
}

/// Producer for messages of type `T`
pub struct EventProducer<T, C = JsonCodec> {
    client: Arc<dyn ProducerClient>,
    registry: Arc<TopicRegistry>,
    codec: C,
    span: Span,
    _message: PhantomData<fn(&T)>,
}

impl<T> EventProducer<T, JsonCodec>
where
    T: TypedMessage,
    JsonCodec: MessageCodec<T>,
{
    /// Create a producer that encodes messages as JSON
    pub fn json(client: Arc<dyn ProducerClient>, registry: Arc<TopicRegistry>) -> Self {
        Self::new(client, registry, JsonCodec)
    }
}

impl<T, C> EventProducer<T, C>
where
    T: TypedMessage,
    C: MessageCodec<T>,
{
    pub fn new(client: Arc<dyn ProducerClient>, registry: Arc<TopicRegistry>, codec: C) -> Self {
        let span = info_span!(
            "producer",
            component = COMPONENT,
            message_type = T::MESSAGE_TYPE
        );

        Self {
            client,
            registry,
            codec,
            span,
            _message: PhantomData,
        }
    }

    /// The topic bound to `T`
    pub fn topic(&self) -> Result<&str, ProducerError> {
        let _entered = self.span.enter();
        Ok(self.registry.resolve(T::MESSAGE_TYPE)?)
    }

    /// Queue a message on the topic bound to `T`
    pub fn produce(&self, message: &T) -> Result<(), ProducerError> {
        self.produce_to(message, None, None)
    }

    /// Queue a keyed message on the topic bound to `T`
    pub fn produce_keyed(&self, key: impl AsRef<[u8]>, message: &T) -> Result<(), ProducerError> {
        self.produce_to(message, Some(key.as_ref()), None)
    }

    /// Queue a message, optionally keyed and optionally on an explicit topic.
    ///
    /// Blocks while the local queue is full: the queue is flushed for
    /// [`QUEUE_FULL_FLUSH`] and the send retried, up to
    /// [`MAX_QUEUE_FULL_RETRIES`] times, after which the queue-full error is
    /// returned. Other send errors are returned immediately.
    pub fn produce_to(
        &self,
        message: &T,
        key: Option<&[u8]>,
        topic: Option<&str>,
    ) -> Result<(), ProducerError> {
        let _entered = self.span.enter();

        let topic = match topic {
            Some(topic) if topic.trim().is_empty() => {
                return Err(ProducerError::InvalidArgument(
                    "topic override is blank".to_string(),
                ))
            }
            Some(topic) => topic,
            None => self.registry.resolve(T::MESSAGE_TYPE)?,
        };
        let payload = self.encode(message)?;

        self.send_with_backpressure(OutboundRecord {
            topic,
            key,
            payload: &payload,
        })
    }

    /// Queue a message without blocking on local backpressure.
    ///
    /// Resolves once the client has queued the record. A later delivery
    /// failure is only logged.
    pub async fn produce_async(&self, message: &T, key: Option<&[u8]>) -> Result<(), ProducerError> {
        let (topic, payload) = {
            let _entered = self.span.enter();
            let topic = self.registry.resolve(T::MESSAGE_TYPE)?;
            (topic, self.encode(message)?)
        };

        let record = OutboundRecord {
            topic,
            key,
            payload: &payload,
        };

        self.client
            .send_async(record)
            .instrument(self.span.clone())
            .await
            .map_err(|source| {
                let _entered = self.span.enter();
                error!(topic, error = %source, "Failed to queue message");
                ProducerError::SendError {
                    topic: topic.to_string(),
                    source,
                }
            })
    }

    /// Queue every message in order on the topic bound to `T`, then flush
    pub fn produce_many<I>(&self, messages: I) -> Result<(), ProducerError>
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let topic = self.topic()?;
        for message in messages {
            self.produce_to(message.borrow(), None, Some(topic))?;
        }
        self.flush()
    }

    /// Queue every `(key, message)` pair in order, then flush
    pub fn produce_many_keyed<I, K, M>(&self, messages: I) -> Result<(), ProducerError>
    where
        I: IntoIterator<Item = (K, M)>,
        K: AsRef<[u8]>,
        M: Borrow<T>,
    {
        let topic = self.topic()?;
        for (key, message) in messages {
            self.produce_to(message.borrow(), Some(key.as_ref()), Some(topic))?;
        }
        self.flush()
    }

    /// Block until every queued message has been handed to the broker
    #[instrument(parent = &self.span, skip(self))]
    pub fn flush(&self) -> Result<(), ProducerError> {
        debug!("Flushing producer");
        self.client.flush(None).map_err(ProducerError::FlushError)
    }

    fn encode(&self, message: &T) -> Result<Vec<u8>, ProducerError> {
        self.codec.encode(message).map_err(|e| match e {
            CodecError::Absent => ProducerError::InvalidArgument("message is absent".to_string()),
            other => ProducerError::SerializationError(other),
        })
    }

    fn send_with_backpressure(&self, record: OutboundRecord<'_>) -> Result<(), ProducerError> {
        let mut retries = MAX_QUEUE_FULL_RETRIES;

        loop {
            match self.client.send(record) {
                Ok(()) => {
                    trace!(topic = record.topic, "Message queued");
                    return Ok(());
                }
                Err(SendError::QueueFull(reason)) if retries > 0 => {
                    retries -= 1;
                    warn!(
                        topic = record.topic,
                        retries_left = retries,
                        reason = %reason,
                        "Local queue full, flushing before retry"
                    );
                    if let Err(e) = self.client.flush(Some(QUEUE_FULL_FLUSH)) {
                        debug!(error = %e, "Queue not drained within flush budget");
                    }
                }
                Err(source) => {
                    error!(topic = record.topic, error = %source, "Failed to queue message");
                    return Err(ProducerError::SendError {
                        topic: record.topic.to_string(),
                        source,
                    });
                }
            }
        }
    }
}
