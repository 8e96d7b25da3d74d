//! Typed, cancellable event consumer.
//!
//! An [`EventConsumer`] subscribes to the topic bound to its message type and
//! runs a receive loop on a dedicated tokio task. Records are decoded and
//! handed to the handler one at a time. A handler failure is logged with its
//! elapsed handling time and ends the loop; the consumer does not skip
//! records on the caller's behalf. Cancellation is cooperative: it is checked
//! before every receive and raced against the receive itself, never against
//! a running handler.
//!
//! The broker connection is closed exactly once, when the consumer is
//! dropped or its loop ends for any reason.

use crate::client::{ClientError, ConsumerClient};
use crate::codec::{CodecError, JsonCodec, MessageCodec, TypedMessage};
use crate::config::ConfigError;
use crate::topics::TopicRegistry;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

const COMPONENT: &str = "event_consumer";

/// Error type returned by message handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during message consumption
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Failed to deserialize message from {topic} partition {partition} offset {offset}: {source}")]
    DeserializationError {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: CodecError,
    },

    #[error("Message handler failed after {elapsed:?}: {source}")]
    HandlerError {
        elapsed: Duration,
        #[source]
        source: HandlerError,
    },

    #[error("Consumer task failed: {0}")]
    TaskError(String),
}

/// Lifecycle of an [`EventConsumer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Created,
    Subscribed,
    Running,
    Cancelled,
    Faulted,
}

impl ConsumerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConsumerState::Created,
            1 => ConsumerState::Subscribed,
            2 => ConsumerState::Running,
            3 => ConsumerState::Cancelled,
            _ => ConsumerState::Faulted,
        }
    }
}

/// Shared view of a consumer's state
#[derive(Debug, Clone)]
pub struct ConsumerStatus(Arc<AtomicU8>);

impl ConsumerStatus {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ConsumerState::Created as u8)))
    }

    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ConsumerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Handler trait for processing messages
#[async_trait]
pub trait MessageHandler<T>: Send + Sync + 'static {
    /// Process a single message
    async fn handle(&self, message: T) -> Result<(), HandlerError>;
}

/// Function-based message handler
pub struct FnHandler<F> {
    handler: F,
}

impl<F> FnHandler<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<T, F, E> MessageHandler<T> for FnHandler<F>
where
    T: Send + 'static,
    F: Fn(T) -> Result<(), E> + Send + Sync + 'static,
    E: Into<HandlerError>,
{
    async fn handle(&self, message: T) -> Result<(), HandlerError> {
        (self.handler)(message).map_err(Into::into)
    }
}

/// Closes the wrapped client when dropped
struct ConnectionGuard<K: ConsumerClient> {
    client: K,
}

impl<K: ConsumerClient> Drop for ConnectionGuard<K> {
    fn drop(&mut self) {
        self.client.close();
    }
}

/// Aborts the receive loop when the awaiting `consume` future is dropped
struct LoopTask<T>(JoinHandle<T>);

impl<T> Drop for LoopTask<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Consumer for messages of type `T`
pub struct EventConsumer<T, K: ConsumerClient, C = JsonCodec> {
    connection: ConnectionGuard<K>,
    registry: Arc<TopicRegistry>,
    codec: C,
    status: ConsumerStatus,
    span: Span,
    _message: PhantomData<fn() -> T>,
}

impl<T, K> EventConsumer<T, K, JsonCodec>
where
    T: TypedMessage,
    K: ConsumerClient,
    JsonCodec: MessageCodec<T>,
{
    /// Create a consumer that decodes JSON payloads
    pub fn json(client: K, registry: Arc<TopicRegistry>) -> Self {
        Self::new(client, registry, JsonCodec)
    }
}

impl<T, K, C> EventConsumer<T, K, C>
where
    T: TypedMessage,
    K: ConsumerClient,
    C: MessageCodec<T>,
{
    pub fn new(client: K, registry: Arc<TopicRegistry>, codec: C) -> Self {
        let span = info_span!(
            "consumer",
            component = COMPONENT,
            message_type = T::MESSAGE_TYPE
        );

        Self {
            connection: ConnectionGuard { client },
            registry,
            codec,
            status: ConsumerStatus::new(),
            span,
            _message: PhantomData,
        }
    }

    /// Handle for observing the consumer's state after `consume` takes it
    pub fn status(&self) -> ConsumerStatus {
        self.status.clone()
    }

    /// Subscribe and process messages until cancelled or a handler fails.
    ///
    /// Returns `Ok(())` once `cancel` is observed and `Err` when the loop
    /// faults. Either way the connection has been closed when this returns.
    /// Dropping the returned future also stops the loop and closes the
    /// connection.
    pub async fn consume<H>(
        self,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) -> Result<(), ConsumerError>
    where
        H: MessageHandler<T>,
    {
        let Self {
            mut connection,
            registry,
            codec,
            status,
            span,
            ..
        } = self;

        let subscribed = span.in_scope(|| -> Result<String, ConsumerError> {
            let topic = registry.resolve(T::MESSAGE_TYPE)?;
            connection.client.subscribe(topic)?;
            info!(topic, "Consuming topic");
            Ok(topic.to_string())
        });
        let topic = match subscribed {
            Ok(topic) => topic,
            Err(e) => {
                status.set(ConsumerState::Faulted);
                return Err(e);
            }
        };
        status.set(ConsumerState::Subscribed);

        let loop_status = status.clone();
        let mut task = LoopTask(tokio::spawn(
            async move {
                loop_status.set(ConsumerState::Running);
                let result = receive_loop::<T, _, _, _>(
                    &mut connection,
                    &topic,
                    &codec,
                    handler.as_ref(),
                    &cancel,
                )
                .await;
                drop(connection);
                result
            }
            .instrument(span.clone()),
        ));

        let result = match (&mut task.0).await {
            Ok(result) => result,
            Err(e) => Err(ConsumerError::TaskError(e.to_string())),
        };

        match &result {
            Ok(()) => status.set(ConsumerState::Cancelled),
            Err(e) => {
                status.set(ConsumerState::Faulted);
                error!(parent: &span, error = %e, "Consumer stopped");
            }
        }

        result
    }
}

async fn receive_loop<T, K, C, H>(
    connection: &mut ConnectionGuard<K>,
    topic: &str,
    codec: &C,
    handler: &H,
    cancel: &CancellationToken,
) -> Result<(), ConsumerError>
where
    T: TypedMessage,
    K: ConsumerClient,
    C: MessageCodec<T>,
    H: MessageHandler<T>,
{
    loop {
        if cancel.is_cancelled() {
            info!(topic, "Cancellation requested, stopping consumer");
            return Ok(());
        }

        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(topic, "Cancellation requested, stopping consumer");
                return Ok(());
            }
            received = connection.client.recv() => received,
        };

        let record = match received {
            Ok(record) => record,
            Err(e) => {
                warn!(topic, error = %e, "Broker receive failed");
                continue;
            }
        };

        let message = codec.decode(&record.payload).map_err(|source| {
            error!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                error = %source,
                "Failed to deserialize message"
            );
            ConsumerError::DeserializationError {
                topic: record.topic.clone(),
                partition: record.partition,
                offset: record.offset,
                source,
            }
        })?;

        let started = Instant::now();
        match handler.handle(message).await {
            Ok(()) => {
                debug!(
                    partition = record.partition,
                    offset = record.offset,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Consumed"
                );
            }
            Err(source) => {
                let elapsed = started.elapsed();
                error!(
                    partition = record.partition,
                    offset = record.offset,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %source,
                    "Consume failed"
                );
                return Err(ConsumerError::HandlerError { elapsed, source });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record, FakeConsumerClient};
    use crate::topics::TopicBinding;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OrderEvent {
        order_id: u32,
    }

    impl TypedMessage for OrderEvent {
        const MESSAGE_TYPE: &'static str = "OrderEvent";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct ShipmentEvent {
        shipment_id: u32,
    }

    impl TypedMessage for ShipmentEvent {
        const MESSAGE_TYPE: &'static str = "ShipmentEvent";
    }

    fn registry() -> Arc<TopicRegistry> {
        Arc::new(TopicRegistry::new(vec![TopicBinding::new("OrderEvent", "orders")]))
    }

    fn order(offset: i64, order_id: u32) -> Result<crate::client::InboundRecord, ClientError> {
        Ok(record("orders", offset, &format!(r#"{{"order_id":{}}}"#, order_id)))
    }

    /// Records handled order ids; fails on `fail_on`, cancels after `cancel_after`
    struct RecordingHandler {
        seen: parking_lot::Mutex<Vec<u32>>,
        fail_on: Option<u32>,
        cancel_after: Option<(u32, CancellationToken)>,
    }

    impl RecordingHandler {
        fn new() -> Self {
            Self {
                seen: parking_lot::Mutex::new(Vec::new()),
                fail_on: None,
                cancel_after: None,
            }
        }

        fn seen(&self) -> Vec<u32> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl MessageHandler<OrderEvent> for RecordingHandler {
        async fn handle(&self, message: OrderEvent) -> Result<(), HandlerError> {
            self.seen.lock().push(message.order_id);
            if self.fail_on == Some(message.order_id) {
                return Err(format!("cannot process order {}", message.order_id).into());
            }
            if let Some((order_id, token)) = &self.cancel_after {
                if *order_id == message.order_id {
                    token.cancel();
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handler_failure_faults_the_loop() {
        let (client, tx, probe) = FakeConsumerClient::new();
        for order_id in 1..=3 {
            tx.send(order(order_id as i64, order_id)).unwrap();
        }

        let consumer: EventConsumer<OrderEvent, _> = EventConsumer::json(client, registry());
        let status = consumer.status();
        let mut handler = RecordingHandler::new();
        handler.fail_on = Some(2);
        let handler = Arc::new(handler);

        let result = consumer
            .consume(handler.clone(), CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ConsumerError::HandlerError { .. })));
        assert_eq!(handler.seen(), vec![1, 2]);
        assert_eq!(status.state(), ConsumerState::Faulted);
        assert_eq!(probe.subscriptions(), vec!["orders"]);
        assert_eq!(probe.close_count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_mid_loop_stops_handling() {
        let (client, tx, probe) = FakeConsumerClient::new();
        for order_id in 1..=3 {
            tx.send(order(order_id as i64, order_id)).unwrap();
        }

        let cancel = CancellationToken::new();
        let consumer: EventConsumer<OrderEvent, _> = EventConsumer::json(client, registry());
        let status = consumer.status();
        let mut handler = RecordingHandler::new();
        handler.cancel_after = Some((1, cancel.clone()));
        let handler = Arc::new(handler);

        let result = consumer.consume(handler.clone(), cancel).await;

        assert!(result.is_ok());
        assert_eq!(handler.seen(), vec![1]);
        assert_eq!(status.state(), ConsumerState::Cancelled);
        assert_eq!(probe.close_count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_while_waiting_for_records() {
        let (client, _tx, probe) = FakeConsumerClient::new();
        let cancel = CancellationToken::new();
        let consumer: EventConsumer<OrderEvent, _> = EventConsumer::json(client, registry());
        let status = consumer.status();
        let handler = Arc::new(RecordingHandler::new());

        let running = tokio::spawn(consumer.consume(handler.clone(), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(status.state(), ConsumerState::Running);

        cancel.cancel();
        let result = running.await.unwrap();

        assert!(result.is_ok());
        assert!(handler.seen().is_empty());
        assert_eq!(status.state(), ConsumerState::Cancelled);
        assert_eq!(probe.close_count(), 1);
    }

    #[tokio::test]
    async fn test_dropping_consume_future_stops_the_loop() {
        let (client, _tx, probe) = FakeConsumerClient::new();
        let cancel = CancellationToken::new();
        let consumer: EventConsumer<OrderEvent, _> = EventConsumer::json(client, registry());
        let status = consumer.status();
        let handler = Arc::new(RecordingHandler::new());

        let running = tokio::spawn(consumer.consume(handler, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(status.state(), ConsumerState::Running);
        assert_eq!(probe.close_count(), 0);

        running.abort();
        assert!(running.await.unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!cancel.is_cancelled());
        assert_eq!(probe.close_count(), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_never_receives() {
        let (client, tx, probe) = FakeConsumerClient::new();
        tx.send(order(0, 1)).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let consumer: EventConsumer<OrderEvent, _> = EventConsumer::json(client, registry());
        let handler = Arc::new(RecordingHandler::new());

        assert!(consumer.consume(handler.clone(), cancel).await.is_ok());
        assert!(handler.seen().is_empty());
        assert_eq!(probe.close_count(), 1);
    }

    #[tokio::test]
    async fn test_receive_errors_are_skipped() {
        let (client, tx, probe) = FakeConsumerClient::new();
        let cancel = CancellationToken::new();
        tx.send(Err(ClientError::Receive("Broker: transport failure".to_string())))
            .unwrap();
        tx.send(order(1, 7)).unwrap();

        let consumer: EventConsumer<OrderEvent, _> = EventConsumer::json(client, registry());
        let mut handler = RecordingHandler::new();
        handler.cancel_after = Some((7, cancel.clone()));
        let handler = Arc::new(handler);

        assert!(consumer.consume(handler.clone(), cancel).await.is_ok());
        assert_eq!(handler.seen(), vec![7]);
        assert_eq!(probe.close_count(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_payload_faults_the_loop() {
        let (client, tx, probe) = FakeConsumerClient::new();
        tx.send(Ok(record("orders", 4, "not json"))).unwrap();

        let consumer: EventConsumer<OrderEvent, _> = EventConsumer::json(client, registry());
        let handler = Arc::new(RecordingHandler::new());
        let result = consumer.consume(handler.clone(), CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(ConsumerError::DeserializationError { offset: 4, .. })
        ));
        assert!(handler.seen().is_empty());
        assert_eq!(probe.close_count(), 1);
    }

    #[tokio::test]
    async fn test_unbound_type_fails_before_subscribing() {
        let (client, _tx, probe) = FakeConsumerClient::new();
        let consumer: EventConsumer<ShipmentEvent, _> = EventConsumer::json(client, registry());
        let status = consumer.status();
        let handler = Arc::new(FnHandler::new(|_: ShipmentEvent| Ok::<(), HandlerError>(())));

        let result = consumer.consume(handler, CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(ConsumerError::Configuration(ConfigError::UnresolvedTopic(_)))
        ));
        assert!(probe.subscriptions().is_empty());
        assert_eq!(status.state(), ConsumerState::Faulted);
        assert_eq!(probe.close_count(), 1);
    }

    #[tokio::test]
    async fn test_fn_handler_receives_each_message_once() {
        let (client, tx, probe) = FakeConsumerClient::new();
        let cancel = CancellationToken::new();
        for order_id in 1..=3 {
            tx.send(order(order_id as i64, order_id)).unwrap();
        }

        let handled = Arc::new(AtomicUsize::new(0));
        let counter = handled.clone();
        let stop = cancel.clone();
        let handler = FnHandler::new(move |event: OrderEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
            if event.order_id == 3 {
                stop.cancel();
            }
            Ok::<(), std::io::Error>(())
        });

        let consumer: EventConsumer<OrderEvent, _> = EventConsumer::json(client, registry());
        assert!(consumer.consume(Arc::new(handler), cancel).await.is_ok());
        assert_eq!(handled.load(Ordering::SeqCst), 3);
        assert_eq!(probe.close_count(), 1);
    }

    #[test]
    fn test_dropping_unused_consumer_closes_connection() {
        let (client, _tx, probe) = FakeConsumerClient::new();
        let consumer: EventConsumer<OrderEvent, _> = EventConsumer::json(client, registry());
        assert_eq!(consumer.status().state(), ConsumerState::Created);

        drop(consumer);
        assert_eq!(probe.close_count(), 1);
    }
}
