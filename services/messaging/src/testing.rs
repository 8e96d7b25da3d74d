//! In-memory broker clients for unit tests.

use crate::client::{
    ClientError, ConsumerClient, DeliveryFailure, DeliveryReport, InboundRecord, OutboundRecord,
    ProducerClient, SendError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::types::RDKafkaErrorCode;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum ProducerCall {
    Send {
        topic: String,
        key: Option<Vec<u8>>,
        payload: Vec<u8>,
    },
    Flush(Option<Duration>),
}

/// Records every call; can simulate a saturated queue for N send attempts
#[derive(Default)]
pub struct FakeProducerClient {
    calls: Mutex<Vec<ProducerCall>>,
    delivered: Mutex<Vec<DeliveryReport>>,
    queue_full_remaining: AtomicU32,
    fatal: Option<String>,
    reject_deliveries: bool,
}

impl FakeProducerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_full_for(self, attempts: u32) -> Self {
        self.queue_full_remaining.store(attempts, Ordering::SeqCst);
        self
    }

    pub fn failing_with(mut self, reason: &str) -> Self {
        self.fatal = Some(reason.to_string());
        self
    }

    pub fn rejecting_deliveries(mut self) -> Self {
        self.reject_deliveries = true;
        self
    }

    pub fn calls(&self) -> Vec<ProducerCall> {
        self.calls.lock().clone()
    }

    pub fn delivered(&self) -> Vec<DeliveryReport> {
        self.delivered.lock().clone()
    }

    pub fn sent_topics(&self) -> Vec<String> {
        self.delivered().into_iter().map(|report| report.topic).collect()
    }

    pub fn send_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ProducerCall::Send { .. }))
            .count()
    }

    pub fn flush_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ProducerCall::Flush(_)))
            .count()
    }
}

#[async_trait]
impl ProducerClient for FakeProducerClient {
    fn send(&self, record: OutboundRecord<'_>) -> Result<(), SendError> {
        self.calls.lock().push(ProducerCall::Send {
            topic: record.topic.to_string(),
            key: record.key.map(<[u8]>::to_vec),
            payload: record.payload.to_vec(),
        });

        if let Some(reason) = &self.fatal {
            return Err(SendError::Fatal(reason.clone()));
        }

        let saturated = self
            .queue_full_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if saturated {
            return Err(SendError::QueueFull("Local: Queue full".to_string()));
        }

        let failure = self.reject_deliveries.then(|| DeliveryFailure {
            error_code: RDKafkaErrorCode::MessageTimedOut,
            reason: "Local: Message timed out".to_string(),
        });
        let report = DeliveryReport {
            topic: record.topic.to_string(),
            partition: 0,
            offset: self.delivered.lock().len() as i64,
            failure,
        };
        report.log();
        self.delivered.lock().push(report);

        Ok(())
    }

    async fn send_async(&self, record: OutboundRecord<'_>) -> Result<(), SendError> {
        loop {
            match ProducerClient::send(self, record) {
                Err(SendError::QueueFull(_)) => tokio::task::yield_now().await,
                result => return result,
            }
        }
    }

    fn flush(&self, timeout: Option<Duration>) -> Result<(), SendError> {
        self.calls.lock().push(ProducerCall::Flush(timeout));
        Ok(())
    }
}

/// Shared observations of a [`FakeConsumerClient`]
#[derive(Clone, Default)]
pub struct ConsumerProbe {
    pub subscriptions: Arc<Mutex<Vec<String>>>,
    pub closes: Arc<AtomicUsize>,
}

impl ConsumerProbe {
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }
}

/// Consumer fed through a channel; waits forever once the channel is drained
pub struct FakeConsumerClient {
    records: mpsc::UnboundedReceiver<Result<InboundRecord, ClientError>>,
    probe: ConsumerProbe,
}

impl FakeConsumerClient {
    pub fn new() -> (
        Self,
        mpsc::UnboundedSender<Result<InboundRecord, ClientError>>,
        ConsumerProbe,
    ) {
        let (tx, records) = mpsc::unbounded_channel();
        let probe = ConsumerProbe::default();
        let client = Self {
            records,
            probe: probe.clone(),
        };
        (client, tx, probe)
    }
}

#[async_trait]
impl ConsumerClient for FakeConsumerClient {
    fn subscribe(&mut self, topic: &str) -> Result<(), ClientError> {
        self.probe.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    async fn recv(&mut self) -> Result<InboundRecord, ClientError> {
        match self.records.recv().await {
            Some(record) => record,
            None => std::future::pending().await,
        }
    }

    fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A JSON record on `topic` at `offset`
pub fn record(topic: &str, offset: i64, payload: &str) -> InboundRecord {
    InboundRecord {
        payload: payload.as_bytes().to_vec(),
        key: None,
        topic: topic.to_string(),
        partition: 0,
        offset,
        timestamp: None,
    }
}
