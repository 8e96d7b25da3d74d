//! Courier - example Kafka producer and consumer
//!
//! This binary demonstrates how to use the courier messaging library to:
//! - Produce typed messages to the topic bound to their type
//! - Consume and handle typed messages until shutdown

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use courier_messaging::prelude::*;
use courier_messaging::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Example order event
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderEvent {
    order_id: Uuid,
    customer: String,
    amount_cents: u64,
    placed_at: DateTime<Utc>,
}

impl TypedMessage for OrderEvent {
    const MESSAGE_TYPE: &'static str = "OrderEvent";
}

/// Example order handler
struct OrderHandler;

#[async_trait]
impl MessageHandler<OrderEvent> for OrderHandler {
    async fn handle(&self, order: OrderEvent) -> Result<(), HandlerError> {
        let age = Utc::now().signed_duration_since(order.placed_at);
        info!(
            order_id = %order.order_id,
            customer = %order.customer,
            amount_cents = order.amount_cents,
            age_ms = age.num_milliseconds(),
            "Received order"
        );
        Ok(())
    }
}

/// Run in producer mode - send example messages
async fn run_producer(factory: Arc<MessagingFactory>) -> Result<()> {
    info!("Starting producer example");

    let producer = factory.producer::<OrderEvent>()?;
    info!(topic = producer.topic()?, "Producing order events");

    for i in 0..5u64 {
        let order = OrderEvent {
            order_id: Uuid::new_v4(),
            customer: format!("customer-{}", i % 2),
            amount_cents: 1_000 + i * 250,
            placed_at: Utc::now(),
        };

        let key = order.customer.clone();
        if let Err(e) = producer.produce_async(&order, Some(key.as_bytes())).await {
            error!(order_id = %order.order_id, error = %e, "Failed to send order");
        }
    }

    producer.flush()?;
    info!("Producer finished");

    Ok(())
}

/// Run in consumer mode - receive and handle messages until cancelled
async fn run_consumer(factory: Arc<MessagingFactory>, cancel: CancellationToken) -> Result<()> {
    info!("Starting consumer example");

    let consumer = factory.consumer::<OrderEvent>()?;
    consumer.consume(Arc::new(OrderHandler), cancel).await?;

    info!("Consumer finished");
    Ok(())
}

/// Run in both mode - consume in the background while producing
async fn run_both(factory: Arc<MessagingFactory>, cancel: CancellationToken) -> Result<()> {
    info!("Starting full pipeline example");

    let consumer_factory = factory.clone();
    let consumer_cancel = cancel.clone();
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = run_consumer(consumer_factory, consumer_cancel).await {
            error!(error = %e, "Consumer error");
        }
    });

    // Give consumer time to join its group
    tokio::time::sleep(Duration::from_secs(2)).await;

    run_producer(factory).await?;

    info!("Press Ctrl+C to stop the consumer...");
    consumer_handle.await?;

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(service: &ServiceConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&service.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if service.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

fn load_settings() -> Result<MessagingSettings> {
    match MessagingSettings::load() {
        Ok(settings) if !settings.kafka.brokers.trim().is_empty() => Ok(settings),
        Ok(_) => MessagingSettings::from_env().context("Failed to read KAFKA_* environment"),
        Err(e) => {
            eprintln!("Falling back to KAFKA_* environment: {}", e);
            MessagingSettings::from_env().context("Failed to read KAFKA_* environment")
        }
    }
}

fn print_usage() {
    println!("Usage: courier [producer|consumer|both]");
    println!();
    println!("Modes:");
    println!("  producer - Send example order events");
    println!("  consumer - Receive and log order events");
    println!("  both     - Run both producer and consumer (default)");
    println!();
    println!("Environment variables:");
    println!("  COURIER__KAFKA__BROKERS  - Kafka broker addresses");
    println!("  COURIER__KAFKA__TOPICS   - Set through config/courier.toml");
    println!("  KAFKA_BOOTSTRAP_SERVERS  - Fallback broker addresses (default: localhost:9092)");
    println!("  KAFKA_GROUP_ID           - Consumer group ID");
    println!("  KAFKA_SECURITY_PROTOCOL  - Security protocol (plaintext, ssl, sasl_ssl)");
    println!("  KAFKA_TOPICS             - Topic bindings, e.g. OrderEvent=orders");
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = load_settings()?;
    init_tracing(&settings.service);

    info!(
        service = %settings.service.name,
        brokers = %settings.kafka.brokers,
        bindings = settings.kafka.topics.len(),
        "Starting courier"
    );

    let mode = std::env::args().nth(1).unwrap_or_else(|| "both".to_string());
    if !matches!(mode.as_str(), "producer" | "consumer" | "both") {
        print_usage();
        return Ok(());
    }

    let factory = Arc::new(
        MessagingFactory::new(&settings).context("Failed to build messaging factory")?,
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    match mode.as_str() {
        "producer" => run_producer(factory).await?,
        "consumer" => run_consumer(factory, cancel).await?,
        _ => run_both(factory, cancel).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_event_is_bound_by_type_name() {
        assert_eq!(OrderEvent::MESSAGE_TYPE, "OrderEvent");
    }

    #[tokio::test]
    async fn test_order_handler_accepts_orders() {
        let order = OrderEvent {
            order_id: Uuid::new_v4(),
            customer: "customer-0".to_string(),
            amount_cents: 1_000,
            placed_at: Utc::now(),
        };
        assert!(OrderHandler.handle(order).await.is_ok());
    }
}
