//! Broker configuration for courier producers and consumers.
//!
//! Options are deserialized from configuration files or the environment and
//! turned into an immutable [`ConnectionConfig`], which in turn renders the
//! rdkafka `ClientConfig` used to open a connection.

use crate::topics::TopicBinding;
use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("No topic configured for message type {0}")]
    UnresolvedTopic(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),
}

/// Security protocol for Kafka connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProtocol {
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
            SecurityProtocol::SaslPlaintext => "sasl_plaintext",
            SecurityProtocol::SaslSsl => "sasl_ssl",
        }
    }
}

impl FromStr for SecurityProtocol {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "plaintext" => Ok(SecurityProtocol::Plaintext),
            "ssl" => Ok(SecurityProtocol::Ssl),
            "sasl_plaintext" => Ok(SecurityProtocol::SaslPlaintext),
            "sasl_ssl" => Ok(SecurityProtocol::SaslSsl),
            other => Err(ConfigError::InvalidValue {
                key: "security_protocol".to_string(),
                message: format!("unknown protocol '{}'", other),
            }),
        }
    }
}

/// Where a consumer group with no committed offset starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutoOffsetReset {
    /// Oldest retained message
    #[default]
    Earliest,
    /// Only messages produced after the group joins
    Latest,
    /// Fail the consumer instead of picking an offset
    Error,
}

impl AutoOffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoOffsetReset::Earliest => "earliest",
            AutoOffsetReset::Latest => "latest",
            AutoOffsetReset::Error => "error",
        }
    }
}

impl FromStr for AutoOffsetReset {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "earliest" => Ok(AutoOffsetReset::Earliest),
            "latest" => Ok(AutoOffsetReset::Latest),
            "error" => Ok(AutoOffsetReset::Error),
            other => Err(ConfigError::InvalidValue {
                key: "auto_offset_reset".to_string(),
                message: format!("unknown policy '{}'", other),
            }),
        }
    }
}

/// Settings shared by producers and consumers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerOptions {
    /// Comma-separated list of broker addresses (host or host:port)
    #[serde(default)]
    pub brokers: String,
    /// Security protocol, left to the client default when unset
    #[serde(default)]
    pub security_protocol: Option<SecurityProtocol>,
    /// Auto offset reset policy, `earliest` when unset
    #[serde(default)]
    pub auto_offset_reset: Option<AutoOffsetReset>,
    /// Path to CA certificate file
    #[serde(default)]
    pub ssl_ca_location: Option<String>,
    /// Path to client certificate file
    #[serde(default)]
    pub ssl_certificate_location: Option<String>,
    /// Path to client private key file
    #[serde(default)]
    pub ssl_key_location: Option<String>,
    /// Ordered message type to topic bindings
    #[serde(default)]
    pub topics: Vec<TopicBinding>,
}

impl BrokerOptions {
    /// Create options for the given broker list
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            ..Default::default()
        }
    }

    /// Append a topic binding
    pub fn with_topic(mut self, message_type: impl Into<String>, topic: impl Into<String>) -> Self {
        self.topics.push(TopicBinding::new(message_type, topic));
        self
    }
}

/// Producer options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProducerOptions {
    #[serde(flatten)]
    pub broker: BrokerOptions,
    /// Time to let messages accumulate into a batch, in milliseconds
    #[serde(default)]
    pub linger_ms: Option<f64>,
}

/// Consumer options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerOptions {
    #[serde(flatten)]
    pub broker: BrokerOptions,
    /// Consumer group ID
    #[serde(default)]
    pub group_id: Option<String>,
}

/// Which side of the broker a connection serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Producer,
    Consumer,
}

/// Connection parameters for one producer or consumer instance.
///
/// Built once from options and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub role: ClientRole,
    /// Broker addresses in configured order, without duplicates
    pub brokers: Vec<String>,
    pub security_protocol: Option<SecurityProtocol>,
    pub ssl_ca_location: Option<String>,
    pub ssl_certificate_location: Option<String>,
    pub ssl_key_location: Option<String>,
    /// Consumer only
    pub group_id: Option<String>,
    /// Producer only
    pub linger: Option<Duration>,
    pub auto_offset_reset: AutoOffsetReset,
}

impl ConnectionConfig {
    /// Build the connection configuration for a producer
    pub fn for_producer(options: &ProducerOptions) -> Result<Self, ConfigError> {
        let mut config = Self::from_broker_options(ClientRole::Producer, &options.broker)?;
        config.linger = options.linger_ms.map(linger_from_ms).transpose()?;
        Ok(config)
    }

    /// Build the connection configuration for a consumer
    pub fn for_consumer(options: &ConsumerOptions) -> Result<Self, ConfigError> {
        let mut config = Self::from_broker_options(ClientRole::Consumer, &options.broker)?;
        config.group_id = options
            .group_id
            .as_deref()
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .map(str::to_string);
        Ok(config)
    }

    fn from_broker_options(role: ClientRole, options: &BrokerOptions) -> Result<Self, ConfigError> {
        let brokers = parse_brokers(&options.brokers);
        if brokers.is_empty() {
            return Err(ConfigError::MissingRequired("brokers".to_string()));
        }

        Ok(Self {
            role,
            brokers,
            security_protocol: options.security_protocol,
            ssl_ca_location: options.ssl_ca_location.clone(),
            ssl_certificate_location: options.ssl_certificate_location.clone(),
            ssl_key_location: options.ssl_key_location.clone(),
            group_id: None,
            linger: None,
            auto_offset_reset: options.auto_offset_reset.unwrap_or_default(),
        })
    }

    /// Brokers joined for `bootstrap.servers`
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    /// Render the rdkafka client configuration
    pub fn to_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();

        config.set("bootstrap.servers", self.bootstrap_servers());
        // consumer-only property; producers warn about it
        if self.role == ClientRole::Consumer {
            config.set("auto.offset.reset", self.auto_offset_reset.as_str());
        }

        if let Some(protocol) = self.security_protocol {
            config.set("security.protocol", protocol.as_str());
        }

        // SSL configuration
        if let Some(ref ca) = self.ssl_ca_location {
            config.set("ssl.ca.location", ca);
        }
        if let Some(ref cert) = self.ssl_certificate_location {
            config.set("ssl.certificate.location", cert);
        }
        if let Some(ref key) = self.ssl_key_location {
            config.set("ssl.key.location", key);
        }

        if let Some(ref group_id) = self.group_id {
            config.set("group.id", group_id);
        }
        if let Some(linger) = self.linger {
            config.set("linger.ms", format_millis(linger));
        }

        config
    }
}

fn parse_brokers(brokers: &str) -> Vec<String> {
    let mut parsed: Vec<String> = Vec::new();
    for broker in brokers.split(',').map(str::trim).filter(|b| !b.is_empty()) {
        if !parsed.iter().any(|seen| seen == broker) {
            parsed.push(broker.to_string());
        }
    }
    parsed
}

fn linger_from_ms(ms: f64) -> Result<Duration, ConfigError> {
    if !ms.is_finite() || ms < 0.0 {
        return Err(ConfigError::InvalidValue {
            key: "linger_ms".to_string(),
            message: format!("expected a non-negative number of milliseconds, got {}", ms),
        });
    }
    Ok(Duration::from_nanos((ms * 1_000_000.0).round() as u64))
}

fn format_millis(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos % 1_000_000 == 0 {
        format!("{}", nanos / 1_000_000)
    } else {
        format!("{}", nanos as f64 / 1_000_000.0)
    }
}

/// Service-level configuration for the courier binary
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,
}

fn default_service_name() -> String {
    "courier".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

/// Complete settings: one broker section shared by producers and consumers
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagingSettings {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub kafka: BrokerOptions,
    /// Producer linger in milliseconds
    #[serde(default)]
    pub linger_ms: Option<f64>,
    /// Consumer group ID
    #[serde(default)]
    pub group_id: Option<String>,
}

impl MessagingSettings {
    /// Load settings from config files and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .set_default("service.name", default_service_name())
            .and_then(|builder| builder.set_default("service.log_level", default_log_level()))
            .map_err(|e| ConfigError::LoadError(e.to_string()))?
            // Add config file if present
            .add_source(config::File::with_name("config/courier").required(false))
            .add_source(config::File::with_name("/etc/courier/courier").required(false))
            // Override with environment variables
            // COURIER__KAFKA__BROKERS -> kafka.brokers
            .add_source(
                config::Environment::with_prefix("COURIER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| ConfigError::LoadError(e.to_string()))
    }

    /// Load settings from plain `KAFKA_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let brokers = std::env::var("KAFKA_BOOTSTRAP_SERVERS")
            .unwrap_or_else(|_| "localhost:9092".to_string());

        let mut settings = Self {
            kafka: BrokerOptions::new(brokers),
            ..Default::default()
        };

        if let Ok(group_id) = std::env::var("KAFKA_GROUP_ID") {
            settings.group_id = Some(group_id);
        }
        if let Ok(protocol) = std::env::var("KAFKA_SECURITY_PROTOCOL") {
            settings.kafka.security_protocol = Some(protocol.parse()?);
        }
        if let Ok(reset) = std::env::var("KAFKA_AUTO_OFFSET_RESET") {
            settings.kafka.auto_offset_reset = Some(reset.parse()?);
        }
        if let Ok(linger) = std::env::var("KAFKA_LINGER_MS") {
            let linger = linger.parse::<f64>().map_err(|e| ConfigError::InvalidValue {
                key: "linger_ms".to_string(),
                message: e.to_string(),
            })?;
            settings.linger_ms = Some(linger);
        }

        // Load SSL paths
        if let Ok(ca) = std::env::var("KAFKA_SSL_CA_LOCATION") {
            settings.kafka.ssl_ca_location = Some(ca);
        }
        if let Ok(cert) = std::env::var("KAFKA_SSL_CERTIFICATE_LOCATION") {
            settings.kafka.ssl_certificate_location = Some(cert);
        }
        if let Ok(key) = std::env::var("KAFKA_SSL_KEY_LOCATION") {
            settings.kafka.ssl_key_location = Some(key);
        }

        if let Ok(topics) = std::env::var("KAFKA_TOPICS") {
            settings.kafka.topics = parse_topic_bindings(&topics)?;
        }

        Ok(settings)
    }

    pub fn producer_options(&self) -> ProducerOptions {
        ProducerOptions {
            broker: self.kafka.clone(),
            linger_ms: self.linger_ms,
        }
    }

    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions {
            broker: self.kafka.clone(),
            group_id: self.group_id.clone(),
        }
    }
}

/// Parse `MessageType=topic` pairs separated by commas
pub fn parse_topic_bindings(value: &str) -> Result<Vec<TopicBinding>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((message_type, topic))
                if !message_type.trim().is_empty() && !topic.trim().is_empty() =>
            {
                Ok(TopicBinding::new(message_type.trim(), topic.trim()))
            }
            _ => Err(ConfigError::InvalidValue {
                key: "topics".to_string(),
                message: format!("expected MessageType=topic, got '{}'", pair),
            }),
        })
        .collect()
}
