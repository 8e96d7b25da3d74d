//! Message type to topic bindings.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// A configured binding between a logical message type and a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicBinding {
    /// Message type name, compared case-insensitively
    pub message_type: String,
    /// Topic the message type is produced to and consumed from
    pub topic: String,
}

impl TopicBinding {
    pub fn new(message_type: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            topic: topic.into(),
        }
    }
}

/// Read-only lookup of topics by message type.
///
/// Bindings are searched in configuration order and the first
/// case-insensitive match wins.
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    bindings: Vec<TopicBinding>,
}

impl TopicRegistry {
    pub fn new(bindings: Vec<TopicBinding>) -> Self {
        info!(count = bindings.len(), "Loaded topic bindings");

        for (index, binding) in bindings.iter().enumerate() {
            let shadowed_by = bindings[..index]
                .iter()
                .find(|earlier| same_type_name(&earlier.message_type, &binding.message_type));
            if let Some(earlier) = shadowed_by {
                warn!(
                    message_type = %binding.message_type,
                    topic = %binding.topic,
                    kept_topic = %earlier.topic,
                    "Duplicate topic binding is ignored"
                );
            }
        }

        Self { bindings }
    }

    pub fn bindings(&self) -> &[TopicBinding] {
        &self.bindings
    }

    /// Resolve the topic bound to `message_type`
    pub fn resolve(&self, message_type: &str) -> Result<&str, ConfigError> {
        debug!(message_type, "Searching for topic");

        let binding = self
            .bindings
            .iter()
            .find(|binding| same_type_name(&binding.message_type, message_type));

        match binding {
            Some(binding) => {
                debug!(message_type, topic = %binding.topic, "Found topic");
                Ok(&binding.topic)
            }
            None => {
                error!(message_type, "No topic found for message type");
                Err(ConfigError::UnresolvedTopic(message_type.to_string()))
            }
        }
    }
}

fn same_type_name(left: &str, right: &str) -> bool {
    left.chars()
        .flat_map(char::to_lowercase)
        .eq(right.chars().flat_map(char::to_lowercase))
}
