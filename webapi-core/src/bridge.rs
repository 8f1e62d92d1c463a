use crate::aws::SdkConfig;
use async_trait::async_trait;
use aws_sdk_sns::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Could not resolve topic {topic}: {reason}")]
    Topic { topic: String, reason: String },
    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeMessage {
    pub message_id: String,
    pub message_type: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub payload: Value,
}

/// Forwards bus messages to a system outside the bus.
#[async_trait]
pub trait NybusBridge: Send + Sync {
    fn name(&self) -> String;

    async fn send(&self, message: BridgeMessage) -> Result<(), BridgeError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnsBridgeOptions {
    #[serde(default)]
    pub topic_prefix: String,
}

/// SNS topic names allow alphanumerics, hyphens and underscores, up to 256 chars.
pub fn topic_name(prefix: &str, message_type: &str) -> String {
    format!("{}{}", prefix, message_type)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(256)
        .collect()
}

pub struct SnsNybusBridge {
    client: Client,
    options: SnsBridgeOptions,
    topics: RwLock<HashMap<String, String>>,
}

impl SnsNybusBridge {
    pub fn new(client: Client, options: SnsBridgeOptions) -> Self {
        Self {
            client,
            options,
            topics: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_sdk_config(config: &SdkConfig, options: SnsBridgeOptions) -> Self {
        Self::new(Client::new(config), options)
    }

    /// CreateTopic is idempotent and returns the ARN of an existing topic.
    async fn topic_arn(&self, topic: &str) -> Result<String, BridgeError> {
        if let Some(arn) = self.topics.read().await.get(topic) {
            return Ok(arn.clone());
        }

        let output = self
            .client
            .create_topic()
            .name(topic)
            .send()
            .await
            .map_err(|e| BridgeError::Topic {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        let arn = output.topic_arn().ok_or_else(|| BridgeError::Topic {
            topic: topic.to_string(),
            reason: "no topic ARN returned".to_string(),
        })?;

        info!("SNS topic resolved: {} -> {}", topic, arn);
        self.topics
            .write()
            .await
            .insert(topic.to_string(), arn.to_string());
        Ok(arn.to_string())
    }
}

#[async_trait]
impl NybusBridge for SnsNybusBridge {
    fn name(&self) -> String {
        "sns".to_string()
    }

    async fn send(&self, message: BridgeMessage) -> Result<(), BridgeError> {
        let topic = topic_name(&self.options.topic_prefix, &message.message_type);
        let arn = self.topic_arn(&topic).await?;
        let body = serde_json::to_string(&message)?;

        self.client
            .publish()
            .topic_arn(&arn)
            .subject(&message.message_type)
            .message(body)
            .send()
            .await
            .map_err(|e| BridgeError::Publish {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            "Bridged {} ({}) to {}",
            message.message_type, message.message_id, arn
        );
        Ok(())
    }
}
