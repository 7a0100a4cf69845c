use crate::config::KafkaConfig;
use crate::error::QueueError;
use async_trait::async_trait;
use chrono::Utc;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Where a message sits in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMetadata {
    /// Topic the message was received from
    pub topic: String,
    /// Partition the message was received from
    pub partition: i32,
    /// Offset of the message in the partition
    pub offset: i64,
    /// Broker timestamp in milliseconds, when present
    pub timestamp: Option<i64>,
}

/// A received message with payload and metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Raw message payload
    pub payload: Vec<u8>,
    /// Message metadata
    pub metadata: MessageMetadata,
}

impl QueuedMessage {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Vec<u8>) -> Self {
        Self {
            payload,
            metadata: MessageMetadata {
                topic: topic.into(),
                partition,
                offset,
                timestamp: None,
            },
        }
    }

    /// Stable identity of this message: `topic/partition/offset`
    pub fn id(&self) -> String {
        format!(
            "{}/{}/{}",
            self.metadata.topic, self.metadata.partition, self.metadata.offset
        )
    }

    /// Payload as text for logs, lossy and capped at `limit` bytes
    pub fn payload_preview(&self, limit: usize) -> String {
        let end = self.payload.len().min(limit);
        let mut preview = String::from_utf8_lossy(&self.payload[..end]).into_owned();
        if self.payload.len() > limit {
            preview.push_str("...");
        }
        preview
    }
}

/// Queue operations the pipeline depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Fetch at most one message; `None` when nothing arrived in time
    async fn receive(&self) -> Result<Option<QueuedMessage>, QueueError>;

    /// Remove the message from the queue for good
    async fn delete(&self, message: &QueuedMessage) -> Result<(), QueueError>;

    /// Leave the message on the queue so it is delivered again
    async fn release(&self, message: &QueuedMessage) -> Result<(), QueueError>;

    /// Park an unprocessable message; `false` when no dead-letter sink exists
    async fn dead_letter(
        &self,
        message: &QueuedMessage,
        stage: &str,
        reason: &str,
    ) -> Result<bool, QueueError>;
}

/// Kafka-backed message queue.
///
/// Offsets are never auto-committed. `delete` commits past the message,
/// `release` seeks the partition back onto it so the next `receive`
/// returns it again.
pub struct KafkaQueue {
    consumer: StreamConsumer,
    dead_letter: Option<(FutureProducer, String)>,
    poll_timeout: Duration,
    commit_timeout: Duration,
}

impl KafkaQueue {
    /// Create a consumer subscribed to the readings topic
    pub fn new(config: &KafkaConfig) -> Result<Self, QueueError> {
        let mut consumer_config = base_client_config(config);
        consumer_config
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string());

        let consumer: StreamConsumer = consumer_config
            .create()
            .map_err(|e| QueueError::Creation(e.to_string()))?;

        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| QueueError::Creation(e.to_string()))?;

        info!(
            topic = %config.topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        let dead_letter = match config.dead_letter_topic {
            Some(ref topic) => {
                let producer: FutureProducer = base_client_config(config)
                    .set("message.timeout.ms", config.commit_timeout_ms.to_string())
                    .create()
                    .map_err(|e| QueueError::Creation(e.to_string()))?;
                info!(topic = %topic, "Dead-letter topic enabled");
                Some((producer, topic.clone()))
            }
            None => None,
        };

        Ok(Self {
            consumer,
            dead_letter,
            poll_timeout: config.poll_timeout(),
            commit_timeout: config.commit_timeout(),
        })
    }

    fn convert_message(message: &BorrowedMessage<'_>) -> QueuedMessage {
        QueuedMessage {
            payload: message.payload().unwrap_or(&[]).to_vec(),
            metadata: MessageMetadata {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                timestamp: message.timestamp().to_millis(),
            },
        }
    }
}

#[async_trait]
impl MessageQueue for KafkaQueue {
    async fn receive(&self) -> Result<Option<QueuedMessage>, QueueError> {
        match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(QueueError::Receive(e.to_string())),
            Ok(Ok(message)) => {
                let message = Self::convert_message(&message);
                debug!(message_id = %message.id(), "Received message");
                Ok(Some(message))
            }
        }
    }

    #[instrument(skip(self, message), fields(message_id = %message.id()))]
    async fn delete(&self, message: &QueuedMessage) -> Result<(), QueueError> {
        let ack_error = |reason: String| QueueError::Acknowledge {
            message_id: message.id(),
            reason,
        };

        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &message.metadata.topic,
                message.metadata.partition,
                Offset::Offset(message.metadata.offset + 1),
            )
            .map_err(|e| ack_error(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| ack_error(e.to_string()))
    }

    #[instrument(skip(self, message), fields(message_id = %message.id()))]
    async fn release(&self, message: &QueuedMessage) -> Result<(), QueueError> {
        self.consumer
            .seek(
                &message.metadata.topic,
                message.metadata.partition,
                Offset::Offset(message.metadata.offset),
                self.commit_timeout,
            )
            .map_err(|e| QueueError::Release {
                message_id: message.id(),
                reason: e.to_string(),
            })
    }

    #[instrument(skip(self, message, reason), fields(message_id = %message.id()))]
    async fn dead_letter(
        &self,
        message: &QueuedMessage,
        stage: &str,
        reason: &str,
    ) -> Result<bool, QueueError> {
        let Some((ref producer, ref topic)) = self.dead_letter else {
            return Ok(false);
        };

        let key = message.id();
        let body = dead_letter_envelope(message, stage, reason).to_string();
        let record = FutureRecord::to(topic.as_str())
            .key(key.as_str())
            .payload(body.as_str());

        producer
            .send(record, Timeout::After(self.commit_timeout))
            .await
            .map_err(|(e, _)| QueueError::DeadLetter {
                message_id: key.clone(),
                reason: e.to_string(),
            })?;

        warn!(topic = %topic, stage = stage, "Message dead-lettered");
        metrics::counter!("telemetry.messages.dead_lettered").increment(1);

        Ok(true)
    }
}

/// JSON record written to the dead-letter topic
pub fn dead_letter_envelope(message: &QueuedMessage, stage: &str, reason: &str) -> serde_json::Value {
    serde_json::json!({
        "original_topic": message.metadata.topic,
        "partition": message.metadata.partition,
        "offset": message.metadata.offset,
        "payload": String::from_utf8_lossy(&message.payload),
        "stage": stage,
        "error": reason,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Connection and security settings shared by consumer and producer
fn base_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &config.bootstrap_servers);

    // Configure SSL if enabled
    if config.ssl_enabled {
        client_config.set("security.protocol", "SASL_SSL");
        if let Some(ref ca_location) = config.ssl_ca_location {
            client_config.set("ssl.ca.location", ca_location);
        }
    }

    // Configure SASL if credentials provided
    if let (Some(ref username), Some(ref password)) = (&config.sasl_username, &config.sasl_password)
    {
        client_config
            .set("sasl.mechanisms", "PLAIN")
            .set("sasl.username", username)
            .set("sasl.password", password);
    }

    client_config
}
