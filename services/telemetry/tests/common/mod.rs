#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use telemetry_service::config::{AckPolicy, NotificationConfig, PipelineConfig};
use telemetry_service::{
    AlertCondition, AlertEvaluator, DispatchResult, DocumentStore, IdStrategy, IngestionPipeline,
    MessageQueue, Notifier, PersistError, QueueError, QueuedMessage, SensorDocument,
};
use uuid::Uuid;

pub const TOPIC: &str = "sensor-data-queue";

/// Reading with the flame flag set and nothing else out of range
pub const FLAME_READING: &str =
    "[[28.7041, 77.1025, 200], [25.0, 50.0], 1, 0, 0, 0, [0.1, 0.2, 1.0, 0, 0, 0]]";

/// Reading that raises no alert
pub const QUIET_READING: &str =
    "[[28.7041, 77.1025, 200], [25.0, 50.0], 0, 0, 0, 0, [0.1, 0.2, 1.0, 0, 0, 0]]";

/// Single-partition queue kept in memory.
///
/// Released messages return to the front, like a seek back to their offset.
#[derive(Default)]
pub struct InMemoryQueue {
    pending: Mutex<VecDeque<QueuedMessage>>,
    deleted: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
    dead_letters: Mutex<Vec<(String, String)>>,
    dead_letter_enabled: bool,
    failing_deletes: AtomicBool,
    next_offset: AtomicUsize,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dead_letter() -> Self {
        Self {
            dead_letter_enabled: true,
            ..Self::default()
        }
    }

    pub fn push(&self, payload: &str) -> QueuedMessage {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst) as i64;
        let message = QueuedMessage::new(TOPIC, 0, offset, payload.as_bytes().to_vec());
        self.pending.lock().unwrap().push_back(message.clone());
        message
    }

    /// Make every `delete` fail until switched back
    pub fn set_delete_failing(&self, failing: bool) {
        self.failing_deletes.store(failing, Ordering::SeqCst);
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }

    pub fn dead_letters(&self) -> Vec<(String, String)> {
        self.dead_letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn receive(&self) -> Result<Option<QueuedMessage>, QueueError> {
        Ok(self.pending.lock().unwrap().pop_front())
    }

    async fn delete(&self, message: &QueuedMessage) -> Result<(), QueueError> {
        if self.failing_deletes.load(Ordering::SeqCst) {
            return Err(QueueError::Acknowledge {
                message_id: message.id(),
                reason: "commit rejected".to_string(),
            });
        }
        self.deleted.lock().unwrap().push(message.id());
        Ok(())
    }

    async fn release(&self, message: &QueuedMessage) -> Result<(), QueueError> {
        self.released.lock().unwrap().push(message.id());
        self.pending.lock().unwrap().push_front(message.clone());
        Ok(())
    }

    async fn dead_letter(
        &self,
        message: &QueuedMessage,
        stage: &str,
        _reason: &str,
    ) -> Result<bool, QueueError> {
        if !self.dead_letter_enabled {
            return Ok(false);
        }
        self.dead_letters
            .lock()
            .unwrap()
            .push((message.id(), stage.to_string()));
        Ok(true)
    }
}

/// Document store keyed by id, with switchable write failures
#[derive(Default)]
pub struct InMemoryStore {
    documents: Mutex<HashMap<Uuid, (SensorDocument, AlertCondition)>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: Uuid) -> Option<(SensorDocument, AlertCondition)> {
        self.documents.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn upsert(
        &self,
        document: &SensorDocument,
        alert: AlertCondition,
    ) -> Result<(), PersistError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistError::Timeout(Duration::from_millis(10)));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.documents
            .lock()
            .unwrap()
            .insert(document.id, (document.clone(), alert));
        Ok(())
    }
}

/// Notifier that records every condition it was asked to send
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<AlertCondition>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<AlertCondition> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn dispatch(&self, condition: AlertCondition) -> DispatchResult {
        if !condition.is_alert() {
            return DispatchResult::Skipped;
        }
        self.sent.lock().unwrap().push(condition);
        if self.failing {
            DispatchResult::Failed {
                reason: "connection refused".to_string(),
            }
        } else {
            DispatchResult::Delivered { status: 201 }
        }
    }
}

pub fn pipeline_config(ack_policy: AckPolicy, id_strategy: IdStrategy) -> PipelineConfig {
    PipelineConfig {
        ack_policy,
        id_strategy,
        redelivery_delay_ms: 1,
        idle_backoff_ms: 1,
    }
}

pub fn build_pipeline(
    queue: Arc<InMemoryQueue>,
    store: Arc<InMemoryStore>,
    notifier: Arc<dyn Notifier>,
    config: PipelineConfig,
) -> IngestionPipeline {
    IngestionPipeline::new(queue, store, notifier, AlertEvaluator::default(), config)
}

/// Notification settings pointing at a test server
pub fn notification_config(endpoint: String) -> NotificationConfig {
    NotificationConfig {
        enabled: true,
        endpoint,
        api_key: Some("test-api-key".to_string()),
        recipient_email: Some("ops@example.com".to_string()),
        timeout_ms: 2000,
        ..Default::default()
    }
}
