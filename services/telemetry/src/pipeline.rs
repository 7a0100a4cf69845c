//! Per-message ingestion pipeline.
//!
//! Each message moves through
//! `Received -> Decoded -> Built -> Evaluated -> Notified -> Persisted -> Done`
//! or stops as [`Outcome::Abandoned`]. Notification failures never stop a
//! message; decode, build and persist failures always do.
//!
//! When a message leaves the queue depends on [`AckPolicy`]:
//! - `AckAfterPersist`: deleted only after the upsert succeeded; failed
//!   messages are released for redelivery.
//! - `DeleteBeforeProcess`: deleted on receipt; a later failure loses the
//!   reading.
//!
//! Unreadable payloads go to the dead-letter sink when one exists, under
//! either policy.

use crate::alert::{AlertCondition, AlertEvaluator};
use crate::codec;
use crate::config::{AckPolicy, PipelineConfig};
use crate::document::DocumentBuilder;
use crate::error::{PipelineError, QueueError};
use crate::notifier::{DispatchResult, Notifier};
use crate::queue::{MessageQueue, QueuedMessage};
use crate::store::DocumentStore;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Bytes of payload included in failure logs
const PAYLOAD_LOG_LIMIT: usize = 512;

/// Furthest point a message reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Decoded,
    Built,
    Evaluated,
    Notified,
    Persisted,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Decoded => "decoded",
            Stage::Built => "built",
            Stage::Evaluated => "evaluated",
            Stage::Notified => "notified",
            Stage::Persisted => "persisted",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to an abandoned message on the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Removed; the reading is gone
    Deleted,
    /// Still on the queue and will be delivered again
    Retained,
    /// Parked on the dead-letter sink and removed
    DeadLettered,
}

/// Result of handling one message
#[derive(Debug)]
pub enum Outcome {
    Done {
        document_id: Uuid,
        alert: AlertCondition,
        dispatch: DispatchResult,
        /// False when the document was stored but the ack failed
        acknowledged: bool,
    },
    Abandoned {
        stage: Stage,
        error: PipelineError,
        disposition: Disposition,
    },
}

impl Outcome {
    pub fn stage(&self) -> Stage {
        match self {
            Outcome::Done { .. } => Stage::Done,
            Outcome::Abandoned { stage, .. } => *stage,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done { .. })
    }
}

/// Values carried out of a successful pass
struct Processed {
    document_id: Uuid,
    alert: AlertCondition,
    dispatch: DispatchResult,
}

/// Orchestrates decode, build, evaluate, notify and persist for queued readings
pub struct IngestionPipeline {
    queue: Arc<dyn MessageQueue>,
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    builder: DocumentBuilder,
    evaluator: AlertEvaluator,
    config: PipelineConfig,
}

impl IngestionPipeline {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        evaluator: AlertEvaluator,
        config: PipelineConfig,
    ) -> Self {
        Self {
            queue,
            store,
            notifier,
            builder: DocumentBuilder::new(config.id_strategy),
            evaluator,
            config,
        }
    }

    /// Consume until `shutdown` fires; the in-flight message always finishes
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(ack_policy = ?self.config.ack_policy, "Starting ingestion pipeline");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping ingestion pipeline");
                    break;
                }
                received = self.queue.receive() => match received {
                    Ok(Some(message)) => {
                        let outcome = self.handle(message).await;
                        if let Outcome::Abandoned { disposition: Disposition::Retained, .. } = outcome {
                            tokio::time::sleep(self.config.redelivery_delay()).await;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "Failed to receive message");
                        tokio::time::sleep(self.config.idle_backoff()).await;
                    }
                }
            }
        }
    }

    /// Receive and handle at most one message
    pub async fn run_once(&self) -> Result<Option<Outcome>, QueueError> {
        match self.queue.receive().await? {
            Some(message) => Ok(Some(self.handle(message).await)),
            None => Ok(None),
        }
    }

    /// Handle one received message, including its acknowledgment
    #[instrument(skip(self, message), fields(message_id = %message.id()))]
    pub async fn handle(&self, message: QueuedMessage) -> Outcome {
        metrics::counter!("telemetry.messages.received").increment(1);

        let deleted_on_receipt = match self.config.ack_policy {
            AckPolicy::DeleteBeforeProcess => {
                if let Err(e) = self.queue.delete(&message).await {
                    let disposition = self.release(&message).await;
                    return self.abandon(&message, Stage::Received, e.into(), disposition);
                }
                true
            }
            AckPolicy::AckAfterPersist => false,
        };

        let mut stage = Stage::Received;
        match self.process(&message, &mut stage).await {
            Ok(processed) => self.complete(&message, processed, deleted_on_receipt).await,
            Err(e) if e.is_poison() => self.reject(&message, stage, e, deleted_on_receipt).await,
            Err(e) => {
                let disposition = if deleted_on_receipt {
                    Disposition::Deleted
                } else {
                    self.release(&message).await
                };
                self.abandon(&message, stage, e, disposition)
            }
        }
    }

    /// Run the message through every stage up to persistence
    async fn process(
        &self,
        message: &QueuedMessage,
        stage: &mut Stage,
    ) -> Result<Processed, PipelineError> {
        let reading = codec::decode(&message.payload)?;
        *stage = Stage::Decoded;

        let document = self.builder.build_for_message(&reading, &message.id())?;
        *stage = Stage::Built;

        let alert = self.evaluator.evaluate(&document);
        *stage = Stage::Evaluated;

        if alert.is_alert() {
            info!(document_id = %document.id, alert = %alert, "Alert condition detected");
            metrics::counter!("telemetry.alerts.raised", "condition" => alert.as_str()).increment(1);
        }

        let dispatch = self.notifier.dispatch(alert).await;
        *stage = Stage::Notified;

        self.store.upsert(&document, alert).await?;
        *stage = Stage::Persisted;

        Ok(Processed {
            document_id: document.id,
            alert,
            dispatch,
        })
    }

    async fn complete(
        &self,
        message: &QueuedMessage,
        processed: Processed,
        deleted_on_receipt: bool,
    ) -> Outcome {
        let acknowledged = deleted_on_receipt
            || match self.queue.delete(message).await {
                Ok(()) => true,
                Err(e) => {
                    // Stored but still queued: it will be redelivered
                    warn!(error = %e, "Document stored but message not acknowledged");
                    false
                }
            };

        metrics::counter!("telemetry.messages.processed").increment(1);
        info!(
            document_id = %processed.document_id,
            alert = %processed.alert,
            dispatch = ?processed.dispatch,
            "Message processed"
        );

        Outcome::Done {
            document_id: processed.document_id,
            alert: processed.alert,
            dispatch: processed.dispatch,
            acknowledged,
        }
    }

    /// Handle a payload that can never succeed
    async fn reject(
        &self,
        message: &QueuedMessage,
        stage: Stage,
        error: PipelineError,
        deleted_on_receipt: bool,
    ) -> Outcome {
        let parked = match self
            .queue
            .dead_letter(message, stage.as_str(), &error.to_string())
            .await
        {
            Ok(parked) => parked,
            Err(e) => {
                error!(error = %e, "Failed to dead-letter message");
                false
            }
        };

        let disposition = match (parked, deleted_on_receipt) {
            (true, true) => Disposition::DeadLettered,
            (true, false) => match self.queue.delete(message).await {
                Ok(()) => Disposition::DeadLettered,
                Err(e) => {
                    warn!(error = %e, "Dead-lettered message not acknowledged");
                    self.release(message).await
                }
            },
            (false, true) => Disposition::Deleted,
            (false, false) => self.release(message).await,
        };

        self.abandon(message, stage, error, disposition)
    }

    async fn release(&self, message: &QueuedMessage) -> Disposition {
        if let Err(e) = self.queue.release(message).await {
            // Uncommitted offsets are redelivered after a rebalance anyway
            warn!(error = %e, "Failed to release message");
        }
        Disposition::Retained
    }

    fn abandon(
        &self,
        message: &QueuedMessage,
        stage: Stage,
        error: PipelineError,
        disposition: Disposition,
    ) -> Outcome {
        metrics::counter!("telemetry.messages.abandoned", "stage" => stage.as_str()).increment(1);

        if error.is_poison() {
            warn!(
                stage = %stage,
                error = %error,
                disposition = ?disposition,
                payload = %message.payload_preview(PAYLOAD_LOG_LIMIT),
                "Rejected malformed reading"
            );
        } else if disposition == Disposition::Deleted {
            error!(
                stage = %stage,
                error = %error,
                payload = %message.payload_preview(PAYLOAD_LOG_LIMIT),
                "Message abandoned after deletion, reading lost"
            );
        } else {
            error!(
                stage = %stage,
                error = %error,
                disposition = ?disposition,
                "Message abandoned"
            );
        }

        debug!(stage = %stage, "Message reached terminal state");

        Outcome::Abandoned {
            stage,
            error,
            disposition,
        }
    }
}
