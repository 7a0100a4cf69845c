//! Telemetry Ingestion Service
//!
//! Consumes raw sensor readings from a message queue, validates them into
//! typed documents, raises hazard alerts and persists every accepted
//! reading.
//!
//! ## Features
//!
//! - **Strict Decoding**: Positional JSON readings are checked element by
//!   element; malformed payloads are rejected with the offending path
//! - **Hazard Evaluation**: One prioritized alert per reading from sensor
//!   flags and configurable thresholds
//! - **Best-Effort Notifications**: Alerts trigger an HTTP event; delivery
//!   failures never block persistence
//! - **Idempotent Persistence**: Documents are upserted by id in PostgreSQL
//! - **Explicit Acknowledgment**: At-least-once or at-most-once handling with
//!   an optional dead-letter topic for unreadable payloads
//!
//! ## Architecture
//!
//! ```text
//! Kafka Topic            Pipeline                       PostgreSQL
//! ┌──────────────┐      ┌──────────────┐               ┌──────────────────┐
//! │ sensor-data  │─────▶│ Codec        │               │ sensor_documents │
//! │ queue        │      └──────────────┘               └──────────────────┘
//! └──────────────┘             │                                ▲
//!        ▲                     ▼                                │
//!        │              ┌──────────────┐                        │
//!        │ ack /        │ Document     │                        │
//!        │ release      │ Builder      │                        │
//!        │              └──────────────┘                        │
//!        │                     │                                │
//!        │                     ▼                                │
//!        │              ┌──────────────┐      ┌──────────────┐  │
//!        │              │ Alert        │─────▶│ Notifier     │  │
//!        │              │ Evaluator    │      │ (HTTP)       │  │
//!        │              └──────────────┘      └──────────────┘  │
//!        │                     │                                │
//!        │                     ▼                                │
//!        │              ┌──────────────┐                        │
//!        └──────────────│ Document     │────────────────────────┘
//!                       │ Store        │
//!                       └──────────────┘
//! ```

pub mod alert;
pub mod api;
pub mod codec;
pub mod config;
pub mod document;
pub mod error;
pub mod notifier;
pub mod pipeline;
pub mod queue;
pub mod store;

pub use alert::{AlertCondition, AlertEvaluator, AlertEvaluatorBuilder};
pub use api::{start_api_server, AppState};
pub use codec::RawReading;
pub use config::{AckPolicy, Config};
pub use document::{
    message_document_id, Axes, DocumentBuilder, GeoPoint, IdStrategy, SensorDocument,
};
pub use error::{BuildError, DecodeError, DispatchError, PersistError, PipelineError, QueueError};
pub use notifier::{DisabledNotifier, DispatchResult, HttpNotifier, Notifier};
pub use pipeline::{Disposition, IngestionPipeline, Outcome, Stage};
pub use queue::{KafkaQueue, MessageQueue, QueuedMessage};
pub use store::{DocumentStore, PgDocumentStore};
