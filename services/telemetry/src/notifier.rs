//! Best-effort alert notifications.
//!
//! One HTTP event is sent per alerting document. Failures are logged and
//! reported as [`DispatchResult::Failed`]; they never reach the caller as
//! errors, so a notification outage cannot block persistence or
//! acknowledgment.

use crate::alert::AlertCondition;
use crate::config::NotificationConfig;
use crate::error::DispatchError;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Outcome of a single dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// Nothing to send
    Skipped,
    /// The service accepted the event
    Delivered { status: u16 },
    /// Transport or service failure, already logged
    Failed { reason: String },
}

/// Sends one notification for an alert condition
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, condition: AlertCondition) -> DispatchResult;
}

/// Event trigger request body
#[derive(Debug, Serialize)]
struct TriggerEvent<'a> {
    name: &'a str,
    to: Recipient<'a>,
    payload: AlertPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Recipient<'a> {
    subscriber_id: String,
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct AlertPayload {
    #[serde(rename = "Message")]
    message: String,
}

/// Notifier that triggers a workflow on an HTTP event API
pub struct HttpNotifier {
    client: Client,
    endpoint: String,
    api_key: String,
    workflow: String,
    recipient_email: String,
    subscriber_id: Option<String>,
}

impl HttpNotifier {
    /// Create a notifier from configuration
    pub fn new(config: &NotificationConfig) -> Result<Self, DispatchError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or(DispatchError::NotConfigured("api_key"))?;
        let recipient_email = config
            .recipient_email
            .clone()
            .ok_or(DispatchError::NotConfigured("recipient_email"))?;

        let client = Client::builder().timeout(config.timeout()).build()?;

        info!(
            endpoint = %config.endpoint,
            workflow = %config.workflow,
            "HTTP notifier initialized"
        );

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            workflow: config.workflow.clone(),
            recipient_email,
            subscriber_id: config.subscriber_id.clone(),
        })
    }

    fn event_for(&self, condition: AlertCondition) -> TriggerEvent<'_> {
        // Without a configured subscriber every alert gets a throwaway id
        let subscriber_id = self
            .subscriber_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        TriggerEvent {
            name: &self.workflow,
            to: Recipient {
                subscriber_id,
                email: &self.recipient_email,
            },
            payload: AlertPayload {
                message: format!("Alert for {}", condition.label()),
            },
        }
    }

    async fn send(&self, condition: AlertCondition) -> Result<u16, DispatchError> {
        let event = self.event_for(condition);

        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("ApiKey {}", self.api_key))
            .header(ACCEPT, "application/json")
            .json(&event)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(status.as_u16())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[instrument(skip(self), fields(condition = %condition))]
    async fn dispatch(&self, condition: AlertCondition) -> DispatchResult {
        if !condition.is_alert() {
            return DispatchResult::Skipped;
        }

        match self.send(condition).await {
            Ok(status) => {
                debug!(status = status, "Notification delivered");
                DispatchResult::Delivered { status }
            }
            Err(e) => {
                warn!(error = %e, "Failed to send notification");
                metrics::counter!("telemetry.notifications.failed").increment(1);
                DispatchResult::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Notifier used when notifications are turned off
#[derive(Debug, Default)]
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn dispatch(&self, condition: AlertCondition) -> DispatchResult {
        if condition.is_alert() {
            debug!(condition = %condition, "Notifications disabled, not sending");
        }
        DispatchResult::Skipped
    }
}
