// libs/appointment-cell/src/services/notification.rs
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::models::{Appointment, LifecycleAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentEvent {
    Booked,
    Confirmed,
    Rejected,
    Cancelled,
    Completed,
    Expired,
}

impl From<LifecycleAction> for AppointmentEvent {
    fn from(action: LifecycleAction) -> Self {
        match action {
            LifecycleAction::Confirm => AppointmentEvent::Confirmed,
            LifecycleAction::Reject => AppointmentEvent::Rejected,
            LifecycleAction::Cancel => AppointmentEvent::Cancelled,
            LifecycleAction::Complete => AppointmentEvent::Completed,
            LifecycleAction::Expire => AppointmentEvent::Expired,
        }
    }
}

/// Delivers booking and lifecycle events to participants.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, event: AppointmentEvent, appointment: &Appointment) -> Result<()>;
}

/// Fire-and-forget delivery; a failure is logged and never reaches the caller.
pub fn notify_in_background(
    dispatcher: Arc<dyn NotificationDispatcher>,
    event: AppointmentEvent,
    appointment: Appointment,
) {
    tokio::spawn(async move {
        if let Err(e) = dispatcher.dispatch(event, &appointment).await {
            warn!("Failed to deliver {:?} notification for appointment {}: {}", event, appointment.id, e);
        }
    });
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl NotificationDispatcher for LoggingNotifier {
    async fn dispatch(&self, event: AppointmentEvent, appointment: &Appointment) -> Result<()> {
        info!(
            "Appointment {} {:?} (expert {}, requester {}, starts {})",
            appointment.id, event, appointment.expert_id, appointment.requester_id, appointment.start_time
        );
        Ok(())
    }
}

/// POSTs `{event, appointment, occurred_at}` as JSON to a configured URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotifier {
    async fn dispatch(&self, event: AppointmentEvent, appointment: &Appointment) -> Result<()> {
        debug!("Posting {:?} for appointment {} to {}", event, appointment.id, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "event": event,
                "appointment": appointment,
                "occurred_at": Utc::now(),
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("webhook responded with {}", response.status()));
        }
        Ok(())
    }
}
