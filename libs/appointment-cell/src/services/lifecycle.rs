// libs/appointment-cell/src/services/lifecycle.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Actor, Appointment, AppointmentError, AppointmentStatus, CancelledBy, LifecycleAction};
use crate::repository::AppointmentRepository;
use crate::services::notification::{notify_in_background, NotificationDispatcher};

/// The appointment state machine. Every status change after booking goes through here.
pub struct AppointmentLifecycle {
    appointments: Arc<dyn AppointmentRepository>,
    notifier: Arc<dyn NotificationDispatcher>,
    cancellation_window: Duration,
}

impl AppointmentLifecycle {
    pub fn new(
        appointments: Arc<dyn AppointmentRepository>,
        notifier: Arc<dyn NotificationDispatcher>,
        cancellation_window: Duration,
    ) -> Self {
        Self {
            appointments,
            notifier,
            cancellation_window,
        }
    }

    pub fn cancellation_window(&self) -> Duration {
        self.cancellation_window
    }

    /// Statuses from which `action` is allowed, before any time rule.
    pub fn valid_sources(action: LifecycleAction) -> &'static [AppointmentStatus] {
        match action {
            LifecycleAction::Confirm | LifecycleAction::Reject | LifecycleAction::Expire => {
                &[AppointmentStatus::Pending]
            }
            LifecycleAction::Cancel => &[AppointmentStatus::Pending, AppointmentStatus::Confirmed],
            LifecycleAction::Complete => &[AppointmentStatus::Confirmed],
        }
    }

    pub fn can_be_cancelled(&self, appointment: &Appointment, now: DateTime<Utc>) -> bool {
        appointment.can_be_cancelled(now, self.cancellation_window)
    }

    /// Computes the result of `action` without persisting it.
    pub fn apply(
        &self,
        appointment: &Appointment,
        action: LifecycleAction,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let cancelled_by = Self::authorize(appointment, action, actor)?;

        if !Self::valid_sources(action).contains(&appointment.status) {
            warn!(
                "Rejected {} on appointment {} in status {}",
                action, appointment.id, appointment.status
            );
            return Err(AppointmentError::InvalidTransition {
                action,
                status: appointment.status,
            });
        }

        match action {
            LifecycleAction::Cancel if !self.can_be_cancelled(appointment, now) => {
                return Err(AppointmentError::CancellationWindow {
                    hours: self.cancellation_window.num_hours(),
                });
            }
            LifecycleAction::Complete if now < appointment.start_time => {
                return Err(AppointmentError::InvalidTransition {
                    action,
                    status: appointment.status,
                });
            }
            LifecycleAction::Expire if now <= appointment.start_time => {
                return Err(AppointmentError::InvalidTransition {
                    action,
                    status: appointment.status,
                });
            }
            _ => {}
        }

        let mut updated = appointment.clone();
        updated.status = action.target_status();
        updated.updated_at = now;
        if action == LifecycleAction::Cancel {
            updated.cancelled_by = cancelled_by;
            updated.cancellation_reason = reason;
        }
        Ok(updated)
    }

    /// Loads, transitions and persists with a compare-and-swap on the previous status.
    pub async fn transition(
        &self,
        appointment_id: Uuid,
        action: LifecycleAction,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let current = self
            .appointments
            .find_by_id(appointment_id)
            .await?
            .ok_or(AppointmentError::AppointmentNotFound(appointment_id))?;

        self.transition_loaded(&current, action, actor, reason, now).await
    }

    /// Like [`transition`](Self::transition) for an appointment the caller already loaded.
    pub async fn transition_loaded(
        &self,
        current: &Appointment,
        action: LifecycleAction,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let updated = self.apply(current, action, actor, reason, now)?;

        if !self.appointments.compare_and_set_status(current.status, &updated).await? {
            // Someone else moved it first; report against what is stored now.
            let status = self
                .appointments
                .find_by_id(current.id)
                .await?
                .map(|fresh| fresh.status)
                .unwrap_or(current.status);
            debug!("Lost status race on appointment {} (now {})", current.id, status);
            return Err(AppointmentError::InvalidTransition { action, status });
        }

        info!(
            "Appointment {} {} -> {} by {}",
            updated.id, current.status, updated.status, actor
        );
        notify_in_background(self.notifier.clone(), action.into(), updated.clone());
        Ok(updated)
    }

    pub async fn confirm(&self, id: Uuid, actor: Actor, now: DateTime<Utc>) -> Result<Appointment, AppointmentError> {
        self.transition(id, LifecycleAction::Confirm, actor, None, now).await
    }

    pub async fn reject(&self, id: Uuid, actor: Actor, now: DateTime<Utc>) -> Result<Appointment, AppointmentError> {
        self.transition(id, LifecycleAction::Reject, actor, None, now).await
    }

    pub async fn cancel(
        &self,
        id: Uuid,
        actor: Actor,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        self.transition(id, LifecycleAction::Cancel, actor, reason, now).await
    }

    pub async fn complete(&self, id: Uuid, actor: Actor, now: DateTime<Utc>) -> Result<Appointment, AppointmentError> {
        self.transition(id, LifecycleAction::Complete, actor, None, now).await
    }

    pub async fn expire(&self, id: Uuid, now: DateTime<Utc>) -> Result<Appointment, AppointmentError> {
        self.transition(id, LifecycleAction::Expire, Actor::System, None, now).await
    }

    /// Returns who is cancelling when `action` is a cancel.
    fn authorize(
        appointment: &Appointment,
        action: LifecycleAction,
        actor: Actor,
    ) -> Result<Option<CancelledBy>, AppointmentError> {
        let is_expert = matches!(actor, Actor::Expert(id) if id == appointment.expert_id);
        let is_requester = matches!(actor, Actor::Requester(id) if id == appointment.requester_id);

        let allowed = match action {
            LifecycleAction::Confirm | LifecycleAction::Reject | LifecycleAction::Complete => {
                is_expert || actor == Actor::Admin
            }
            LifecycleAction::Cancel => is_expert || is_requester || actor == Actor::Admin,
            LifecycleAction::Expire => actor == Actor::System,
        };

        if !allowed {
            return Err(AppointmentError::NotPermitted(format!(
                "{} may not {} appointment {}",
                actor, action, appointment.id
            )));
        }

        Ok(match (action, actor) {
            (LifecycleAction::Cancel, Actor::Requester(_)) => Some(CancelledBy::Requester),
            (LifecycleAction::Cancel, Actor::Expert(_)) => Some(CancelledBy::Expert),
            (LifecycleAction::Cancel, Actor::Admin) => Some(CancelledBy::Admin),
            _ => None,
        })
    }
}
