// libs/appointment-cell/src/models.rs
use std::fmt;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_config::{AppConfig, CANCELLATION_WINDOW_HOURS_RANGE};
use shared_database::RepositoryError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub expert_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub status: AppointmentStatus,
    pub payment_state: PaymentState,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// A freshly booked appointment: pending, with payment pending.
    pub fn new(
        requester_id: Uuid,
        expert_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester_id,
            expert_id,
            start_time,
            duration_minutes,
            status: AppointmentStatus::Pending,
            payment_state: PaymentState::Pending,
            cancellation_reason: None,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::minutes(self.duration_minutes)
    }

    /// Whether this appointment blocks the expert's calendar.
    pub fn occupies_calendar(&self) -> bool {
        self.status.is_active()
    }

    /// Half-open interval overlap against `[start, end)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && self.end_time() > start
    }

    /// Requires more than `window` of lead time; exactly `window` is too late.
    pub fn can_be_cancelled(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.status.is_active() && self.start_time - now > window
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Rejected,
    Expired,
}

impl AppointmentStatus {
    /// Pending and confirmed appointments occupy calendar time.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Rejected => write!(f, "rejected"),
            AppointmentStatus::Expired => write!(f, "expired"),
        }
    }
}

/// Owned by the payment service; booking only sets the initial value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Completed,
    Refunded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Requester,
    Expert,
    Admin,
}

// ==============================================================================
// LIFECYCLE MODELS
// ==============================================================================

/// Who is asking for a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Requester(Uuid),
    Expert(Uuid),
    Admin,
    /// Background jobs such as the expiry sweep.
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Requester(id) => write!(f, "requester {}", id),
            Actor::Expert(id) => write!(f, "expert {}", id),
            Actor::Admin => write!(f, "admin"),
            Actor::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Confirm,
    Reject,
    Cancel,
    Complete,
    Expire,
}

impl LifecycleAction {
    pub fn target_status(&self) -> AppointmentStatus {
        match self {
            LifecycleAction::Confirm => AppointmentStatus::Confirmed,
            LifecycleAction::Reject => AppointmentStatus::Rejected,
            LifecycleAction::Cancel => AppointmentStatus::Cancelled,
            LifecycleAction::Complete => AppointmentStatus::Completed,
            LifecycleAction::Expire => AppointmentStatus::Expired,
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleAction::Confirm => write!(f, "confirm"),
            LifecycleAction::Reject => write!(f, "reject"),
            LifecycleAction::Cancel => write!(f, "cancel"),
            LifecycleAction::Complete => write!(f, "complete"),
            LifecycleAction::Expire => write!(f, "expire"),
        }
    }
}

// ==============================================================================
// BOOKING POLICY
// ==============================================================================

#[derive(Debug, Clone)]
pub struct BookingRules {
    pub min_duration_minutes: i64,
    pub max_duration_minutes: i64,
    pub cancellation_window: Duration,
    pub max_attempts: u32,
    pub lock_timeout: StdDuration,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            min_duration_minutes: 15,
            max_duration_minutes: 240,
            cancellation_window: Duration::hours(24),
            max_attempts: 3,
            lock_timeout: StdDuration::from_secs(5),
        }
    }
}

impl BookingRules {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cancellation_window: Duration::hours(
                config
                    .cancellation_window_hours
                    .clamp(*CANCELLATION_WINDOW_HOURS_RANGE.start(), *CANCELLATION_WINDOW_HOURS_RANGE.end()),
            ),
            max_attempts: config.booking_max_attempts.max(1),
            lock_timeout: StdDuration::from_millis(config.booking_lock_timeout_ms),
            ..Self::default()
        }
    }

    pub fn accepts_duration(&self, duration_minutes: i64) -> bool {
        (self.min_duration_minutes..=self.max_duration_minutes).contains(&duration_minutes)
    }
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    #[serde(alias = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(alias = "durationMinutes")]
    pub duration_minutes: i64,
    /// Admins may book on behalf of a requester.
    #[serde(default, alias = "requesterId")]
    pub requester_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotQuery {
    pub date: NaiveDate,
    pub duration: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentRangeQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// An appointment together with the values derived from it at response time.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentView {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub end_time: DateTime<Utc>,
    pub can_be_cancelled: bool,
}

impl AppointmentView {
    pub fn new(appointment: Appointment, now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            end_time: appointment.end_time(),
            can_be_cancelled: appointment.can_be_cancelled(now, window),
            appointment,
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppointmentError {
    #[error("Duration of {minutes} minutes is outside {min}-{max} minutes")]
    InvalidDuration { minutes: i64, min: i64, max: i64 },

    #[error("Start time {0} is not in the future")]
    StartInPast(DateTime<Utc>),

    #[error("Expert {0} is not available at the requested time")]
    ExpertUnavailable(Uuid),

    #[error("Expert {expert_id} already has an appointment overlapping {start}-{end}")]
    SlotConflict {
        expert_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Cannot {action} an appointment that is {status}")]
    InvalidTransition {
        action: LifecycleAction,
        status: AppointmentStatus,
    },

    #[error("Appointments can only be cancelled more than {hours} hours before they start")]
    CancellationWindow { hours: i64 },

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("Expert {0} not found")]
    ExpertNotFound(Uuid),

    #[error("Appointment {0} not found")]
    AppointmentNotFound(Uuid),

    #[error("Timed out waiting for the booking lock of expert {0}")]
    LockTimeout(Uuid),

    #[error("Booking is temporarily unavailable: {0}")]
    BookingUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] RepositoryError),
}

impl AppointmentError {
    /// Failures worth re-running the whole booking attempt for.
    pub fn is_transient(&self) -> bool {
        match self {
            AppointmentError::LockTimeout(_) => true,
            AppointmentError::Storage(err) => err.is_transient(),
            _ => false,
        }
    }
}
