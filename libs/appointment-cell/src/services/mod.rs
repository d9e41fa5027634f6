pub mod booking;
pub mod conflict;
pub mod lifecycle;
pub mod locks;
pub mod notification;
pub mod sweep;

pub use booking::BookingOrchestrator;
pub use conflict::ConflictIndex;
pub use lifecycle::AppointmentLifecycle;
pub use locks::{ExpertLocks, SchedulingLease, SchedulingLock, SupabaseSchedulingLocks};
pub use notification::{
    notify_in_background, AppointmentEvent, LoggingNotifier, NotificationDispatcher, WebhookNotifier,
};
pub use sweep::{ExpirySweeper, SweepReport};
