// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use expert_cell::{AvailabilityCalendar, Expert, ExpertRepository, SlotGenerator};
use shared_database::RepositoryError;

use crate::models::{Appointment, AppointmentError, BookingRules};
use crate::repository::AppointmentRepository;
use crate::services::conflict::ConflictIndex;
use crate::services::locks::{ExpertLocks, SchedulingLock};
use crate::services::notification::{notify_in_background, AppointmentEvent, NotificationDispatcher};

/// The only way an appointment comes into existence.
pub struct BookingOrchestrator {
    experts: Arc<dyn ExpertRepository>,
    appointments: Arc<dyn AppointmentRepository>,
    calendar: AvailabilityCalendar,
    slots: SlotGenerator,
    conflicts: ConflictIndex,
    locks: Arc<dyn SchedulingLock>,
    notifier: Arc<dyn NotificationDispatcher>,
    rules: BookingRules,
}

impl BookingOrchestrator {
    /// Serializes bookings with in-process locks only.
    pub fn new(
        experts: Arc<dyn ExpertRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        notifier: Arc<dyn NotificationDispatcher>,
        rules: BookingRules,
    ) -> Self {
        Self::with_scheduling_lock(experts, appointments, notifier, rules, Arc::new(ExpertLocks::new()))
    }

    pub fn with_scheduling_lock(
        experts: Arc<dyn ExpertRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        notifier: Arc<dyn NotificationDispatcher>,
        rules: BookingRules,
        locks: Arc<dyn SchedulingLock>,
    ) -> Self {
        Self {
            conflicts: ConflictIndex::new(appointments.clone(), rules.max_duration_minutes),
            experts,
            appointments,
            calendar: AvailabilityCalendar::new(),
            slots: SlotGenerator::new(),
            locks,
            notifier,
            rules,
        }
    }

    pub async fn request_booking(
        &self,
        requester_id: Uuid,
        expert_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<Appointment, AppointmentError> {
        self.request_booking_at(requester_id, expert_id, start_time, duration_minutes, Utc::now())
            .await
    }

    /// Validates and books, re-running the whole attempt on transient failures.
    #[instrument(skip(self))]
    pub async fn request_booking_at(
        &self,
        requester_id: Uuid,
        expert_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        self.validate_request(requester_id, expert_id, start_time, duration_minutes, now)?;

        let max_attempts = self.rules.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            debug!("Booking attempt {} for expert {} at {}", attempt, expert_id, start_time);

            match self
                .try_book(requester_id, expert_id, start_time, duration_minutes, now)
                .await
            {
                Ok(appointment) => {
                    info!(
                        "Booked appointment {} for expert {} at {} ({} min)",
                        appointment.id, expert_id, start_time, duration_minutes
                    );
                    notify_in_background(self.notifier.clone(), AppointmentEvent::Booked, appointment.clone());
                    return Ok(appointment);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!("Transient booking failure ({}), retrying attempt {}/{}", e, attempt, max_attempts);
                    tokio::time::sleep(std::time::Duration::from_millis(100 * u64::from(attempt))).await;
                }
                Err(e) if e.is_transient() => {
                    warn!("Booking for expert {} gave up after {} attempts: {}", expert_id, max_attempts, e);
                    return Err(AppointmentError::BookingUnavailable(e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppointmentError::BookingUnavailable(format!(
            "no booking attempt completed for expert {}",
            expert_id
        )))
    }

    fn validate_request(
        &self,
        requester_id: Uuid,
        expert_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        if !self.rules.accepts_duration(duration_minutes) {
            return Err(AppointmentError::InvalidDuration {
                minutes: duration_minutes,
                min: self.rules.min_duration_minutes,
                max: self.rules.max_duration_minutes,
            });
        }
        if requester_id == expert_id {
            return Err(AppointmentError::NotPermitted("experts cannot book themselves".to_string()));
        }
        if start_time <= now {
            return Err(AppointmentError::StartInPast(start_time));
        }
        Ok(())
    }

    /// One attempt: availability, conflict check and insert under the expert's lock.
    async fn try_book(
        &self,
        requester_id: Uuid,
        expert_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let lease = self.locks.acquire(expert_id, self.rules.lock_timeout).await?;
        let booked = self
            .book_locked(requester_id, expert_id, start_time, duration_minutes, now)
            .await;
        self.locks.release(lease).await;
        booked
    }

    async fn book_locked(
        &self,
        requester_id: Uuid,
        expert_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let expert = self.load_expert(expert_id).await?;
        if !self
            .calendar
            .is_within_declared_availability(&expert, start_time, duration_minutes)
        {
            return Err(AppointmentError::ExpertUnavailable(expert_id));
        }

        let end_time = start_time + Duration::minutes(duration_minutes);
        let conflict = || AppointmentError::SlotConflict {
            expert_id,
            start: start_time,
            end: end_time,
        };

        if !self
            .conflicts
            .find_overlapping(expert_id, start_time, end_time)
            .await?
            .is_empty()
        {
            return Err(conflict());
        }

        let appointment = Appointment::new(requester_id, expert_id, start_time, duration_minutes, now);
        match self.appointments.insert(&appointment).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => return Err(conflict()),
            Err(e) => return Err(e.into()),
        }

        // A writer that bypassed this lock may have committed an overlapping row meanwhile.
        let rivals = match self.conflicts.find_overlapping(expert_id, start_time, end_time).await {
            Ok(found) => found,
            Err(e) => {
                self.discard(&appointment).await;
                return Err(e.into());
            }
        };
        if rivals.iter().any(|rival| rival.id != appointment.id) {
            warn!(
                "Appointment {} for expert {} collided with a concurrent booking, rolling back",
                appointment.id, expert_id
            );
            self.discard(&appointment).await;
            return Err(conflict());
        }

        Ok(appointment)
    }

    async fn discard(&self, appointment: &Appointment) {
        match self.appointments.discard_pending(appointment.id).await {
            Ok(true) => debug!("Discarded appointment {}", appointment.id),
            Ok(false) => warn!("Appointment {} was no longer pending when discarded", appointment.id),
            Err(e) => error!("Failed to discard appointment {}: {}", appointment.id, e),
        }
    }

    pub async fn available_slots(
        &self,
        expert_id: Uuid,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> Result<Vec<DateTime<Utc>>, AppointmentError> {
        self.available_slots_at(expert_id, date, duration_minutes, Utc::now()).await
    }

    /// Candidate slots that are still in the future and free. Takes no lock, so
    /// the result may be stale by the time it is used.
    pub async fn available_slots_at(
        &self,
        expert_id: Uuid,
        date: NaiveDate,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, AppointmentError> {
        if !self.rules.accepts_duration(duration_minutes) {
            return Err(AppointmentError::InvalidDuration {
                minutes: duration_minutes,
                min: self.rules.min_duration_minutes,
                max: self.rules.max_duration_minutes,
            });
        }

        let expert = self.load_expert(expert_id).await?;
        let candidates: Vec<DateTime<Utc>> = self
            .slots
            .generate_slots(&expert, date, duration_minutes)
            .into_iter()
            .filter(|start| *start > now)
            .collect();
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let day_start = match date.and_hms_opt(0, 0, 0) {
            Some(midnight) => Utc.from_utc_datetime(&midnight),
            None => return Ok(Vec::new()),
        };
        let day_end = day_start + Duration::days(1);
        let occupied = self.conflicts.occupied_between(expert_id, day_start, day_end).await?;

        Ok(ConflictIndex::filter_available_slots(candidates, duration_minutes, &occupied))
    }

    async fn load_expert(&self, expert_id: Uuid) -> Result<Expert, AppointmentError> {
        self.experts
            .find_by_id(expert_id)
            .await?
            .ok_or(AppointmentError::ExpertNotFound(expert_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Weekday;
    use std::sync::atomic::{AtomicU32, Ordering};

    use expert_cell::{AvailabilitySlotRule, ClockTime, DayOfWeek, InMemoryExpertRepository};

    use crate::models::{AppointmentStatus, PaymentState};
    use crate::repository::InMemoryAppointmentRepository;
    use crate::services::notification::LoggingNotifier;

    fn monday() -> NaiveDate {
        NaiveDate::from_isoywd_opt(2031, 20, Weekday::Mon).unwrap()
    }

    fn monday_at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(&monday().and_hms_opt(hour, minute, 0).unwrap())
    }

    fn now() -> DateTime<Utc> {
        monday_at(0, 0) - Duration::days(3)
    }

    async fn expert_repository(expert_id: Uuid) -> Arc<InMemoryExpertRepository> {
        let experts = Arc::new(InMemoryExpertRepository::new());
        let mut expert = Expert::new(expert_id);
        expert.availability_rules = vec![AvailabilitySlotRule::new(
            DayOfWeek::Monday,
            ClockTime::from_hm(9, 0).unwrap(),
            ClockTime::from_hm(12, 0).unwrap(),
        )];
        experts.insert(&expert).await.unwrap();
        experts
    }

    async fn orchestrator(expert_id: Uuid) -> BookingOrchestrator {
        BookingOrchestrator::new(
            expert_repository(expert_id).await,
            Arc::new(InMemoryAppointmentRepository::new()),
            Arc::new(LoggingNotifier),
            BookingRules::default(),
        )
    }

    #[tokio::test]
    async fn books_pending_appointment_inside_availability() {
        let expert_id = Uuid::new_v4();
        let booking = orchestrator(expert_id).await;
        let requester = Uuid::new_v4();

        let appointment = booking
            .request_booking_at(requester, expert_id, monday_at(10, 0), 60, now())
            .await
            .unwrap();

        assert_eq!(appointment.status, AppointmentStatus::Pending);
        assert_eq!(appointment.payment_state, PaymentState::Pending);
        assert_eq!(appointment.requester_id, requester);
        assert_eq!(appointment.end_time(), monday_at(11, 0));
    }

    #[tokio::test]
    async fn validation_errors_come_first() {
        let expert_id = Uuid::new_v4();
        let booking = orchestrator(expert_id).await;
        let requester = Uuid::new_v4();

        assert_matches!(
            booking.request_booking_at(requester, expert_id, monday_at(10, 0), 10, now()).await,
            Err(AppointmentError::InvalidDuration { minutes: 10, .. })
        );
        assert_matches!(
            booking.request_booking_at(requester, expert_id, monday_at(10, 0), 241, now()).await,
            Err(AppointmentError::InvalidDuration { .. })
        );
        assert_matches!(
            booking
                .request_booking_at(requester, expert_id, monday_at(10, 0), 60, monday_at(10, 0))
                .await,
            Err(AppointmentError::StartInPast(_))
        );
        assert_matches!(
            booking.request_booking_at(expert_id, expert_id, monday_at(10, 0), 60, now()).await,
            Err(AppointmentError::NotPermitted(_))
        );
        assert_matches!(
            booking.request_booking_at(requester, Uuid::new_v4(), monday_at(10, 0), 60, now()).await,
            Err(AppointmentError::ExpertNotFound(_))
        );
    }

    #[tokio::test]
    async fn outside_declared_availability_is_unavailable() {
        let expert_id = Uuid::new_v4();
        let booking = orchestrator(expert_id).await;

        assert_matches!(
            booking
                .request_booking_at(Uuid::new_v4(), expert_id, monday_at(11, 30), 60, now())
                .await,
            Err(AppointmentError::ExpertUnavailable(id)) if id == expert_id
        );
    }

    #[tokio::test]
    async fn overlapping_booking_is_a_conflict() {
        let expert_id = Uuid::new_v4();
        let booking = orchestrator(expert_id).await;

        booking
            .request_booking_at(Uuid::new_v4(), expert_id, monday_at(10, 0), 60, now())
            .await
            .unwrap();

        assert_matches!(
            booking
                .request_booking_at(Uuid::new_v4(), expert_id, monday_at(10, 30), 60, now())
                .await,
            Err(AppointmentError::SlotConflict { .. })
        );
        assert!(booking
            .request_booking_at(Uuid::new_v4(), expert_id, monday_at(11, 0), 60, now())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn slots_exclude_booked_and_past_times() {
        let expert_id = Uuid::new_v4();
        let booking = orchestrator(expert_id).await;

        let all = booking.available_slots_at(expert_id, monday(), 60, now()).await.unwrap();
        assert_eq!(all, vec![monday_at(9, 0), monday_at(10, 0), monday_at(11, 0)]);

        booking
            .request_booking_at(Uuid::new_v4(), expert_id, monday_at(10, 0), 60, now())
            .await
            .unwrap();
        let free = booking.available_slots_at(expert_id, monday(), 60, now()).await.unwrap();
        assert_eq!(free, vec![monday_at(9, 0), monday_at(11, 0)]);

        let later = booking
            .available_slots_at(expert_id, monday(), 60, monday_at(9, 30))
            .await
            .unwrap();
        assert_eq!(later, vec![monday_at(11, 0)]);
    }

    /// Fails `insert` with an outage a fixed number of times before delegating.
    struct FlakyAppointments {
        inner: InMemoryAppointmentRepository,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl AppointmentRepository for FlakyAppointments {
        async fn insert(&self, appointment: &Appointment) -> Result<(), RepositoryError> {
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(RepositoryError::Unavailable("connection reset".into()));
            }
            self.inner.insert(appointment).await
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<Appointment>, RepositoryError> {
            self.inner.find_by_id(id).await
        }

        async fn find_for_expert_between(
            &self,
            expert_id: Uuid,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<Appointment>, RepositoryError> {
            self.inner.find_for_expert_between(expert_id, from, to).await
        }

        async fn compare_and_set_status(
            &self,
            expected: AppointmentStatus,
            updated: &Appointment,
        ) -> Result<bool, RepositoryError> {
            self.inner.compare_and_set_status(expected, updated).await
        }

        async fn list_pending_started_before(&self, now: DateTime<Utc>) -> Result<Vec<Appointment>, RepositoryError> {
            self.inner.list_pending_started_before(now).await
        }

        async fn discard_pending(&self, appointment_id: Uuid) -> Result<bool, RepositoryError> {
            self.inner.discard_pending(appointment_id).await
        }
    }

    async fn flaky_orchestrator(expert_id: Uuid, failures: u32) -> BookingOrchestrator {
        BookingOrchestrator::new(
            expert_repository(expert_id).await,
            Arc::new(FlakyAppointments {
                inner: InMemoryAppointmentRepository::new(),
                failures_left: AtomicU32::new(failures),
            }),
            Arc::new(LoggingNotifier),
            BookingRules::default(),
        )
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let expert_id = Uuid::new_v4();
        let booking = flaky_orchestrator(expert_id, 2).await;

        let appointment = tokio_test::assert_ok!(
            booking
                .request_booking_at(Uuid::new_v4(), expert_id, monday_at(9, 0), 60, now())
                .await
        );
        assert_eq!(appointment.start_time, monday_at(9, 0));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_unavailable() {
        let expert_id = Uuid::new_v4();
        let booking = flaky_orchestrator(expert_id, 3).await;

        assert_matches!(
            booking
                .request_booking_at(Uuid::new_v4(), expert_id, monday_at(9, 0), 60, now())
                .await,
            Err(AppointmentError::BookingUnavailable(_))
        );
    }
}
