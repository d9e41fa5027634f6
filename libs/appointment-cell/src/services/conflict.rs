// libs/appointment-cell/src/services/conflict.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use shared_database::RepositoryError;

use crate::models::Appointment;
use crate::repository::AppointmentRepository;

/// Finds the pending and confirmed appointments that occupy an expert's time.
pub struct ConflictIndex {
    appointments: Arc<dyn AppointmentRepository>,
    /// Longest bookable duration; bounds how far back an overlapping start can be.
    lookback: Duration,
}

impl ConflictIndex {
    pub fn new(appointments: Arc<dyn AppointmentRepository>, max_duration_minutes: i64) -> Self {
        Self {
            appointments,
            lookback: Duration::minutes(max_duration_minutes),
        }
    }

    /// Active appointments of `expert_id` overlapping `[start, end)`.
    pub async fn find_overlapping(
        &self,
        expert_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let occupied = self.occupied_between(expert_id, start, end).await?;
        let overlapping: Vec<Appointment> = occupied
            .into_iter()
            .filter(|appointment| appointment.overlaps(start, end))
            .collect();

        if !overlapping.is_empty() {
            debug!(
                "Found {} appointments overlapping {} - {} for expert {}",
                overlapping.len(),
                start,
                end,
                expert_id
            );
        }
        Ok(overlapping)
    }

    /// Active appointments that could intersect `[start, end)`, loaded in one query.
    pub async fn occupied_between(
        &self,
        expert_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let candidates = self
            .appointments
            .find_for_expert_between(expert_id, start - self.lookback, end)
            .await?;

        Ok(candidates
            .into_iter()
            .filter(Appointment::occupies_calendar)
            .collect())
    }

    /// Drops every candidate whose `[start, start + duration)` overlaps an active appointment.
    pub fn filter_available_slots(
        candidates: Vec<DateTime<Utc>>,
        duration_minutes: i64,
        occupied: &[Appointment],
    ) -> Vec<DateTime<Utc>> {
        let duration = Duration::minutes(duration_minutes);
        candidates
            .into_iter()
            .filter(|start| {
                let end = *start + duration;
                !occupied
                    .iter()
                    .any(|appointment| appointment.occupies_calendar() && appointment.overlaps(*start, end))
            })
            .collect()
    }
}
