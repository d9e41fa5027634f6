// libs/appointment-cell/src/repository.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::{RepositoryError, SupabaseClient};

use crate::models::{Appointment, AppointmentStatus};

/// Persistence for appointments. Reported bookings are never deleted; status models removal.
#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    /// Fails with [`RepositoryError::Conflict`] when an active appointment for the
    /// same expert already starts at the same instant.
    async fn insert(&self, appointment: &Appointment) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, appointment_id: Uuid) -> Result<Option<Appointment>, RepositoryError>;

    /// Appointments of any status with `from <= start_time < to`, ascending by start.
    async fn find_for_expert_between(
        &self,
        expert_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, RepositoryError>;

    /// Writes the status fields of `updated` only if the stored status is still
    /// `expected`. Returns whether the write happened.
    async fn compare_and_set_status(
        &self,
        expected: AppointmentStatus,
        updated: &Appointment,
    ) -> Result<bool, RepositoryError>;

    async fn list_pending_started_before(&self, now: DateTime<Utc>) -> Result<Vec<Appointment>, RepositoryError>;

    /// Removes a booking that was inserted but never handed to a caller, only while
    /// it is still pending. Returns whether a row was removed.
    async fn discard_pending(&self, appointment_id: Uuid) -> Result<bool, RepositoryError>;
}

fn sort_by_start(mut appointments: Vec<Appointment>) -> Vec<Appointment> {
    appointments.sort_by_key(|appointment| (appointment.start_time, appointment.id));
    appointments
}

#[derive(Default)]
pub struct InMemoryAppointmentRepository {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Appointment> {
        sort_by_start(self.appointments.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn insert(&self, appointment: &Appointment) -> Result<(), RepositoryError> {
        let mut appointments = self.appointments.write().await;

        let taken = appointments.values().any(|existing| {
            existing.expert_id == appointment.expert_id
                && existing.start_time == appointment.start_time
                && existing.occupies_calendar()
        });
        if taken || appointments.contains_key(&appointment.id) {
            return Err(RepositoryError::Conflict(format!(
                "expert {} already booked at {}",
                appointment.expert_id, appointment.start_time
            )));
        }

        appointments.insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn find_by_id(&self, appointment_id: Uuid) -> Result<Option<Appointment>, RepositoryError> {
        Ok(self.appointments.read().await.get(&appointment_id).cloned())
    }

    async fn find_for_expert_between(
        &self,
        expert_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let appointments = self.appointments.read().await;
        Ok(sort_by_start(
            appointments
                .values()
                .filter(|a| a.expert_id == expert_id && a.start_time >= from && a.start_time < to)
                .cloned()
                .collect(),
        ))
    }

    async fn compare_and_set_status(
        &self,
        expected: AppointmentStatus,
        updated: &Appointment,
    ) -> Result<bool, RepositoryError> {
        let mut appointments = self.appointments.write().await;
        match appointments.get_mut(&updated.id) {
            Some(stored) if stored.status == expected => {
                stored.status = updated.status;
                stored.cancellation_reason = updated.cancellation_reason.clone();
                stored.cancelled_by = updated.cancelled_by;
                stored.updated_at = updated.updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_pending_started_before(&self, now: DateTime<Utc>) -> Result<Vec<Appointment>, RepositoryError> {
        let appointments = self.appointments.read().await;
        Ok(sort_by_start(
            appointments
                .values()
                .filter(|a| a.status == AppointmentStatus::Pending && a.start_time < now)
                .cloned()
                .collect(),
        ))
    }

    async fn discard_pending(&self, appointment_id: Uuid) -> Result<bool, RepositoryError> {
        let mut appointments = self.appointments.write().await;
        match appointments.get(&appointment_id) {
            Some(stored) if stored.status == AppointmentStatus::Pending => {
                appointments.remove(&appointment_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Stores appointments in the `appointments` table.
///
/// The table is expected to carry a unique index on `(expert_id, start_time)`
/// restricted to pending and confirmed rows.
pub struct SupabaseAppointmentRepository {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentRepository {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn timestamp(value: DateTime<Utc>) -> String {
        urlencoding::encode(&value.to_rfc3339()).into_owned()
    }

    fn decode(rows: Vec<Value>) -> Result<Vec<Appointment>, RepositoryError> {
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(RepositoryError::from))
            .collect()
    }
}

#[async_trait]
impl AppointmentRepository for SupabaseAppointmentRepository {
    async fn insert(&self, appointment: &Appointment) -> Result<(), RepositoryError> {
        debug!("Inserting appointment {} for expert {}", appointment.id, appointment.expert_id);

        let body = serde_json::to_value(appointment)?;
        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                None,
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await?;
        Ok(())
    }

    async fn find_by_id(&self, appointment_id: Uuid) -> Result<Option<Appointment>, RepositoryError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(Self::decode(rows)?.into_iter().next())
    }

    async fn find_for_expert_between(
        &self,
        expert_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let path = format!(
            "/rest/v1/appointments?expert_id=eq.{}&start_time=gte.{}&start_time=lt.{}&order=start_time.asc",
            expert_id,
            Self::timestamp(from),
            Self::timestamp(to)
        );
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;
        Self::decode(rows)
    }

    async fn compare_and_set_status(
        &self,
        expected: AppointmentStatus,
        updated: &Appointment,
    ) -> Result<bool, RepositoryError> {
        debug!("Transitioning appointment {} from {} to {}", updated.id, expected, updated.status);

        let path = format!("/rest/v1/appointments?id=eq.{}&status=eq.{}", updated.id, expected);
        let body = json!({
            "status": updated.status,
            "cancellation_reason": updated.cancellation_reason,
            "cancelled_by": updated.cancelled_by,
            "updated_at": updated.updated_at,
        });
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                None,
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn list_pending_started_before(&self, now: DateTime<Utc>) -> Result<Vec<Appointment>, RepositoryError> {
        let path = format!(
            "/rest/v1/appointments?status=eq.pending&start_time=lt.{}&order=start_time.asc",
            Self::timestamp(now)
        );
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;
        Self::decode(rows)
    }

    async fn discard_pending(&self, appointment_id: Uuid) -> Result<bool, RepositoryError> {
        debug!("Discarding uncommitted appointment {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}&status=eq.pending", appointment_id);
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                None,
                None,
                Some(SupabaseClient::representation_headers()),
            )
            .await?;
        Ok(!rows.is_empty())
    }
}
