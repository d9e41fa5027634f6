// libs/appointment-cell/src/services/locks.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::{RepositoryError, SupabaseClient};

use crate::models::AppointmentError;

/// Proof of holding an expert's scheduling lock. Hand it back to
/// [`SchedulingLock::release`]; dropping it frees in-process locks only.
#[derive(Debug)]
pub struct SchedulingLease {
    pub expert_id: Uuid,
    token: Uuid,
    _guard: Option<OwnedMutexGuard<()>>,
}

/// Serializes the check-then-insert booking step per expert.
#[async_trait]
pub trait SchedulingLock: Send + Sync {
    /// Waits at most `timeout`, then fails with [`AppointmentError::LockTimeout`].
    async fn acquire(&self, expert_id: Uuid, timeout: Duration) -> Result<SchedulingLease, AppointmentError>;

    async fn release(&self, lease: SchedulingLease);
}

// ==============================================================================
// IN-PROCESS LOCKS
// ==============================================================================

/// One async mutex per expert. Only covers bookings made through this process.
#[derive(Default)]
pub struct ExpertLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl ExpertLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_for(&self, expert_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut table = self.table();
        // Entries only referenced by the table are idle.
        table.retain(|id, lock| *id == expert_id || Arc::strong_count(lock) > 1);
        table.entry(expert_id).or_default().clone()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SchedulingLock for ExpertLocks {
    async fn acquire(&self, expert_id: Uuid, timeout: Duration) -> Result<SchedulingLease, AppointmentError> {
        let lock = self.lock_for(expert_id);
        let guard = tokio::time::timeout(timeout, lock.lock_owned()).await.map_err(|_| {
            warn!("Booking lock for expert {} not acquired within {:?}", expert_id, timeout);
            AppointmentError::LockTimeout(expert_id)
        })?;

        Ok(SchedulingLease {
            expert_id,
            token: Uuid::new_v4(),
            _guard: Some(guard),
        })
    }

    async fn release(&self, lease: SchedulingLease) {
        drop(lease);
    }
}

// ==============================================================================
// STORE-BACKED LOCKS
// ==============================================================================

/// Leases rows in the `scheduling_locks` table, keyed by `expert_id`, so every
/// API process sharing the store is serialized.
///
/// A lease carries an `expires_at`; a holder that dies without releasing blocks
/// the expert for at most `lease_ttl`.
pub struct SupabaseSchedulingLocks {
    supabase: Arc<SupabaseClient>,
    lease_ttl: chrono::Duration,
    retry_interval: Duration,
}

impl SupabaseSchedulingLocks {
    pub fn new(supabase: Arc<SupabaseClient>, lease_ttl: Duration) -> Self {
        Self {
            supabase,
            lease_ttl: chrono::Duration::from_std(lease_ttl).unwrap_or_else(|_| chrono::Duration::seconds(30)),
            retry_interval: Duration::from_millis(50),
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    fn timestamp(value: DateTime<Utc>) -> String {
        urlencoding::encode(&value.to_rfc3339()).into_owned()
    }

    /// `false` when another holder owns the row.
    async fn try_insert(&self, expert_id: Uuid, token: Uuid, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let lock_data = json!({
            "expert_id": expert_id,
            "token": token,
            "acquired_at": now,
            "expires_at": now + self.lease_ttl,
        });

        let inserted: Result<Vec<Value>, RepositoryError> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/scheduling_locks",
                None,
                Some(lock_data),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(RepositoryError::from);

        match inserted {
            Ok(_) => Ok(true),
            Err(RepositoryError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn clear_expired(&self, expert_id: Uuid, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        let path = format!(
            "/rest/v1/scheduling_locks?expert_id=eq.{}&expires_at=lt.{}",
            expert_id,
            Self::timestamp(now)
        );
        let cleared: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                None,
                None,
                Some(SupabaseClient::representation_headers()),
            )
            .await?;

        if !cleared.is_empty() {
            warn!("Cleared expired scheduling lock for expert {}", expert_id);
        }
        Ok(())
    }
}

#[async_trait]
impl SchedulingLock for SupabaseSchedulingLocks {
    async fn acquire(&self, expert_id: Uuid, timeout: Duration) -> Result<SchedulingLease, AppointmentError> {
        let token = Uuid::new_v4();
        let deadline = Instant::now() + timeout;

        loop {
            let now = Utc::now();
            if self.try_insert(expert_id, token, now).await? {
                debug!("Scheduling lock acquired for expert {}", expert_id);
                return Ok(SchedulingLease {
                    expert_id,
                    token,
                    _guard: None,
                });
            }

            self.clear_expired(expert_id, now).await?;

            if Instant::now() + self.retry_interval > deadline {
                warn!("Scheduling lock for expert {} not acquired within {:?}", expert_id, timeout);
                return Err(AppointmentError::LockTimeout(expert_id));
            }
            sleep(self.retry_interval).await;
        }
    }

    async fn release(&self, lease: SchedulingLease) {
        let path = format!(
            "/rest/v1/scheduling_locks?expert_id=eq.{}&token=eq.{}",
            lease.expert_id, lease.token
        );
        let released: anyhow::Result<Vec<Value>> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                None,
                None,
                Some(SupabaseClient::representation_headers()),
            )
            .await;

        match released {
            Ok(_) => debug!("Scheduling lock released for expert {}", lease.expert_id),
            Err(e) => warn!(
                "Failed to release scheduling lock for expert {}, it will lapse after {}s: {}",
                lease.expert_id,
                self.lease_ttl.num_seconds(),
                e
            ),
        }
    }
}
