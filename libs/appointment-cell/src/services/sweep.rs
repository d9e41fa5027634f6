// libs/appointment-cell/src/services/sweep.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::models::{Actor, AppointmentError, LifecycleAction};
use crate::repository::AppointmentRepository;
use crate::services::lifecycle::AppointmentLifecycle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    /// Appointments that changed status before the sweep reached them.
    pub skipped: usize,
    /// Appointments whose expiry could not be written; retried on the next run.
    pub failed: usize,
}

/// Periodically expires pending appointments whose start time has passed.
pub struct ExpirySweeper {
    appointments: Arc<dyn AppointmentRepository>,
    lifecycle: Arc<AppointmentLifecycle>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(
        appointments: Arc<dyn AppointmentRepository>,
        lifecycle: Arc<AppointmentLifecycle>,
        interval: Duration,
    ) -> Self {
        Self {
            appointments,
            lifecycle,
            interval,
        }
    }

    /// Safe to re-run; each expiry is a compare-and-swap from `pending`.
    #[instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, AppointmentError> {
        let stale = self.appointments.list_pending_started_before(now).await?;
        let mut report = SweepReport::default();

        for appointment in stale {
            match self
                .lifecycle
                .transition_loaded(&appointment, LifecycleAction::Expire, Actor::System, None, now)
                .await
            {
                Ok(_) => report.expired += 1,
                Err(AppointmentError::InvalidTransition { status, .. }) => {
                    debug!("Appointment {} already {}, not expiring", appointment.id, status);
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("Failed to expire appointment {}: {}", appointment.id, e);
                    report.failed += 1;
                }
            }
        }

        if report != SweepReport::default() {
            info!(
                "Expiry sweep: {} expired, {} skipped, {} failed",
                report.expired, report.skipped, report.failed
            );
        }
        Ok(report)
    }

    /// Runs forever; spawn it on the runtime.
    pub async fn run(&self) {
        info!("Starting appointment expiry sweeper (every {:?})", self.interval);

        loop {
            if let Err(e) = self.run_once(Utc::now()).await {
                error!("Error in appointment expiry sweep: {}", e);
            }

            sleep(self.interval).await;
        }
    }
}
