// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use expert_cell::ExpertRepository;
use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::models::BookingRules;
use crate::repository::AppointmentRepository;
use crate::services::{AppointmentLifecycle, BookingOrchestrator, ExpertLocks, NotificationDispatcher, SchedulingLock};

pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub appointments: Arc<dyn AppointmentRepository>,
    pub booking: Arc<BookingOrchestrator>,
    pub lifecycle: Arc<AppointmentLifecycle>,
}

impl AppointmentState {
    /// Bookings are serialized per process; use [`Self::with_scheduling_lock`] when
    /// several processes share one store.
    pub fn new(
        config: Arc<AppConfig>,
        experts: Arc<dyn ExpertRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self::with_scheduling_lock(config, experts, appointments, notifier, Arc::new(ExpertLocks::new()))
    }

    pub fn with_scheduling_lock(
        config: Arc<AppConfig>,
        experts: Arc<dyn ExpertRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        notifier: Arc<dyn NotificationDispatcher>,
        scheduling_lock: Arc<dyn SchedulingLock>,
    ) -> Self {
        let rules = BookingRules::from_config(&config);
        let lifecycle = Arc::new(AppointmentLifecycle::new(
            appointments.clone(),
            notifier.clone(),
            rules.cancellation_window,
        ));
        let booking = Arc::new(BookingOrchestrator::with_scheduling_lock(
            experts,
            appointments.clone(),
            notifier,
            rules,
            scheduling_lock,
        ));

        Self {
            config,
            appointments,
            booking,
            lifecycle,
        }
    }
}

pub fn appointment_routes(state: Arc<AppointmentState>) -> Router {
    let public_routes = Router::new()
        .route("/experts/{expert_id}/slots", get(handlers::get_available_slots));

    let protected_routes = Router::new()
        .route(
            "/experts/{expert_id}/appointments",
            post(handlers::book_appointment).get(handlers::list_expert_appointments),
        )
        .route("/appointments/{appointment_id}", get(handlers::get_appointment))
        .route("/appointments/{appointment_id}/confirm", post(handlers::confirm_appointment))
        .route("/appointments/{appointment_id}/reject", post(handlers::reject_appointment))
        .route("/appointments/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/appointments/{appointment_id}/complete", post(handlers::complete_appointment))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
