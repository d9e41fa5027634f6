use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::{appointment_routes, AppointmentState};
use expert_cell::{expert_routes, ExpertState};

pub fn create_router(experts: Arc<ExpertState>, appointments: Arc<AppointmentState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Expert booking API is running!" }))
        .merge(expert_routes(experts))
        .merge(appointment_routes(appointments))
}
