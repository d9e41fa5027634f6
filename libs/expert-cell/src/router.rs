// libs/expert-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::repository::ExpertRepository;
use crate::services::AvailabilityCalendar;

pub struct ExpertState {
    pub config: Arc<AppConfig>,
    pub experts: Arc<dyn ExpertRepository>,
    pub calendar: AvailabilityCalendar,
}

impl ExpertState {
    pub fn new(config: Arc<AppConfig>, experts: Arc<dyn ExpertRepository>) -> Self {
        Self {
            config,
            experts,
            calendar: AvailabilityCalendar::new(),
        }
    }
}

pub fn expert_routes(state: Arc<ExpertState>) -> Router {
    let public_routes = Router::new()
        .route("/experts/{expert_id}", get(handlers::get_expert))
        .route("/experts/{expert_id}/availability", get(handlers::get_availability));

    let protected_routes = Router::new()
        .route("/experts", post(handlers::create_expert))
        .route("/experts/{expert_id}/status", patch(handlers::update_expert_status))
        .route("/experts/{expert_id}/availability", post(handlers::create_availability))
        .route(
            "/experts/{expert_id}/availability/{rule_id}",
            put(handlers::update_availability),
        )
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
