// libs/expert-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::RepositoryError;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AvailabilityRuleInput, CreateExpertRequest, Expert, ExpertError, UpdateAvailabilityRuleRequest,
    UpdateExpertStatusRequest,
};
use crate::router::ExpertState;

impl From<ExpertError> for AppError {
    fn from(err: ExpertError) -> Self {
        match err {
            ExpertError::NotFound(_) | ExpertError::RuleNotFound(_) => AppError::NotFound(err.to_string()),
            ExpertError::AlreadyExists(_) => {
                AppError::rejected(StatusCode::CONFLICT, "already_exists", err.to_string())
            }
            ExpertError::InvalidRule(_) => {
                AppError::rejected(StatusCode::UNPROCESSABLE_ENTITY, "invalid_rule", err.to_string())
            }
            ExpertError::OverlappingRule { .. } => {
                AppError::rejected(StatusCode::CONFLICT, "overlapping_rule", err.to_string())
            }
            ExpertError::ConcurrentModification(_) => {
                AppError::rejected(StatusCode::CONFLICT, "concurrent_update", err.to_string())
            }
            ExpertError::Storage(RepositoryError::Unavailable(_)) => AppError::Unavailable(err.to_string()),
            ExpertError::Storage(_) => AppError::Internal(err.to_string()),
        }
    }
}

/// Only the expert themself or an admin may manage an expert profile.
pub fn ensure_expert_or_admin(user: &User, expert_id: Uuid) -> Result<(), AppError> {
    if user.is_admin() || user.is(expert_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not permitted to manage this expert".to_string()))
    }
}

async fn load_expert(state: &ExpertState, expert_id: Uuid) -> Result<Expert, ExpertError> {
    state
        .experts
        .find_by_id(expert_id)
        .await?
        .ok_or(ExpertError::NotFound(expert_id))
}

const MAX_UPDATE_ATTEMPTS: u32 = 5;

/// Loads the expert, applies `change` and saves it against the loaded version.
/// A save lost to a concurrent writer reloads and reapplies `change`, so its
/// validation always runs against the latest stored rules.
async fn modify_expert<T, F>(state: &ExpertState, expert_id: Uuid, mut change: F) -> Result<(Expert, T), ExpertError>
where
    F: FnMut(&mut Expert) -> Result<T, ExpertError>,
{
    for attempt in 1..=MAX_UPDATE_ATTEMPTS {
        let mut expert = load_expert(state, expert_id).await?;
        let outcome = change(&mut expert)?;
        expert.updated_at = Utc::now();

        if state.experts.save(&expert).await? {
            expert.version += 1;
            return Ok((expert, outcome));
        }
        debug!("Expert {} changed during update (attempt {}), reloading", expert_id, attempt);
    }

    warn!("Giving up updating expert {} after {} attempts", expert_id, MAX_UPDATE_ATTEMPTS);
    Err(ExpertError::ConcurrentModification(expert_id))
}

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_expert(
    State(state): State<Arc<ExpertState>>,
    Path(expert_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let expert = load_expert(&state, expert_id).await?;
    Ok(Json(json!(expert)))
}

#[axum::debug_handler]
pub async fn get_availability(
    State(state): State<Arc<ExpertState>>,
    Path(expert_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let expert = load_expert(&state, expert_id).await?;

    Ok(Json(json!({
        "expert_id": expert.id,
        "availability_rules": expert.availability_rules,
    })))
}

// ==============================================================================
// PROTECTED HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_expert(
    State(state): State<Arc<ExpertState>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateExpertRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only administrators can register experts".to_string()));
    }

    let mut expert = Expert::new(request.id.unwrap_or_else(Uuid::new_v4));
    if let Some(status) = request.operational_status {
        expert.operational_status = status;
    }
    if let Some(accepting) = request.is_accepting_appointments {
        expert.is_accepting_appointments = accepting;
    }

    let rules = request
        .availability_rules
        .into_iter()
        .map(AvailabilityRuleInput::into_rule)
        .collect();
    state.calendar.replace_rules(&mut expert, rules)?;

    state.experts.insert(&expert).await.map_err(|e| match e {
        RepositoryError::Conflict(_) => ExpertError::AlreadyExists(expert.id),
        other => ExpertError::Storage(other),
    })?;

    info!("Registered expert {} with {} rules", expert.id, expert.availability_rules.len());
    Ok((StatusCode::CREATED, Json(json!(expert))))
}

#[axum::debug_handler]
pub async fn update_expert_status(
    State(state): State<Arc<ExpertState>>,
    Path(expert_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateExpertStatusRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_expert_or_admin(&user, expert_id)?;

    let (expert, ()) = modify_expert(&state, expert_id, |expert| {
        if let Some(status) = request.operational_status {
            expert.operational_status = status;
        }
        if let Some(accepting) = request.is_accepting_appointments {
            expert.is_accepting_appointments = accepting;
        }
        Ok(())
    })
    .await?;

    info!(
        "Expert {} status now {} (accepting: {})",
        expert.id, expert.operational_status, expert.is_accepting_appointments
    );
    Ok(Json(json!(expert)))
}

#[axum::debug_handler]
pub async fn create_availability(
    State(state): State<Arc<ExpertState>>,
    Path(expert_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<AvailabilityRuleInput>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    ensure_expert_or_admin(&user, expert_id)?;

    let (_, rule) = modify_expert(&state, expert_id, |expert| {
        state.calendar.add_rule(expert, request.clone())
    })
    .await?;

    Ok((StatusCode::CREATED, Json(json!(rule))))
}

#[axum::debug_handler]
pub async fn update_availability(
    State(state): State<Arc<ExpertState>>,
    Path((expert_id, rule_id)): Path<(Uuid, Uuid)>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateAvailabilityRuleRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_expert_or_admin(&user, expert_id)?;

    let (_, rule) = modify_expert(&state, expert_id, |expert| {
        state.calendar.update_rule(expert, rule_id, request.clone())
    })
    .await?;

    Ok(Json(json!(rule)))
}
