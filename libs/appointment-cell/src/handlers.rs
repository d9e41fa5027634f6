// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use expert_cell::handlers::ensure_expert_or_admin;
use shared_database::RepositoryError;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Actor, Appointment, AppointmentError, AppointmentRangeQuery, AppointmentView, BookAppointmentRequest,
    CancelAppointmentRequest, LifecycleAction, SlotQuery,
};
use crate::router::AppointmentState;

const DEFAULT_SLOT_DURATION_MINUTES: i64 = 60;
const DEFAULT_LISTING_DAYS: i64 = 30;

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        let message = err.to_string();
        match err {
            AppointmentError::InvalidDuration { .. } => {
                AppError::rejected(StatusCode::UNPROCESSABLE_ENTITY, "invalid_duration", message)
            }
            AppointmentError::StartInPast(_) => {
                AppError::rejected(StatusCode::UNPROCESSABLE_ENTITY, "start_in_past", message)
            }
            AppointmentError::ExpertUnavailable(_) => {
                AppError::rejected(StatusCode::UNPROCESSABLE_ENTITY, "expert_unavailable", message)
            }
            AppointmentError::SlotConflict { .. } => {
                AppError::rejected(StatusCode::CONFLICT, "slot_conflict", message)
            }
            AppointmentError::InvalidTransition { .. } => {
                AppError::rejected(StatusCode::CONFLICT, "invalid_transition", message)
            }
            AppointmentError::CancellationWindow { .. } => {
                AppError::rejected(StatusCode::FORBIDDEN, "cancellation_window", message)
            }
            AppointmentError::NotPermitted(_) => AppError::Forbidden(message),
            AppointmentError::ExpertNotFound(_) | AppointmentError::AppointmentNotFound(_) => {
                AppError::NotFound(message)
            }
            AppointmentError::LockTimeout(_) | AppointmentError::BookingUnavailable(_) => {
                AppError::rejected(StatusCode::SERVICE_UNAVAILABLE, "booking_unavailable", message)
            }
            AppointmentError::Storage(RepositoryError::Unavailable(_)) => AppError::Unavailable(message),
            AppointmentError::Storage(_) => AppError::Internal(message),
        }
    }
}

/// Maps the caller onto the role they play for this appointment.
pub fn resolve_actor(user: &User, appointment: &Appointment) -> Result<Actor, AppError> {
    if user.is_admin() {
        Ok(Actor::Admin)
    } else if user.is(appointment.expert_id) {
        Ok(Actor::Expert(appointment.expert_id))
    } else if user.is(appointment.requester_id) {
        Ok(Actor::Requester(appointment.requester_id))
    } else {
        Err(AppError::Forbidden("Not a participant of this appointment".to_string()))
    }
}

fn view(state: &AppointmentState, appointment: Appointment) -> AppointmentView {
    AppointmentView::new(appointment, Utc::now(), state.lifecycle.cancellation_window())
}

async fn load_appointment(state: &AppointmentState, appointment_id: Uuid) -> Result<Appointment, AppError> {
    state
        .appointments
        .find_by_id(appointment_id)
        .await
        .map_err(AppointmentError::from)?
        .ok_or_else(|| AppointmentError::AppointmentNotFound(appointment_id).into())
}

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppointmentState>>,
    Path(expert_id): Path<Uuid>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let duration = query.duration.unwrap_or(DEFAULT_SLOT_DURATION_MINUTES);
    let slots = state.booking.available_slots(expert_id, query.date, duration).await?;

    Ok(Json(json!({
        "expert_id": expert_id,
        "date": query.date,
        "duration_minutes": duration,
        "slots": slots,
    })))
}

// ==============================================================================
// PROTECTED HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(expert_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<AppointmentView>), AppError> {
    let requester_id = match request.requester_id {
        Some(requester_id) if user.is_admin() => requester_id,
        Some(_) => {
            return Err(AppError::Forbidden(
                "Only administrators can book on behalf of another requester".to_string(),
            ))
        }
        None => user
            .uuid()
            .ok_or_else(|| AppError::Auth("Token subject is not a valid requester id".to_string()))?,
    };

    let appointment = state
        .booking
        .request_booking(requester_id, expert_id, request.start_time, request.duration_minutes)
        .await?;

    Ok((StatusCode::CREATED, Json(view(&state, appointment))))
}

#[axum::debug_handler]
pub async fn list_expert_appointments(
    State(state): State<Arc<AppointmentState>>,
    Path(expert_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Query(query): Query<AppointmentRangeQuery>,
) -> Result<Json<Value>, AppError> {
    ensure_expert_or_admin(&user, expert_id)?;

    let from = query.from.unwrap_or_else(Utc::now);
    let to = query.to.unwrap_or(from + Duration::days(DEFAULT_LISTING_DAYS));
    if to <= from {
        return Err(AppError::BadRequest("'to' must be after 'from'".to_string()));
    }

    let appointments = state
        .appointments
        .find_for_expert_between(expert_id, from, to)
        .await
        .map_err(AppointmentError::from)?;
    let views: Vec<AppointmentView> = appointments
        .into_iter()
        .map(|appointment| view(&state, appointment))
        .collect();

    Ok(Json(json!({
        "expert_id": expert_id,
        "from": from,
        "to": to,
        "appointments": views,
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<AppointmentView>, AppError> {
    let appointment = load_appointment(&state, appointment_id).await?;
    resolve_actor(&user, &appointment)?;

    Ok(Json(view(&state, appointment)))
}

async fn run_transition(
    state: &AppointmentState,
    appointment_id: Uuid,
    user: &User,
    action: LifecycleAction,
    reason: Option<String>,
) -> Result<Json<AppointmentView>, AppError> {
    let appointment = load_appointment(state, appointment_id).await?;
    let actor = resolve_actor(user, &appointment)?;

    let updated = state
        .lifecycle
        .transition_loaded(&appointment, action, actor, reason, Utc::now())
        .await?;

    Ok(Json(view(state, updated)))
}

#[axum::debug_handler]
pub async fn confirm_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<AppointmentView>, AppError> {
    run_transition(&state, appointment_id, &user, LifecycleAction::Confirm, None).await
}

#[axum::debug_handler]
pub async fn reject_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<AppointmentView>, AppError> {
    run_transition(&state, appointment_id, &user, LifecycleAction::Reject, None).await
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<AppointmentView>, AppError> {
    run_transition(&state, appointment_id, &user, LifecycleAction::Complete, None).await
}

/// The body is optional; an empty body cancels without a reason.
#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    body: Bytes,
) -> Result<Json<AppointmentView>, AppError> {
    let request: CancelAppointmentRequest = if body.is_empty() {
        CancelAppointmentRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(format!("Invalid cancel request: {}", e)))?
    };

    run_transition(&state, appointment_id, &user, LifecycleAction::Cancel, request.reason).await
}
