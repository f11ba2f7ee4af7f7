// libs/consultation-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    Extension,
};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use shared_models::auth::User;

use crate::error::ConsultationError;
use crate::models::{BookConsultationRequest, CouponCheckRequest};
use crate::state::ConsultationState;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

// ==============================================================================
// PATIENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_consultation(
    State(state): State<Arc<ConsultationState>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookConsultationRequest>,
) -> Result<(StatusCode, Json<Value>), ConsultationError> {
    info!("Booking request from user {} for specialization {}", user.id, request.specialization_id);

    let booking = state.booking.book(&user, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "consultation": booking.consultation,
            "payment": booking.payment,
            "payment_session": booking.payment_session,
        })),
    ))
}

pub async fn check_coupon(
    State(state): State<Arc<ConsultationState>>,
    Extension(user): Extension<User>,
    Json(request): Json<CouponCheckRequest>,
) -> Result<Json<Value>, ConsultationError> {
    let application = state.booking.quote(&user, request).await?;

    Ok(Json(json!({
        "valid": application.error.is_none(),
        "pricing": application,
    })))
}

pub async fn retry_payment_session(
    State(state): State<Arc<ConsultationState>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<Uuid>,
) -> Result<Json<Value>, ConsultationError> {
    info!("Payment session retry for consultation {} by user {}", consultation_id, user.id);

    let booking = state.booking.retry_payment_session(&user, consultation_id).await?;

    Ok(Json(json!({
        "success": true,
        "consultation": booking.consultation,
        "payment": booking.payment,
        "payment_session": booking.payment_session,
    })))
}

pub async fn get_consultation(
    State(state): State<Arc<ConsultationState>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<Uuid>,
) -> Result<Json<Value>, ConsultationError> {
    let details = state.query.get(&user, consultation_id).await?;
    Ok(Json(json!(details)))
}

// ==============================================================================
// DOCTOR HANDLERS
// ==============================================================================

pub async fn list_open_consultations(
    State(state): State<Arc<ConsultationState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, ConsultationError> {
    let consultations = state.query.open_for_doctor(&user).await?;

    Ok(Json(json!({
        "consultations": consultations,
        "total": consultations.len(),
    })))
}

pub async fn accept_consultation(
    State(state): State<Arc<ConsultationState>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<Uuid>,
) -> Result<Json<Value>, ConsultationError> {
    info!("Doctor user {} accepting consultation {}", user.id, consultation_id);

    let consultation = state.assignment.accept(&user, consultation_id).await?;

    Ok(Json(json!({
        "success": true,
        "consultation": consultation,
    })))
}

pub async fn complete_consultation(
    State(state): State<Arc<ConsultationState>>,
    Extension(user): Extension<User>,
    Path(consultation_id): Path<Uuid>,
) -> Result<Json<Value>, ConsultationError> {
    let consultation = state.assignment.complete(&user, consultation_id).await?;

    Ok(Json(json!({
        "success": true,
        "consultation": consultation,
    })))
}

// ==============================================================================
// PAYMENT PROVIDER WEBHOOK
// ==============================================================================

/// Takes the raw body: the signature covers the exact bytes sent.
pub async fn payment_webhook(
    State(state): State<Arc<ConsultationState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ConsultationError> {
    let signature = match headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok()) {
        Some(signature) => signature,
        None => {
            warn!("Payment webhook received without signature header");
            return Err(ConsultationError::InvalidSignature("Missing signature header".to_string()));
        }
    };

    let outcome = state.reconciliation.handle_webhook(&body, signature).await?;

    Ok(Json(json!({
        "received": true,
        "outcome": outcome,
    })))
}
