// libs/consultation-cell/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::ConsultationStatus;

/// Why a coupon could not be applied to a booking.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CouponFailure {
    InvalidCoupon,
    AlreadyUsed,
}

impl fmt::Display for CouponFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CouponFailure::InvalidCoupon => write!(f, "coupon is invalid, expired or exhausted"),
            CouponFailure::AlreadyUsed => write!(f, "coupon has already been used"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConsultationError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Coupon is invalid, expired or exhausted")]
    InvalidCoupon,

    #[error("Coupon has already been used")]
    AlreadyUsed,

    #[error("Coupon rejected: {0}")]
    CouponRejected(CouponFailure),

    #[error("Consultation is already assigned to a doctor")]
    AlreadyAssigned,

    #[error("Only doctors can accept consultations")]
    NotADoctor,

    #[error("Consultation has no completed payment")]
    PaymentRequired,

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Payment provider error: {0}")]
    ExternalProviderError(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Consultation cannot move from {from} to {to}")]
    InvalidStatusTransition {
        from: ConsultationStatus,
        to: ConsultationStatus,
    },

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl ConsultationError {
    /// Stable machine-readable code rendered as the `error` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsultationError::ValidationError(_) => "validation_error",
            ConsultationError::Unauthorized(_) => "unauthorized",
            ConsultationError::InvalidCoupon => "invalid_coupon",
            ConsultationError::AlreadyUsed => "already_used",
            ConsultationError::CouponRejected(_) => "coupon_rejected",
            ConsultationError::AlreadyAssigned => "already_assigned",
            ConsultationError::NotADoctor => "not_a_doctor",
            ConsultationError::PaymentRequired => "payment_required",
            ConsultationError::InvalidSignature(_) => "invalid_signature",
            ConsultationError::ExternalProviderError(_) => "external_provider_error",
            ConsultationError::NotFound(_) => "not_found",
            ConsultationError::InvalidStatusTransition { .. } => "invalid_status_transition",
            ConsultationError::DatabaseError(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ConsultationError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ConsultationError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ConsultationError::InvalidCoupon
            | ConsultationError::AlreadyUsed
            | ConsultationError::CouponRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ConsultationError::AlreadyAssigned => StatusCode::CONFLICT,
            ConsultationError::NotADoctor => StatusCode::FORBIDDEN,
            ConsultationError::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
            ConsultationError::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            ConsultationError::ExternalProviderError(_) => StatusCode::BAD_GATEWAY,
            ConsultationError::NotFound(_) => StatusCode::NOT_FOUND,
            ConsultationError::InvalidStatusTransition { .. } => StatusCode::CONFLICT,
            ConsultationError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CouponFailure> for ConsultationError {
    fn from(failure: CouponFailure) -> Self {
        match failure {
            CouponFailure::InvalidCoupon => ConsultationError::InvalidCoupon,
            CouponFailure::AlreadyUsed => ConsultationError::AlreadyUsed,
        }
    }
}

impl From<anyhow::Error> for ConsultationError {
    fn from(err: anyhow::Error) -> Self {
        ConsultationError::DatabaseError(err.to_string())
    }
}

impl IntoResponse for ConsultationError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details stay in the log
        let message = match &self {
            ConsultationError::DatabaseError(detail) => {
                error!("Consultation request failed: {}", detail);
                "Internal server error".to_string()
            }
            ConsultationError::ExternalProviderError(detail) => {
                error!("Payment provider failure: {}", detail);
                "Payment provider is unavailable, please retry".to_string()
            }
            other => {
                warn!("Consultation request rejected ({}): {}", other.kind(), other);
                other.to_string()
            }
        };

        let mut body = json!({
            "error": self.kind(),
            "message": message
        });
        if let ConsultationError::CouponRejected(reason) = &self {
            body["reason"] = json!(reason);
        }

        (status, Json(body)).into_response()
    }
}
