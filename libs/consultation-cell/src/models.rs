// libs/consultation-cell/src/models.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ConsultationError, CouponFailure};

// ==============================================================================
// PATIENT IDENTITY
// ==============================================================================

/// Who a consultation is booked for: the account holder or one of their
/// dependent members. Storage keeps two nullable columns; the domain never
/// branches on them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum PatientIdentity {
    Patient(Uuid),
    Member(Uuid),
}

impl PatientIdentity {
    /// Exactly one of the two columns must be set.
    pub fn from_columns(
        patient_id: Option<Uuid>,
        patient_member_id: Option<Uuid>,
    ) -> Result<Self, ConsultationError> {
        match (patient_id, patient_member_id) {
            (Some(id), None) => Ok(PatientIdentity::Patient(id)),
            (None, Some(id)) => Ok(PatientIdentity::Member(id)),
            (Some(_), Some(_)) => Err(ConsultationError::ValidationError(
                "Provide either patient_id or patient_member_id, not both".to_string(),
            )),
            (None, None) => Err(ConsultationError::ValidationError(
                "Either patient_id or patient_member_id is required".to_string(),
            )),
        }
    }

    pub fn patient_id(&self) -> Option<Uuid> {
        match self {
            PatientIdentity::Patient(id) => Some(*id),
            PatientIdentity::Member(_) => None,
        }
    }

    pub fn patient_member_id(&self) -> Option<Uuid> {
        match self {
            PatientIdentity::Member(id) => Some(*id),
            PatientIdentity::Patient(_) => None,
        }
    }
}

impl fmt::Display for PatientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatientIdentity::Patient(id) => write!(f, "patient:{}", id),
            PatientIdentity::Member(id) => write!(f, "member:{}", id),
        }
    }
}

// ==============================================================================
// CONSULTATION
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Consultation {
    pub id: Uuid,
    pub patient_id: Option<Uuid>,
    pub patient_member_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub specialization_id: Uuid,
    pub fee_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub coupon_code: Option<String>,
    pub payment_status: ConsultationPaymentStatus,
    pub consultation_status: ConsultationStatus,
    pub consultation_date: Option<DateTime<Utc>>,
    pub details: Option<String>,
    pub assign_at: Option<DateTime<Utc>>,
    pub assign_application: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Consultation {
    pub fn identity(&self) -> Result<PatientIdentity, ConsultationError> {
        PatientIdentity::from_columns(self.patient_id, self.patient_member_id)
            .map_err(|_| ConsultationError::DatabaseError(format!(
                "Consultation {} has an inconsistent patient reference", self.id
            )))
    }

    pub fn is_assigned(&self) -> bool {
        self.doctor_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationPaymentStatus {
    Pending,
    Paid,
    Completed,
    Cancelled,
}

impl fmt::Display for ConsultationPaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsultationPaymentStatus::Pending => write!(f, "pending"),
            ConsultationPaymentStatus::Paid => write!(f, "paid"),
            ConsultationPaymentStatus::Completed => write!(f, "completed"),
            ConsultationPaymentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    Pending,
    Monitoring,
    Completed,
    Cancel,
}

impl ConsultationStatus {
    pub fn can_transition_to(&self, next: ConsultationStatus) -> bool {
        matches!(
            (self, next),
            (ConsultationStatus::Pending, ConsultationStatus::Monitoring)
                | (ConsultationStatus::Pending, ConsultationStatus::Cancel)
                | (ConsultationStatus::Monitoring, ConsultationStatus::Completed)
                | (ConsultationStatus::Monitoring, ConsultationStatus::Cancel)
        )
    }
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsultationStatus::Pending => write!(f, "pending"),
            ConsultationStatus::Monitoring => write!(f, "monitoring"),
            ConsultationStatus::Completed => write!(f, "completed"),
            ConsultationStatus::Cancel => write!(f, "cancel"),
        }
    }
}

// ==============================================================================
// PAYMENT
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub consultation_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Completed => write!(f, "completed"),
            PaymentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Reference to the provider-side payment object the client completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentSession {
    pub id: String,
    pub client_secret: Option<String>,
}

/// Correlation data embedded in the provider session so webhooks can be
/// traced back to our rows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PaymentMetadata {
    pub consultation_id: Uuid,
    pub payment_id: Uuid,
}

// ==============================================================================
// COUPONS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub discount_percentage: Decimal,
    pub discount_amount: Decimal,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub usage_limit: i32,
    pub used_count: i32,
    pub status: CouponStatus,
}

impl Coupon {
    /// Combined "active" predicate: status, validity window and remaining uses.
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.status == CouponStatus::Active
            && self.valid_from <= now
            && now <= self.valid_to
            && self.used_count < self.usage_limit
    }

    /// Records one use and flips the status once the cap is reached.
    pub fn record_use(&mut self) {
        self.used_count += 1;
        if self.used_count >= self.usage_limit {
            self.status = CouponStatus::Used;
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CouponStatus {
    Active,
    Expired,
    Used,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CouponUser {
    pub id: Uuid,
    pub coupon_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub patient_member_id: Option<Uuid>,
    pub used_at: DateTime<Utc>,
}

/// A redemption to be committed together with the booking rows.
#[derive(Debug, Clone, PartialEq)]
pub struct CouponRedemption {
    pub coupon_id: Uuid,
    pub coupon_code: String,
    pub identity: PatientIdentity,
}

/// Result of pricing a fee against an optional coupon. On a coupon error the
/// fee is returned unchanged and `error` says why.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CouponApplication {
    pub fee: Decimal,
    pub discount: Decimal,
    pub final_amount: Decimal,
    pub coupon_code: Option<String>,
    pub error: Option<CouponFailure>,
    #[serde(skip)]
    pub redemption: Option<CouponRedemption>,
}

impl CouponApplication {
    pub fn without_coupon(fee: Decimal) -> Self {
        Self {
            fee,
            discount: Decimal::ZERO,
            final_amount: fee,
            coupon_code: None,
            error: None,
            redemption: None,
        }
    }

    pub fn rejected(fee: Decimal, code: &str, failure: CouponFailure) -> Self {
        Self {
            fee,
            discount: Decimal::ZERO,
            final_amount: fee,
            coupon_code: Some(code.to_string()),
            error: Some(failure),
            redemption: None,
        }
    }
}

// ==============================================================================
// REFERENCE DATA
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Specialization {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoctorProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
    pub specialization_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
    pub consulted: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientMember {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub full_name: String,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookConsultationRequest {
    pub patient_id: Option<Uuid>,
    pub patient_member_id: Option<Uuid>,
    pub specialization_id: Uuid,
    pub coupon_code: Option<String>,
    pub consultation_date: Option<DateTime<Utc>>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponCheckRequest {
    pub patient_id: Option<Uuid>,
    pub patient_member_id: Option<Uuid>,
    pub specialization_id: Uuid,
    pub coupon_code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingResponse {
    pub consultation: Consultation,
    pub payment: Payment,
    pub payment_session: Option<PaymentSession>,
}

// ==============================================================================
// SETTLEMENT
// ==============================================================================

/// Rows touched by the first successful settlement of a payment.
#[derive(Debug, Clone, PartialEq)]
pub struct SettledPayment {
    pub payment: Payment,
    pub consultation: Consultation,
    pub patient: Patient,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Settled(SettledPayment),
    AlreadySettled,
    UnknownIntent,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Settled,
    AlreadySettled,
    Failed,
    Ignored,
}
