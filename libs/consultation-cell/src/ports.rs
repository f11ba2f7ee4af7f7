// libs/consultation-cell/src/ports.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::ConsultationError;
use crate::models::{
    Consultation, Coupon, CouponRedemption, DoctorProfile, Patient, PatientIdentity,
    PatientMember, Payment, PaymentMetadata, PaymentSession, SettlementOutcome, Specialization,
};
use crate::services::notification::Notification;
use crate::services::payment_gateway::WebhookEvent;

/// Persistence boundary for the booking and settlement workflow.
///
/// Methods that mutate more than one row (`create_booking`, `settle_payment`,
/// `fail_payment`, `assign_doctor`, `complete_consultation`) must be atomic:
/// their precondition checks and writes happen in one transaction, so two
/// concurrent callers can never both pass the same check.
#[async_trait]
pub trait ConsultationStore: Send + Sync {
    async fn find_patient_by_user(&self, user_id: Uuid) -> Result<Option<Patient>, ConsultationError>;
    async fn find_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, ConsultationError>;
    async fn find_member(&self, member_id: Uuid) -> Result<Option<PatientMember>, ConsultationError>;
    async fn find_doctor_by_user(&self, user_id: Uuid) -> Result<Option<DoctorProfile>, ConsultationError>;
    async fn doctors_by_specialization(&self, specialization_id: Uuid) -> Result<Vec<DoctorProfile>, ConsultationError>;
    async fn find_specialization(&self, specialization_id: Uuid) -> Result<Option<Specialization>, ConsultationError>;

    /// Coupon matching `code` that satisfies [`Coupon::is_redeemable`] at `now`.
    async fn find_active_coupon(&self, code: &str, now: DateTime<Utc>) -> Result<Option<Coupon>, ConsultationError>;
    async fn has_redeemed(&self, coupon_id: Uuid, identity: PatientIdentity) -> Result<bool, ConsultationError>;

    /// Inserts the consultation and its payment. When a redemption is given
    /// the coupon is re-validated under lock, the redemption row inserted and
    /// the usage counter bumped in the same transaction; a lost race fails
    /// with `InvalidCoupon` or `AlreadyUsed` and nothing is written.
    async fn create_booking(
        &self,
        consultation: &Consultation,
        payment: &Payment,
        redemption: Option<&CouponRedemption>,
        now: DateTime<Utc>,
    ) -> Result<(), ConsultationError>;

    async fn attach_payment_session(&self, payment_id: Uuid, session: &PaymentSession) -> Result<Payment, ConsultationError>;
    async fn find_consultation(&self, consultation_id: Uuid) -> Result<Option<Consultation>, ConsultationError>;
    async fn find_payment_for_consultation(&self, consultation_id: Uuid) -> Result<Option<Payment>, ConsultationError>;

    /// Conditional `status <> completed -> completed`, cascading the
    /// consultation to paid and bumping the owning patient's consulted
    /// counter. Only the first caller for a payment gets `Settled`.
    ///
    /// `failed` is not terminal here: the provider may still capture the same
    /// intent after a declined attempt, so a failed payment can settle.
    ///
    /// The payment is located by `payment_intent_id`; when none matches and
    /// `payment_id` is given, that payment is settled instead and the intent
    /// recorded on it.
    async fn settle_payment(
        &self,
        payment_intent_id: &str,
        payment_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, ConsultationError>;

    /// Conditional `pending -> failed`. `None` when nothing changed.
    async fn fail_payment(
        &self,
        payment_intent_id: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, ConsultationError>;

    /// Claims an unassigned, paid consultation for `doctor`.
    async fn assign_doctor(
        &self,
        consultation_id: Uuid,
        doctor: &DoctorProfile,
        now: DateTime<Utc>,
    ) -> Result<Consultation, ConsultationError>;

    /// Moves a monitoring consultation owned by `doctor_id` to completed.
    async fn complete_consultation(
        &self,
        consultation_id: Uuid,
        doctor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Consultation, ConsultationError>;

    /// Paid, unassigned, pending consultations for a specialization, oldest first.
    async fn open_consultations(&self, specialization_id: Uuid) -> Result<Vec<Consultation>, ConsultationError>;
}

/// External payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_session(
        &self,
        amount: Decimal,
        currency: &str,
        metadata: PaymentMetadata,
    ) -> Result<PaymentSession, ConsultationError>;

    /// Authenticates a webhook delivery and decodes its event. Any failure,
    /// including a malformed body, is `InvalidSignature`.
    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<WebhookEvent, ConsultationError>;
}

/// Fire-and-forget side channel. Implementations log delivery failures and
/// never surface them to the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}
