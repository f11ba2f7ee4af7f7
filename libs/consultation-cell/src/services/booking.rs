// libs/consultation-cell/src/services/booking.rs
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_models::auth::User;

use crate::error::{ConsultationError, CouponFailure};
use crate::models::{
    BookConsultationRequest, BookingResponse, Consultation, ConsultationPaymentStatus,
    ConsultationStatus, CouponApplication, CouponCheckRequest, Payment, PaymentMetadata,
    PaymentSession, PaymentStatus, PatientIdentity, Specialization,
};
use crate::ports::{ConsultationStore, PaymentGateway};
use crate::services::access::{authorize_identity, caller_id};
use crate::services::coupon::CouponEngine;
use crate::services::reconciliation::ReconciliationService;

/// Prefix of the session id recorded for bookings that never reach the provider.
pub const FREE_SESSION_PREFIX: &str = "free_";

pub struct BookingService {
    store: Arc<dyn ConsultationStore>,
    gateway: Arc<dyn PaymentGateway>,
    reconciliation: Arc<ReconciliationService>,
    coupons: CouponEngine,
    currency: String,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn ConsultationStore>,
        gateway: Arc<dyn PaymentGateway>,
        reconciliation: Arc<ReconciliationService>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            coupons: CouponEngine::new(Arc::clone(&store)),
            store,
            gateway,
            reconciliation,
            currency: currency.into(),
        }
    }

    /// Creates a consultation with its pending payment and opens a payment
    /// session for the discounted amount.
    ///
    /// Coupon problems abort before anything is written. If the provider
    /// fails after the rows are committed, the booking stays pending and the
    /// client can recover through [`BookingService::retry_payment_session`].
    pub async fn book(
        &self,
        user: &User,
        request: BookConsultationRequest,
    ) -> Result<BookingResponse, ConsultationError> {
        let caller = caller_id(user)?;
        let identity = PatientIdentity::from_columns(request.patient_id, request.patient_member_id)?;
        authorize_identity(self.store.as_ref(), caller, identity).await?;

        let specialization = self.specialization(request.specialization_id).await?;
        let now = Utc::now();

        let pricing = self
            .coupons
            .apply_coupon(request.coupon_code.as_deref(), Some(identity), specialization.price, now)
            .await?;
        if let Some(failure) = pricing.error {
            info!("Booking for {} rejected: {}", identity, failure);
            return Err(ConsultationError::CouponRejected(failure));
        }

        let consultation = Consultation {
            id: Uuid::new_v4(),
            patient_id: identity.patient_id(),
            patient_member_id: identity.patient_member_id(),
            doctor_id: None,
            specialization_id: specialization.id,
            fee_amount: pricing.fee,
            discount_amount: pricing.discount,
            final_amount: pricing.final_amount,
            coupon_code: pricing.coupon_code.clone(),
            payment_status: ConsultationPaymentStatus::Pending,
            consultation_status: ConsultationStatus::Pending,
            consultation_date: request.consultation_date,
            details: request.details,
            assign_at: None,
            assign_application: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        let payment = Payment {
            id: Uuid::new_v4(),
            consultation_id: consultation.id,
            amount: pricing.final_amount,
            currency: self.currency.clone(),
            status: PaymentStatus::Pending,
            payment_intent_id: None,
            client_secret: None,
            paid_at: None,
            failure_reason: None,
            created_at: now,
        };

        self.store
            .create_booking(&consultation, &payment, pricing.redemption.as_ref(), now)
            .await
            .map_err(|e| match e {
                ConsultationError::InvalidCoupon => ConsultationError::CouponRejected(CouponFailure::InvalidCoupon),
                ConsultationError::AlreadyUsed => ConsultationError::CouponRejected(CouponFailure::AlreadyUsed),
                other => other,
            })?;

        info!(
            "Booked consultation {} for {} (fee {}, discount {}, due {})",
            consultation.id, identity, pricing.fee, pricing.discount, pricing.final_amount
        );

        if payment.amount <= Decimal::ZERO {
            return self.settle_free_booking(consultation, payment).await;
        }

        self.open_session(consultation, payment).await
    }

    /// Payment session for a booking whose payment is still pending. The
    /// existing session is returned when one is attached; a new one is only
    /// requested after the provider call failed at booking time.
    pub async fn retry_payment_session(
        &self,
        user: &User,
        consultation_id: Uuid,
    ) -> Result<BookingResponse, ConsultationError> {
        let caller = caller_id(user)?;

        let consultation = self
            .store
            .find_consultation(consultation_id)
            .await?
            .ok_or_else(|| ConsultationError::NotFound(format!("Consultation {}", consultation_id)))?;
        authorize_identity(self.store.as_ref(), caller, consultation.identity()?).await?;

        let payment = self
            .store
            .find_payment_for_consultation(consultation_id)
            .await?
            .ok_or_else(|| ConsultationError::NotFound(format!("Payment for consultation {}", consultation_id)))?;

        if payment.status != PaymentStatus::Pending {
            return Err(ConsultationError::ValidationError(format!(
                "Payment is {}, only pending payments can be retried",
                payment.status
            )));
        }

        if payment.amount <= Decimal::ZERO {
            return self.settle_free_booking(consultation, payment).await;
        }

        // An attached intent may still be mid-payment; replacing it would orphan its webhook
        if let Some(intent_id) = payment.payment_intent_id.clone() {
            info!(
                "Consultation {} already has payment intent {}, returning it",
                consultation_id, intent_id
            );
            let session = PaymentSession {
                id: intent_id,
                client_secret: payment.client_secret.clone(),
            };
            return Ok(BookingResponse {
                consultation,
                payment,
                payment_session: Some(session),
            });
        }

        self.open_session(consultation, payment).await
    }

    /// Prices a specialization against a coupon without redeeming it.
    pub async fn quote(
        &self,
        user: &User,
        request: CouponCheckRequest,
    ) -> Result<CouponApplication, ConsultationError> {
        let identity = match (request.patient_id, request.patient_member_id) {
            (None, None) => None,
            (patient_id, member_id) => {
                let identity = PatientIdentity::from_columns(patient_id, member_id)?;
                authorize_identity(self.store.as_ref(), caller_id(user)?, identity).await?;
                Some(identity)
            }
        };

        let specialization = self.specialization(request.specialization_id).await?;

        let mut application = self
            .coupons
            .apply_coupon(Some(&request.coupon_code), identity, specialization.price, Utc::now())
            .await?;
        application.redemption = None;
        Ok(application)
    }

    async fn specialization(&self, specialization_id: Uuid) -> Result<Specialization, ConsultationError> {
        let specialization = self
            .store
            .find_specialization(specialization_id)
            .await?
            .ok_or_else(|| ConsultationError::NotFound(format!("Specialization {}", specialization_id)))?;

        if specialization.price <= Decimal::ZERO {
            return Err(ConsultationError::ValidationError(format!(
                "Specialization {} has no consultation price",
                specialization.name
            )));
        }
        Ok(specialization)
    }

    async fn open_session(
        &self,
        consultation: Consultation,
        payment: Payment,
    ) -> Result<BookingResponse, ConsultationError> {
        let metadata = PaymentMetadata {
            consultation_id: consultation.id,
            payment_id: payment.id,
        };

        let session = match self
            .gateway
            .create_payment_session(payment.amount, &payment.currency, metadata)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                error!(
                    "Payment session failed for consultation {}; booking left pending: {}",
                    consultation.id, e
                );
                return Err(e);
            }
        };

        let payment = self.store.attach_payment_session(payment.id, &session).await?;
        debug!("Payment {} linked to session {}", payment.id, session.id);

        Ok(BookingResponse {
            consultation,
            payment,
            payment_session: Some(session),
        })
    }

    /// Nothing to charge: record a synthetic session and settle it like a
    /// provider callback would.
    async fn settle_free_booking(
        &self,
        consultation: Consultation,
        payment: Payment,
    ) -> Result<BookingResponse, ConsultationError> {
        let session = PaymentSession {
            id: format!("{}{}", FREE_SESSION_PREFIX, payment.id),
            client_secret: None,
        };
        self.store.attach_payment_session(payment.id, &session).await?;

        let outcome = self.reconciliation.settle(&session.id, Some(payment.id)).await?;
        info!("Zero-amount consultation {} settled: {:?}", consultation.id, outcome);

        let consultation = self
            .store
            .find_consultation(consultation.id)
            .await?
            .unwrap_or(consultation);
        let payment = match self.store.find_payment_for_consultation(consultation.id).await? {
            Some(payment) => payment,
            None => {
                warn!("Payment row for consultation {} vanished after settlement", consultation.id);
                payment
            }
        };

        Ok(BookingResponse {
            consultation,
            payment,
            payment_session: None,
        })
    }
}

