// libs/consultation-cell/src/store/in_memory.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ConsultationError;
use crate::models::{
    Consultation, ConsultationPaymentStatus, ConsultationStatus, Coupon, CouponRedemption,
    CouponUser, DoctorProfile, Patient, PatientIdentity, PatientMember, Payment, PaymentSession,
    PaymentStatus, SettledPayment, SettlementOutcome, Specialization,
};
use crate::ports::ConsultationStore;

#[derive(Default)]
struct Tables {
    patients: HashMap<Uuid, Patient>,
    members: HashMap<Uuid, PatientMember>,
    doctors: HashMap<Uuid, DoctorProfile>,
    specializations: HashMap<Uuid, Specialization>,
    coupons: HashMap<Uuid, Coupon>,
    coupon_users: Vec<CouponUser>,
    consultations: HashMap<Uuid, Consultation>,
    payments: HashMap<Uuid, Payment>,
}

impl Tables {
    fn owning_patient_id(&self, identity: PatientIdentity) -> Option<Uuid> {
        match identity {
            PatientIdentity::Patient(id) => self.patients.contains_key(&id).then_some(id),
            PatientIdentity::Member(id) => self.members.get(&id).map(|member| member.patient_id),
        }
    }

    fn payment_id_for_intent(&self, payment_intent_id: &str) -> Option<Uuid> {
        self.payments
            .values()
            .find(|payment| payment.payment_intent_id.as_deref() == Some(payment_intent_id))
            .map(|payment| payment.id)
    }
}

/// Store backed by process memory.
///
/// Every operation takes the single table lock, which makes each trait
/// method one serializable transaction. Used by the test suites and by local
/// runs without a database.
#[derive(Default, Clone)]
pub struct InMemoryConsultationStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryConsultationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_patient(&self, patient: Patient) {
        self.tables.write().await.patients.insert(patient.id, patient);
    }

    pub async fn insert_member(&self, member: PatientMember) {
        self.tables.write().await.members.insert(member.id, member);
    }

    pub async fn insert_doctor(&self, doctor: DoctorProfile) {
        self.tables.write().await.doctors.insert(doctor.id, doctor);
    }

    pub async fn insert_specialization(&self, specialization: Specialization) {
        self.tables.write().await.specializations.insert(specialization.id, specialization);
    }

    pub async fn insert_coupon(&self, coupon: Coupon) {
        self.tables.write().await.coupons.insert(coupon.id, coupon);
    }

    pub async fn coupon_by_code(&self, code: &str) -> Option<Coupon> {
        self.tables.read().await.coupons.values().find(|c| c.code == code).cloned()
    }

    pub async fn coupon_users(&self, coupon_id: Uuid) -> Vec<CouponUser> {
        self.tables
            .read()
            .await
            .coupon_users
            .iter()
            .filter(|row| row.coupon_id == coupon_id)
            .cloned()
            .collect()
    }

    pub async fn patient(&self, patient_id: Uuid) -> Option<Patient> {
        self.tables.read().await.patients.get(&patient_id).cloned()
    }

    pub async fn consultations(&self) -> Vec<Consultation> {
        self.tables.read().await.consultations.values().cloned().collect()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.tables.read().await.payments.values().cloned().collect()
    }
}

#[async_trait]
impl ConsultationStore for InMemoryConsultationStore {
    async fn find_patient_by_user(&self, user_id: Uuid) -> Result<Option<Patient>, ConsultationError> {
        let tables = self.tables.read().await;
        Ok(tables.patients.values().find(|p| p.user_id == user_id).cloned())
    }

    async fn find_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, ConsultationError> {
        Ok(self.tables.read().await.patients.get(&patient_id).cloned())
    }

    async fn find_member(&self, member_id: Uuid) -> Result<Option<PatientMember>, ConsultationError> {
        Ok(self.tables.read().await.members.get(&member_id).cloned())
    }

    async fn find_doctor_by_user(&self, user_id: Uuid) -> Result<Option<DoctorProfile>, ConsultationError> {
        let tables = self.tables.read().await;
        Ok(tables.doctors.values().find(|d| d.user_id == user_id).cloned())
    }

    async fn doctors_by_specialization(&self, specialization_id: Uuid) -> Result<Vec<DoctorProfile>, ConsultationError> {
        let tables = self.tables.read().await;
        Ok(tables
            .doctors
            .values()
            .filter(|d| d.specialization_id == specialization_id)
            .cloned()
            .collect())
    }

    async fn find_specialization(&self, specialization_id: Uuid) -> Result<Option<Specialization>, ConsultationError> {
        Ok(self.tables.read().await.specializations.get(&specialization_id).cloned())
    }

    async fn find_active_coupon(&self, code: &str, now: DateTime<Utc>) -> Result<Option<Coupon>, ConsultationError> {
        let tables = self.tables.read().await;
        Ok(tables
            .coupons
            .values()
            .find(|c| c.code == code && c.is_redeemable(now))
            .cloned())
    }

    async fn has_redeemed(&self, coupon_id: Uuid, identity: PatientIdentity) -> Result<bool, ConsultationError> {
        let tables = self.tables.read().await;
        Ok(tables.coupon_users.iter().any(|row| {
            row.coupon_id == coupon_id
                && row.patient_id == identity.patient_id()
                && row.patient_member_id == identity.patient_member_id()
        }))
    }

    async fn create_booking(
        &self,
        consultation: &Consultation,
        payment: &Payment,
        redemption: Option<&CouponRedemption>,
        now: DateTime<Utc>,
    ) -> Result<(), ConsultationError> {
        let mut tables = self.tables.write().await;

        if let Some(redemption) = redemption {
            let already_redeemed = tables.coupon_users.iter().any(|row| {
                row.coupon_id == redemption.coupon_id
                    && row.patient_id == redemption.identity.patient_id()
                    && row.patient_member_id == redemption.identity.patient_member_id()
            });

            let coupon = tables
                .coupons
                .get_mut(&redemption.coupon_id)
                .filter(|c| c.is_redeemable(now))
                .ok_or(ConsultationError::InvalidCoupon)?;

            if already_redeemed {
                return Err(ConsultationError::AlreadyUsed);
            }
            coupon.record_use();

            tables.coupon_users.push(CouponUser {
                id: Uuid::new_v4(),
                coupon_id: redemption.coupon_id,
                patient_id: redemption.identity.patient_id(),
                patient_member_id: redemption.identity.patient_member_id(),
                used_at: now,
            });
        }

        tables.consultations.insert(consultation.id, consultation.clone());
        tables.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn attach_payment_session(&self, payment_id: Uuid, session: &PaymentSession) -> Result<Payment, ConsultationError> {
        let mut tables = self.tables.write().await;
        let payment = tables
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| ConsultationError::NotFound(format!("Payment {}", payment_id)))?;

        payment.payment_intent_id = Some(session.id.clone());
        payment.client_secret = session.client_secret.clone();
        Ok(payment.clone())
    }

    async fn find_consultation(&self, consultation_id: Uuid) -> Result<Option<Consultation>, ConsultationError> {
        Ok(self.tables.read().await.consultations.get(&consultation_id).cloned())
    }

    async fn find_payment_for_consultation(&self, consultation_id: Uuid) -> Result<Option<Payment>, ConsultationError> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .find(|p| p.consultation_id == consultation_id)
            .cloned())
    }

    async fn settle_payment(
        &self,
        payment_intent_id: &str,
        fallback_payment_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, ConsultationError> {
        let mut tables = self.tables.write().await;

        let by_intent = tables.payment_id_for_intent(payment_intent_id);
        let Some(payment_id) = by_intent
            .or_else(|| fallback_payment_id.filter(|id| tables.payments.contains_key(id)))
        else {
            return Ok(SettlementOutcome::UnknownIntent);
        };
        let payment = tables.payments[&payment_id].clone();
        if payment.status == PaymentStatus::Completed {
            return Ok(SettlementOutcome::AlreadySettled);
        }

        // Resolve everything before the first write so a failure leaves no partial state
        let consultation = tables
            .consultations
            .get(&payment.consultation_id)
            .cloned()
            .ok_or_else(|| ConsultationError::DatabaseError(format!(
                "Payment {} references missing consultation {}", payment.id, payment.consultation_id
            )))?;
        let patient_id = tables
            .owning_patient_id(consultation.identity()?)
            .ok_or_else(|| ConsultationError::DatabaseError(format!(
                "Consultation {} has no owning patient", consultation.id
            )))?;

        let payment = tables.payments.get_mut(&payment_id).map(|p| {
            p.status = PaymentStatus::Completed;
            p.paid_at = Some(now);
            if by_intent.is_none() {
                p.payment_intent_id = Some(payment_intent_id.to_string());
            }
            p.clone()
        });
        let consultation = tables.consultations.get_mut(&consultation.id).map(|c| {
            c.payment_status = ConsultationPaymentStatus::Paid;
            c.updated_at = now;
            c.clone()
        });
        let patient = tables.patients.get_mut(&patient_id).map(|p| {
            p.consulted += 1;
            p.clone()
        });

        match (payment, consultation, patient) {
            (Some(payment), Some(consultation), Some(patient)) => {
                Ok(SettlementOutcome::Settled(SettledPayment { payment, consultation, patient }))
            }
            _ => Err(ConsultationError::DatabaseError("Settlement rows vanished under lock".to_string())),
        }
    }

    async fn fail_payment(
        &self,
        payment_intent_id: &str,
        reason: Option<&str>,
        _now: DateTime<Utc>,
    ) -> Result<Option<Payment>, ConsultationError> {
        let mut tables = self.tables.write().await;
        let Some(payment_id) = tables.payment_id_for_intent(payment_intent_id) else {
            return Ok(None);
        };

        Ok(tables
            .payments
            .get_mut(&payment_id)
            .filter(|p| p.status == PaymentStatus::Pending)
            .map(|p| {
                p.status = PaymentStatus::Failed;
                p.failure_reason = reason.map(str::to_string);
                p.clone()
            }))
    }

    async fn assign_doctor(
        &self,
        consultation_id: Uuid,
        doctor: &DoctorProfile,
        now: DateTime<Utc>,
    ) -> Result<Consultation, ConsultationError> {
        let mut tables = self.tables.write().await;

        let paid = tables
            .payments
            .values()
            .any(|p| p.consultation_id == consultation_id && p.status == PaymentStatus::Completed);

        let consultation = tables
            .consultations
            .get_mut(&consultation_id)
            .ok_or_else(|| ConsultationError::NotFound(format!("Consultation {}", consultation_id)))?;

        if consultation.is_assigned() {
            return Err(ConsultationError::AlreadyAssigned);
        }
        if !paid {
            return Err(ConsultationError::PaymentRequired);
        }
        if !consultation.consultation_status.can_transition_to(ConsultationStatus::Monitoring) {
            return Err(ConsultationError::InvalidStatusTransition {
                from: consultation.consultation_status,
                to: ConsultationStatus::Monitoring,
            });
        }

        consultation.doctor_id = Some(doctor.id);
        consultation.consultation_status = ConsultationStatus::Monitoring;
        consultation.assign_at = Some(now);
        consultation.assign_application = Some(doctor.full_name.clone());
        consultation.updated_at = now;
        Ok(consultation.clone())
    }

    async fn complete_consultation(
        &self,
        consultation_id: Uuid,
        doctor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Consultation, ConsultationError> {
        let mut tables = self.tables.write().await;
        let consultation = tables
            .consultations
            .get_mut(&consultation_id)
            .ok_or_else(|| ConsultationError::NotFound(format!("Consultation {}", consultation_id)))?;

        if consultation.doctor_id != Some(doctor_id) {
            return Err(ConsultationError::Unauthorized(
                "Consultation is assigned to another doctor".to_string(),
            ));
        }
        if !consultation.consultation_status.can_transition_to(ConsultationStatus::Completed) {
            return Err(ConsultationError::InvalidStatusTransition {
                from: consultation.consultation_status,
                to: ConsultationStatus::Completed,
            });
        }

        consultation.consultation_status = ConsultationStatus::Completed;
        consultation.payment_status = ConsultationPaymentStatus::Completed;
        consultation.completed_at = Some(now);
        consultation.updated_at = now;
        Ok(consultation.clone())
    }

    async fn open_consultations(&self, specialization_id: Uuid) -> Result<Vec<Consultation>, ConsultationError> {
        let tables = self.tables.read().await;
        let mut open: Vec<Consultation> = tables
            .consultations
            .values()
            .filter(|c| {
                c.specialization_id == specialization_id
                    && !c.is_assigned()
                    && c.payment_status == ConsultationPaymentStatus::Paid
                    && c.consultation_status == ConsultationStatus::Pending
            })
            .cloned()
            .collect();
        open.sort_by_key(|c| c.created_at);
        Ok(open)
    }
}
