// libs/consultation-cell/src/store/supabase.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::error::ConsultationError;
use crate::models::{
    Consultation, ConsultationStatus, Coupon, CouponRedemption, DoctorProfile, Patient,
    PatientIdentity, PatientMember, Payment, PaymentSession, SettledPayment, SettlementOutcome,
    Specialization,
};
use crate::ports::ConsultationStore;

/// Store over Supabase PostgREST.
///
/// Reads go through plain table queries. Every multi-row mutation is a
/// Postgres function (see `migrations/`) so that its checks and writes run in
/// one transaction under row locks. Calls use the service role key; access
/// control happens in the services before the store is reached.
pub struct SupabaseConsultationStore {
    supabase: SupabaseClient,
    service_key: String,
}

/// Envelope returned by every RPC: an `outcome` tag plus the touched rows.
#[derive(Debug, Deserialize)]
struct RpcOutcome {
    outcome: String,
    #[serde(default)]
    from: Option<ConsultationStatus>,
    #[serde(default)]
    payment: Option<Payment>,
    #[serde(default)]
    consultation: Option<Consultation>,
    #[serde(default)]
    patient: Option<Patient>,
}

impl SupabaseConsultationStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            service_key: config.supabase_service_role_key.clone(),
        }
    }

    async fn select<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ConsultationError> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(&self.service_key), None)
            .await?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| {
                    error!("Failed to decode row from {}: {}", path, e);
                    ConsultationError::DatabaseError(format!("Failed to decode row: {}", e))
                })
            })
            .collect()
    }

    async fn select_one<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ConsultationError> {
        Ok(self.select(path).await?.into_iter().next())
    }

    async fn call(&self, function: &str, args: Value) -> Result<RpcOutcome, ConsultationError> {
        debug!("Calling {} RPC", function);
        let value: Value = self.supabase.rpc(function, Some(&self.service_key), args).await?;
        serde_json::from_value(value).map_err(|e| {
            ConsultationError::DatabaseError(format!("Unexpected {} response: {}", function, e))
        })
    }

    fn unexpected(function: &str, outcome: &str) -> ConsultationError {
        ConsultationError::DatabaseError(format!("{} returned unexpected outcome '{}'", function, outcome))
    }

    fn missing(function: &str, field: &str) -> ConsultationError {
        ConsultationError::DatabaseError(format!("{} response is missing {}", function, field))
    }

    fn redemption_columns(identity: PatientIdentity) -> String {
        match identity {
            PatientIdentity::Patient(id) => format!("patient_id=eq.{}&patient_member_id=is.null", id),
            PatientIdentity::Member(id) => format!("patient_member_id=eq.{}&patient_id=is.null", id),
        }
    }
}

#[async_trait]
impl ConsultationStore for SupabaseConsultationStore {
    async fn find_patient_by_user(&self, user_id: Uuid) -> Result<Option<Patient>, ConsultationError> {
        self.select_one(&format!("/rest/v1/patients?user_id=eq.{}&select=id,user_id,full_name,consulted", user_id))
            .await
    }

    async fn find_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, ConsultationError> {
        self.select_one(&format!("/rest/v1/patients?id=eq.{}&select=id,user_id,full_name,consulted", patient_id))
            .await
    }

    async fn find_member(&self, member_id: Uuid) -> Result<Option<PatientMember>, ConsultationError> {
        self.select_one(&format!("/rest/v1/patient_members?id=eq.{}&select=id,patient_id,full_name", member_id))
            .await
    }

    async fn find_doctor_by_user(&self, user_id: Uuid) -> Result<Option<DoctorProfile>, ConsultationError> {
        self.select_one(&format!(
            "/rest/v1/doctors?user_id=eq.{}&select=id,user_id,full_name,specialization_id",
            user_id
        ))
        .await
    }

    async fn doctors_by_specialization(&self, specialization_id: Uuid) -> Result<Vec<DoctorProfile>, ConsultationError> {
        self.select(&format!(
            "/rest/v1/doctors?specialization_id=eq.{}&select=id,user_id,full_name,specialization_id",
            specialization_id
        ))
        .await
    }

    async fn find_specialization(&self, specialization_id: Uuid) -> Result<Option<Specialization>, ConsultationError> {
        self.select_one(&format!("/rest/v1/specializations?id=eq.{}&select=id,name,price", specialization_id))
            .await
    }

    async fn find_active_coupon(&self, code: &str, now: DateTime<Utc>) -> Result<Option<Coupon>, ConsultationError> {
        let now = urlencoding::encode(&now.to_rfc3339()).into_owned();
        let coupons: Vec<Coupon> = self
            .select(&format!(
                "/rest/v1/coupons?code=eq.{}&status=eq.active&valid_from=lte.{}&valid_to=gte.{}",
                urlencoding::encode(code),
                now,
                now
            ))
            .await?;

        // PostgREST cannot compare two columns, so the usage cap is checked here
        Ok(coupons.into_iter().find(|c| c.used_count < c.usage_limit))
    }

    async fn has_redeemed(&self, coupon_id: Uuid, identity: PatientIdentity) -> Result<bool, ConsultationError> {
        let rows: Vec<Value> = self
            .select(&format!(
                "/rest/v1/coupon_users?coupon_id=eq.{}&{}&select=id",
                coupon_id,
                Self::redemption_columns(identity)
            ))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn create_booking(
        &self,
        consultation: &Consultation,
        payment: &Payment,
        redemption: Option<&CouponRedemption>,
        now: DateTime<Utc>,
    ) -> Result<(), ConsultationError> {
        let args = json!({
            "p_consultation": consultation,
            "p_payment": payment,
            "p_coupon_id": redemption.map(|r| r.coupon_id),
            "p_patient_id": redemption.and_then(|r| r.identity.patient_id()),
            "p_patient_member_id": redemption.and_then(|r| r.identity.patient_member_id()),
            "p_now": now,
        });

        let result = self.call("book_consultation", args).await?;
        match result.outcome.as_str() {
            "booked" => Ok(()),
            "invalid_coupon" => Err(ConsultationError::InvalidCoupon),
            "already_used" => Err(ConsultationError::AlreadyUsed),
            other => Err(Self::unexpected("book_consultation", other)),
        }
    }

    async fn attach_payment_session(&self, payment_id: Uuid, session: &PaymentSession) -> Result<Payment, ConsultationError> {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &format!("/rest/v1/payments?id=eq.{}", payment_id),
                Some(&self.service_key),
                Some(json!({
                    "payment_intent_id": session.id,
                    "client_secret": session.client_secret,
                })),
                Some(headers),
            )
            .await?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ConsultationError::NotFound(format!("Payment {}", payment_id)))?;
        serde_json::from_value(row)
            .map_err(|e| ConsultationError::DatabaseError(format!("Failed to decode payment: {}", e)))
    }

    async fn find_consultation(&self, consultation_id: Uuid) -> Result<Option<Consultation>, ConsultationError> {
        self.select_one(&format!("/rest/v1/consultations?id=eq.{}", consultation_id)).await
    }

    async fn find_payment_for_consultation(&self, consultation_id: Uuid) -> Result<Option<Payment>, ConsultationError> {
        self.select_one(&format!(
            "/rest/v1/payments?consultation_id=eq.{}&order=created_at.desc&limit=1",
            consultation_id
        ))
        .await
    }

    async fn settle_payment(
        &self,
        payment_intent_id: &str,
        payment_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, ConsultationError> {
        let result = self
            .call(
                "settle_payment",
                json!({
                    "p_payment_intent_id": payment_intent_id,
                    "p_payment_id": payment_id,
                    "p_now": now
                }),
            )
            .await?;

        match result.outcome.as_str() {
            "settled" => Ok(SettlementOutcome::Settled(SettledPayment {
                payment: result.payment.ok_or_else(|| Self::missing("settle_payment", "payment"))?,
                consultation: result
                    .consultation
                    .ok_or_else(|| Self::missing("settle_payment", "consultation"))?,
                patient: result.patient.ok_or_else(|| Self::missing("settle_payment", "patient"))?,
            })),
            "already_settled" => Ok(SettlementOutcome::AlreadySettled),
            "unknown_intent" => Ok(SettlementOutcome::UnknownIntent),
            other => Err(Self::unexpected("settle_payment", other)),
        }
    }

    async fn fail_payment(
        &self,
        payment_intent_id: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, ConsultationError> {
        let result = self
            .call(
                "fail_payment",
                json!({ "p_payment_intent_id": payment_intent_id, "p_reason": reason, "p_now": now }),
            )
            .await?;

        match result.outcome.as_str() {
            "failed" => Ok(Some(result.payment.ok_or_else(|| Self::missing("fail_payment", "payment"))?)),
            "unchanged" => Ok(None),
            other => Err(Self::unexpected("fail_payment", other)),
        }
    }

    async fn assign_doctor(
        &self,
        consultation_id: Uuid,
        doctor: &DoctorProfile,
        now: DateTime<Utc>,
    ) -> Result<Consultation, ConsultationError> {
        let result = self
            .call(
                "accept_consultation",
                json!({
                    "p_consultation_id": consultation_id,
                    "p_doctor_id": doctor.id,
                    "p_doctor_name": doctor.full_name,
                    "p_now": now,
                }),
            )
            .await?;

        match result.outcome.as_str() {
            "assigned" => result
                .consultation
                .ok_or_else(|| Self::missing("accept_consultation", "consultation")),
            "not_found" => Err(ConsultationError::NotFound(format!("Consultation {}", consultation_id))),
            "already_assigned" => Err(ConsultationError::AlreadyAssigned),
            "payment_required" => Err(ConsultationError::PaymentRequired),
            "invalid_transition" => Err(ConsultationError::InvalidStatusTransition {
                from: result.from.ok_or_else(|| Self::missing("accept_consultation", "from"))?,
                to: ConsultationStatus::Monitoring,
            }),
            other => Err(Self::unexpected("accept_consultation", other)),
        }
    }

    async fn complete_consultation(
        &self,
        consultation_id: Uuid,
        doctor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Consultation, ConsultationError> {
        let result = self
            .call(
                "complete_consultation",
                json!({ "p_consultation_id": consultation_id, "p_doctor_id": doctor_id, "p_now": now }),
            )
            .await?;

        match result.outcome.as_str() {
            "completed" => result
                .consultation
                .ok_or_else(|| Self::missing("complete_consultation", "consultation")),
            "not_found" => Err(ConsultationError::NotFound(format!("Consultation {}", consultation_id))),
            "wrong_doctor" => Err(ConsultationError::Unauthorized(
                "Consultation is assigned to another doctor".to_string(),
            )),
            "invalid_transition" => Err(ConsultationError::InvalidStatusTransition {
                from: result.from.ok_or_else(|| Self::missing("complete_consultation", "from"))?,
                to: ConsultationStatus::Completed,
            }),
            other => Err(Self::unexpected("complete_consultation", other)),
        }
    }

    async fn open_consultations(&self, specialization_id: Uuid) -> Result<Vec<Consultation>, ConsultationError> {
        self.select(&format!(
            "/rest/v1/consultations?specialization_id=eq.{}&doctor_id=is.null&payment_status=eq.paid&consultation_status=eq.pending&order=created_at.asc",
            specialization_id
        ))
        .await
    }
}
