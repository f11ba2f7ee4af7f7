// libs/consultation-cell/tests/common/mod.rs
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use consultation_cell::services::{RecordingNotifier, StripeGateway};
use consultation_cell::{
    BookConsultationRequest, BookingResponse, ConsultationError, ConsultationState, Coupon,
    CouponStatus, DoctorProfile, InMemoryConsultationStore, Patient, PatientMember,
    Specialization, WebhookOutcome,
};
use shared_config::AppConfig;
use shared_models::auth::User;
use shared_utils::test_utils::{TestConfig, TestUser, WebhookTestUtils};

pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";

pub struct Account<T> {
    pub user: TestUser,
    pub profile: T,
}

impl<T> Account<T> {
    pub fn auth(&self) -> User {
        self.user.to_user()
    }
}

/// In-memory store, recording notifier and a Stripe gateway pointed at a
/// mock server, seeded with one specialization, one patient with a member
/// and two doctors.
pub struct Fixture {
    pub provider: MockServer,
    pub config: Arc<AppConfig>,
    pub store: InMemoryConsultationStore,
    pub notifier: RecordingNotifier,
    pub state: Arc<ConsultationState>,
    pub specialization: Specialization,
    pub patient: Account<Patient>,
    pub member: PatientMember,
    pub doctors: Vec<Account<DoctorProfile>>,
}

impl Fixture {
    pub async fn new() -> Self {
        let provider = MockServer::start().await;
        let config = TestConfig {
            payment_provider_base_url: provider.uri(),
            ..TestConfig::default()
        }
        .to_arc();

        let store = InMemoryConsultationStore::new();
        let notifier = RecordingNotifier::new();

        let specialization = Specialization {
            id: Uuid::new_v4(),
            name: "Dermatology".to_string(),
            price: dec!(109.00),
        };
        store.insert_specialization(specialization.clone()).await;

        let patient = Self::seed_patient(&store, "Amina Yusuf").await;

        let member = PatientMember {
            id: Uuid::new_v4(),
            patient_id: patient.profile.id,
            full_name: "Omar Yusuf".to_string(),
        };
        store.insert_member(member.clone()).await;

        let mut doctors = Vec::new();
        for name in ["Dr. Lena Park", "Dr. Tomas Reyes"] {
            let user = TestUser::doctor(&format!("{}@clinic.test", name.replace(' ', "").to_lowercase()));
            let profile = DoctorProfile {
                id: Uuid::new_v4(),
                user_id: user.user_id(),
                full_name: name.to_string(),
                specialization_id: specialization.id,
            };
            store.insert_doctor(profile.clone()).await;
            doctors.push(Account { user, profile });
        }

        let gateway = StripeGateway::new(&config).expect("gateway builds from test config");
        let state = Arc::new(ConsultationState::new(
            Arc::clone(&config),
            Arc::new(store.clone()),
            Arc::new(gateway),
            Arc::new(notifier.clone()),
        ));

        Self {
            provider,
            config,
            store,
            notifier,
            state,
            specialization,
            patient,
            member,
            doctors,
        }
    }

    pub async fn seed_patient(store: &InMemoryConsultationStore, name: &str) -> Account<Patient> {
        let user = TestUser::patient(&format!("{}@example.com", name.replace(' ', ".").to_lowercase()));
        let profile = Patient {
            id: Uuid::new_v4(),
            user_id: user.user_id(),
            full_name: name.to_string(),
            consulted: 0,
        };
        store.insert_patient(profile.clone()).await;
        Account { user, profile }
    }

    pub async fn add_patient(&self, name: &str) -> Account<Patient> {
        Self::seed_patient(&self.store, name).await
    }

    pub async fn add_coupon(
        &self,
        code: &str,
        percentage: Decimal,
        amount: Decimal,
        usage_limit: i32,
        used_count: i32,
    ) -> Coupon {
        let now = Utc::now();
        let coupon = Coupon {
            id: Uuid::new_v4(),
            code: code.to_string(),
            discount_percentage: percentage,
            discount_amount: amount,
            valid_from: now - Duration::days(7),
            valid_to: now + Duration::days(30),
            usage_limit,
            used_count,
            status: if used_count >= usage_limit { CouponStatus::Used } else { CouponStatus::Active },
        };
        self.store.insert_coupon(coupon.clone()).await;
        coupon
    }

    /// Answers the next payment-intent request with `intent_id`.
    pub async fn expect_payment_intent(&self, intent_id: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(WebhookTestUtils::payment_intent(
                intent_id,
                "requires_payment_method",
                json!({}),
            )))
            .up_to_n_times(1)
            .mount(&self.provider)
            .await;
    }

    pub fn request_for_patient(&self, coupon_code: Option<&str>) -> BookConsultationRequest {
        BookConsultationRequest {
            patient_id: Some(self.patient.profile.id),
            patient_member_id: None,
            specialization_id: self.specialization.id,
            coupon_code: coupon_code.map(str::to_string),
            consultation_date: Some(Utc::now() + Duration::days(1)),
            details: Some("Persistent rash on forearm".to_string()),
        }
    }

    pub fn request_for_member(&self, coupon_code: Option<&str>) -> BookConsultationRequest {
        BookConsultationRequest {
            patient_id: None,
            patient_member_id: Some(self.member.id),
            ..self.request_for_patient(coupon_code)
        }
    }

    pub async fn book(&self, coupon_code: Option<&str>) -> Result<BookingResponse, ConsultationError> {
        self.state
            .booking
            .book(&self.patient.auth(), self.request_for_patient(coupon_code))
            .await
    }

    pub async fn deliver(&self, event_type: &str, intent_id: &str) -> Result<WebhookOutcome, ConsultationError> {
        self.deliver_signed(WebhookTestUtils::payment_intent_event(event_type, intent_id))
            .await
    }

    /// Delivers an event whose intent carries our `payment_id` metadata.
    pub async fn deliver_for_payment(
        &self,
        event_type: &str,
        intent_id: &str,
        payment_id: Uuid,
    ) -> Result<WebhookOutcome, ConsultationError> {
        self.deliver_signed(WebhookTestUtils::payment_intent_event_with_metadata(
            event_type,
            intent_id,
            json!({ "payment_id": payment_id.to_string() }),
        ))
        .await
    }

    async fn deliver_signed(&self, payload: String) -> Result<WebhookOutcome, ConsultationError> {
        let signature = WebhookTestUtils::sign_now(&payload, &self.config.payment_webhook_secret);
        self.state
            .reconciliation
            .handle_webhook(payload.as_bytes(), &signature)
            .await
    }

    /// Books for the fixture patient and settles the payment under `intent_id`.
    pub async fn paid_booking(&self, intent_id: &str) -> BookingResponse {
        self.expect_payment_intent(intent_id).await;
        let booking = self.book(None).await.expect("booking succeeds");
        let outcome = self.deliver(PAYMENT_SUCCEEDED, intent_id).await.expect("webhook accepted");
        assert_eq!(outcome, WebhookOutcome::Settled);
        booking
    }

    pub async fn provider_calls(&self) -> usize {
        self.provider
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }
}
