// libs/consultation-cell/tests/booking_test.rs
mod common;

use assert_matches::assert_matches;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::{Fixture, PAYMENT_SUCCEEDED};
use consultation_cell::{
    ConsultationError, ConsultationPaymentStatus, ConsultationStatus, PatientMember, PaymentStatus,
    Specialization, WebhookOutcome,
};
use shared_utils::test_utils::WebhookTestUtils;

#[tokio::test]
async fn test_booking_opens_payment_session() {
    let fx = Fixture::new().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(header("Authorization", "Bearer sk_test_key"))
        .and(header_exists("Idempotency-Key"))
        .and(body_string_contains("amount=10900"))
        .and(body_string_contains("currency=eur"))
        .respond_with(ResponseTemplate::new(200).set_body_json(WebhookTestUtils::payment_intent(
            "pi_full_price",
            "requires_payment_method",
            serde_json::json!({}),
        )))
        .expect(1)
        .mount(&fx.provider)
        .await;

    let booking = fx.book(None).await.unwrap();

    assert_eq!(booking.consultation.patient_id, Some(fx.patient.profile.id));
    assert_eq!(booking.consultation.payment_status, ConsultationPaymentStatus::Pending);
    assert_eq!(booking.consultation.consultation_status, ConsultationStatus::Pending);
    assert_eq!(booking.consultation.final_amount, dec!(109.00));
    assert_eq!(booking.payment.status, PaymentStatus::Pending);
    assert_eq!(booking.payment.currency, "eur");
    assert_eq!(booking.payment.payment_intent_id.as_deref(), Some("pi_full_price"));

    let session = booking.payment_session.unwrap();
    assert_eq!(session.id, "pi_full_price");
    assert_eq!(session.client_secret.as_deref(), Some("pi_full_price_secret_test"));

    let requests = fx.provider.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body).to_string();
    assert!(body.contains(&booking.consultation.id.to_string()));
    assert!(body.contains(&booking.payment.id.to_string()));
    assert_eq!(
        requests[0].headers.get("Idempotency-Key").and_then(|v| v.to_str().ok()),
        Some(booking.payment.id.to_string().as_str())
    );
}

#[tokio::test]
async fn test_booking_requires_exactly_one_identity() {
    let fx = Fixture::new().await;

    let mut both = fx.request_for_patient(None);
    both.patient_member_id = Some(fx.member.id);
    let result = fx.state.booking.book(&fx.patient.auth(), both).await;
    assert_matches!(result, Err(ConsultationError::ValidationError(_)));

    let mut neither = fx.request_for_patient(None);
    neither.patient_id = None;
    let result = fx.state.booking.book(&fx.patient.auth(), neither).await;
    assert_matches!(result, Err(ConsultationError::ValidationError(_)));

    assert!(fx.store.consultations().await.is_empty());
}

#[tokio::test]
async fn test_booking_for_someone_elses_member_is_unauthorized() {
    let fx = Fixture::new().await;
    let stranger = fx.add_patient("Jonas Weber").await;
    let strangers_member = PatientMember {
        id: Uuid::new_v4(),
        patient_id: stranger.profile.id,
        full_name: "Mia Weber".to_string(),
    };
    fx.store.insert_member(strangers_member.clone()).await;

    let mut request = fx.request_for_member(None);
    request.patient_member_id = Some(strangers_member.id);
    let result = fx.state.booking.book(&fx.patient.auth(), request).await;
    assert_matches!(result, Err(ConsultationError::Unauthorized(_)));

    let result = fx
        .state
        .booking
        .book(&stranger.auth(), fx.request_for_patient(None))
        .await;
    assert_matches!(result, Err(ConsultationError::Unauthorized(_)));
}

#[tokio::test]
async fn test_booking_unknown_specialization() {
    let fx = Fixture::new().await;
    let mut request = fx.request_for_patient(None);
    request.specialization_id = Uuid::new_v4();

    let result = fx.state.booking.book(&fx.patient.auth(), request).await;
    assert_matches!(result, Err(ConsultationError::NotFound(_)));
}

#[tokio::test]
async fn test_booking_unpriced_specialization() {
    let fx = Fixture::new().await;
    let unpriced = Specialization {
        id: Uuid::new_v4(),
        name: "Triage".to_string(),
        price: Decimal::ZERO,
    };
    fx.store.insert_specialization(unpriced.clone()).await;

    let mut request = fx.request_for_patient(None);
    request.specialization_id = unpriced.id;
    let result = fx.state.booking.book(&fx.patient.auth(), request).await;

    assert_matches!(result, Err(ConsultationError::ValidationError(_)));
    assert!(fx.store.consultations().await.is_empty());
}

#[tokio::test]
async fn test_provider_outage_keeps_pending_booking_and_retry_recovers() {
    let fx = Fixture::new().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
            "error": { "type": "api_error", "message": "upstream unavailable" }
        })))
        .up_to_n_times(2)
        .expect(2)
        .mount(&fx.provider)
        .await;

    let result = fx.book(None).await;
    assert_matches!(result, Err(ConsultationError::ExternalProviderError(_)));

    let consultations = fx.store.consultations().await;
    assert_eq!(consultations.len(), 1);
    let payments = fx.store.payments().await;
    assert_eq!(payments[0].status, PaymentStatus::Pending);
    assert!(payments[0].payment_intent_id.is_none());

    fx.expect_payment_intent("pi_recovered").await;
    let retried = fx
        .state
        .booking
        .retry_payment_session(&fx.patient.auth(), consultations[0].id)
        .await
        .unwrap();

    assert_eq!(retried.payment.id, payments[0].id);
    assert_eq!(retried.payment.payment_intent_id.as_deref(), Some("pi_recovered"));
    assert_eq!(fx.provider_calls().await, 3);
}

#[tokio::test]
async fn test_retry_returns_attached_session_and_first_intent_settles() {
    let fx = Fixture::new().await;
    fx.expect_payment_intent("pi_first").await;
    let booking = fx.book(None).await.unwrap();

    fx.expect_payment_intent("pi_second").await;
    let retried = fx
        .state
        .booking
        .retry_payment_session(&fx.patient.auth(), booking.consultation.id)
        .await
        .unwrap();

    let session = retried.payment_session.unwrap();
    assert_eq!(session.id, "pi_first");
    assert_eq!(session.client_secret.as_deref(), Some("pi_first_secret_test"));
    assert_eq!(retried.payment.payment_intent_id.as_deref(), Some("pi_first"));
    assert_eq!(fx.provider_calls().await, 1);

    let outcome = fx.deliver(PAYMENT_SUCCEEDED, "pi_first").await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Settled);
    assert_eq!(
        fx.store.consultations().await[0].payment_status,
        ConsultationPaymentStatus::Paid
    );
}

#[tokio::test]
async fn test_client_errors_from_provider_are_not_retried() {
    let fx = Fixture::new().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": { "type": "invalid_request_error", "message": "Invalid currency" }
        })))
        .mount(&fx.provider)
        .await;

    let result = fx.book(None).await;

    assert_matches!(result, Err(ConsultationError::ExternalProviderError(_)));
    assert_eq!(fx.provider_calls().await, 1);
}

#[tokio::test]
async fn test_retry_rejected_once_paid() {
    let fx = Fixture::new().await;
    let booking = fx.paid_booking("pi_paid").await;

    let result = fx
        .state
        .booking
        .retry_payment_session(&fx.patient.auth(), booking.consultation.id)
        .await;
    assert_matches!(result, Err(ConsultationError::ValidationError(_)));
}

#[tokio::test]
async fn test_retry_by_other_patient_is_unauthorized() {
    let fx = Fixture::new().await;
    fx.expect_payment_intent("pi_owned").await;
    let booking = fx.book(None).await.unwrap();
    let stranger = fx.add_patient("Jonas Weber").await;

    let result = fx
        .state
        .booking
        .retry_payment_session(&stranger.auth(), booking.consultation.id)
        .await;
    assert_matches!(result, Err(ConsultationError::Unauthorized(_)));
}

#[tokio::test]
async fn test_member_booking_settles_against_parent_patient() {
    let fx = Fixture::new().await;
    fx.expect_payment_intent("pi_member").await;

    let booking = fx
        .state
        .booking
        .book(&fx.patient.auth(), fx.request_for_member(None))
        .await
        .unwrap();
    assert_eq!(booking.consultation.patient_id, None);
    assert_eq!(booking.consultation.patient_member_id, Some(fx.member.id));

    fx.deliver(PAYMENT_SUCCEEDED, "pi_member").await.unwrap();

    let patient = fx.store.patient(fx.patient.profile.id).await.unwrap();
    assert_eq!(patient.consulted, 1);
}
