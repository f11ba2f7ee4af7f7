// libs/consultation-cell/tests/reconciliation_test.rs
mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use futures::future::join_all;

use common::{Fixture, PAYMENT_FAILED, PAYMENT_SUCCEEDED};
use consultation_cell::services::notification::NotificationEvent;
use consultation_cell::{
    ConsultationError, ConsultationPaymentStatus, ConsultationStatus, PaymentStatus, WebhookOutcome,
};
use shared_utils::test_utils::WebhookTestUtils;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_duplicate_success_webhook_settles_once() {
    let fx = Fixture::new().await;
    fx.expect_payment_intent("pi_123").await;
    let booking = fx.book(None).await.unwrap();

    let first = fx.deliver(PAYMENT_SUCCEEDED, "pi_123").await.unwrap();
    let second = fx.deliver(PAYMENT_SUCCEEDED, "pi_123").await.unwrap();

    assert_eq!(first, WebhookOutcome::Settled);
    assert_eq!(second, WebhookOutcome::AlreadySettled);

    let payment = &fx.store.payments().await[0];
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert!(payment.paid_at.is_some());

    let consultation = &fx.store.consultations().await[0];
    assert_eq!(consultation.id, booking.consultation.id);
    assert_eq!(consultation.payment_status, ConsultationPaymentStatus::Paid);
    assert_eq!(consultation.consultation_status, ConsultationStatus::Pending);

    assert_eq!(fx.store.patient(fx.patient.profile.id).await.unwrap().consulted, 1);
    assert_eq!(fx.notifier.sent().len(), fx.doctors.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_deliveries_settle_once() {
    let fx = Fixture::new().await;
    fx.expect_payment_intent("pi_burst").await;
    fx.book(None).await.unwrap();

    let outcomes = join_all((0..5).map(|_| fx.deliver(PAYMENT_SUCCEEDED, "pi_burst"))).await;

    let settled = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(WebhookOutcome::Settled)))
        .count();
    assert_eq!(settled, 1);
    assert_eq!(fx.store.patient(fx.patient.profile.id).await.unwrap().consulted, 1);
    assert_eq!(fx.notifier.sent().len(), fx.doctors.len());
}

#[tokio::test]
async fn test_paid_notification_reaches_every_doctor_of_specialization() {
    let fx = Fixture::new().await;
    let booking = fx.paid_booking("pi_notify").await;

    let sent = fx.notifier.sent();
    let mut recipients: Vec<_> = sent.iter().map(|n| n.recipient_user_id).collect();
    recipients.sort();
    let mut expected: Vec<_> = fx.doctors.iter().map(|d| d.profile.user_id).collect();
    expected.sort();
    assert_eq!(recipients, expected);

    assert_matches!(
        &sent[0].event,
        NotificationEvent::NewPaidConsultation { consultation_id, patient_name, .. } => {
            assert_eq!(*consultation_id, booking.consultation.id);
            assert_eq!(patient_name, "Amina Yusuf");
        }
    );
}

#[tokio::test]
async fn test_member_booking_notification_names_the_member() {
    let fx = Fixture::new().await;
    fx.expect_payment_intent("pi_member_notify").await;
    fx.state
        .booking
        .book(&fx.patient.auth(), fx.request_for_member(None))
        .await
        .unwrap();

    fx.deliver(PAYMENT_SUCCEEDED, "pi_member_notify").await.unwrap();

    assert_matches!(
        &fx.notifier.sent()[0].event,
        NotificationEvent::NewPaidConsultation { patient_name, .. } => {
            assert_eq!(patient_name, "Omar Yusuf");
        }
    );
}

#[tokio::test]
async fn test_invalid_signature_changes_nothing() {
    let fx = Fixture::new().await;
    fx.expect_payment_intent("pi_forged").await;
    fx.book(None).await.unwrap();

    let payload = WebhookTestUtils::payment_intent_event(PAYMENT_SUCCEEDED, "pi_forged");
    let forged = WebhookTestUtils::sign_now(&payload, "whsec_attacker");

    let result = fx
        .state
        .reconciliation
        .handle_webhook(payload.as_bytes(), &forged)
        .await;

    assert_matches!(result, Err(ConsultationError::InvalidSignature(_)));
    assert_eq!(fx.store.payments().await[0].status, PaymentStatus::Pending);
    assert!(fx.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_replayed_webhook_outside_tolerance_is_rejected() {
    let fx = Fixture::new().await;
    let payload = WebhookTestUtils::payment_intent_event(PAYMENT_SUCCEEDED, "pi_old");
    let stale = WebhookTestUtils::signature_header(
        &payload,
        &fx.config.payment_webhook_secret,
        Utc::now().timestamp() - 3600,
    );

    let result = fx
        .state
        .reconciliation
        .handle_webhook(payload.as_bytes(), &stale)
        .await;
    assert_matches!(result, Err(ConsultationError::InvalidSignature(_)));
}

#[tokio::test]
async fn test_malformed_body_with_valid_signature_is_rejected() {
    let fx = Fixture::new().await;
    let payload = "{\"id\": \"evt_1\"";
    let signature = WebhookTestUtils::sign_now(payload, &fx.config.payment_webhook_secret);

    let result = fx
        .state
        .reconciliation
        .handle_webhook(payload.as_bytes(), &signature)
        .await;
    assert_matches!(result, Err(ConsultationError::InvalidSignature(_)));
}

#[tokio::test]
async fn test_failed_payment_is_recorded_and_later_success_settles() {
    let fx = Fixture::new().await;
    fx.expect_payment_intent("pi_declined").await;
    fx.book(None).await.unwrap();

    let outcome = fx.deliver(PAYMENT_FAILED, "pi_declined").await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Failed);

    let payment = &fx.store.payments().await[0];
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.failure_reason.as_deref(), Some("Your card was declined."));
    assert_eq!(
        fx.store.consultations().await[0].payment_status,
        ConsultationPaymentStatus::Pending
    );
    assert!(fx.notifier.sent().is_empty());

    let outcome = fx.deliver(PAYMENT_SUCCEEDED, "pi_declined").await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Settled);
    assert_eq!(fx.store.payments().await[0].status, PaymentStatus::Completed);
}

#[tokio::test]
async fn test_failure_after_settlement_does_not_downgrade() {
    let fx = Fixture::new().await;
    fx.paid_booking("pi_done").await;

    let outcome = fx.deliver(PAYMENT_FAILED, "pi_done").await.unwrap();

    assert_eq!(outcome, WebhookOutcome::Failed);
    assert_eq!(fx.store.payments().await[0].status, PaymentStatus::Completed);
    assert_eq!(
        fx.store.consultations().await[0].payment_status,
        ConsultationPaymentStatus::Paid
    );
}

#[tokio::test]
async fn test_intent_lost_at_booking_settles_through_payment_metadata() {
    let fx = Fixture::new().await;
    // The provider created the intent but the response never arrived
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
            "error": { "type": "api_error", "message": "upstream unavailable" }
        })))
        .mount(&fx.provider)
        .await;
    assert!(fx.book(None).await.is_err());
    let payment = fx.store.payments().await[0].clone();
    assert!(payment.payment_intent_id.is_none());

    let outcome = fx
        .deliver_for_payment(PAYMENT_SUCCEEDED, "pi_lost", payment.id)
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Settled);
    let settled = &fx.store.payments().await[0];
    assert_eq!(settled.status, PaymentStatus::Completed);
    assert_eq!(settled.payment_intent_id.as_deref(), Some("pi_lost"));
    assert_eq!(fx.notifier.sent().len(), fx.doctors.len());

    let again = fx.deliver(PAYMENT_SUCCEEDED, "pi_lost").await.unwrap();
    assert_eq!(again, WebhookOutcome::AlreadySettled);
}

#[tokio::test]
async fn test_metadata_for_unknown_payment_is_ignored() {
    let fx = Fixture::new().await;

    let outcome = fx
        .deliver_for_payment(PAYMENT_SUCCEEDED, "pi_stranger", uuid::Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Ignored);
}

#[tokio::test]
async fn test_unknown_intent_is_acknowledged() {
    let fx = Fixture::new().await;

    let outcome = fx.deliver(PAYMENT_SUCCEEDED, "pi_nobody").await.unwrap();

    assert_eq!(outcome, WebhookOutcome::Ignored);
    assert!(fx.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_unrelated_event_types_are_ignored() {
    let fx = Fixture::new().await;
    fx.expect_payment_intent("pi_created").await;
    fx.book(None).await.unwrap();

    let outcome = fx.deliver("payment_intent.created", "pi_created").await.unwrap();

    assert_eq!(outcome, WebhookOutcome::Ignored);
    assert_eq!(fx.store.payments().await[0].status, PaymentStatus::Pending);
}
