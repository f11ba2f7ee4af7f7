// libs/consultation-cell/src/services/reconciliation.rs
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ConsultationError;
use crate::models::{PatientIdentity, SettledPayment, SettlementOutcome, WebhookOutcome};
use crate::ports::{ConsultationStore, Notifier, PaymentGateway};
use crate::services::notification::{Notification, NotificationEvent};
use crate::services::payment_gateway::WebhookEventKind;

/// Applies payment-provider callbacks to Payment and Consultation state.
pub struct ReconciliationService {
    store: Arc<dyn ConsultationStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn ConsultationStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { store, gateway, notifier }
    }

    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookOutcome, ConsultationError> {
        let event = self.gateway.verify_webhook(payload, signature_header)?;

        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            payment_intent = ?event.payment_intent_id,
            "Received payment webhook"
        );

        match (event.kind, event.payment_intent_id.as_deref()) {
            (WebhookEventKind::PaymentSucceeded, Some(intent_id)) => self.settle(intent_id, event.payment_id).await,
            (WebhookEventKind::PaymentFailed, Some(intent_id)) => {
                let reason = event.failure_message.as_deref();
                match self.store.fail_payment(intent_id, reason, Utc::now()).await? {
                    Some(payment) => warn!(
                        payment_intent = %intent_id,
                        "Payment {} for consultation {} failed: {}",
                        payment.id,
                        payment.consultation_id,
                        reason.unwrap_or("no reason given")
                    ),
                    None => info!(payment_intent = %intent_id, "Failure event left payment unchanged"),
                }
                Ok(WebhookOutcome::Failed)
            }
            (WebhookEventKind::Other, _) => {
                info!(event_type = %event.event_type, "Ignoring unhandled webhook event");
                Ok(WebhookOutcome::Ignored)
            }
            (_, None) => {
                warn!(event_id = %event.id, "Payment event without payment intent id");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// Marks the payment behind `payment_intent_id` as completed, falling back
    /// to `payment_id` from the intent metadata when no payment carries that
    /// intent. Side effects run only for the call that performed the transition.
    pub async fn settle(
        &self,
        payment_intent_id: &str,
        payment_id: Option<Uuid>,
    ) -> Result<WebhookOutcome, ConsultationError> {
        match self.store.settle_payment(payment_intent_id, payment_id, Utc::now()).await? {
            SettlementOutcome::Settled(settled) => {
                info!(
                    payment_intent = %payment_intent_id,
                    "Payment {} completed; consultation {} is now paid",
                    settled.payment.id,
                    settled.consultation.id
                );
                self.announce_to_doctors(&settled).await;
                Ok(WebhookOutcome::Settled)
            }
            SettlementOutcome::AlreadySettled => {
                info!(payment_intent = %payment_intent_id, "Payment already completed, skipping");
                Ok(WebhookOutcome::AlreadySettled)
            }
            SettlementOutcome::UnknownIntent => {
                warn!(payment_intent = %payment_intent_id, payment_id = ?payment_id, "No payment matches this intent");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn announce_to_doctors(&self, settled: &SettledPayment) {
        let consultation = &settled.consultation;

        let patient_name = match consultation.identity() {
            Ok(PatientIdentity::Member(member_id)) => match self.store.find_member(member_id).await {
                Ok(Some(member)) => member.full_name,
                _ => settled.patient.full_name.clone(),
            },
            _ => settled.patient.full_name.clone(),
        };

        let doctors = match self.store.doctors_by_specialization(consultation.specialization_id).await {
            Ok(doctors) => doctors,
            Err(e) => {
                error!("Could not load doctors for consultation {}: {}", consultation.id, e);
                return;
            }
        };

        let event = NotificationEvent::NewPaidConsultation {
            consultation_id: consultation.id,
            specialization_id: consultation.specialization_id,
            patient_name,
            consultation_date: consultation.consultation_date,
        };

        info!("Notifying {} doctors about consultation {}", doctors.len(), consultation.id);

        join_all(doctors.iter().map(|doctor| {
            self.notifier.notify(Notification {
                recipient_user_id: doctor.user_id,
                event: event.clone(),
            })
        }))
        .await;
    }
}
