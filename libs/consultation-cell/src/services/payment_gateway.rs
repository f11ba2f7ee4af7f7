// libs/consultation-cell/src/services/payment_gateway.rs
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::time::Duration;
use stripe::{
    Client, CreatePaymentIntent, Currency, Event, EventObject, EventType, PaymentIntent,
    RequestStrategy, StripeError, Webhook,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::error::ConsultationError;
use crate::models::{PaymentMetadata, PaymentSession};
use crate::ports::PaymentGateway;

/// Attempts per session request: the first call plus one retry.
const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    PaymentSucceeded,
    PaymentFailed,
    Other,
}

/// A verified provider callback, reduced to the fields reconciliation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    pub kind: WebhookEventKind,
    pub payment_intent_id: Option<String>,
    /// Our payment id, read back from the intent's metadata.
    pub payment_id: Option<Uuid>,
    pub failure_message: Option<String>,
}

impl From<Event> for WebhookEvent {
    fn from(event: Event) -> Self {
        let kind = match event.type_ {
            EventType::PaymentIntentSucceeded => WebhookEventKind::PaymentSucceeded,
            EventType::PaymentIntentPaymentFailed => WebhookEventKind::PaymentFailed,
            _ => WebhookEventKind::Other,
        };

        let intent = match &event.data.object {
            EventObject::PaymentIntent(intent) => Some(intent),
            _ => None,
        };

        Self {
            id: event.id.to_string(),
            event_type: event.type_.to_string(),
            kind,
            payment_intent_id: intent.map(|intent| intent.id.to_string()),
            payment_id: intent
                .and_then(|intent| intent.metadata.get("payment_id"))
                .and_then(|id| Uuid::parse_str(id).ok()),
            failure_message: intent
                .and_then(|intent| intent.last_payment_error.as_ref())
                .and_then(|error| error.message.clone()),
        }
    }
}

/// Converts a decimal amount into provider minor units (cents).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ConsultationError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ConsultationError::ValidationError(format!("Amount {} is out of range", amount)))
}

fn parse_currency(code: &str) -> Result<Currency, ConsultationError> {
    serde_json::from_value(serde_json::Value::String(code.to_lowercase()))
        .map_err(|_| ConsultationError::ValidationError(format!("Unsupported currency {}", code)))
}

fn is_retryable(error: &StripeError) -> bool {
    match error {
        StripeError::Stripe(request) => request.http_status >= 500 || request.http_status == 429,
        StripeError::ClientError(_) => true,
        _ => false,
    }
}

/// Card payments through the Stripe PaymentIntents API.
pub struct StripeGateway {
    client: Option<Client>,
    timeout: Duration,
    webhook_secret: String,
}

impl StripeGateway {
    pub fn new(config: &AppConfig) -> Result<Self, ConsultationError> {
        let client = if config.payment_provider_secret_key.is_empty() {
            None
        } else {
            // from_url panics on a malformed base, so reject it here
            let base = reqwest::Url::parse(&config.payment_provider_base_url).map_err(|e| {
                ConsultationError::ExternalProviderError(format!(
                    "Invalid payment provider URL {}: {}",
                    config.payment_provider_base_url, e
                ))
            })?;
            Some(Client::from_url(base.as_str(), config.payment_provider_secret_key.as_str()))
        };

        Ok(Self {
            client,
            timeout: Duration::from_secs(config.payment_timeout_secs),
            webhook_secret: config.payment_webhook_secret.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_payment_session(
        &self,
        amount: Decimal,
        currency: &str,
        metadata: PaymentMetadata,
    ) -> Result<PaymentSession, ConsultationError> {
        let client = self.client.as_ref().ok_or_else(|| {
            ConsultationError::ExternalProviderError("Payment provider is not configured".to_string())
        })?;

        let amount_minor = to_minor_units(amount)?;
        let currency = parse_currency(currency)?;
        let intent_metadata = HashMap::from([
            ("consultation_id".to_string(), metadata.consultation_id.to_string()),
            ("payment_id".to_string(), metadata.payment_id.to_string()),
        ]);

        // Same key on every attempt, so a retried create yields the same intent
        let client = client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(metadata.payment_id.to_string()));

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let mut params = CreatePaymentIntent::new(amount_minor, currency);
            params.metadata = Some(intent_metadata.clone());
            debug!("Creating payment intent for payment {} (attempt {})", metadata.payment_id, attempt);

            match tokio::time::timeout(self.timeout, PaymentIntent::create(&client, params)).await {
                Ok(Ok(intent)) => {
                    info!("Created payment intent {} for payment {}", intent.id, metadata.payment_id);
                    return Ok(PaymentSession {
                        id: intent.id.to_string(),
                        client_secret: intent.client_secret,
                    });
                }
                Ok(Err(e)) if !is_retryable(&e) => {
                    error!("Payment intent request rejected: {}", e);
                    return Err(ConsultationError::ExternalProviderError(e.to_string()));
                }
                Ok(Err(e)) => {
                    warn!("Payment intent attempt {}/{} failed: {}", attempt, MAX_ATTEMPTS, e);
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(
                        "Payment intent attempt {}/{} timed out after {:?}",
                        attempt, MAX_ATTEMPTS, self.timeout
                    );
                    last_error = format!("Timed out after {:?}", self.timeout);
                }
            }
        }

        Err(ConsultationError::ExternalProviderError(last_error))
    }

    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<WebhookEvent, ConsultationError> {
        if self.webhook_secret.is_empty() {
            return Err(ConsultationError::InvalidSignature("Webhook secret is not configured".to_string()));
        }

        let payload = std::str::from_utf8(payload)
            .map_err(|_| ConsultationError::InvalidSignature("Invalid UTF-8 in payload".to_string()))?;

        let event = Webhook::construct_event(payload, signature_header, &self.webhook_secret)
            .map_err(|e| ConsultationError::InvalidSignature(format!("Failed to verify webhook: {}", e)))?;

        Ok(WebhookEvent::from(event))
    }
}
