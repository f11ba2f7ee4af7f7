use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub payment_provider_base_url: String,
    pub payment_webhook_secret: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            payment_provider_base_url: "http://localhost:12111".to_string(),
            payment_webhook_secret: "whsec_test_secret".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            supabase_service_role_key: "test-service-role-key".to_string(),
            payment_provider_base_url: self.payment_provider_base_url.clone(),
            payment_provider_secret_key: "sk_test_key".to_string(),
            payment_webhook_secret: self.payment_webhook_secret.clone(),
            payment_currency: "eur".to_string(),
            payment_timeout_secs: 2,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn user_id(&self) -> Uuid {
        Uuid::parse_str(&self.id).unwrap_or_default()
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

fn hmac_sha256(secret: &str, message: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Mints Supabase-shaped access tokens for handler tests.
pub struct JwtTestUtils;

impl JwtTestUtils {
    /// Signs arbitrary header/claims JSON with HS256, whatever `alg` the header claims.
    pub fn sign_claims(header: &Value, claims: &Value, secret: &str) -> String {
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        let signature = hmac_sha256(secret, signing_input.as_bytes());

        format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature))
    }

    fn claims_for(user: &TestUser, ttl: Duration) -> Value {
        let issued = Utc::now();
        json!({
            "sub": user.id,
            "email": user.email,
            "role": "authenticated",
            "user_metadata": { "role": user.role },
            "iat": issued.timestamp(),
            "exp": (issued + ttl).timestamp()
        })
    }

    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let ttl = Duration::hours(exp_hours.unwrap_or(24));
        Self::sign_claims(&json!({ "alg": "HS256", "typ": "JWT" }), &Self::claims_for(user, ttl), secret)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }
}

/// Builds payment-provider webhook bodies and `Stripe-Signature` headers.
pub struct WebhookTestUtils;

impl WebhookTestUtils {
    pub fn signature_header(payload: &str, secret: &str, timestamp: i64) -> String {
        let signature = hex::encode(hmac_sha256(secret, format!("{}.{}", timestamp, payload).as_bytes()));

        format!("t={},v1={}", timestamp, signature)
    }

    pub fn sign_now(payload: &str, secret: &str) -> String {
        Self::signature_header(payload, secret, Utc::now().timestamp())
    }

    /// A PaymentIntent object carrying every field the Stripe client requires.
    pub fn payment_intent(intent_id: &str, status: &str, metadata: Value) -> Value {
        json!({
            "id": intent_id,
            "object": "payment_intent",
            "amount": 10900,
            "amount_capturable": 0,
            "amount_received": if status == "succeeded" { 10900 } else { 0 },
            "capture_method": "automatic",
            "client_secret": format!("{}_secret_test", intent_id),
            "confirmation_method": "automatic",
            "created": Utc::now().timestamp(),
            "currency": "eur",
            "livemode": false,
            "metadata": metadata,
            "payment_method_types": ["card"],
            "status": status,
            "last_payment_error": null
        })
    }

    pub fn payment_intent_event(event_type: &str, intent_id: &str) -> String {
        Self::payment_intent_event_with_metadata(event_type, intent_id, json!({}))
    }

    pub fn payment_intent_event_with_metadata(event_type: &str, intent_id: &str, metadata: Value) -> String {
        let status = match event_type {
            "payment_intent.succeeded" => "succeeded",
            "payment_intent.created" => "requires_confirmation",
            _ => "requires_payment_method",
        };

        let mut intent = Self::payment_intent(intent_id, status, metadata);
        if event_type == "payment_intent.payment_failed" {
            intent["last_payment_error"] = json!({
                "type": "card_error",
                "code": "card_declined",
                "message": "Your card was declined."
            });
        }

        json!({
            "id": format!("evt_{}", Uuid::new_v4().simple()),
            "object": "event",
            "type": event_type,
            "api_version": null,
            "account": null,
            "created": Utc::now().timestamp(),
            "livemode": false,
            "pending_webhooks": 1,
            "request": null,
            "data": {
                "object": intent
            }
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::validate_token;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert!(app_config.is_payment_configured());
        assert!(!app_config.supabase_jwt_secret.is_empty());
    }

    #[test]
    fn test_token_carries_application_role() {
        let user = TestUser::doctor("doc@example.com");
        let secret = "test-secret";
        let token = JwtTestUtils::create_test_token(&user, secret, Some(1));

        let validated = validate_token(&token, secret).unwrap();
        assert_eq!(validated.id, user.id);
        assert_eq!(validated.role.as_deref(), Some("doctor"));
    }

    #[test]
    fn test_expired_and_forged_tokens_are_rejected() {
        let user = TestUser::default();
        let secret = "test-secret";

        assert!(validate_token(&JwtTestUtils::create_expired_token(&user, secret), secret).is_err());
        assert!(validate_token(&JwtTestUtils::create_invalid_signature_token(&user), secret).is_err());
    }

    #[test]
    fn test_tokens_claiming_other_algorithms_are_rejected() {
        let user = TestUser::patient("pat@example.com");
        let secret = "test-secret";
        let claims = JwtTestUtils::claims_for(&user, Duration::hours(1));

        let token = JwtTestUtils::sign_claims(&json!({ "alg": "none" }), &claims, secret);
        assert_eq!(validate_token(&token, secret).unwrap_err(), "Unsupported token algorithm");

        let token = JwtTestUtils::sign_claims(&json!({ "alg": "HS256" }), &claims, secret);
        assert!(validate_token(&token, secret).is_ok());
    }

    #[test]
    fn test_signature_header_format() {
        let header = WebhookTestUtils::signature_header("{}", "whsec", 1_700_000_000);
        assert!(header.starts_with("t=1700000000,v1="));
        assert_eq!(header.len(), "t=1700000000,v1=".len() + 64);
    }
}
