use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub supabase_service_role_key: String,
    pub payment_provider_base_url: String,
    pub payment_provider_secret_key: String,
    pub payment_webhook_secret: String,
    pub payment_currency: String,
    pub payment_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            payment_provider_base_url: env::var("PAYMENT_PROVIDER_BASE_URL")
                .unwrap_or_else(|_| {
                    warn!("PAYMENT_PROVIDER_BASE_URL not set, using default");
                    "https://api.stripe.com".to_string()
                }),
            payment_provider_secret_key: env::var("PAYMENT_PROVIDER_SECRET_KEY")
                .unwrap_or_else(|_| {
                    warn!("PAYMENT_PROVIDER_SECRET_KEY not set, using empty value");
                    String::new()
                }),
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET")
                .unwrap_or_else(|_| {
                    warn!("PAYMENT_WEBHOOK_SECRET not set, using empty value");
                    String::new()
                }),
            payment_currency: env::var("PAYMENT_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|_| "eur".to_string()),
            payment_timeout_secs: parse_or("PAYMENT_TIMEOUT_SECS", 10),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }
        if !config.is_payment_configured() {
            warn!("Payment provider not configured - bookings will fail at the payment step");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
            && !self.supabase_service_role_key.is_empty()
    }

    pub fn is_payment_configured(&self) -> bool {
        !self.payment_provider_base_url.is_empty()
            && !self.payment_provider_secret_key.is_empty()
            && !self.payment_webhook_secret.is_empty()
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
