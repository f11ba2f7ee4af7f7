// libs/consultation-cell/src/services/notification.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::ports::Notifier;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    NewPaidConsultation {
        consultation_id: Uuid,
        specialization_id: Uuid,
        patient_name: String,
        consultation_date: Option<DateTime<Utc>>,
    },
    ConsultationAssigned {
        consultation_id: Uuid,
        doctor_name: String,
        assigned_at: DateTime<Utc>,
    },
    ConsultationCompleted {
        consultation_id: Uuid,
        doctor_name: String,
        completed_at: DateTime<Utc>,
    },
}

impl NotificationEvent {
    pub fn title(&self) -> &'static str {
        match self {
            NotificationEvent::NewPaidConsultation { .. } => "New consultation available",
            NotificationEvent::ConsultationAssigned { .. } => "Your consultation has been accepted",
            NotificationEvent::ConsultationCompleted { .. } => "Your consultation is complete",
        }
    }

    pub fn consultation_id(&self) -> Uuid {
        match self {
            NotificationEvent::NewPaidConsultation { consultation_id, .. }
            | NotificationEvent::ConsultationAssigned { consultation_id, .. }
            | NotificationEvent::ConsultationCompleted { consultation_id, .. } => *consultation_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub recipient_user_id: Uuid,
    pub event: NotificationEvent,
}

/// Writes notifications into the `notifications` feed table; email fan-out
/// is handled downstream by the notification service.
pub struct SupabaseNotifier {
    supabase: Arc<SupabaseClient>,
    service_key: String,
}

impl SupabaseNotifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            service_key: config.supabase_service_role_key.clone(),
        }
    }
}

#[async_trait]
impl Notifier for SupabaseNotifier {
    async fn notify(&self, notification: Notification) {
        let body = json!({
            "user_id": notification.recipient_user_id,
            "title": notification.event.title(),
            "payload": notification.event,
            "read": false,
            "created_at": Utc::now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: anyhow::Result<Vec<Value>> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/notifications",
                Some(&self.service_key),
                Some(body),
                Some(headers),
            )
            .await;

        match result {
            Ok(_) => debug!(
                "Notification '{}' queued for user {}",
                notification.event.title(),
                notification.recipient_user_id
            ),
            Err(e) => warn!(
                "Failed to queue notification for user {} (consultation {}): {}",
                notification.recipient_user_id,
                notification.event.consultation_id(),
                e
            ),
        }
    }
}

/// Keeps every notification in memory; used by tests and local runs.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
    }
}
