// libs/consultation-cell/src/services/assignment.rs
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use shared_models::auth::User;

use crate::error::ConsultationError;
use crate::models::{Consultation, DoctorProfile};
use crate::ports::{ConsultationStore, Notifier};
use crate::services::access::{caller_id, consultation_owner};
use crate::services::notification::{Notification, NotificationEvent};

/// Lets doctors claim paid consultations and close them out.
pub struct AssignmentService {
    store: Arc<dyn ConsultationStore>,
    notifier: Arc<dyn Notifier>,
}

impl AssignmentService {
    pub fn new(store: Arc<dyn ConsultationStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Claims a consultation for the calling doctor. Exactly one of several
    /// concurrent callers wins; the others get `AlreadyAssigned`.
    pub async fn accept(&self, user: &User, consultation_id: Uuid) -> Result<Consultation, ConsultationError> {
        let existing = self
            .store
            .find_consultation(consultation_id)
            .await?
            .ok_or_else(|| ConsultationError::NotFound(format!("Consultation {}", consultation_id)))?;
        if existing.is_assigned() {
            return Err(ConsultationError::AlreadyAssigned);
        }

        let doctor = self.calling_doctor(user).await?;

        let consultation = self.store.assign_doctor(consultation_id, &doctor, Utc::now()).await?;
        info!("Doctor {} accepted consultation {}", doctor.id, consultation.id);

        if let Some(assigned_at) = consultation.assign_at {
            self.notify_patient(
                &consultation,
                NotificationEvent::ConsultationAssigned {
                    consultation_id: consultation.id,
                    doctor_name: doctor.full_name.clone(),
                    assigned_at,
                },
            )
            .await;
        }

        Ok(consultation)
    }

    /// Marks a monitoring consultation as finished by its assigned doctor.
    pub async fn complete(&self, user: &User, consultation_id: Uuid) -> Result<Consultation, ConsultationError> {
        let doctor = self.calling_doctor(user).await?;

        let consultation = self
            .store
            .complete_consultation(consultation_id, doctor.id, Utc::now())
            .await?;
        info!("Doctor {} completed consultation {}", doctor.id, consultation.id);

        if let Some(completed_at) = consultation.completed_at {
            self.notify_patient(
                &consultation,
                NotificationEvent::ConsultationCompleted {
                    consultation_id: consultation.id,
                    doctor_name: doctor.full_name.clone(),
                    completed_at,
                },
            )
            .await;
        }

        Ok(consultation)
    }

    async fn calling_doctor(&self, user: &User) -> Result<DoctorProfile, ConsultationError> {
        let caller = caller_id(user).map_err(|_| ConsultationError::NotADoctor)?;
        self.store
            .find_doctor_by_user(caller)
            .await?
            .ok_or(ConsultationError::NotADoctor)
    }

    async fn notify_patient(&self, consultation: &Consultation, event: NotificationEvent) {
        match consultation_owner(self.store.as_ref(), consultation).await {
            Ok(patient) => {
                self.notifier
                    .notify(Notification {
                        recipient_user_id: patient.user_id,
                        event,
                    })
                    .await
            }
            Err(e) => warn!(
                "Could not resolve patient for consultation {}: {}",
                consultation.id, e
            ),
        }
    }
}
