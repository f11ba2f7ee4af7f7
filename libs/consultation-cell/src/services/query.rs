// libs/consultation-cell/src/services/query.rs
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::User;

use crate::error::ConsultationError;
use crate::models::{Consultation, Payment};
use crate::ports::ConsultationStore;
use crate::services::access::{caller_id, consultation_owner};

#[derive(Debug, Clone, Serialize)]
pub struct ConsultationDetails {
    pub consultation: Consultation,
    pub payment: Option<Payment>,
}

pub struct ConsultationQueryService {
    store: Arc<dyn ConsultationStore>,
}

impl ConsultationQueryService {
    pub fn new(store: Arc<dyn ConsultationStore>) -> Self {
        Self { store }
    }

    /// A consultation and its payment, visible to the owning patient and the
    /// assigned doctor only. Store failures propagate rather than reading as
    /// "not the owner".
    pub async fn get(&self, user: &User, consultation_id: Uuid) -> Result<ConsultationDetails, ConsultationError> {
        let caller = caller_id(user)?;

        let consultation = self
            .store
            .find_consultation(consultation_id)
            .await?
            .ok_or_else(|| ConsultationError::NotFound(format!("Consultation {}", consultation_id)))?;

        let is_owner = match consultation_owner(self.store.as_ref(), &consultation).await {
            Ok(patient) => patient.user_id == caller,
            Err(ConsultationError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };

        let is_assigned_doctor = match (consultation.doctor_id, self.store.find_doctor_by_user(caller).await?) {
            (Some(doctor_id), Some(doctor)) => doctor.id == doctor_id,
            _ => false,
        };

        if !is_owner && !is_assigned_doctor {
            return Err(ConsultationError::Unauthorized(
                "Not authorized to view this consultation".to_string(),
            ));
        }

        let mut payment = self.store.find_payment_for_consultation(consultation_id).await?;
        // The client secret completes a card payment; only the payer gets it
        if !is_owner {
            if let Some(payment) = payment.as_mut() {
                payment.client_secret = None;
            }
        }

        Ok(ConsultationDetails { consultation, payment })
    }

    /// Paid consultations in the calling doctor's specialization still waiting for a doctor.
    pub async fn open_for_doctor(&self, user: &User) -> Result<Vec<Consultation>, ConsultationError> {
        let caller = caller_id(user).map_err(|_| ConsultationError::NotADoctor)?;
        let doctor = self
            .store
            .find_doctor_by_user(caller)
            .await?
            .ok_or(ConsultationError::NotADoctor)?;

        let open = self.store.open_consultations(doctor.specialization_id).await?;
        debug!("{} open consultations for doctor {}", open.len(), doctor.id);
        Ok(open)
    }
}
