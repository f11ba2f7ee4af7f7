// libs/consultation-cell/src/services/access.rs
use uuid::Uuid;

use shared_models::auth::User;

use crate::error::ConsultationError;
use crate::models::{Consultation, Patient, PatientIdentity};
use crate::ports::ConsultationStore;

pub fn caller_id(user: &User) -> Result<Uuid, ConsultationError> {
    user.user_id()
        .ok_or_else(|| ConsultationError::Unauthorized("Caller id is not a valid UUID".to_string()))
}

/// The account-holding patient behind an identity (a member resolves to its parent).
pub async fn owning_patient(
    store: &dyn ConsultationStore,
    identity: PatientIdentity,
) -> Result<Patient, ConsultationError> {
    let patient_id = match identity {
        PatientIdentity::Patient(id) => id,
        PatientIdentity::Member(id) => {
            store
                .find_member(id)
                .await?
                .ok_or_else(|| ConsultationError::NotFound(format!("Patient member {}", id)))?
                .patient_id
        }
    };

    store
        .find_patient(patient_id)
        .await?
        .ok_or_else(|| ConsultationError::NotFound(format!("Patient {}", patient_id)))
}

/// Ensures `caller` owns `identity`: it is the caller's own patient profile
/// or one of the caller's members. Returns the caller's patient profile.
pub async fn authorize_identity(
    store: &dyn ConsultationStore,
    caller: Uuid,
    identity: PatientIdentity,
) -> Result<Patient, ConsultationError> {
    let patient = store
        .find_patient_by_user(caller)
        .await?
        .ok_or_else(|| ConsultationError::Unauthorized("Caller has no patient profile".to_string()))?;

    let owns = match identity {
        PatientIdentity::Patient(id) => id == patient.id,
        PatientIdentity::Member(id) => store
            .find_member(id)
            .await?
            .map(|member| member.patient_id == patient.id)
            .unwrap_or(false),
    };

    if !owns {
        return Err(ConsultationError::Unauthorized(
            "Not authorized to act for this patient".to_string(),
        ));
    }

    Ok(patient)
}

/// The account holder behind a consultation.
pub async fn consultation_owner(
    store: &dyn ConsultationStore,
    consultation: &Consultation,
) -> Result<Patient, ConsultationError> {
    owning_patient(store, consultation.identity()?).await
}
