use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use consultation_cell::{consultation_routes, ConsultationState};

pub fn create_router(consultations: Arc<ConsultationState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic API is running!" }))
        .nest("/consultations", consultation_routes(consultations))
}
