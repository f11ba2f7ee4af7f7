use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::state::ConsultationState;

pub fn consultation_routes(state: Arc<ConsultationState>) -> Router {
    // Called by the payment provider; authenticated by signature instead of JWT
    let public_routes = Router::new()
        .route("/webhooks/payment", post(handlers::payment_webhook));

    let protected_routes = Router::new()
        .route("/", post(handlers::book_consultation))
        .route("/coupons/check", post(handlers::check_coupon))
        .route("/open", get(handlers::list_open_consultations))
        .route("/{consultation_id}", get(handlers::get_consultation))
        .route("/{consultation_id}/payment-session", post(handlers::retry_payment_session))
        .route("/{consultation_id}/accept", post(handlers::accept_consultation))
        .route("/{consultation_id}/complete", post(handlers::complete_consultation))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
