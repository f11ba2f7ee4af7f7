pub mod error;
pub mod handlers;
pub mod models;
pub mod ports;
pub mod router;
pub mod services;
pub mod state;
pub mod store;

pub use error::{ConsultationError, CouponFailure};
pub use models::*;
pub use ports::{ConsultationStore, Notifier, PaymentGateway};
pub use router::consultation_routes;
pub use state::ConsultationState;
pub use store::{InMemoryConsultationStore, SupabaseConsultationStore};
