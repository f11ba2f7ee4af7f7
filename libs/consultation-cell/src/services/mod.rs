pub mod access;
pub mod assignment;
pub mod booking;
pub mod coupon;
pub mod notification;
pub mod payment_gateway;
pub mod query;
pub mod reconciliation;

pub use assignment::AssignmentService;
pub use booking::BookingService;
pub use coupon::CouponEngine;
pub use notification::{RecordingNotifier, SupabaseNotifier};
pub use payment_gateway::StripeGateway;
pub use query::ConsultationQueryService;
pub use reconciliation::ReconciliationService;
