// libs/consultation-cell/src/state.rs
use std::sync::Arc;
use tracing::{info, warn};

use shared_config::AppConfig;

use crate::error::ConsultationError;
use crate::ports::{ConsultationStore, Notifier, PaymentGateway};
use crate::services::{
    AssignmentService, BookingService, ConsultationQueryService, ReconciliationService,
    StripeGateway, SupabaseNotifier,
};
use crate::store::SupabaseConsultationStore;

/// Services shared by every consultation handler.
pub struct ConsultationState {
    pub config: Arc<AppConfig>,
    pub booking: BookingService,
    pub reconciliation: Arc<ReconciliationService>,
    pub assignment: AssignmentService,
    pub query: ConsultationQueryService,
}

impl ConsultationState {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn ConsultationStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let reconciliation = Arc::new(ReconciliationService::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            Arc::clone(&notifier),
        ));

        Self {
            booking: BookingService::new(
                Arc::clone(&store),
                gateway,
                Arc::clone(&reconciliation),
                config.payment_currency.clone(),
            ),
            assignment: AssignmentService::new(Arc::clone(&store), notifier),
            query: ConsultationQueryService::new(store),
            reconciliation,
            config,
        }
    }

    /// Production wiring: Supabase for storage and notifications, Stripe for payments.
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, ConsultationError> {
        if !config.is_payment_configured() {
            warn!("Payment provider is not fully configured; bookings will fail at checkout");
        }

        let store: Arc<dyn ConsultationStore> = Arc::new(SupabaseConsultationStore::new(&config));
        let gateway: Arc<dyn PaymentGateway> = Arc::new(StripeGateway::new(&config)?);
        let notifier: Arc<dyn Notifier> = Arc::new(SupabaseNotifier::new(&config));

        info!("Consultation services initialized");
        Ok(Self::new(config, store, gateway, notifier))
    }
}
