// libs/consultation-cell/src/lib.rs
pub mod clock;
pub mod directory;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;
pub mod testing;

use std::sync::Arc;

use shared_config::ClinicConfig;

use crate::clock::{ClinicClock, Clock, SystemClock};
use crate::directory::{Directory, InMemoryDirectory};
use crate::services::midtrans::{MidtransClient, PaymentGateway};
use crate::services::notify::{LogNotifier, Notifier};
use crate::store::ClinicStore;

/// Shared wiring for the consultation cell: configuration plus every
/// collaborator behind a trait object, so handlers, services, and the sweeper
/// all see the same store and the same clock.
pub struct AppContext {
    pub config: ClinicConfig,
    pub store: Arc<ClinicStore>,
    pub directory: Arc<dyn Directory>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

impl AppContext {
    pub fn new(
        config: ClinicConfig,
        directory: Arc<dyn Directory>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store: Arc::new(ClinicStore::new()),
            directory,
            gateway,
            notifier,
            clock,
        }
    }

    /// Production wiring: real gateway, log-backed notifier, wall clock.
    pub fn production(config: ClinicConfig) -> Self {
        let gateway = Arc::new(MidtransClient::new(&config));
        Self::new(
            config,
            Arc::new(InMemoryDirectory::new()),
            gateway,
            Arc::new(LogNotifier),
            Arc::new(SystemClock),
        )
    }

    pub fn clinic_clock(&self) -> ClinicClock {
        ClinicClock::new(Arc::clone(&self.clock), self.config.clinic_utc_offset_hours)
    }
}
