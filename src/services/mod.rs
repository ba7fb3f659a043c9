//! Business logic services

pub mod audit;
pub mod dashboard;
pub mod loans;
pub mod payments;
pub mod profiles;
pub mod sweeper;

use std::sync::Arc;

use crate::{clock::Clock, config::LedgerConfig, repository::Repository};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub loans: loans::LoansService,
    pub payments: payments::PaymentsService,
    pub profiles: profiles::ProfilesService,
    pub dashboard: dashboard::DashboardService,
    pub audit: audit::AuditService,
    pub repository: Repository,
}

impl Services {
    /// Create all services over the given store
    pub fn new(
        repository: Repository,
        clock: Arc<dyn Clock>,
        audit: audit::AuditService,
        config: LedgerConfig,
    ) -> Self {
        Self {
            loans: loans::LoansService::new(
                repository.clone(),
                clock.clone(),
                audit.clone(),
                config.clone(),
            ),
            payments: payments::PaymentsService::new(
                repository.clone(),
                clock.clone(),
                audit.clone(),
                config.clone(),
            ),
            profiles: profiles::ProfilesService::new(repository.clone(), clock.clone(), audit.clone(), config),
            dashboard: dashboard::DashboardService::new(repository.clone(), clock),
            audit,
            repository,
        }
    }
}
