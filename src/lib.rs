pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::database::Stores;
use crate::services::{
    analytics_service::AnalyticsQueue, attempt_service::AttemptService, locks::KeyedLocks,
    manual_grading_service::ManualGradingService,
};
use crate::utils::time::Clock;

/// Which backend the stores run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Postgres,
    InMemory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Postgres => "postgres",
            StorageKind::InMemory => "in_memory",
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageKind,
    pub attempt_service: AttemptService,
    pub grading_service: ManualGradingService,
}

impl AppState {
    /// Both services share one per-attempt lock registry so submits and
    /// grades on the same attempt serialize.
    pub fn new(
        storage: StorageKind,
        stores: Stores,
        clock: Arc<dyn Clock>,
        analytics: AnalyticsQueue,
    ) -> Self {
        let attempt_locks = Arc::new(KeyedLocks::new());
        let attempt_service =
            AttemptService::new(stores.clone(), clock.clone(), attempt_locks.clone(), analytics);
        let grading_service = ManualGradingService::new(stores, clock, attempt_locks);

        Self {
            storage,
            attempt_service,
            grading_service,
        }
    }
}
