pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
pub mod utils;

use std::sync::Arc;

use crate::services::automation_service::{AutomationConfig, AutomationService};
use crate::services::executor_service::ExecutorConfig;
use crate::services::rule_service::RuleService;
use crate::store::Store;
use crate::utils::time::Clock;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub rule_service: RuleService,
    pub automation: Arc<AutomationService>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        let config = crate::config::get_config();
        let executor_config = ExecutorConfig {
            collaborator_base_url: config.collaborator_base_url.clone(),
            notification_url: config.notification_webhook_url.clone(),
            delivery_max_attempts: config.delivery_max_attempts,
        };
        let automation_config = AutomationConfig {
            max_cascade_depth: config.max_cascade_depth,
            scheduler_batch: config.scheduler_batch,
        };

        let rule_service = RuleService::new(store.clone(), clock.clone());
        let automation = Arc::new(AutomationService::new(
            store.clone(),
            clock.clone(),
            executor_config,
            automation_config,
        ));

        Self {
            store,
            rule_service,
            automation,
            clock,
        }
    }
}
