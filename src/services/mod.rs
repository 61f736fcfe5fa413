pub mod approval_service;
pub mod automation_service;
pub mod engine_service;
pub mod eval_service;
pub mod executor_service;
pub mod ledger_service;
pub mod notification_service;
pub mod rule_service;
pub mod scheduler_service;
