pub mod approvals;
pub mod candidates;
pub mod events;
pub mod health;
pub mod rules;
