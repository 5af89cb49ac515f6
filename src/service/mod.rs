pub mod background_jobs;
pub mod error;
pub mod event_hub;
pub mod ledger;
pub mod negotiation_machine;
pub mod negotiation_service;
pub mod notification_service;
pub mod order_consumer;
pub mod settlement_service;
