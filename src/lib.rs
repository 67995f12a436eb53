pub mod booking;
pub mod broker;
pub mod config;
pub mod ingestion;
pub mod notifier;
pub mod processor;
pub mod services;
