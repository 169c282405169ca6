pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod idempotency;
pub mod ledger;
pub mod monitor;
pub mod processor;
pub mod supervisor;
