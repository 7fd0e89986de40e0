//! Persistence layer for the automation engine
//!
//! This module provides:
//! - [`AutomationStore`] trait for events, workflows, runs, jobs and CRM records
//! - [`InMemoryAutomationStore`] for tests and single-process deployments
//! - [`PostgresAutomationStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryAutomationStore;
pub use postgres::PostgresAutomationStore;
pub use store::{merge_json, AutomationStore, InsertOutcome, StoreError};
