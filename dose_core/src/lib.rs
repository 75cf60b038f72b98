#![forbid(unsafe_code)]

//! Core domain model and business logic for the Dosewatch system.
//!
//! This crate provides:
//! - Domain types (drugs, entries, availability records)
//! - The availability calculator
//! - The live recomputation pipeline
//! - The persistence adapter interface and flat-file backend
//! - Catalog seeding and validation

pub mod types;
pub mod error;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod availability;
pub mod store;
pub mod flatfile;
pub mod pipeline;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use availability::compute;
pub use catalog::{build_default_drug_list, get_default_drug_list, seed_default_drugs};
pub use config::{Config, EngineConfig};
pub use store::{ChangeListener, MedicineStore, MemoryStore, StoreChange};
pub use flatfile::FlatFileStore;
pub use pipeline::{AvailabilityPipeline, ErrorSubscription, Subscription};
pub use export::entries_to_csv;
