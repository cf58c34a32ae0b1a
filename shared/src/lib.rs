//! Shared types and models for the raw material lot pipeline
//!
//! This crate contains the storage-free half of the system: domain models,
//! the fumigation transition table, and the weight and quality-control
//! calculators shared between the backend and the browser (via WASM).

pub mod error;
pub mod models;
pub mod types;
pub mod validation;

pub use error::*;
pub use models::*;
pub use types::*;
pub use validation::*;
