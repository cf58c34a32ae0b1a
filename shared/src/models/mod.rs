//! Domain models for the raw material lot pipeline

mod dashboard;
mod fumigation;
mod lot;
mod qc;

pub use dashboard::*;
pub use fumigation::*;
pub use lot::*;
pub use qc::*;
