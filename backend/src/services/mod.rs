//! Business logic services for the raw material lot pipeline

pub mod artifact_cache;
pub mod dashboard;
pub mod fumigation;
pub mod lot;
pub mod qc;
pub mod reports;

pub use artifact_cache::ArtifactCache;
pub use dashboard::DashboardService;
pub use fumigation::FumigationService;
pub use lot::LotService;
pub use qc::QcService;
