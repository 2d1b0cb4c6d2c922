//! Operational HTTP handlers for rbac-service.

pub mod health;
pub mod metrics;

pub use health::health_check;
