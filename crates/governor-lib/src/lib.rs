//! Governor library for adaptive test execution
//!
//! This crate provides the core functionality for:
//! - Resource pressure sampling
//! - Connection pool optimization
//! - Parallelism control and admission
//! - Skip condition governance
//! - Per-test telemetry and exports
//! - Retried storage maintenance
//! - Health checks and observability

pub mod error;
pub mod governor;
pub mod health;
pub mod history;
pub mod models;
pub mod observability;
pub mod parallelism;
pub mod pool;
pub mod resource;
pub mod settings;
pub mod skip;
pub mod storage;
pub mod telemetry;

pub use error::{GovernorError, Result, StorageError};
pub use governor::{Governor, GovernorBuilder, SessionHandle, TestOutcome, TestSpec};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{GovernorMetrics, StructuredLogger};
pub use settings::GovernorSettings;
