//! Liveness and readiness of the governor's moving parts
//!
//! The optimizer loops report into a shared [`HealthRegistry`] after every
//! pass. `/healthz` answers with the worst reported state, `/readyz` also
//! requires that the governor finished starting.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Reported state of one component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Last pass failed but the component keeps running
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Tests are still admitted in this state
    pub fn is_operational(&self) -> bool {
        *self < Self::Unhealthy
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds of the last report
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn reported(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::reported(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::reported(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::reported(ComponentStatus::Unhealthy, Some(message.into()))
    }

    /// Healthy on `Ok`, degraded with the error text otherwise
    pub fn from_pass<T, E: fmt::Display>(outcome: &Result<T, E>) -> Self {
        match outcome {
            Ok(_) => Self::healthy(),
            Err(e) => Self::degraded(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    fn from_components(components: BTreeMap<String, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        Self { status, components }
    }

    /// Names of components currently in `status`
    pub fn in_status(&self, status: ComponentStatus) -> Vec<&str> {
        self.components
            .iter()
            .filter(|(_, c)| c.status == status)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Well-known component names
pub mod components {
    pub const POOL_OPTIMIZER: &str = "pool_optimizer";
    pub const PARALLELISM: &str = "parallelism";
    pub const SKIP_GOVERNOR: &str = "skip_governor";
    pub const TELEMETRY: &str = "telemetry";
    pub const STORAGE: &str = "storage";

    pub const ALL: &[&str] = &[POOL_OPTIMIZER, PARALLELISM, SKIP_GOVERNOR, TELEMETRY, STORAGE];
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    started: bool,
}

/// Cloneable handle to the component health table
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component in the healthy state
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut state = self.state.write().await;
        state.components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Record the outcome of one optimizer pass
    pub async fn record_pass<T, E: fmt::Display>(&self, name: &str, outcome: &Result<T, E>) {
        self.update(name, ComponentHealth::from_pass(outcome)).await;
    }

    /// Flipped by `Governor::start` and `Governor::shutdown`
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.started = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        HealthResponse::from_components(components)
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let started = self.state.read().await.started;
        if !started {
            return ReadinessResponse {
                ready: false,
                reason: Some("Governor not started".to_string()),
            };
        }

        let health = self.health().await;
        let failing = health.in_status(ComponentStatus::Unhealthy);
        if failing.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy components: {}", failing.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering() {
        assert!(ComponentStatus::Healthy < ComponentStatus::Degraded);
        assert!(ComponentStatus::Degraded.is_operational());
        assert!(!ComponentStatus::Unhealthy.is_operational());
        assert_eq!(ComponentStatus::Degraded.to_string(), "degraded");
    }

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_worst_component_wins() {
        let registry = HealthRegistry::new();
        for name in components::ALL {
            registry.register(name).await;
        }

        registry
            .set_degraded(components::POOL_OPTIMIZER, "pool statistics unavailable")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry.set_unhealthy(components::STORAGE, "handle closed").await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert_eq!(health.in_status(ComponentStatus::Degraded), vec!["pool_optimizer"]);
    }

    #[tokio::test]
    async fn test_record_pass() {
        let registry = HealthRegistry::new();

        let failed: Result<(), String> = Err("stats unavailable".to_string());
        registry.record_pass(components::POOL_OPTIMIZER, &failed).await;
        let health = registry.health().await;
        let pool = &health.components[components::POOL_OPTIMIZER];
        assert_eq!(pool.status, ComponentStatus::Degraded);
        assert_eq!(pool.message.as_deref(), Some("stats unavailable"));

        let passed: Result<u32, String> = Ok(3);
        registry.record_pass(components::POOL_OPTIMIZER, &passed).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_readiness_requires_start_and_no_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register(components::STORAGE).await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Governor not started"));

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(components::STORAGE, "closed").await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Unhealthy components: storage")
        );
    }
}
