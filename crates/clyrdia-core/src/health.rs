use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
}

/// Aggregate dependency health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `healthy` when every dependency is healthy, otherwise `degraded`.
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub environment: String,
    pub services: BTreeMap<String, ServiceStatus>,
    /// Seconds since process start.
    pub uptime: f64,
}

impl HealthReport {
    pub fn new(
        version: impl Into<String>,
        environment: impl Into<String>,
        services: BTreeMap<String, ServiceStatus>,
        uptime: f64,
    ) -> Self {
        let healthy = services.values().all(|s| *s == ServiceStatus::Healthy);
        Self {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: Utc::now(),
            version: version.into(),
            environment: environment.into(),
            services,
            uptime,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }

    pub fn unhealthy_services(&self) -> Vec<&str> {
        self.services
            .iter()
            .filter(|(_, s)| **s == ServiceStatus::Unhealthy)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_when_any_service_unhealthy() {
        let mut services = BTreeMap::new();
        services.insert("cache".to_string(), ServiceStatus::Healthy);
        services.insert("store".to_string(), ServiceStatus::Unhealthy);
        let report = HealthReport::new("0.1.0", "test", services, 1.0);
        assert_eq!(report.status, "degraded");
        assert_eq!(report.unhealthy_services(), vec!["store"]);
    }

    #[test]
    fn healthy_when_all_healthy() {
        let mut services = BTreeMap::new();
        services.insert("cache".to_string(), ServiceStatus::Healthy);
        let report = HealthReport::new("0.1.0", "test", services, 1.0);
        assert!(report.is_healthy());
    }
}
