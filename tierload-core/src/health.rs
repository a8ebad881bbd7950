//! Health reporting derived from circuit breaker state.

use crate::{CircuitBreakerState, CircuitState};
use serde::{Deserialize, Serialize};

/// Health status for a fetch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Circuit closed, no recent failures
    Healthy,
    /// Recovering, or failures accumulating below the threshold
    Degraded,
    /// Circuit open, calls are short-circuited
    Unhealthy,
}

/// Health check result for one fetch target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub component: String,
    pub message: Option<String>,
}

impl HealthCheck {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            component: component.into(),
            message: None,
        }
    }

    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            component: component.into(),
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            component: component.into(),
            message: Some(message.into()),
        }
    }
}

impl From<&CircuitBreakerState> for HealthCheck {
    fn from(breaker: &CircuitBreakerState) -> Self {
        let component = breaker.target.as_str();
        match breaker.state {
            CircuitState::Closed if breaker.failure_count == 0 => Self::healthy(component),
            CircuitState::Closed => Self::degraded(
                component,
                format!("{} consecutive failed calls", breaker.failure_count),
            ),
            CircuitState::HalfOpen => Self::degraded(component, "probing after cooldown"),
            CircuitState::Open => Self::unhealthy(component, "circuit open"),
        }
    }
}

/// Worst status across a set of checks (`Healthy` when empty).
pub fn worst_status<'a>(checks: impl IntoIterator<Item = &'a HealthCheck>) -> HealthStatus {
    checks
        .into_iter()
        .map(|c| c.status)
        .max_by_key(|s| match s {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        })
        .unwrap_or(HealthStatus::Healthy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FetchTarget, TierId};

    #[test]
    fn test_breaker_to_health() {
        let mut breaker = CircuitBreakerState::closed(FetchTarget::Tier(TierId::Critical));
        assert_eq!(HealthCheck::from(&breaker).status, HealthStatus::Healthy);

        breaker.failure_count = 2;
        assert_eq!(HealthCheck::from(&breaker).status, HealthStatus::Degraded);

        breaker.state = CircuitState::Open;
        let check = HealthCheck::from(&breaker);
        assert_eq!(check.status, HealthStatus::Unhealthy);
        assert_eq!(check.component, "critical");
    }

    #[test]
    fn test_worst_status() {
        let checks = vec![
            HealthCheck::healthy("critical"),
            HealthCheck::unhealthy("secondary", "circuit open"),
            HealthCheck::degraded("detailed", "probing"),
        ];
        assert_eq!(worst_status(&checks), HealthStatus::Unhealthy);
        assert_eq!(worst_status(&Vec::new()), HealthStatus::Healthy);
    }
}
