use serde::{Deserialize, Serialize};

/// Success envelope every chat endpoint responds with. Errors never go
/// through this type; they are rendered by `AppError`'s `IntoResponse`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

// --- Health reporting ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but an optional dependency (redis presence) is down.
    Degraded,
    Unhealthy,
}

/// One probed dependency in the health report.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub checks: Vec<HealthCheck>,
}

impl HealthResponse {
    /// Aggregate a set of dependency probes: the worst check wins.
    pub fn from_checks(
        service: impl Into<String>,
        version: impl Into<String>,
        checks: Vec<HealthCheck>,
    ) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, |acc, s| match (acc, s) {
                (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => {
                    HealthStatus::Unhealthy
                }
                (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
                _ => HealthStatus::Healthy,
            });

        Self {
            status,
            service: service.into(),
            version: version.into(),
            checks,
        }
    }

    /// Whether a load balancer should keep routing traffic here.
    pub fn is_serving(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_flat() {
        let json = serde_json::to_value(ApiResponse::ok(vec![1, 2])).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true, "data": [1, 2] }));
    }

    #[test]
    fn worst_check_drives_overall_status() {
        let healthy = HealthResponse::from_checks("chat", "1.0", vec![HealthCheck::pass("postgres")]);
        assert_eq!(healthy.status, HealthStatus::Healthy);
        assert!(healthy.is_serving());

        let degraded = HealthResponse::from_checks(
            "chat",
            "1.0",
            vec![HealthCheck::pass("postgres"), HealthCheck::degraded("redis", "timeout")],
        );
        assert_eq!(degraded.status, HealthStatus::Degraded);
        assert!(degraded.is_serving());

        let down = HealthResponse::from_checks(
            "chat",
            "1.0",
            vec![HealthCheck::fail("postgres", "pool exhausted"), HealthCheck::pass("redis")],
        );
        assert_eq!(down.status, HealthStatus::Unhealthy);
        assert!(!down.is_serving());
    }
}
