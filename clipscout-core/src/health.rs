use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::metrics::ServiceMetrics;
use crate::session::{LastError, SessionManager, SessionState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: env!("CARGO_PKG_DESCRIPTION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHealth {
    pub state: SessionState,
    pub generation: u64,
    pub last_error: Option<LastError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub api_initialized: bool,
    pub service: ServiceInfo,
    pub session: SessionHealth,
    pub metrics: ServiceMetrics,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time view of the session. Reads only the published record, so
/// it answers while an initialization or search holds the session.
#[derive(Clone)]
pub struct HealthReporter {
    session: Arc<SessionManager>,
    info: ServiceInfo,
}

impl HealthReporter {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            info: ServiceInfo::default(),
        }
    }

    pub fn with_info(mut self, info: ServiceInfo) -> Self {
        self.info = info;
        self
    }

    pub fn health(&self) -> HealthStatus {
        let snapshot = self.session.snapshot();
        HealthStatus {
            status: "running",
            api_initialized: snapshot.api_initialized,
            service: self.info.clone(),
            session: SessionHealth {
                state: snapshot.state,
                generation: snapshot.generation,
                last_error: snapshot.last_error,
            },
            metrics: self.session.metrics(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BackendResult, BackendSession, ScrapingBackend};
    use crate::config::BackendConfig;
    use crate::session::SessionSettings;
    use async_trait::async_trait;

    struct RefusingBackend;

    #[async_trait]
    impl ScrapingBackend for RefusingBackend {
        async fn initialize(
            &self,
            _config: &BackendConfig,
        ) -> BackendResult<Box<dyn BackendSession>> {
            Err(BackendError::Launch("chromium not found".into()))
        }
    }

    #[tokio::test]
    async fn health_reports_uninitialized_service() {
        let session = Arc::new(SessionManager::new(
            Arc::new(RefusingBackend),
            BackendConfig::default(),
            SessionSettings::default(),
        ));
        let status = HealthReporter::new(session).health();
        assert_eq!(status.status, "running");
        assert!(!status.api_initialized);
        assert_eq!(status.session.state, SessionState::Uninitialized);
        assert_eq!(status.service.name, "clipscout-core");

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["apiInitialized"], false);
        assert_eq!(json["session"]["lastError"], serde_json::Value::Null);
        assert!(json["service"]["version"].is_string());
    }

    #[tokio::test]
    async fn failed_initialization_is_visible() {
        let session = Arc::new(SessionManager::new(
            Arc::new(RefusingBackend),
            BackendConfig::default(),
            SessionSettings::default(),
        ));
        assert!(session.warm_up().await.is_err());

        let status = HealthReporter::new(Arc::clone(&session)).health();
        assert_eq!(status.session.state, SessionState::Degraded);
        assert_eq!(status.session.generation, 1);
        assert_eq!(status.metrics.initialization_failures, 1);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["session"]["lastError"]["kind"], "initialization");
    }
}
