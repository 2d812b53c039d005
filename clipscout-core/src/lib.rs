pub mod backend;
pub mod browser;
pub mod capture;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod kind;
pub mod metrics;
pub mod search;
pub mod session;
pub mod telemetry;

pub use backend::{
    BackendError, BackendResult, BackendSession, ErrorCategorizer, RawStats, RawVideo,
    ScrapingBackend,
};
pub use browser::PlatformBackend;
pub use capture::CaptureStore;
pub use config::{
    load_service_config, BackendConfig, BrowserSection, ObservabilitySection, RetrySection,
    SearchSection, ServiceConfig, SessionSection, AUTH_TOKEN_ENV, PROXY_ENV,
};
pub use dispatch::{Dispatcher, ErrorBody, ErrorStatus, Request, Response, ResponseEnvelope};
pub use error::{ConfigError, Result};
pub use health::{HealthReporter, HealthStatus, ServiceInfo};
pub use kind::ErrorKind;
pub use metrics::ServiceMetrics;
pub use search::{
    RetryDecision, RetryLedger, RetryPolicy, SearchError, SearchOrchestrator, SearchRequest,
    SearchSettings, VideoRecord, VideoStats,
};
pub use session::{
    FailureDisposition, LastError, SessionError, SessionHandle, SessionManager, SessionResult,
    SessionSettings, SessionSnapshot, SessionState,
};
pub use telemetry::{FailureLedger, RemediationAction, StoredFailure, TelemetryError};
