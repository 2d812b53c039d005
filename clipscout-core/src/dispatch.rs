//! JSON request/response protocol in front of the orchestrator. One request
//! per line in, one response per line out; an optional `id` is echoed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::health::{HealthReporter, HealthStatus};
use crate::kind::ErrorKind;
use crate::search::{SearchError, SearchOrchestrator, SearchRequest, VideoRecord};

pub const CLEANUP_MESSAGE: &str = "Service cleaned up successfully";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Health,
    Search {
        #[serde(alias = "search_terms", alias = "keywords")]
        terms: Vec<String>,
        #[serde(default)]
        count: Option<u32>,
    },
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatus {
    InvalidRequest,
    ServiceUnavailable,
    UpstreamBlocked,
    RateLimited,
    UpstreamUnavailable,
}

impl From<ErrorKind> for ErrorStatus {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::InvalidInput => ErrorStatus::InvalidRequest,
            ErrorKind::Initialization => ErrorStatus::ServiceUnavailable,
            ErrorKind::BotDetection => ErrorStatus::UpstreamBlocked,
            ErrorKind::RateLimit => ErrorStatus::RateLimited,
            ErrorKind::Network => ErrorStatus::UpstreamUnavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub status: ErrorStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl ErrorBody {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            status: ErrorStatus::InvalidRequest,
            message: message.into(),
            attempts: None,
        }
    }
}

impl From<&SearchError> for ErrorBody {
    fn from(err: &SearchError) -> Self {
        let kind = err.kind();
        Self {
            kind,
            status: kind.into(),
            message: err.to_string(),
            attempts: match err {
                SearchError::InvalidInput(_) => None,
                SearchError::Exhausted { attempts, .. } => Some(*attempts),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Health(HealthStatus),
    Videos {
        query: String,
        count: usize,
        videos: Vec<VideoRecord>,
    },
    Cleanup {
        success: bool,
        message: String,
    },
    Error(ErrorBody),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            format!(
                r#"{{"type":"error","kind":"invalid_input","status":"invalid_request","message":{}}}"#,
                Value::String(format!("failed to encode response: {err}"))
            )
        })
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    orchestrator: Arc<SearchOrchestrator>,
    health: HealthReporter,
}

impl Dispatcher {
    pub fn new(orchestrator: Arc<SearchOrchestrator>) -> Self {
        let health = HealthReporter::new(Arc::clone(orchestrator.session()));
        Self {
            orchestrator,
            health,
        }
    }

    pub fn health_reporter(&self) -> &HealthReporter {
        &self.health
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::Health => Response::Health(self.health.health()),
            Request::Cleanup => {
                self.orchestrator.session().cleanup().await;
                Response::Cleanup {
                    success: true,
                    message: CLEANUP_MESSAGE.to_string(),
                }
            }
            Request::Search { terms, count } => {
                let request = SearchRequest { terms, count };
                match self.orchestrator.search(&request).await {
                    Ok(videos) => {
                        let query = request
                            .validate(self.orchestrator.limits())
                            .map(|search| search.query())
                            .unwrap_or_else(|_| request.terms.join(" "));
                        Response::Videos {
                            query,
                            count: videos.len(),
                            videos,
                        }
                    }
                    Err(err) => Response::Error(ErrorBody::from(&err)),
                }
            }
        }
    }

    /// Parses one JSON request and answers it. Malformed input becomes an
    /// `invalid_input` error rather than a failure of the loop.
    pub async fn dispatch_line(&self, line: &str) -> ResponseEnvelope {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                return ResponseEnvelope {
                    id: None,
                    response: Response::Error(ErrorBody::invalid(format!(
                        "malformed request: {err}"
                    ))),
                }
            }
        };
        let id = value.get("id").cloned().filter(|id| !id.is_null());
        let response = match Request::deserialize(value) {
            Ok(request) => {
                debug!(request = ?request, "dispatching request");
                self.dispatch(request).await
            }
            Err(err) => Response::Error(ErrorBody::invalid(format!("invalid request: {err}"))),
        };
        ResponseEnvelope { id, response }
    }
}
