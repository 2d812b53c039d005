use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kind::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Degraded,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Degraded => "degraded",
            SessionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl LastError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// What `mark_failed` should do with the handle that produced the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Keep the handle; the next caller resumes it under the same generation.
    Retain,
    /// Close the handle and start a new generation on next use.
    Discard,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub generation: u64,
    pub api_initialized: bool,
    pub last_error: Option<LastError>,
}

#[derive(Debug)]
pub(crate) struct SessionRecord {
    pub(crate) state: SessionState,
    pub(crate) generation: u64,
    pub(crate) last_error: Option<LastError>,
    pub(crate) discard_pending: bool,
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self {
            state: SessionState::Uninitialized,
            generation: 0,
            last_error: None,
            discard_pending: false,
        }
    }
}

impl SessionRecord {
    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            generation: self.generation,
            api_initialized: self.state == SessionState::Ready,
            last_error: self.last_error.clone(),
        }
    }
}
