use thiserror::Error;

use crate::kind::ErrorKind;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search request: {0}")]
    InvalidInput(String),
    #[error("{kind} after {attempts} attempt(s): {message}")]
    Exhausted {
        kind: ErrorKind,
        attempts: u32,
        message: String,
    },
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::InvalidInput(_) => ErrorKind::InvalidInput,
            SearchError::Exhausted { kind, .. } => *kind,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            SearchError::InvalidInput(_) => 0,
            SearchError::Exhausted { attempts, .. } => *attempts,
        }
    }
}
