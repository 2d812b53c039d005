use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;
use crate::kind::ErrorKind;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("backend session initialization failed: {0}")]
    Initialization(#[source] BackendError),
    #[error("backend session initialization timed out after {0:?}")]
    InitializationTimeout(Duration),
    #[error("backend session unavailable")]
    Unavailable,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Initialization
    }
}
