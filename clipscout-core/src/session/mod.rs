mod error;
mod manager;
mod state;

pub use error::{SessionError, SessionResult};
pub use manager::{SessionHandle, SessionManager, SessionSettings};
pub use state::{FailureDisposition, LastError, SessionSnapshot, SessionState};
