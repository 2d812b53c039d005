use std::fmt;

use serde::{Deserialize, Serialize};

/// Failure taxonomy shared by the session manager, the retry policy and
/// the caller-visible errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Initialization,
    BotDetection,
    Network,
    RateLimit,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Initialization => "initialization",
            ErrorKind::BotDetection => "bot_detection",
            ErrorKind::Network => "network",
            ErrorKind::RateLimit => "rate_limit",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::Initialization => "initialization error",
            ErrorKind::BotDetection => "bot detection",
            ErrorKind::Network => "network error",
            ErrorKind::RateLimit => "rate limited",
        };
        f.write_str(label)
    }
}
