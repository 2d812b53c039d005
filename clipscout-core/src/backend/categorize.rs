use crate::kind::ErrorKind;

use super::error::BackendError;

const BOT_MARKERS: [&str; 6] = [
    "captcha",
    "verify",
    "bot",
    "forbidden",
    "challenge",
    "access denied",
];
const THROTTLE_MARKERS: [&str; 5] = ["rate limit", "too many", "429", "throttled", "throttling"];

pub struct ErrorCategorizer;

impl ErrorCategorizer {
    /// Maps a failed backend search onto the retry taxonomy. Transport
    /// failures are always `Network`; only opaque errors are inspected for
    /// block or throttle wording.
    pub fn categorize(error: &BackendError) -> ErrorKind {
        match error {
            BackendError::Blocked(_) => ErrorKind::BotDetection,
            BackendError::Throttled(_) => ErrorKind::RateLimit,
            BackendError::Network(_)
            | BackendError::Timeout(_)
            | BackendError::Io(_)
            | BackendError::Configuration(_)
            | BackendError::Launch(_) => ErrorKind::Network,
            BackendError::Payload(message) | BackendError::Unexpected(message) => {
                Self::from_message(message)
            }
            BackendError::Cdp(err) => Self::from_message(&err.to_string()),
        }
    }

    /// Whole-word match over the message with URLs removed, so the search
    /// terms embedded in a navigation URL never decide the kind.
    fn from_message(message: &str) -> ErrorKind {
        let words = message
            .split_whitespace()
            .filter(|chunk| !chunk.contains("://") && !chunk.contains("?q="))
            .flat_map(|chunk| chunk.split(|c: char| !c.is_alphanumeric()))
            .filter(|word| !word.is_empty())
            .map(str::to_lowercase)
            .collect::<Vec<_>>();
        let padded = format!(" {} ", words.join(" "));
        let has = |marker: &&str| padded.contains(&format!(" {marker} "));
        if BOT_MARKERS.iter().any(has) {
            ErrorKind::BotDetection
        } else if THROTTLE_MARKERS.iter().any(has) {
            ErrorKind::RateLimit
        } else {
            ErrorKind::Network
        }
    }
}
