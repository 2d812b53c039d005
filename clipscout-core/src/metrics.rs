use serde::{Deserialize, Serialize};

use crate::kind::ErrorKind;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub initializations: u64,
    pub initialization_failures: u64,
    pub session_rotations: u64,
    pub session_discards: u64,
    pub searches: u64,
    pub searches_failed: u64,
    pub backend_attempts: u64,
    pub attempt_failures: u64,
    pub bot_detections: u64,
    pub rate_limits: u64,
    pub timeouts: u64,
    pub videos_returned: u64,
}

impl ServiceMetrics {
    pub fn record_initialization(&mut self, success: bool) {
        if success {
            self.initializations = self.initializations.saturating_add(1);
        } else {
            self.initialization_failures = self.initialization_failures.saturating_add(1);
        }
    }

    pub fn record_rotation(&mut self) {
        self.session_rotations = self.session_rotations.saturating_add(1);
    }

    pub fn record_discard(&mut self) {
        self.session_discards = self.session_discards.saturating_add(1);
    }

    pub fn record_attempt(&mut self) {
        self.backend_attempts = self.backend_attempts.saturating_add(1);
    }

    pub fn record_attempt_failure(&mut self, kind: ErrorKind) {
        self.attempt_failures = self.attempt_failures.saturating_add(1);
        match kind {
            ErrorKind::BotDetection => {
                self.bot_detections = self.bot_detections.saturating_add(1);
            }
            ErrorKind::RateLimit => {
                self.rate_limits = self.rate_limits.saturating_add(1);
            }
            _ => {}
        }
    }

    pub fn record_timeout(&mut self) {
        self.timeouts = self.timeouts.saturating_add(1);
    }

    pub fn record_search(&mut self, videos: Option<usize>) {
        self.searches = self.searches.saturating_add(1);
        match videos {
            Some(count) => {
                self.videos_returned = self.videos_returned.saturating_add(count as u64);
            }
            None => self.searches_failed = self.searches_failed.saturating_add(1),
        }
    }

    pub fn search_success_rate(&self) -> f64 {
        if self.searches == 0 {
            0.0
        } else {
            let succeeded = self.searches.saturating_sub(self.searches_failed);
            (succeeded as f64 / self.searches as f64) * 100.0
        }
    }
}
