use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::task::spawn_blocking;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{ErrorCategorizer, RawVideo};
use crate::capture::CaptureStore;
use crate::config::{SearchSection, ServiceConfig};
use crate::kind::ErrorKind;
use crate::metrics::ServiceMetrics;
use crate::session::{FailureDisposition, LastError, SessionManager};
use crate::telemetry::{
    FailureContext, FailureLedger, RemediationAction, RunContext, TelemetryError,
};

use super::error::SearchError;
use super::request::{SearchRequest, ValidatedSearch};
use super::retry::{RetryLedger, RetryPolicy};
use super::video::{normalize, VideoRecord};

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub limits: SearchSection,
    pub call_timeout: Duration,
    pub pacing_range_ms: (u64, u64),
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            limits: SearchSection::default(),
            call_timeout: Duration::from_secs(60),
            pacing_range_ms: (0, 0),
        }
    }
}

impl From<&ServiceConfig> for SearchSettings {
    fn from(config: &ServiceConfig) -> Self {
        let [low, high] = config.pacing.delay_range_ms;
        Self {
            limits: config.search.clone(),
            call_timeout: config.session.call_timeout(),
            pacing_range_ms: (low, high),
        }
    }
}

/// Spaces consecutive backend searches. Only touched while the session
/// guard is held, so the bookkeeping lock is never contended across awaits.
#[derive(Debug)]
struct Pacer {
    range: (u64, u64),
    last_finished: Mutex<Option<Instant>>,
}

impl Pacer {
    fn new(range: (u64, u64)) -> Self {
        Self {
            range,
            last_finished: Mutex::new(None),
        }
    }

    async fn wait(&self) -> u64 {
        if self.range.0 == 0 && self.range.1 == 0 {
            return 0;
        }
        let last = *self.last_finished.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(finished) = last else {
            return 0;
        };
        let target = {
            let mut rng = rand::thread_rng();
            let lower = self.range.0.min(self.range.1);
            let upper = self.range.0.max(self.range.1);
            Duration::from_millis(rng.gen_range(lower..=upper))
        };
        let remaining = target.saturating_sub(finished.elapsed());
        if !remaining.is_zero() {
            sleep(remaining).await;
        }
        remaining.as_millis() as u64
    }

    fn finished(&self) {
        *self.last_finished.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }
}

#[derive(Debug)]
struct AttemptFailure {
    kind: ErrorKind,
    message: String,
    generation: Option<u64>,
    discarded: bool,
}

pub struct SearchOrchestrator {
    session: Arc<SessionManager>,
    policy: RetryPolicy,
    settings: SearchSettings,
    pacer: Pacer,
    ledger: Option<Arc<FailureLedger>>,
    captures: Option<CaptureStore>,
}

impl SearchOrchestrator {
    pub fn new(session: Arc<SessionManager>, policy: RetryPolicy, settings: SearchSettings) -> Self {
        let pacer = Pacer::new(settings.pacing_range_ms);
        Self {
            session,
            policy,
            settings,
            pacer,
            ledger: None,
            captures: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<FailureLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_captures(mut self, captures: CaptureStore) -> Self {
        self.captures = Some(captures);
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn limits(&self) -> &SearchSection {
        &self.settings.limits
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<VideoRecord>, SearchError> {
        let search = request.validate(&self.settings.limits)?;
        let request_id = Uuid::new_v4().to_string();
        let query = search.query();
        let started = Instant::now();
        let mut retries = RetryLedger::new(&self.policy);
        debug!(request_id = %request_id, query = %query, count = search.count, "search accepted");

        loop {
            let attempt = retries.begin_attempt();
            let failure = match self.attempt(&search).await {
                Ok(raw) => {
                    let videos = normalize(raw, search.count);
                    self.session
                        .with_metrics(|metrics| metrics.record_search(Some(videos.len())));
                    info!(
                        request_id = %request_id,
                        query = %query,
                        attempts = attempt,
                        videos = videos.len(),
                        "search completed"
                    );
                    self.record_run(&request_id, &query, &search, attempt, started, Some(&videos))
                        .await;
                    self.archive(&request_id, &query, &videos).await;
                    return Ok(videos);
                }
                Err(failure) => failure,
            };

            let decision = retries.record_failure(failure.kind);
            let action = if !decision.retry {
                RemediationAction::Abort
            } else if failure.discarded {
                RemediationAction::SessionDiscarded {
                    delay_ms: decision.delay.as_millis() as u64,
                }
            } else {
                RemediationAction::RetryScheduled {
                    delay_ms: decision.delay.as_millis() as u64,
                }
            };
            warn!(
                request_id = %request_id,
                attempt,
                kind = %failure.kind,
                error = %failure.message,
                action = action.label(),
                "search attempt failed"
            );
            self.record_failure(&request_id, &query, attempt, &failure, action)
                .await;

            if !decision.retry {
                self.session.with_metrics(|metrics| metrics.record_search(None));
                self.record_run(&request_id, &query, &search, attempt, started, None)
                    .await;
                return Err(SearchError::Exhausted {
                    kind: failure.kind,
                    attempts: attempt,
                    message: failure.message,
                });
            }
            if !decision.delay.is_zero() {
                sleep(decision.delay).await;
            }
        }
    }

    /// One pass through the session: acquire, pace, call. Failures are
    /// reported to the session manager before the guard is released so no
    /// queued caller can pick up a handle that just failed.
    async fn attempt(&self, search: &ValidatedSearch) -> Result<Vec<RawVideo>, AttemptFailure> {
        let mut handle = match self.session.ensure_ready().await {
            Ok(handle) => handle,
            Err(err) => {
                return Err(AttemptFailure {
                    kind: err.kind(),
                    message: err.to_string(),
                    generation: Some(self.session.snapshot().generation),
                    discarded: false,
                })
            }
        };
        let generation = handle.generation();

        let waited = self.pacer.wait().await;
        if waited > 0 {
            debug!(delay_ms = waited, generation, "pacing before backend search");
        }
        self.session.with_metrics(ServiceMetrics::record_attempt);
        let outcome = timeout(
            self.settings.call_timeout,
            handle.search(&search.terms, search.count),
        )
        .await;
        self.pacer.finished();

        let (kind, message, timed_out) = match outcome {
            Ok(Ok(raw)) => return Ok(raw),
            Ok(Err(err)) => (ErrorCategorizer::categorize(&err), err.to_string(), false),
            Err(_) => (
                ErrorKind::Network,
                format!(
                    "backend search timed out after {:?}",
                    self.settings.call_timeout
                ),
                true,
            ),
        };

        let discarded = timed_out || self.policy.forces_reinit(kind);
        let disposition = if discarded {
            FailureDisposition::Discard
        } else {
            FailureDisposition::Retain
        };
        self.session.mark_failed(
            generation,
            LastError::new(kind, message.clone()),
            disposition,
        );
        self.session.with_metrics(|metrics| {
            metrics.record_attempt_failure(kind);
            if timed_out {
                metrics.record_timeout();
            }
        });
        drop(handle);

        Err(AttemptFailure {
            kind,
            message,
            generation: Some(generation),
            discarded,
        })
    }

    async fn record_failure(
        &self,
        request_id: &str,
        query: &str,
        attempt: u32,
        failure: &AttemptFailure,
        action: RemediationAction,
    ) {
        let entry = FailureContext {
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            query: query.to_string(),
            kind: failure.kind,
            error_message: failure.message.clone(),
            attempt,
            generation: failure.generation,
            action,
        };
        self.write_ledger("failure", move |ledger| ledger.record_failure(&entry))
            .await;
    }

    async fn record_run(
        &self,
        request_id: &str,
        query: &str,
        search: &ValidatedSearch,
        attempts: u32,
        started: Instant,
        videos: Option<&[VideoRecord]>,
    ) {
        let run = RunContext {
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            query: query.to_string(),
            requested: search.count,
            returned: videos.map(<[VideoRecord]>::len).unwrap_or(0),
            attempts,
            duration_ms: started.elapsed().as_millis() as i64,
            success: videos.is_some(),
        };
        self.write_ledger("run", move |ledger| ledger.record_run(&run))
            .await;
    }

    /// SQLite and file writes run on the blocking pool. Failures are only
    /// logged; the ledger never fails a search.
    async fn write_ledger<F>(&self, entry: &'static str, write: F)
    where
        F: FnOnce(&FailureLedger) -> Result<(), TelemetryError> + Send + 'static,
    {
        let Some(ledger) = self.ledger.as_ref().map(Arc::clone) else {
            return;
        };
        match spawn_blocking(move || write(&ledger)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(entry, error = %err, "failed to write ledger entry"),
            Err(err) => warn!(entry, error = %err, "ledger write task failed"),
        }
    }

    async fn archive(&self, request_id: &str, query: &str, videos: &[VideoRecord]) {
        let Some(captures) = self.captures.as_ref() else {
            return;
        };
        match captures.store(request_id, query, videos).await {
            Ok(path) => debug!(path = %path.display(), "search captured"),
            Err(err) => warn!(error = %err, "failed to archive search capture"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pacer_skips_first_search_and_spaces_the_next() {
        let pacer = Pacer::new((1_000, 1_000));
        assert_eq!(pacer.wait().await, 0);
        pacer.finished();

        tokio::time::advance(Duration::from_millis(400)).await;
        let before = Instant::now();
        let waited = pacer.wait().await;
        assert_eq!(waited, 600);
        assert!(before.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_does_not_wait_when_gap_already_elapsed() {
        let pacer = Pacer::new((500, 800));
        pacer.finished();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(pacer.wait().await, 0);
    }

    #[tokio::test]
    async fn disabled_pacer_never_waits() {
        let pacer = Pacer::new((0, 0));
        pacer.finished();
        assert_eq!(pacer.wait().await, 0);
    }
}
