use std::sync::{Arc, Mutex, MutexGuard as RecordGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{MappedMutexGuard, Mutex as AsyncMutex, MutexGuard};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::backend::{
    BackendResult, BackendSession, ErrorCategorizer, RawVideo, ScrapingBackend,
};
use crate::config::{BackendConfig, SessionSection};
use crate::kind::ErrorKind;
use crate::metrics::ServiceMetrics;

use super::error::{SessionError, SessionResult};
use super::state::{FailureDisposition, LastError, SessionRecord, SessionSnapshot, SessionState};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub init_timeout: Duration,
    pub max_age: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(90),
            max_age: None,
        }
    }
}

impl From<&SessionSection> for SessionSettings {
    fn from(section: &SessionSection) -> Self {
        Self {
            init_timeout: section.init_timeout(),
            max_age: section.max_age(),
        }
    }
}

#[derive(Default)]
struct SessionSlot {
    session: Option<Box<dyn BackendSession>>,
    started_at: Option<Instant>,
}

enum Readiness {
    Reuse,
    Resume,
    Rotate,
    Initialize,
}

/// Owns the single backend session. Initialization and every backend call
/// run under `slot`, a FIFO async mutex; `record` holds the published state
/// and is only locked for short synchronous sections so snapshots never wait
/// on backend I/O.
pub struct SessionManager {
    backend: Arc<dyn ScrapingBackend>,
    backend_config: BackendConfig,
    settings: SessionSettings,
    slot: AsyncMutex<SessionSlot>,
    record: Mutex<SessionRecord>,
    metrics: Arc<Mutex<ServiceMetrics>>,
}

/// Exclusive access to a ready backend session. Holding it keeps every
/// other caller (and cleanup) queued.
pub struct SessionHandle<'a> {
    session: MappedMutexGuard<'a, dyn BackendSession>,
    generation: u64,
}

impl SessionHandle<'_> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn search(&mut self, terms: &[String], count: usize) -> BackendResult<Vec<RawVideo>> {
        self.session.search(terms, count).await
    }
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn ScrapingBackend>,
        backend_config: BackendConfig,
        settings: SessionSettings,
    ) -> Self {
        Self {
            backend,
            backend_config,
            settings,
            slot: AsyncMutex::new(SessionSlot::default()),
            record: Mutex::new(SessionRecord::default()),
            metrics: Arc::new(Mutex::new(ServiceMetrics::default())),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.record().snapshot()
    }

    pub fn metrics(&self) -> ServiceMetrics {
        self.with_metrics(|metrics| metrics.clone())
    }

    pub(crate) fn with_metrics<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut ServiceMetrics) -> R,
    {
        let mut guard = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Opens the session ahead of the first request.
    pub async fn warm_up(&self) -> SessionResult<u64> {
        let handle = self.ensure_ready().await?;
        Ok(handle.generation())
    }

    pub async fn ensure_ready(&self) -> SessionResult<SessionHandle<'_>> {
        let mut slot = self.slot.lock().await;
        match self.readiness(&slot) {
            Readiness::Reuse => {}
            Readiness::Resume => {
                self.record().state = SessionState::Ready;
                debug!("resuming session after a transient failure");
            }
            Readiness::Rotate => {
                info!("rotating session past its maximum age");
                self.with_metrics(ServiceMetrics::record_rotation);
                self.reinitialize(&mut slot).await?;
            }
            Readiness::Initialize => self.reinitialize(&mut slot).await?,
        }

        let generation = self.record().generation;
        let session = MutexGuard::try_map(slot, |slot| slot.session.as_deref_mut())
            .map_err(|_| SessionError::Unavailable)?;
        Ok(SessionHandle {
            session,
            generation,
        })
    }

    /// Reports a failed backend call. Reports from an older generation are
    /// ignored so they cannot demote a session that has since been replaced.
    pub fn mark_failed(
        &self,
        generation: u64,
        failure: LastError,
        disposition: FailureDisposition,
    ) -> bool {
        let mut record = self.record();
        if record.generation != generation {
            debug!(
                generation,
                current = record.generation,
                "ignoring failure reported by a stale session"
            );
            return false;
        }
        if record.state == SessionState::Ready {
            record.state = SessionState::Degraded;
        }
        if disposition == FailureDisposition::Discard {
            record.discard_pending = true;
        }
        warn!(
            generation,
            kind = %failure.kind,
            error = %failure.message,
            discard = record.discard_pending,
            "session marked degraded"
        );
        record.last_error = Some(failure);
        true
    }

    /// Closes the session if there is one. Never fails: a failing close is
    /// recorded in `last_error` and the state still ends `Closed`.
    pub async fn cleanup(&self) {
        let mut slot = self.slot.lock().await;
        let state = self.record().state;
        slot.started_at = None;
        let Some(session) = slot.session.take() else {
            if state == SessionState::Degraded {
                let mut record = self.record();
                record.state = SessionState::Closed;
                record.discard_pending = false;
                info!("closed degraded session without a live handle");
            } else {
                debug!(state = %state, "cleanup requested with no active session");
            }
            return;
        };

        let outcome = session.close().await;
        let mut record = self.record();
        record.state = SessionState::Closed;
        record.discard_pending = false;
        match outcome {
            Ok(()) => info!(generation = record.generation, "backend session closed"),
            Err(err) => {
                warn!(generation = record.generation, error = %err, "backend session close failed");
                record.last_error = Some(LastError::new(
                    ErrorCategorizer::categorize(&err),
                    format!("cleanup: {err}"),
                ));
            }
        }
    }

    fn record(&self) -> RecordGuard<'_, SessionRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn readiness(&self, slot: &SessionSlot) -> Readiness {
        let record = self.record();
        if slot.session.is_none() || record.discard_pending {
            return Readiness::Initialize;
        }
        match record.state {
            SessionState::Ready if self.expired(slot) => Readiness::Rotate,
            SessionState::Ready => Readiness::Reuse,
            SessionState::Degraded => Readiness::Resume,
            _ => Readiness::Initialize,
        }
    }

    fn expired(&self, slot: &SessionSlot) -> bool {
        match (self.settings.max_age, slot.started_at) {
            (Some(max_age), Some(started)) => started.elapsed() >= max_age,
            _ => false,
        }
    }

    async fn reinitialize(&self, slot: &mut SessionSlot) -> SessionResult<()> {
        slot.started_at = None;
        if let Some(previous) = slot.session.take() {
            self.with_metrics(ServiceMetrics::record_discard);
            if let Err(err) = previous.close().await {
                warn!(error = %err, "failed to close previous backend session");
            }
        }

        let generation = {
            let mut record = self.record();
            record.state = SessionState::Initializing;
            record.generation += 1;
            record.discard_pending = false;
            record.generation
        };
        info!(generation, "initializing backend session");

        let init_timeout = self.settings.init_timeout;
        let error = match timeout(init_timeout, self.backend.initialize(&self.backend_config)).await
        {
            Ok(Ok(session)) => {
                slot.session = Some(session);
                slot.started_at = Some(Instant::now());
                {
                    let mut record = self.record();
                    record.state = SessionState::Ready;
                    record.last_error = None;
                }
                self.with_metrics(|metrics| metrics.record_initialization(true));
                info!(generation, "backend session ready");
                return Ok(());
            }
            Ok(Err(err)) => SessionError::Initialization(err),
            Err(_) => SessionError::InitializationTimeout(init_timeout),
        };

        {
            let mut record = self.record();
            record.state = SessionState::Degraded;
            record.last_error = Some(LastError::new(ErrorKind::Initialization, error.to_string()));
        }
        self.with_metrics(|metrics| metrics.record_initialization(false));
        warn!(generation, error = %error, "backend session initialization failed");
        Err(error)
    }
}
