use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clipscout_core::dispatch::CLEANUP_MESSAGE;
use clipscout_core::{
    load_service_config, CaptureStore, Dispatcher, FailureLedger, HealthStatus, PlatformBackend,
    RetryPolicy, ScrapingBackend, SearchError, SearchOrchestrator, SearchRequest, SearchSettings,
    ServiceConfig, SessionError, SessionManager, SessionSettings, StoredFailure, TelemetryError,
    VideoRecord,
};
use serde::Serialize;
use thiserror::Error;
use tokio::io::BufReader;
use tracing::{info, warn};

mod serve;

pub use serve::{serve_lines, ServeSummary};

pub const DEFAULT_CONFIG_PATH: &str = "configs/clipscout.toml";

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] clipscout_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("search failed: {0}")]
    Search(#[from] SearchError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Clipscout video search control interface", long_about = None)]
pub struct Cli {
    /// Path to clipscout.toml; falls back to configs/clipscout.toml, then built-in defaults
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Override for the JSON-lines failure log
    #[arg(long)]
    pub failure_log: Option<PathBuf>,
    /// Override for the SQLite failure ledger
    #[arg(long)]
    pub ledger_db: Option<PathBuf>,
    /// Directory where successful searches are archived
    #[arg(long)]
    pub captures_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Report service and session health
    Health(HealthArgs),
    /// Run a single search and print the videos
    Search(SearchArgs),
    /// Close the backend session
    Cleanup,
    /// Answer JSON requests from stdin, one per line
    Serve(ServeArgs),
    /// List recent failed backend attempts
    Failures(FailuresArgs),
    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct HealthArgs {
    /// Initialize the backend session before reporting
    #[arg(long)]
    pub warm_up: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Search term (hashtag or keyword); repeat for several
    #[arg(short, long = "term", required = true)]
    pub terms: Vec<String>,
    /// Number of videos to return
    #[arg(short, long)]
    pub count: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Skip session initialization at startup
    #[arg(long)]
    pub no_warm_up: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FailuresArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(
            args.shell,
            &mut command,
            "clipscoutctl",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Health(args) => {
            let stack = context.stack()?;
            let status = stack.health(args.warm_up).await;
            render(&status, cli.format)?;
        }
        Commands::Search(args) => {
            let stack = context.stack()?;
            let report = stack.search(args).await?;
            render(&report, cli.format)?;
        }
        Commands::Cleanup => {
            let stack = context.stack()?;
            let report = stack.cleanup().await;
            render(&report, cli.format)?;
        }
        Commands::Serve(args) => {
            let stack = context.stack()?;
            let warm_up = !args.no_warm_up && context.config.session.warm_up;
            stack.serve_stdio(warm_up).await?;
        }
        Commands::Failures(args) => {
            let failures = context.failures(args)?;
            render(&failures, cli.format)?;
        }
        Commands::Completions(_) => {}
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: ServiceConfig,
    config_path: Option<PathBuf>,
    failure_log: Option<PathBuf>,
    ledger_db: Option<PathBuf>,
    captures_dir: Option<PathBuf>,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = match &cli.config {
            Some(path) => Some(path.clone()),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
                fallback.exists().then_some(fallback)
            }
        };
        let config = match &config_path {
            Some(path) => load_service_config(path)?,
            None => ServiceConfig::default(),
        };

        let observability = &config.observability;
        let failure_log = cli
            .failure_log
            .clone()
            .or_else(|| observability.failure_log.as_deref().map(PathBuf::from));
        let ledger_db = cli
            .ledger_db
            .clone()
            .or_else(|| observability.ledger_db.as_deref().map(PathBuf::from));
        let captures_dir = cli
            .captures_dir
            .clone()
            .or_else(|| observability.captures_dir.as_deref().map(PathBuf::from));

        Ok(Self {
            config,
            config_path,
            failure_log,
            ledger_db,
            captures_dir,
        })
    }

    fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    fn ledger(&self) -> Result<Option<Arc<FailureLedger>>> {
        match (&self.failure_log, &self.ledger_db) {
            (Some(log), Some(db)) => Ok(Some(Arc::new(FailureLedger::new(log, db)?))),
            _ => Ok(None),
        }
    }

    fn stack(&self) -> Result<ServiceStack> {
        let backend = Arc::new(PlatformBackend::new(self.config.browser.clone()));
        self.stack_with(backend)
    }

    fn stack_with(&self, backend: Arc<dyn ScrapingBackend>) -> Result<ServiceStack> {
        let session = Arc::new(SessionManager::new(
            backend,
            self.config.backend_config(),
            SessionSettings::from(&self.config.session),
        ));
        let mut orchestrator = SearchOrchestrator::new(
            session,
            RetryPolicy::new(self.config.retry.clone()),
            SearchSettings::from(&self.config),
        );
        if let Some(ledger) = self.ledger()? {
            orchestrator = orchestrator.with_ledger(ledger);
        }
        if let Some(dir) = &self.captures_dir {
            orchestrator = orchestrator.with_captures(CaptureStore::new(dir)?);
        }
        info!(config = ?self.config_path(), "service stack assembled");
        let orchestrator = Arc::new(orchestrator);
        let dispatcher = Dispatcher::new(Arc::clone(&orchestrator));
        Ok(ServiceStack {
            orchestrator,
            dispatcher,
        })
    }

    fn failures(&self, args: &FailuresArgs) -> Result<FailureList> {
        let ledger = self.ledger()?.ok_or_else(|| {
            AppError::MissingResource("failure ledger paths are not configured".to_string())
        })?;
        let rows = ledger.recent_failures(args.limit)?;
        Ok(FailureList { rows })
    }
}

struct ServiceStack {
    orchestrator: Arc<SearchOrchestrator>,
    dispatcher: Dispatcher,
}

impl ServiceStack {
    fn session(&self) -> &Arc<SessionManager> {
        self.orchestrator.session()
    }

    async fn health(&self, warm_up: bool) -> HealthStatus {
        if warm_up {
            if let Err(err) = self.session().warm_up().await {
                warn!(error = %err, "warm-up failed");
            }
        }
        self.dispatcher.health_reporter().health()
    }

    /// Runs one search and always closes the session afterwards.
    async fn search(&self, args: &SearchArgs) -> Result<SearchReport> {
        let request = SearchRequest {
            terms: args.terms.clone(),
            count: args.count,
        };
        let outcome = self.orchestrator.search(&request).await;
        self.session().cleanup().await;
        let videos = outcome?;
        let query = request.validate(self.orchestrator.limits())?.query();
        Ok(SearchReport {
            query,
            count: videos.len(),
            videos,
        })
    }

    async fn cleanup(&self) -> CleanupReport {
        self.session().cleanup().await;
        CleanupReport {
            success: true,
            message: CLEANUP_MESSAGE.to_string(),
        }
    }

    async fn serve_stdio(&self, warm_up: bool) -> Result<ServeSummary> {
        if warm_up {
            match self.session().warm_up().await {
                Ok(generation) => info!(generation, "session warmed up"),
                Err(err) => warn!(error = %err, "warm-up failed, first request will retry"),
            }
        }
        let reader = BufReader::new(tokio::io::stdin());
        let mut writer = tokio::io::stdout();
        let shutdown = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };
        serve_lines(self.dispatcher.clone(), reader, &mut writer, shutdown).await
    }
}

impl DisplayFallback for HealthStatus {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Service: {} {}", self.service.name, self.service.version),
            format!("Status: {}", self.status),
            format!(
                "Session: {} (generation {}, initialized: {})",
                self.session.state,
                self.session.generation,
                if self.api_initialized { "yes" } else { "no" }
            ),
        ];
        if let Some(error) = &self.session.last_error {
            lines.push(format!("Last error: {} ({})", error.message, error.kind));
        }
        let metrics = &self.metrics;
        lines.push(format!(
            "Searches: {} ({} failed), backend attempts: {}, videos: {}",
            metrics.searches, metrics.searches_failed, metrics.backend_attempts, metrics.videos_returned
        ));
        lines.push(format!(
            "Sessions: {} started, {} failed, {} rotated, {} discarded",
            metrics.initializations,
            metrics.initialization_failures,
            metrics.session_rotations,
            metrics.session_discards
        ));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct SearchReport {
    pub query: String,
    pub count: usize,
    pub videos: Vec<VideoRecord>,
}

impl DisplayFallback for SearchReport {
    fn display(&self) -> String {
        if self.videos.is_empty() {
            return format!("No videos found for '{}'", self.query);
        }
        let mut lines = vec![format!("{} videos for '{}':", self.count, self.query)];
        for (idx, video) in self.videos.iter().enumerate() {
            lines.push(format!("{:>3}. {}", idx + 1, video.url));
            lines.push(format!(
                "     views {} | likes {} | shares {} | comments {}",
                video.stats.views, video.stats.likes, video.stats.shares, video.stats.comments
            ));
            if !video.description.is_empty() {
                lines.push(format!("     {}", video.description));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct CleanupReport {
    pub success: bool,
    pub message: String,
}

impl DisplayFallback for CleanupReport {
    fn display(&self) -> String {
        self.message.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct FailureList {
    pub rows: Vec<StoredFailure>,
}

impl DisplayFallback for FailureList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No failures recorded".to_string();
        }
        self.rows
            .iter()
            .map(|row| {
                format!(
                    "{} [{}] attempt {} '{}': {} -> {} ({} ms)",
                    row.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                    row.kind,
                    row.attempt,
                    row.query,
                    row.error_message,
                    row.remediation,
                    row.delay_ms
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use clipscout_core::telemetry::FailureContext;
    use clipscout_core::{
        BackendConfig, BackendError, BackendResult, BackendSession, ErrorKind, RawStats, RawVideo,
        RemediationAction, SessionState,
    };
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct StubBackend {
        inits: AtomicUsize,
    }

    struct StubSession;

    #[async_trait]
    impl ScrapingBackend for StubBackend {
        async fn initialize(
            &self,
            _config: &BackendConfig,
        ) -> BackendResult<Box<dyn BackendSession>> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubSession))
        }
    }

    #[async_trait]
    impl BackendSession for StubSession {
        async fn search(&mut self, terms: &[String], count: usize) -> BackendResult<Vec<RawVideo>> {
            if terms.iter().any(|term| term == "captcha") {
                return Err(BackendError::Blocked("verify to continue".into()));
            }
            Ok((0..count.min(3))
                .map(|idx| RawVideo {
                    url: Some(format!("https://www.tiktok.com/@stub/video/{idx}")),
                    description: Some(format!("{} #{idx}", terms.join(" "))),
                    stats: RawStats {
                        views: Some(100 * idx as u64),
                        ..RawStats::default()
                    },
                    ..RawVideo::default()
                })
                .collect())
        }

        async fn close(self: Box<Self>) -> BackendResult<()> {
            Ok(())
        }
    }

    fn cli_for(temp: &TempDir, command: Commands) -> Cli {
        Cli {
            config: Some(PathBuf::from("../configs/clipscout.toml")),
            failure_log: Some(temp.path().join("failures.log")),
            ledger_db: Some(temp.path().join("ledger.sqlite")),
            captures_dir: None,
            format: OutputFormat::Json,
            command,
        }
    }

    fn fast_context(temp: &TempDir) -> AppContext {
        let mut context = AppContext::new(&cli_for(temp, Commands::Cleanup)).unwrap();
        context.config.retry.network_base_delay_ms = 0;
        context.config.retry.rate_limit_base_delay_ms = 0;
        context.config.retry.bot_detection_delay_ms = 0;
        context.config.pacing.delay_range_ms = [0, 0];
        context
    }

    #[test]
    fn parses_search_with_repeated_terms() {
        let cli = Cli::try_parse_from([
            "clipscoutctl",
            "--format",
            "json",
            "search",
            "--term",
            "cats",
            "--term",
            "#dogs",
            "--count",
            "5",
        ])
        .unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
        match cli.command {
            Commands::Search(args) => {
                assert_eq!(args.terms, vec!["cats".to_string(), "#dogs".to_string()]);
                assert_eq!(args.count, Some(5));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn search_requires_a_term() {
        assert!(Cli::try_parse_from(["clipscoutctl", "search"]).is_err());
    }

    #[test]
    fn cli_flags_override_observability_paths() {
        let temp = TempDir::new().unwrap();
        let mut cli = cli_for(&temp, Commands::Cleanup);
        cli.captures_dir = Some(temp.path().join("captures"));
        let context = AppContext::new(&cli).unwrap();
        assert_eq!(context.config.retry.max_attempts, 3);
        assert_eq!(context.failure_log, Some(temp.path().join("failures.log")));
        assert_eq!(context.captures_dir, Some(temp.path().join("captures")));
        assert!(context.config_path().is_some());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let mut cli = cli_for(&temp, Commands::Cleanup);
        cli.config = Some(temp.path().join("absent.toml"));
        assert!(matches!(AppContext::new(&cli), Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn serve_echoes_ids_and_cleans_up_on_eof() {
        let temp = TempDir::new().unwrap();
        let context = fast_context(&temp);
        let stack = context.stack_with(Arc::new(StubBackend::default())).unwrap();

        let input = concat!(
            "{\"id\": 1, \"op\": \"search\", \"terms\": [\"cats\"], \"count\": 2}\n",
            "\n",
            "not json\n",
            "{\"id\": \"h\", \"op\": \"health\"}\n",
        );
        let mut output = Vec::new();
        let summary = serve_lines(
            stack.dispatcher.clone(),
            BufReader::new(input.as_bytes()),
            &mut output,
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

        assert_eq!(summary.requests, 3);
        assert!(!summary.interrupted);
        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(responses.len(), 3);

        let videos = responses
            .iter()
            .find(|value| value["id"] == 1)
            .expect("search response");
        assert_eq!(videos["type"], "videos");
        assert_eq!(videos["count"], 2);
        assert!(responses
            .iter()
            .any(|value| value["id"] == "h" && value["type"] == "health"));
        assert!(responses
            .iter()
            .any(|value| value["type"] == "error" && value["kind"] == "invalid_input"));

        assert_eq!(stack.session().snapshot().state, SessionState::Closed);
    }

    #[tokio::test]
    async fn serve_stops_when_shutdown_fires() {
        let temp = TempDir::new().unwrap();
        let context = fast_context(&temp);
        let stack = context.stack_with(Arc::new(StubBackend::default())).unwrap();
        stack.session().warm_up().await.unwrap();

        // keep the write half alive so the reader never reaches EOF
        let (_client, server) = tokio::io::duplex(64);
        let mut output = Vec::new();
        let summary = serve_lines(
            stack.dispatcher.clone(),
            BufReader::new(server),
            &mut output,
            async {},
        )
        .await
        .unwrap();

        assert!(summary.interrupted);
        assert!(output.is_empty());
        assert_eq!(stack.session().snapshot().state, SessionState::Closed);
    }

    #[tokio::test]
    async fn search_command_closes_session_and_reports_query() {
        let temp = TempDir::new().unwrap();
        let context = fast_context(&temp);
        let backend = Arc::new(StubBackend::default());
        let stack = context.stack_with(backend.clone()).unwrap();

        let report = stack
            .search(&SearchArgs {
                terms: vec!["#cats".into(), "funny".into()],
                count: Some(10),
            })
            .await
            .unwrap();
        assert_eq!(report.query, "cats funny");
        assert_eq!(report.count, 3);
        assert_eq!(backend.inits.load(Ordering::SeqCst), 1);
        assert_eq!(stack.session().snapshot().state, SessionState::Closed);

        let text = report.display();
        assert!(text.starts_with("3 videos for 'cats funny':"));
        assert!(text.contains("views 200"));
    }

    #[tokio::test]
    async fn blocked_search_lands_in_failure_listing() {
        let temp = TempDir::new().unwrap();
        let context = fast_context(&temp);
        let stack = context.stack_with(Arc::new(StubBackend::default())).unwrap();

        let err = stack
            .search(&SearchArgs {
                terms: vec!["captcha".into()],
                count: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Search(SearchError::Exhausted {
                kind: ErrorKind::BotDetection,
                ..
            })
        ));

        let list = context.failures(&FailuresArgs { limit: 10 }).unwrap();
        assert!(!list.rows.is_empty());
        assert!(list.rows.iter().all(|row| row.kind == "bot_detection"));
        assert!(list.display().contains("captcha"));
    }

    #[test]
    fn failure_listing_renders_remediation() {
        let temp = TempDir::new().unwrap();
        let context = fast_context(&temp);
        let ledger = context.ledger().unwrap().unwrap();
        ledger
            .record_failure(&FailureContext {
                timestamp: Utc::now(),
                request_id: "req-1".into(),
                query: "cats".into(),
                kind: ErrorKind::RateLimit,
                error_message: "too many requests".into(),
                attempt: 1,
                generation: Some(1),
                action: RemediationAction::RetryScheduled { delay_ms: 4000 },
            })
            .unwrap();

        let list = context.failures(&FailuresArgs { limit: 5 }).unwrap();
        assert_eq!(list.rows.len(), 1);
        let text = list.display();
        assert!(text.contains("[rate_limit]"));
        assert!(text.contains("retry_scheduled (4000 ms)"));
    }

    #[test]
    fn failures_without_ledger_paths_is_missing_resource() {
        let temp = TempDir::new().unwrap();
        let mut context = fast_context(&temp);
        context.failure_log = None;
        assert!(matches!(
            context.failures(&FailuresArgs { limit: 5 }),
            Err(AppError::MissingResource(_))
        ));
    }

    #[tokio::test]
    async fn health_text_reports_session_state() {
        let temp = TempDir::new().unwrap();
        let context = fast_context(&temp);
        let stack = context.stack_with(Arc::new(StubBackend::default())).unwrap();

        let cold = stack.health(false).await;
        assert!(!cold.api_initialized);
        let warm = stack.health(true).await;
        assert!(warm.api_initialized);
        let text = warm.display();
        assert!(text.contains("Session: ready (generation 1, initialized: yes)"));
        assert!(text.contains("Sessions: 1 started"));
    }
}
