use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Environment variable holding the platform session token.
pub const AUTH_TOKEN_ENV: &str = "ms_token";
/// Environment variable holding the outbound proxy URL.
pub const PROXY_ENV: &str = "TIKTOK_PROXY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub credentials: CredentialsSection,
    pub session: SessionSection,
    pub retry: RetrySection,
    pub pacing: PacingSection,
    pub search: SearchSection,
    pub browser: BrowserSection,
    pub observability: ObservabilitySection,
}

impl ServiceConfig {
    /// Credentials from the process environment, falling back to the
    /// `[credentials]` section. Read once; changing them needs a restart.
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::resolve(&self.credentials, |key| std::env::var(key).ok())
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |reason: &str| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.search.default_count == 0 {
            return Err(invalid("search.default_count must be positive"));
        }
        if self.search.max_count < self.search.default_count {
            return Err(invalid("search.max_count is below search.default_count"));
        }
        if self.session.call_timeout_seconds == 0 || self.session.init_timeout_seconds == 0 {
            return Err(invalid("session timeouts must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsSection {
    pub auth_token: Option<String>,
    pub proxy_url: Option<String>,
}

/// What the scraping backend receives on `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendConfig {
    pub auth_token: Option<String>,
    pub proxy_url: Option<String>,
}

impl BackendConfig {
    pub fn resolve<F>(fallback: &CredentialsSection, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |key: &str, file_value: &Option<String>| {
            non_empty(lookup(key)).or_else(|| non_empty(file_value.clone()))
        };
        Self {
            auth_token: pick(AUTH_TOKEN_ENV, &fallback.auth_token),
            proxy_url: pick(PROXY_ENV, &fallback.proxy_url),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub init_timeout_seconds: u64,
    pub call_timeout_seconds: u64,
    /// Sessions older than this are rotated before reuse; 0 disables.
    pub max_age_seconds: u64,
    pub warm_up: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            init_timeout_seconds: 90,
            call_timeout_seconds: 60,
            max_age_seconds: 300,
            warm_up: true,
        }
    }
}

impl SessionSection {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_seconds)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    pub fn max_age(&self) -> Option<Duration> {
        (self.max_age_seconds > 0).then(|| Duration::from_secs(self.max_age_seconds))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub network_base_delay_ms: u64,
    pub rate_limit_base_delay_ms: u64,
    pub bot_detection_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            network_base_delay_ms: 1_000,
            rate_limit_base_delay_ms: 5_000,
            bot_detection_delay_ms: 5_000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingSection {
    pub delay_range_ms: [u64; 2],
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            delay_range_ms: [2_000, 5_000],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub default_count: u32,
    pub max_count: u32,
    pub max_term_length: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            default_count: 30,
            max_count: 100,
            max_term_length: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub request_timeout_seconds: Option<u64>,
    pub base_url: String,
    pub lang: String,
    pub timezone: String,
    pub scroll_iterations: usize,
    pub settle_delay_ms: [u64; 2],
    pub webgl_vendor: Option<String>,
    pub webgl_renderer: Option<String>,
    pub profiles: Vec<BrowserProfileSection>,
    pub locations: Vec<LocationSection>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: false,
            disable_gpu: true,
            request_timeout_seconds: Some(90),
            base_url: "https://www.tiktok.com".to_string(),
            lang: "en-US".to_string(),
            timezone: "America/New_York".to_string(),
            scroll_iterations: 6,
            settle_delay_ms: [2_000, 4_000],
            webgl_vendor: None,
            webgl_renderer: None,
            profiles: vec![
                BrowserProfileSection {
                    user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36".to_string(),
                    viewport: [1280, 720],
                },
                BrowserProfileSection {
                    user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36".to_string(),
                    viewport: [1366, 768],
                },
                BrowserProfileSection {
                    user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36".to_string(),
                    viewport: [1440, 900],
                },
            ],
            locations: vec![
                LocationSection::new("Wall & Broad", 40.7075, -74.0021),
                LocationSection::new("Union Square", 40.7359, -73.9911),
                LocationSection::new("Bryant Park", 40.7536, -73.9832),
                LocationSection::new("Central Park", 40.7829, -73.9654),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserProfileSection {
    pub user_agent: String,
    pub viewport: [u32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationSection {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_accuracy")]
    pub accuracy: f64,
}

impl LocationSection {
    fn new(name: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.to_string(),
            latitude,
            longitude,
            accuracy: default_accuracy(),
        }
    }
}

fn default_accuracy() -> f64 {
    20.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilitySection {
    pub failure_log: Option<String>,
    pub ledger_db: Option<String>,
    pub captures_dir: Option<String>,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            failure_log: Some("data/failures.log".to_string()),
            ledger_db: Some("data/ledger.sqlite".to_string()),
            captures_dir: None,
        }
    }
}

pub fn load_service_config<P: AsRef<Path>>(path: P) -> Result<ServiceConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let config: ServiceConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })?;
    config.validate(path)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/clipscout.toml");
        let config = load_service_config(path).expect("fixture should parse");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.search.default_count, 30);
        assert!(config.browser.profiles.len() >= 2);
        assert!(config.retry.rate_limit_base_delay_ms > config.retry.network_base_delay_ms);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: ServiceConfig = toml::from_str("[retry]\nmax_attempts = 5\n").unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.session.call_timeout(), Duration::from_secs(60));
        assert_eq!(config.browser.locations.len(), 4);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clipscout.toml");
        std::fs::write(&path, "[retry]\nmax_attempts = 0\n").unwrap();
        let err = load_service_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn environment_overrides_file_credentials() {
        let file = CredentialsSection {
            auth_token: Some("from-file".into()),
            proxy_url: Some("http://file-proxy:8080".into()),
        };
        let env: HashMap<&str, &str> = [(AUTH_TOKEN_ENV, "from-env"), (PROXY_ENV, "  ")]
            .into_iter()
            .collect();
        let resolved = BackendConfig::resolve(&file, |key| env.get(key).map(|v| v.to_string()));
        assert_eq!(resolved.auth_token.as_deref(), Some("from-env"));
        assert_eq!(resolved.proxy_url.as_deref(), Some("http://file-proxy:8080"));
    }

    #[test]
    fn blank_credentials_are_absent() {
        let resolved = BackendConfig::resolve(&CredentialsSection::default(), |_| {
            Some(String::new())
        });
        assert_eq!(resolved, BackendConfig::default());
    }
}
