use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{BackendError, BackendResult};
use crate::config::{BrowserSection, LocationSection};

const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Identity picked for one browser launch.
#[derive(Debug, Clone)]
pub struct LaunchProfile {
    pub user_agent: String,
    pub width: u32,
    pub height: u32,
    pub location: Option<LocationSection>,
}

#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<BrowserSection>,
}

impl BrowserLauncher {
    pub fn new(config: Arc<BrowserSection>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BrowserSection {
        &self.config
    }

    pub fn select_profile(&self) -> LaunchProfile {
        let mut rng = rand::thread_rng();
        let (user_agent, [width, height]) = self
            .config
            .profiles
            .choose(&mut rng)
            .map(|profile| (profile.user_agent.clone(), profile.viewport))
            .unwrap_or_else(|| (FALLBACK_USER_AGENT.to_string(), [1280, 720]));
        let location = self.config.locations.choose(&mut rng).cloned();
        LaunchProfile {
            user_agent,
            width,
            height,
            location,
        }
    }

    pub async fn launch(&self, proxy: Option<&str>) -> BackendResult<LaunchedBrowser> {
        let profile = self.select_profile();
        let user_data_dir = std::env::temp_dir().join(format!("clipscout-{}", Uuid::new_v4()));
        let chromium_config = self.build_chromium_config(&profile, &user_data_dir, proxy)?;
        info!(
            ua = %profile.user_agent,
            width = profile.width,
            height = profile.height,
            headless = self.config.headless,
            proxied = proxy.is_some(),
            "launching chromium"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BackendError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        Ok(LaunchedBrowser {
            browser,
            handler_task: Some(handler_task),
            profile,
            user_data_dir,
        })
    }

    pub(crate) fn build_chromium_config(
        &self,
        profile: &LaunchProfile,
        user_data_dir: &std::path::Path,
        proxy: Option<&str>,
    ) -> BackendResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder()
            .user_data_dir(user_data_dir)
            .viewport(ChromiumViewport {
                width: profile.width,
                height: profile.height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: profile.width >= profile.height,
                has_touch: false,
            });

        if let Some(path) = &self.config.executable_path {
            builder = builder.chrome_executable(path);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.config.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = launch_args(&self.config, profile, proxy);
        args.dedup();
        builder = builder.args(args);

        builder.build().map_err(BackendError::Configuration)
    }
}

fn launch_args(config: &BrowserSection, profile: &LaunchProfile, proxy: Option<&str>) -> Vec<String> {
    let mut args = vec![
        format!("--user-agent={}", profile.user_agent),
        format!("--window-size={},{}", profile.width, profile.height),
        format!("--lang={}", config.lang),
        "--disable-blink-features=AutomationControlled".to_string(),
        "--no-first-run".to_string(),
        "--mute-audio".to_string(),
        "--password-store=basic".to_string(),
    ];
    if config.disable_gpu {
        args.push("--disable-gpu".into());
    }
    if let Some(proxy) = proxy {
        args.push(format!("--proxy-server={proxy}"));
    }
    args
}

/// A running Chromium plus the task pumping its CDP event stream.
#[derive(Debug)]
pub struct LaunchedBrowser {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    profile: LaunchProfile,
    user_data_dir: PathBuf,
}

impl LaunchedBrowser {
    pub fn profile(&self) -> &LaunchProfile {
        &self.profile
    }

    pub async fn new_page(&self) -> BackendResult<Page> {
        Ok(self
            .browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?)
    }

    pub async fn shutdown(mut self) -> BackendResult<()> {
        info!("shutting down chromium");
        let closed = self.browser.close().await;
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        if let Err(err) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
            debug!(error = %err, path = %self.user_data_dir.display(), "failed to remove profile dir");
        }
        closed?;
        Ok(())
    }
}

impl Drop for LaunchedBrowser {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("browser dropped without explicit shutdown");
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrowserProfileSection;

    #[test]
    fn profile_comes_from_configured_pool() {
        let config = BrowserSection {
            profiles: vec![BrowserProfileSection {
                user_agent: "agent/1.0".into(),
                viewport: [1024, 640],
            }],
            ..BrowserSection::default()
        };
        let launcher = BrowserLauncher::new(Arc::new(config));
        let profile = launcher.select_profile();
        assert_eq!(profile.user_agent, "agent/1.0");
        assert_eq!((profile.width, profile.height), (1024, 640));
        assert!(profile.location.is_some());
    }

    #[test]
    fn empty_pools_fall_back() {
        let config = BrowserSection {
            profiles: Vec::new(),
            locations: Vec::new(),
            ..BrowserSection::default()
        };
        let profile = BrowserLauncher::new(Arc::new(config)).select_profile();
        assert_eq!(profile.user_agent, FALLBACK_USER_AGENT);
        assert!(profile.location.is_none());
    }

    #[test]
    fn proxy_and_gpu_flags_are_passed() {
        let config = BrowserSection::default();
        let profile = BrowserLauncher::new(Arc::new(config.clone())).select_profile();
        let args = launch_args(&config, &profile, Some("http://proxy:8080"));
        assert!(args.contains(&"--proxy-server=http://proxy:8080".to_string()));
        assert!(args.contains(&"--disable-gpu".to_string()));
        assert!(args.contains(&"--lang=en-US".to_string()));

        let bare = launch_args(&config, &profile, None);
        assert!(!bare.iter().any(|arg| arg.starts_with("--proxy-server")));
    }
}
