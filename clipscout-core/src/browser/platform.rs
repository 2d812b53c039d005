use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::page::Page;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info, trace, warn};

use crate::backend::{
    BackendError, BackendResult, BackendSession, RawStats, RawVideo, ScrapingBackend,
};
use crate::config::{BackendConfig, BrowserSection};

use super::launcher::{BrowserLauncher, LaunchedBrowser};
use super::stealth::StealthProfile;

const AUTH_COOKIE: &str = "msToken";

const PAGE_STATE_SCRIPT: &str = r#"
(() => {
    const text = (document.body && document.body.innerText || '').toLowerCase();
    const captcha = !!document.querySelector(
        '#captcha-verify-image, .captcha_verify_container, .captcha-disable-scroll, [id^="captcha"]'
    ) || text.includes('verify to continue');
    const throttled = text.includes('too many attempts')
        || text.includes('maximum number of attempts')
        || text.includes('too many requests');
    return { captcha, throttled, title: document.title || '' };
})()
"#;

const CARD_PARSER_SCRIPT: &str = r#"
(() => {
    const cards = [];
    const anchors = document.querySelectorAll('a[href*="/video/"]');
    anchors.forEach(anchor => {
        const href = anchor.href || '';
        const match = href.match(/@([^/]+)\/video\/(\d+)/);
        const card = anchor.closest('[data-e2e="search_video-item"], [data-e2e="search-card-item"], div[class*="DivItemContainer"]')
            || anchor.parentElement;
        const pick = (selector) => {
            const node = card ? card.querySelector(selector) : null;
            return node ? node.textContent.trim() : null;
        };
        cards.push({
            url: href.split('?')[0],
            id: match ? match[2] : null,
            author: match ? match[1] : pick('[data-e2e="search-card-user-unique-id"]'),
            description: pick('[data-e2e="search-card-video-caption"], [data-e2e="search-card-desc"]'),
            views: pick('[data-e2e="video-views"], strong[class*="StrongVideoCount"]'),
            likes: pick('[data-e2e="like-count"]'),
        });
    });
    return cards;
})()
"#;

#[derive(Debug, Deserialize)]
struct PageState {
    captcha: bool,
    throttled: bool,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct CardPayload {
    url: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    views: Option<String>,
    #[serde(default)]
    likes: Option<String>,
}

impl From<CardPayload> for RawVideo {
    fn from(card: CardPayload) -> Self {
        RawVideo {
            id: card.id,
            url: Some(card.url).filter(|url| !url.is_empty()),
            author: card.author,
            description: card.description,
            stats: RawStats {
                views: card.views.as_deref().and_then(parse_compact_count),
                likes: card.likes.as_deref().and_then(parse_compact_count),
                shares: None,
                comments: None,
            },
        }
    }
}

/// Parses counters as the platform renders them: `987`, `1,234`, `3.4K`,
/// `1.2M`, `2B`.
pub fn parse_compact_count(raw: &str) -> Option<u64> {
    let cleaned = raw.trim().replace(',', "");
    let last = cleaned.chars().last()?;
    let (number, scale) = match last.to_ascii_uppercase() {
        'K' => (&cleaned[..cleaned.len() - 1], 1_000f64),
        'M' => (&cleaned[..cleaned.len() - 1], 1_000_000f64),
        'B' => (&cleaned[..cleaned.len() - 1], 1_000_000_000f64),
        _ => (cleaned.as_str(), 1f64),
    };
    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * scale).round() as u64)
}

/// Drives the platform's web UI through Chromium.
#[derive(Debug, Clone)]
pub struct PlatformBackend {
    launcher: BrowserLauncher,
    config: Arc<BrowserSection>,
}

impl PlatformBackend {
    pub fn new(config: BrowserSection) -> Self {
        let config = Arc::new(config);
        Self {
            launcher: BrowserLauncher::new(Arc::clone(&config)),
            config,
        }
    }

    pub fn search_url(&self, query: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        format!(
            "{}/search/video?q={encoded}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn cookie_domain(&self) -> BackendResult<String> {
        let parsed = url::Url::parse(&self.config.base_url)
            .map_err(|err| BackendError::Configuration(format!("invalid base_url: {err}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| BackendError::Configuration("base_url has no host".into()))?;
        Ok(format!(".{}", host.trim_start_matches("www.")))
    }

    async fn prepare(&self, browser: &LaunchedBrowser, config: &BackendConfig) -> BackendResult<Page> {
        let page = browser.new_page().await?;
        let profile = browser.profile();
        StealthProfile::new(&self.config, &profile.user_agent, profile.location.clone())
            .apply(&page)
            .await?;

        match config.auth_token.as_deref() {
            Some(token) => {
                let cookie = CookieParam::builder()
                    .name(AUTH_COOKIE)
                    .value(token)
                    .domain(self.cookie_domain()?)
                    .path("/")
                    .build()
                    .map_err(BackendError::Configuration)?;
                page.set_cookie(cookie).await?;
            }
            None => warn!("no auth token configured; bot detection is more likely"),
        }

        let explore = format!("{}/explore", self.config.base_url.trim_end_matches('/'));
        goto(&page, &explore).await?;
        settle(self.settle_range()).await;
        check_page_state(&page).await?;
        Ok(page)
    }

    fn settle_range(&self) -> (u64, u64) {
        let [low, high] = self.config.settle_delay_ms;
        (low, high)
    }
}

#[async_trait]
impl ScrapingBackend for PlatformBackend {
    async fn initialize(&self, config: &BackendConfig) -> BackendResult<Box<dyn BackendSession>> {
        let browser = self.launcher.launch(config.proxy_url.as_deref()).await?;
        match self.prepare(&browser, config).await {
            Ok(page) => {
                info!("platform session ready");
                Ok(Box::new(PlatformSession {
                    backend: self.clone(),
                    browser,
                    page,
                }))
            }
            Err(err) => {
                if let Err(close_err) = browser.shutdown().await {
                    warn!(error = %close_err, "failed to shut down browser after init failure");
                }
                Err(err)
            }
        }
    }
}

pub struct PlatformSession {
    backend: PlatformBackend,
    browser: LaunchedBrowser,
    page: Page,
}

#[async_trait]
impl BackendSession for PlatformSession {
    async fn search(&mut self, terms: &[String], count: usize) -> BackendResult<Vec<RawVideo>> {
        let url = self.backend.search_url(&terms.join(" "));
        trace!(url = %url, "opening search url");
        goto(&self.page, &url).await?;
        settle(self.backend.settle_range()).await;
        check_page_state(&self.page).await?;

        let iterations = self.backend.config.scroll_iterations.max(1);
        let mut seen = HashSet::new();
        let mut videos = Vec::new();
        for iteration in 0..iterations {
            for card in extract_cards(&self.page).await? {
                if card.url.is_empty() || !seen.insert(card.url.clone()) {
                    continue;
                }
                videos.push(RawVideo::from(card));
            }
            trace!(iteration, collected = videos.len(), "parsed result cards");
            if videos.len() >= count || iteration + 1 == iterations {
                break;
            }
            scroll(&self.page).await?;
            settle((600, 1_200)).await;
        }

        if videos.is_empty() {
            check_page_state(&self.page).await?;
        }
        videos.truncate(count);
        debug!(videos = videos.len(), "platform search finished");
        Ok(videos)
    }

    async fn close(self: Box<Self>) -> BackendResult<()> {
        let PlatformSession { browser, page, .. } = *self;
        if let Err(err) = page.close().await {
            debug!(error = %err, "failed to close page");
        }
        browser.shutdown().await
    }
}

async fn goto(page: &Page, url: &str) -> BackendResult<()> {
    let params = NavigateParams::builder()
        .url(url)
        .build()
        .map_err(BackendError::Configuration)?;
    page.goto(params)
        .await
        .map_err(|err| BackendError::Network(format!("navigation to {url} failed: {err}")))?;
    page.wait_for_navigation().await?;
    Ok(())
}

async fn settle(range_ms: (u64, u64)) {
    if range_ms.0 == 0 && range_ms.1 == 0 {
        return;
    }
    let millis = {
        let mut rng = rand::thread_rng();
        let lower = range_ms.0.min(range_ms.1);
        let upper = range_ms.0.max(range_ms.1);
        rng.gen_range(lower..=upper)
    };
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

async fn scroll(page: &Page) -> BackendResult<()> {
    let delta_y = rand::thread_rng().gen_range(480.0..960.0);
    let script = format!("window.scrollBy({{ top: {delta_y}, behavior: 'smooth' }});");
    page.evaluate(script.as_str())
        .await
        .map_err(|err| BackendError::Unexpected(format!("failed to execute scroll script: {err}")))?;
    Ok(())
}

async fn check_page_state(page: &Page) -> BackendResult<()> {
    let value = page
        .evaluate(PAGE_STATE_SCRIPT)
        .await?
        .into_value()
        .map_err(|err| BackendError::Payload(format!("failed to decode page state: {err}")))?;
    let state: PageState = serde_json::from_value(value)
        .map_err(|err| BackendError::Payload(format!("failed to deserialize page state: {err}")))?;
    if state.captcha {
        return Err(BackendError::Blocked(format!(
            "captcha challenge on \"{}\"",
            state.title
        )));
    }
    if state.throttled {
        return Err(BackendError::Throttled(format!(
            "too many requests on \"{}\"",
            state.title
        )));
    }
    Ok(())
}

async fn extract_cards(page: &Page) -> BackendResult<Vec<CardPayload>> {
    let value = page
        .evaluate(CARD_PARSER_SCRIPT)
        .await?
        .into_value()
        .map_err(|err| BackendError::Payload(format!("failed to decode result cards: {err}")))?;
    serde_json::from_value(value)
        .map_err(|err| BackendError::Payload(format!("failed to deserialize result cards: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_counts_are_expanded() {
        assert_eq!(parse_compact_count("987"), Some(987));
        assert_eq!(parse_compact_count("1,234"), Some(1_234));
        assert_eq!(parse_compact_count("3.4K"), Some(3_400));
        assert_eq!(parse_compact_count("1.2M"), Some(1_200_000));
        assert_eq!(parse_compact_count(" 2b "), Some(2_000_000_000));
        assert_eq!(parse_compact_count(""), None);
        assert_eq!(parse_compact_count("views"), None);
    }

    #[test]
    fn search_url_encodes_terms() {
        let backend = PlatformBackend::new(BrowserSection::default());
        assert_eq!(
            backend.search_url("street food nyc"),
            "https://www.tiktok.com/search/video?q=street+food+nyc"
        );
    }

    #[test]
    fn cookie_domain_drops_www() {
        let backend = PlatformBackend::new(BrowserSection::default());
        assert_eq!(backend.cookie_domain().unwrap(), ".tiktok.com");
    }

    #[test]
    fn cards_become_raw_videos() {
        let card: CardPayload = serde_json::from_str(
            r#"{"url":"https://www.tiktok.com/@chef/video/1","id":"1","author":"chef","views":"1.5K"}"#,
        )
        .unwrap();
        let raw = RawVideo::from(card);
        assert_eq!(raw.author.as_deref(), Some("chef"));
        assert_eq!(raw.stats.views, Some(1_500));
        assert_eq!(raw.stats.likes, None);
        assert_eq!(raw.description, None);
    }
}
