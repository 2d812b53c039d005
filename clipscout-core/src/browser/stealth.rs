use chromiumoxide::cdp::browser_protocol::emulation::SetTimezoneOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use tracing::debug;

use crate::backend::{BackendError, BackendResult};
use crate::config::{BrowserSection, LocationSection};

const DEFAULT_WEBGL_VENDOR: &str = "Intel Inc.";
const DEFAULT_WEBGL_RENDERER: &str = "Intel Iris OpenGL Engine";

/// Page-level masking applied before the platform's own scripts run.
#[derive(Debug, Clone)]
pub struct StealthProfile {
    user_agent: String,
    lang: String,
    timezone: String,
    webgl_vendor: String,
    webgl_renderer: String,
    location: Option<LocationSection>,
}

impl StealthProfile {
    pub fn new(config: &BrowserSection, user_agent: &str, location: Option<LocationSection>) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            lang: config.lang.clone(),
            timezone: config.timezone.clone(),
            webgl_vendor: config
                .webgl_vendor
                .clone()
                .unwrap_or_else(|| DEFAULT_WEBGL_VENDOR.to_string()),
            webgl_renderer: config
                .webgl_renderer
                .clone()
                .unwrap_or_else(|| DEFAULT_WEBGL_RENDERER.to_string()),
            location,
        }
    }

    pub async fn apply(&self, page: &Page) -> BackendResult<()> {
        page.enable_stealth_mode_with_agent(&self.user_agent).await?;

        let params = SetUserAgentOverrideParams::builder()
            .user_agent(self.user_agent.clone())
            .accept_language(self.accept_language())
            .build()
            .map_err(BackendError::Configuration)?;
        page.set_user_agent(params).await?;

        if !self.timezone.is_empty() {
            page.execute(SetTimezoneOverrideParams::new(self.timezone.clone()))
                .await?;
        }

        page.evaluate_on_new_document(
            AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(self.init_script())
                .build()
                .map_err(BackendError::Configuration)?,
        )
        .await?;
        debug!(
            timezone = %self.timezone,
            location = self.location.as_ref().map(|l| l.name.as_str()).unwrap_or("none"),
            "stealth profile applied"
        );
        Ok(())
    }

    fn accept_language(&self) -> String {
        let primary = self.lang.split('-').next().unwrap_or("en");
        if primary == self.lang {
            self.lang.clone()
        } else {
            format!("{},{primary};q=0.9", self.lang)
        }
    }

    pub fn init_script(&self) -> String {
        let lang = js_string(&self.lang);
        let primary = js_string(self.lang.split('-').next().unwrap_or("en"));
        let vendor = js_string(&self.webgl_vendor);
        let renderer = js_string(&self.webgl_renderer);
        let geolocation = match &self.location {
            Some(location) => format!(
                r#"
    const coords = {{
        latitude: {lat},
        longitude: {lon},
        accuracy: {acc},
        altitude: null,
        altitudeAccuracy: null,
        heading: null,
        speed: null,
    }};
    const position = () => ({{ coords, timestamp: Date.now() }});
    if (navigator.geolocation) {{
        navigator.geolocation.getCurrentPosition = (ok) => ok(position());
        navigator.geolocation.watchPosition = (ok) => {{ ok(position()); return 1; }};
    }}"#,
                lat = location.latitude,
                lon = location.longitude,
                acc = location.accuracy,
            ),
            None => String::new(),
        };
        format!(
            r#"
(() => {{
    try {{
        delete Object.getPrototypeOf(navigator).webdriver;
    }} catch (_) {{}}
    Object.defineProperty(navigator, 'webdriver', {{ get: () => false }});
    Object.defineProperty(navigator, 'language', {{ get: () => {lang} }});
    Object.defineProperty(navigator, 'languages', {{ get: () => [{lang}, {primary}] }});
    Object.defineProperty(navigator, 'plugins', {{ get: () => [1, 2, 3, 4, 5] }});
    window.chrome = window.chrome || {{ runtime: {{}} }};
    const spoof = (proto) => {{
        if (!proto || !proto.getParameter) {{
            return;
        }}
        const original = proto.getParameter;
        proto.getParameter = function(param) {{
            if (param === 37445) {{
                return {vendor};
            }}
            if (param === 37446) {{
                return {renderer};
            }}
            return original.apply(this, arguments);
        }};
    }};
    spoof(window.WebGLRenderingContext && WebGLRenderingContext.prototype);
    spoof(window.WebGL2RenderingContext && WebGL2RenderingContext.prototype);{geolocation}
}})();
"#
        )
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
