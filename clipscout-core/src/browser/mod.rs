//! Chromium-backed implementation of the scraping backend.

mod launcher;
mod platform;
mod stealth;

pub use launcher::{BrowserLauncher, LaunchProfile, LaunchedBrowser};
pub use platform::{parse_compact_count, PlatformBackend, PlatformSession};
pub use stealth::StealthProfile;
