//! Contract between the session manager and whatever actually talks to the
//! platform. `ScrapingBackend` creates sessions; a `BackendSession` is the
//! opaque handle the manager owns until it is closed.

mod categorize;
mod error;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;

pub use categorize::ErrorCategorizer;
pub use error::{BackendError, BackendResult};

#[async_trait]
pub trait ScrapingBackend: Send + Sync {
    async fn initialize(&self, config: &BackendConfig) -> BackendResult<Box<dyn BackendSession>>;
}

#[async_trait]
pub trait BackendSession: Send {
    /// Returns at most `count` videos for the given terms, in platform order.
    async fn search(&mut self, terms: &[String], count: usize) -> BackendResult<Vec<RawVideo>>;

    async fn close(self: Box<Self>) -> BackendResult<()>;
}

/// A video as the backend reports it; every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawVideo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default, alias = "desc")]
    pub description: Option<String>,
    #[serde(default)]
    pub stats: RawStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStats {
    #[serde(default, alias = "playCount")]
    pub views: Option<u64>,
    #[serde(default, alias = "diggCount")]
    pub likes: Option<u64>,
    #[serde(default, alias = "shareCount")]
    pub shares: Option<u64>,
    #[serde(default, alias = "commentCount")]
    pub comments: Option<u64>,
}
