mod error;
mod orchestrator;
mod request;
mod retry;
mod video;

pub use error::SearchError;
pub use orchestrator::{SearchOrchestrator, SearchSettings};
pub use request::{SearchRequest, ValidatedSearch};
pub use retry::{RetryDecision, RetryLedger, RetryPolicy};
pub use video::{normalize, VideoRecord, VideoStats};
