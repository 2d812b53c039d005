use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;

use crate::search::VideoRecord;
use crate::telemetry::TelemetryError;

#[derive(Debug, Serialize)]
struct CaptureDocument<'a> {
    request_id: &'a str,
    query: &'a str,
    captured_at: DateTime<Utc>,
    count: usize,
    videos: &'a [VideoRecord],
}

/// Archives every successful search as one JSON document.
#[derive(Debug, Clone)]
pub struct CaptureStore {
    dir: PathBuf,
}

impl CaptureStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, TelemetryError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn store(
        &self,
        request_id: &str,
        query: &str,
        videos: &[VideoRecord],
    ) -> Result<PathBuf, TelemetryError> {
        let captured_at = Utc::now();
        let path = self.dir.join(format!(
            "{}_{request_id}.json",
            captured_at.format("%Y%m%dT%H%M%S%.3fZ")
        ));
        let document = CaptureDocument {
            request_id,
            query,
            captured_at,
            count: videos.len(),
            videos,
        };
        fs::write(&path, serde_json::to_vec_pretty(&document)?).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::VideoStats;
    use tempfile::tempdir;

    #[tokio::test]
    async fn capture_writes_json_document() {
        let dir = tempdir().unwrap();
        let store = CaptureStore::new(dir.path().join("captures")).unwrap();
        let videos = vec![VideoRecord {
            url: "https://www.tiktok.com/@a/video/1".into(),
            description: "clip".into(),
            stats: VideoStats {
                views: 3,
                ..VideoStats::default()
            },
        }];

        let path = store.store("req-9", "cats", &videos).await.unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().ends_with("_req-9.json"));

        let payload: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(payload["query"], "cats");
        assert_eq!(payload["count"], 1);
        assert_eq!(payload["videos"][0]["stats"]["views"], 3);
    }
}
