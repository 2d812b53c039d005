use serde::{Deserialize, Serialize};

use crate::backend::RawVideo;

const VIDEO_URL_BASE: &str = "https://www.tiktok.com";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStats {
    pub views: u64,
    pub likes: u64,
    pub shares: u64,
    pub comments: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub url: String,
    pub description: String,
    pub stats: VideoStats,
}

impl From<RawVideo> for VideoRecord {
    fn from(raw: RawVideo) -> Self {
        let url = raw
            .url
            .filter(|url| !url.trim().is_empty())
            .or_else(|| match (raw.author.as_deref(), raw.id.as_deref()) {
                (Some(author), Some(id)) if !author.is_empty() && !id.is_empty() => {
                    Some(format!("{VIDEO_URL_BASE}/@{author}/video/{id}"))
                }
                _ => None,
            })
            .unwrap_or_default();
        Self {
            url,
            description: raw.description.unwrap_or_default(),
            stats: VideoStats {
                views: raw.stats.views.unwrap_or(0),
                likes: raw.stats.likes.unwrap_or(0),
                shares: raw.stats.shares.unwrap_or(0),
                comments: raw.stats.comments.unwrap_or(0),
            },
        }
    }
}

/// Keeps backend order and never returns more than `count` records.
pub fn normalize(raw: Vec<RawVideo>, count: usize) -> Vec<VideoRecord> {
    raw.into_iter().take(count).map(VideoRecord::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RawStats;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let record = VideoRecord::from(RawVideo {
            id: Some("7300".into()),
            author: Some("chef".into()),
            stats: RawStats {
                likes: Some(12),
                ..RawStats::default()
            },
            ..RawVideo::default()
        });
        assert_eq!(record.url, "https://www.tiktok.com/@chef/video/7300");
        assert_eq!(record.description, "");
        assert_eq!(record.stats.likes, 12);
        assert_eq!(record.stats.views, 0);
        assert_eq!(record.stats.comments, 0);
    }

    #[test]
    fn platform_aliases_deserialize() {
        let raw: RawVideo = serde_json::from_str(
            r#"{"url":"https://x/v/1","desc":"hi","stats":{"playCount":10,"diggCount":2}}"#,
        )
        .unwrap();
        let record = VideoRecord::from(raw);
        assert_eq!(record.description, "hi");
        assert_eq!(record.stats.views, 10);
        assert_eq!(record.stats.likes, 2);
    }

    #[test]
    fn normalize_truncates_in_order() {
        let raw = (0..5)
            .map(|idx| RawVideo {
                url: Some(format!("https://x/v/{idx}")),
                ..RawVideo::default()
            })
            .collect::<Vec<_>>();
        let records = normalize(raw, 3);
        let urls = records.iter().map(|r| r.url.as_str()).collect::<Vec<_>>();
        assert_eq!(urls, vec!["https://x/v/0", "https://x/v/1", "https://x/v/2"]);
    }
}
