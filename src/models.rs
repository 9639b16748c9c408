use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// The resolved, directly playable media behind a post URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDescriptor {
    pub video_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub platform: Platform,
    pub quality: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub processed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_qualities: Option<Vec<AvailableQuality>>,
}

impl VideoDescriptor {
    /// Starts a descriptor with the `source` metadata entry every result carries.
    pub fn new(
        video_url: impl Into<String>,
        platform: Platform,
        quality: impl Into<String>,
        source: &str,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), source.to_string());

        Self {
            video_url: video_url.into(),
            title: String::new(),
            duration: None,
            platform,
            quality: quality.into(),
            metadata,
            processed_at: Utc::now(),
            available_qualities: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_duration(mut self, duration: Option<u64>) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_available_qualities(mut self, qualities: Vec<AvailableQuality>) -> Self {
        self.available_qualities = (!qualities.is_empty()).then_some(qualities);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableQuality {
    pub quality: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

impl AvailableQuality {
    pub fn new(quality: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            quality: quality.into(),
            label: label.into(),
            width: None,
            height: None,
            video_url: None,
        }
    }

    pub fn pixels(&self) -> u64 {
        u64::from(self.width.unwrap_or_default()) * u64::from(self.height.unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitiesResponse {
    pub platform: Platform,
    pub available_qualities: Vec<AvailableQuality>,
}

#[derive(Debug, Deserialize)]
pub struct VideoRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QualityRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ProxyDownloadRequest {
    #[serde(default)]
    pub video_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_round_trips_through_json() {
        let descriptor = VideoDescriptor::new(
            "https://cdn.example.com/v.mp4",
            Platform::Instagram,
            "auto",
            "https://www.instagram.com/p/abc/",
        )
        .with_title("caption")
        .with_duration(Some(12));

        let json = serde_json::to_string(&descriptor).unwrap();
        let restored: VideoDescriptor = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, descriptor);
        assert_eq!(
            restored.metadata.get("source").map(String::as_str),
            Some("https://www.instagram.com/p/abc/")
        );
    }

    #[test]
    fn empty_quality_list_is_omitted() {
        let descriptor = VideoDescriptor::new("u", Platform::TikTok, "best", "s")
            .with_available_qualities(Vec::new());
        assert!(descriptor.available_qualities.is_none());

        let json = serde_json::to_value(&descriptor).unwrap();
        assert!(json.get("available_qualities").is_none());
        assert!(json.get("title").is_none());
    }

    #[test]
    fn pixels_treats_missing_dimensions_as_zero() {
        let mut option = AvailableQuality::new("720p", "720p");
        assert_eq!(option.pixels(), 0);
        option.width = Some(1280);
        option.height = Some(720);
        assert_eq!(option.pixels(), 921_600);
    }
}
