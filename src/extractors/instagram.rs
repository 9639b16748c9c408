use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::debug;

use super::{Extractor, array, fetch_text, identity_headers, loose_f64, non_empty_str, parse_json};
use crate::{
    error::ExtractError,
    identity::IdentityRotator,
    models::VideoDescriptor,
    platform::{self, INSTAGRAM_PATTERN, Platform},
    quality::QualityPreference,
};

const DEFAULT_BASE_URL: &str = "https://www.instagram.com";

/// Reads a post through the `?__a=1` embedded-data query.
pub struct InstagramExtractor {
    client: reqwest::Client,
    identity: Arc<IdentityRotator>,
    base_url: String,
}

impl InstagramExtractor {
    pub fn new(client: reqwest::Client, identity: Arc<IdentityRotator>) -> Self {
        Self {
            client,
            identity,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Extractor for InstagramExtractor {
    fn name(&self) -> &'static str {
        "instagram"
    }

    fn validate(&self, url: &str) -> bool {
        platform::validate(url, Platform::Instagram)
    }

    async fn extract(
        &self,
        url: &str,
        _preference: &QualityPreference,
    ) -> Result<VideoDescriptor, ExtractError> {
        let normalized = platform::normalize(url);
        let captures = INSTAGRAM_PATTERN
            .captures(&normalized)
            .ok_or_else(|| ExtractError::InvalidUrl(format!("not an Instagram post: {url}")))?;
        let kind = &captures[1];
        let shortcode = &captures[2];

        let user_agent = self.identity.next();
        let api_url = format!("{}/{kind}/{shortcode}/?__a=1&__d=dis", self.base_url);
        debug!(shortcode, "Fetching Instagram post data");

        let body = fetch_text(
            "instagram",
            self.client
                .get(&api_url)
                .headers(identity_headers(&user_agent))
                .header(ACCEPT, "application/json")
                .header("X-Requested-With", "XMLHttpRequest"),
        )
        .await?;

        let document = parse_json("instagram", &body)?;
        let post = parse_post(&document)?;

        Ok(
            VideoDescriptor::new(post.video_url, Platform::Instagram, "auto", url.trim())
                .with_title(post.title)
                .with_duration(post.duration)
                .with_metadata("shortcode", shortcode),
        )
    }
}

#[derive(Debug)]
struct InstagramPost {
    video_url: String,
    title: String,
    duration: Option<u64>,
}

fn parse_post(document: &Value) -> Result<InstagramPost, ExtractError> {
    let item = array(document, "items")?
        .first()
        .ok_or_else(|| ExtractError::Parse("no items found in response".to_string()))?;

    let video_url = item
        .get("video_versions")
        .and_then(Value::as_array)
        .and_then(|versions| versions.first())
        .ok_or_else(|| ExtractError::NoVideoFound("no video found in this post".to_string()))
        .and_then(|version| {
            non_empty_str(version, "url").ok_or_else(|| {
                ExtractError::Parse("video version without a url".to_string())
            })
        })?;

    let title = item
        .get("caption")
        .and_then(|caption| non_empty_str(caption, "text"))
        .unwrap_or_default();

    Ok(InstagramPost {
        video_url: video_url.to_string(),
        title: title.to_string(),
        duration: loose_f64(item, "video_duration").map(|seconds| seconds.round() as u64),
    })
}
