//! Extraction strategies.
//!
//! Native extractors scrape a platform's internal JSON or HTML directly; the
//! delegated extractor shells out to `yt-dlp`. Both sit behind [`Extractor`]
//! and are wired per platform by [`ExtractorRegistry`].

mod delegated;
mod instagram;
mod twitter;
mod youtube;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

pub use delegated::{DelegatedExtractor, YtDlpFormat, YtDlpInfo, format_selector};
pub use instagram::InstagramExtractor;
pub use twitter::TwitterExtractor;
pub use youtube::YouTubeExtractor;

use crate::{
    config::{Config, ExtractionStrategy},
    error::ExtractError,
    identity::IdentityRotator,
    models::{AvailableQuality, VideoDescriptor},
    platform::Platform,
    quality::QualityPreference,
};

#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, url: &str) -> bool;

    async fn extract(
        &self,
        url: &str,
        preference: &QualityPreference,
    ) -> Result<VideoDescriptor, ExtractError>;

    /// Extractors without quality selection expose their single stream.
    async fn list_qualities(&self, url: &str) -> Result<Vec<AvailableQuality>, ExtractError> {
        let descriptor = self.extract(url, &QualityPreference::Best).await?;
        let mut option = AvailableQuality::new("auto", "Auto");
        option.video_url = Some(descriptor.video_url);
        Ok(vec![option])
    }
}

/// Platform to extractor wiring. YouTube is never registered.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<Platform, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform: Platform, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors.insert(platform, extractor);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<dyn Extractor>> {
        self.extractors.get(&platform)
    }

    pub fn from_config(
        config: &Config,
        http_client: reqwest::Client,
        identity: Arc<IdentityRotator>,
    ) -> Self {
        let delegated: Arc<dyn Extractor> = Arc::new(DelegatedExtractor::new(
            config.ytdlp_path.clone(),
            Duration::from_secs(config.ytdlp_timeout_seconds),
            Arc::clone(&identity),
        ));

        let registry = Self::new().with(Platform::TikTok, Arc::clone(&delegated));

        match config.extraction_strategy {
            ExtractionStrategy::Delegated => registry
                .with(Platform::Instagram, Arc::clone(&delegated))
                .with(Platform::Twitter, delegated),
            ExtractionStrategy::Native => registry
                .with(
                    Platform::Instagram,
                    Arc::new(InstagramExtractor::new(
                        http_client.clone(),
                        Arc::clone(&identity),
                    )),
                )
                .with(
                    Platform::Twitter,
                    Arc::new(
                        TwitterExtractor::new(http_client, identity)
                            .with_bearer_token(config.twitter_bearer_token.clone()),
                    ),
                ),
        }
    }
}

pub(crate) fn identity_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(user_agent) {
        headers.insert(USER_AGENT, value);
    }
    headers
}

/// Sends a prepared request and returns the body, mapping transport failures
/// and non-success statuses to `Upstream`.
pub(crate) async fn fetch_text(
    platform: &str,
    request: reqwest::RequestBuilder,
) -> Result<String, ExtractError> {
    let response = request
        .send()
        .await
        .map_err(|error| ExtractError::upstream(platform, error))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ExtractError::Upstream(format!(
            "{platform} returned status {status}"
        )));
    }

    response
        .text()
        .await
        .map_err(|error| ExtractError::upstream(platform, error))
}

pub(crate) fn parse_json(platform: &str, body: &str) -> Result<Value, ExtractError> {
    serde_json::from_str(body)
        .map_err(|error| ExtractError::Parse(format!("{platform} response is not JSON: {error}")))
}

/// Looks up a key that must be present, failing closed.
pub(crate) fn field<'a>(value: &'a Value, key: &str) -> Result<&'a Value, ExtractError> {
    value
        .get(key)
        .ok_or_else(|| ExtractError::Parse(format!("missing field `{key}`")))
}

pub(crate) fn array<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>, ExtractError> {
    field(value, key)?
        .as_array()
        .ok_or_else(|| ExtractError::Parse(format!("field `{key}` is not an array")))
}

pub(crate) fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

/// Numbers that platforms sometimes encode as strings.
pub(crate) fn loose_f64(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
