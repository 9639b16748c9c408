use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE};
use serde_json::Value;
use tracing::debug;

use super::{Extractor, fetch_text, field, identity_headers, loose_f64, non_empty_str};
use crate::{
    error::ExtractError,
    identity::IdentityRotator,
    models::VideoDescriptor,
    platform::{self, Platform, YOUTUBE_PATTERN},
    quality::QualityPreference,
};

const DEFAULT_BASE_URL: &str = "https://www.youtube.com";
const PLAYER_RESPONSE_MARKERS: [&str; 2] = [
    "var ytInitialPlayerResponse = ",
    "ytInitialPlayerResponse\":",
];
const TITLE_SUFFIX: &str = " - YouTube";

/// Scrapes the watch page's embedded player configuration.
///
/// Never registered for dispatch: YouTube links are refused before any
/// extractor runs.
pub struct YouTubeExtractor {
    client: reqwest::Client,
    identity: Arc<IdentityRotator>,
    base_url: String,
}

impl YouTubeExtractor {
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
impl Extractor for YouTubeExtractor {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn validate(&self, url: &str) -> bool {
        platform::validate(url, Platform::YouTube)
    }

    async fn extract(
        &self,
        url: &str,
        _preference: &QualityPreference,
    ) -> Result<VideoDescriptor, ExtractError> {
        let normalized = platform::normalize(url);
        let video_id = YOUTUBE_PATTERN
            .captures(&normalized)
            .map(|captures| captures[1].to_string())
            .ok_or_else(|| ExtractError::InvalidUrl(format!("not a YouTube video: {url}")))?;

        let user_agent = self.identity.next();
        debug!(video_id, "Fetching YouTube watch page");

        let html = fetch_text(
            "youtube",
            self.client
                .get(format!("{}/watch", self.base_url))
                .query(&[("v", video_id.as_str())])
                .headers(identity_headers(&user_agent))
                .header(
                    ACCEPT,
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                )
                .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5"),
        )
        .await?;

        let page = parse_watch_page(&html)?;

        Ok(
            VideoDescriptor::new(page.video_url, Platform::YouTube, "auto", url.trim())
                .with_title(page.title)
                .with_duration(page.duration)
                .with_metadata("video_id", video_id),
        )
    }
}

#[derive(Debug)]
struct WatchPage {
    video_url: String,
    title: String,
    duration: Option<u64>,
}

fn parse_watch_page(html: &str) -> Result<WatchPage, ExtractError> {
    let player = player_response(html)?;
    let streaming = field(&player, "streamingData")?;

    let video_url = ["adaptiveFormats", "formats"]
        .into_iter()
        .filter_map(|key| streaming.get(key).and_then(Value::as_array))
        .flatten()
        .find_map(|format| {
            let mime = format.get("mimeType").and_then(Value::as_str)?;
            if !mime.contains("video/mp4") {
                return None;
            }
            non_empty_str(format, "url")
        })
        .ok_or_else(|| ExtractError::NoVideoFound("no suitable video format found".to_string()))?;

    let details = player.get("videoDetails");
    let title = page_title(html)
        .or_else(|| details.and_then(|details| non_empty_str(details, "title")).map(str::to_string))
        .unwrap_or_default();
    let duration = details
        .and_then(|details| loose_f64(details, "lengthSeconds"))
        .map(|seconds| seconds as u64);

    Ok(WatchPage {
        video_url: video_url.to_string(),
        title,
        duration,
    })
}

/// Decodes exactly one JSON value following the first known marker.
fn player_response(html: &str) -> Result<Value, ExtractError> {
    let start = PLAYER_RESPONSE_MARKERS
        .iter()
        .find_map(|marker| html.find(marker).map(|index| index + marker.len()))
        .ok_or_else(|| ExtractError::Parse("could not find player response in page".to_string()))?;

    serde_json::Deserializer::from_str(&html[start..])
        .into_iter::<Value>()
        .next()
        .ok_or_else(|| ExtractError::Parse("player response is empty".to_string()))?
        .map_err(|error| ExtractError::Parse(format!("failed to parse player response: {error}")))
}

fn page_title(html: &str) -> Option<String> {
    let start = html.find("<title>")? + "<title>".len();
    let end = start + html[start..].find("</title>")?;
    let title = html[start..end].trim();
    let title = title.strip_suffix(TITLE_SUFFIX).unwrap_or(title).trim();
    (!title.is_empty()).then(|| title.to_string())
}
