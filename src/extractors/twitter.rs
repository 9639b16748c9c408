use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::Value;
use tracing::debug;

use super::{Extractor, fetch_text, identity_headers, loose_f64, non_empty_str, parse_json};
use crate::{
    error::ExtractError,
    identity::IdentityRotator,
    models::VideoDescriptor,
    platform::{self, Platform, TWITTER_PATTERN},
    quality::{self, QualityPreference},
};

const DEFAULT_API_BASE_URL: &str = "https://api.twitter.com";

/// Public bearer token shipped with the Twitter web client.
pub const WEB_CLIENT_BEARER_TOKEN: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

/// Reads a tweet through the legacy `statuses/show` endpoint.
pub struct TwitterExtractor {
    client: reqwest::Client,
    identity: Arc<IdentityRotator>,
    api_base_url: String,
    bearer_token: String,
}

impl TwitterExtractor {
    pub fn new(client: reqwest::Client, identity: Arc<IdentityRotator>) -> Self {
        Self {
            client,
            identity,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            bearer_token: WEB_CLIENT_BEARER_TOKEN.to_string(),
        }
    }

    pub fn with_api_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api_base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        if let Some(token) = token {
            self.bearer_token = token;
        }
        self
    }
}

#[async_trait]
impl Extractor for TwitterExtractor {
    fn name(&self) -> &'static str {
        "twitter"
    }

    fn validate(&self, url: &str) -> bool {
        platform::validate(url, Platform::Twitter)
    }

    async fn extract(
        &self,
        url: &str,
        _preference: &QualityPreference,
    ) -> Result<VideoDescriptor, ExtractError> {
        let normalized = platform::normalize(url);
        let captures = TWITTER_PATTERN
            .captures(&normalized)
            .ok_or_else(|| ExtractError::InvalidUrl(format!("not a Twitter/X status: {url}")))?;
        let author = &captures[1];
        let tweet_id = &captures[2];

        let user_agent = self.identity.next();
        let api_url = format!(
            "{}/1.1/statuses/show.json?id={tweet_id}&include_entities=true&tweet_mode=extended",
            self.api_base_url
        );
        debug!(tweet_id, "Fetching tweet data");

        let body = fetch_text(
            "twitter",
            self.client
                .get(&api_url)
                .headers(identity_headers(&user_agent))
                .header(ACCEPT, "application/json")
                .header(AUTHORIZATION, format!("Bearer {}", self.bearer_token)),
        )
        .await?;

        let tweet = parse_json("twitter", &body)?;
        let video = select_video(&tweet)?;
        let title = non_empty_str(&tweet, "full_text")
            .or_else(|| non_empty_str(&tweet, "text"))
            .unwrap_or_default();

        let mut descriptor =
            VideoDescriptor::new(&video.url, Platform::Twitter, "auto", url.trim())
                .with_title(title)
                .with_duration(video.duration)
                .with_metadata("tweet_id", tweet_id)
                .with_metadata("author", author);

        if let Some((width, height)) = variant_dimensions(&video.url) {
            descriptor = descriptor
                .with_metadata("resolution", format!("{width}x{height}"))
                .with_metadata("quality_label", quality::label(height));
        }

        Ok(descriptor)
    }
}

/// MP4 variant URLs carry their size as a `/vid/WIDTHxHEIGHT/` segment.
fn variant_dimensions(video_url: &str) -> Option<(u32, u32)> {
    video_url.split('/').find_map(quality::parse_dimensions)
}

#[derive(Debug, PartialEq)]
struct TweetVideo {
    url: String,
    bitrate: u64,
    duration: Option<u64>,
}

/// First video or GIF media entry that carries an MP4 variant, using its
/// highest-bitrate MP4 variant. Ties keep the first variant seen.
fn select_video(tweet: &Value) -> Result<TweetVideo, ExtractError> {
    let media = tweet
        .get("extended_entities")
        .and_then(|entities| entities.get("media"))
        .and_then(Value::as_array)
        .filter(|media| !media.is_empty())
        .ok_or_else(|| ExtractError::NoVideoFound("no media found in tweet".to_string()))?;

    for item in media {
        let is_video = matches!(
            item.get("type").and_then(Value::as_str),
            Some("video" | "animated_gif")
        );
        if !is_video {
            continue;
        }

        let Some(video_info) = item.get("video_info") else {
            continue;
        };
        let Some(variants) = video_info.get("variants").and_then(Value::as_array) else {
            continue;
        };

        let mut best: Option<(&str, u64)> = None;
        for variant in variants {
            if variant.get("content_type").and_then(Value::as_str) != Some("video/mp4") {
                continue;
            }
            let Some(url) = non_empty_str(variant, "url") else {
                continue;
            };
            let bitrate = loose_f64(variant, "bitrate").unwrap_or_default().max(0.0) as u64;

            match best {
                Some((_, best_bitrate)) if best_bitrate >= bitrate => {}
                _ => best = Some((url, bitrate)),
            }
        }

        if let Some((url, bitrate)) = best {
            return Ok(TweetVideo {
                url: url.to_string(),
                bitrate,
                duration: loose_f64(video_info, "duration_millis")
                    .map(|millis| (millis / 1000.0).round() as u64),
            });
        }
    }

    Err(ExtractError::NoVideoFound(
        "no video URL found in tweet".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path, query_param},
    };

    use super::*;
    use crate::extractors::test_support::identity;

    fn tweet_with_variants(variants: Value) -> Value {
        json!({
            "full_text": "Look at this",
            "extended_entities": {
                "media": [
                    {"type": "photo", "media_url_https": "https://pbs.example.com/a.jpg"},
                    {
                        "type": "video",
                        "video_info": {"duration_millis": 8_400, "variants": variants}
                    }
                ]
            }
        })
    }

    #[test]
    fn picks_highest_bitrate_mp4_variant() {
        let tweet = tweet_with_variants(json!([
            {"content_type": "application/x-mpegURL", "url": "https://video.example.com/pl.m3u8"},
            {"content_type": "video/mp4", "bitrate": 832000, "url": "https://video.example.com/480.mp4"},
            {"content_type": "video/mp4", "bitrate": 2176000, "url": "https://video.example.com/720.mp4"},
            {"content_type": "video/mp4", "bitrate": 256000, "url": "https://video.example.com/240.mp4"}
        ]));

        let video = select_video(&tweet).unwrap();
        assert_eq!(video.url, "https://video.example.com/720.mp4");
        assert_eq!(video.bitrate, 2_176_000);
        assert_eq!(video.duration, Some(8));
    }

    #[test]
    fn bitrate_ties_keep_first_seen() {
        let tweet = tweet_with_variants(json!([
            {"content_type": "video/mp4", "bitrate": 950000, "url": "https://video.example.com/first.mp4"},
            {"content_type": "video/mp4", "bitrate": 950000, "url": "https://video.example.com/second.mp4"}
        ]));

        assert_eq!(
            select_video(&tweet).unwrap().url,
            "https://video.example.com/first.mp4"
        );
    }

    #[test]
    fn animated_gifs_without_bitrate_are_accepted() {
        let tweet = json!({
            "extended_entities": {"media": [{
                "type": "animated_gif",
                "video_info": {"variants": [
                    {"content_type": "video/mp4", "url": "https://video.example.com/gif.mp4"}
                ]}
            }]}
        });

        assert_eq!(select_video(&tweet).unwrap().url, "https://video.example.com/gif.mp4");
    }

    #[test]
    fn reads_dimensions_from_variant_path() {
        let url = "https://video.twimg.com/ext_tw_video/1/pu/vid/1280x720/abc.mp4?tag=12";
        assert_eq!(variant_dimensions(url), Some((1280, 720)));
        assert_eq!(variant_dimensions("https://video.example.com/v.mp4"), None);
    }

    #[test]
    fn tweets_without_video_report_no_video() {
        for tweet in [
            json!({"text": "plain tweet"}),
            json!({"extended_entities": {"media": []}}),
            json!({"extended_entities": {"media": [{"type": "photo"}]}}),
            tweet_with_variants(json!([
                {"content_type": "application/x-mpegURL", "url": "https://video.example.com/pl.m3u8"}
            ])),
        ] {
            assert!(matches!(select_video(&tweet), Err(ExtractError::NoVideoFound(_))));
        }
    }

    #[tokio::test]
    async fn extracts_tweet_through_status_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.1/statuses/show.json"))
            .and(query_param("id", "1234567890"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tweet_with_variants(json!([
                {"content_type": "video/mp4", "bitrate": 632000, "url": "https://video.example.com/v.mp4"}
            ]))))
            .expect(1)
            .mount(&server)
            .await;

        let extractor = TwitterExtractor::new(reqwest::Client::new(), identity())
            .with_api_base_url(server.uri())
            .with_bearer_token(Some("test-token".to_string()));

        let descriptor = extractor
            .extract("https://X.com/someone/status/1234567890?s=20", &QualityPreference::Worst)
            .await
            .unwrap();

        assert_eq!(descriptor.video_url, "https://video.example.com/v.mp4");
        assert_eq!(descriptor.title, "Look at this");
        assert_eq!(descriptor.quality, "auto");
        assert_eq!(descriptor.metadata.get("tweet_id").map(String::as_str), Some("1234567890"));
        assert_eq!(descriptor.metadata.get("author").map(String::as_str), Some("someone"));
        assert!(!descriptor.metadata.contains_key("resolution"));
    }

    #[tokio::test]
    async fn server_errors_are_upstream_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let extractor =
            TwitterExtractor::new(reqwest::Client::new(), identity()).with_api_base_url(server.uri());
        let error = extractor
            .extract("https://twitter.com/a/status/1", &QualityPreference::Best)
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractError::Upstream(_)));
    }
}
