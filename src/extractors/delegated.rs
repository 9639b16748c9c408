use std::{collections::HashSet, io::ErrorKind, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

use super::Extractor;
use crate::{
    error::ExtractError,
    identity::IdentityRotator,
    models::{AvailableQuality, VideoDescriptor},
    platform::{self, Platform},
    quality::{self, QualityPreference},
};

const YOUTUBE_REJECTION: &str = "YouTube videos are not supported at this time";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct YtDlpInfo {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<YtDlpFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct YtDlpFormat {
    #[serde(default)]
    pub format_id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub vcodec: Option<String>,
}

impl YtDlpFormat {
    fn playable_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Needs a reported video codec other than `"none"`.
    fn carries_video(&self) -> bool {
        matches!(self.vcodec.as_deref(), Some(codec) if codec != "none")
    }

    fn height_or_zero(&self) -> u32 {
        self.height.unwrap_or_default()
    }
}

/// The `--format` argument handed to yt-dlp for a preference.
pub fn format_selector(preference: &QualityPreference) -> String {
    match preference {
        QualityPreference::Best => "bestvideo[ext=mp4]+bestaudio/best".to_string(),
        QualityPreference::Worst => "worstvideo[ext=mp4]+worstaudio/worst".to_string(),
        QualityPreference::MaxHeight(height) => {
            format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]")
        }
        QualityPreference::Raw(selector) => selector.clone(),
    }
}

/// Tallest format, keeping the first one seen on ties.
fn tallest<'a>(formats: impl Iterator<Item = &'a YtDlpFormat>) -> Option<&'a YtDlpFormat> {
    formats.fold(None, |selected, candidate| match selected {
        Some(current) if current.height_or_zero() >= candidate.height_or_zero() => Some(current),
        _ => Some(candidate),
    })
}

/// Re-selects the concrete stream for a preference, since the tool's
/// top-level URL does not always match what was requested.
fn select_format<'a>(
    formats: &'a [YtDlpFormat],
    preference: &QualityPreference,
) -> Option<&'a YtDlpFormat> {
    let candidates = || {
        formats
            .iter()
            .filter(|format| format.playable_url().is_some() && format.carries_video())
    };

    match preference {
        QualityPreference::Best | QualityPreference::Raw(_) => tallest(candidates()),
        QualityPreference::Worst => candidates()
            .filter(|format| format.height_or_zero() > 0)
            .min_by_key(|format| format.height_or_zero())
            .or_else(|| candidates().next()),
        QualityPreference::MaxHeight(limit) => {
            tallest(candidates().filter(|format| format.height_or_zero() <= *limit))
        }
    }
}

fn resolve_video_url<'a>(
    info: &'a YtDlpInfo,
    preference: &QualityPreference,
) -> Result<(&'a str, Option<&'a YtDlpFormat>), ExtractError> {
    if let Some(format) = select_format(&info.formats, preference)
        && let Some(url) = format.playable_url()
    {
        debug!(
            height = format.height_or_zero(),
            format_id = %format.format_id,
            preference = %preference,
            "Selected format"
        );
        return Ok((url, Some(format)));
    }

    info.url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(|url| (url, None))
        .ok_or_else(|| ExtractError::NoVideoFound("no video URL found in yt-dlp output".to_string()))
}

/// One option per distinct height among video formats, tallest first.
/// Without any height metadata, one option per raw format identifier.
fn height_options(formats: &[YtDlpFormat]) -> Vec<AvailableQuality> {
    let mut seen_heights = HashSet::new();
    let mut by_height: Vec<&YtDlpFormat> = formats
        .iter()
        .filter(|format| format.carries_video() && format.height_or_zero() > 0)
        .filter(|format| seen_heights.insert(format.height_or_zero()))
        .collect();
    by_height.sort_by(|a, b| b.height_or_zero().cmp(&a.height_or_zero()));

    if !by_height.is_empty() {
        return by_height
            .into_iter()
            .map(|format| {
                let height = format.height_or_zero();
                AvailableQuality {
                    quality: QualityPreference::MaxHeight(height).as_token(),
                    label: quality::label(height),
                    width: format.width,
                    height: Some(height),
                    video_url: format.playable_url().map(ToString::to_string),
                }
            })
            .collect();
    }

    debug!("No formats with height metadata, listing format identifiers");
    let mut seen_ids = HashSet::new();
    formats
        .iter()
        .filter(|format| !format.format_id.trim().is_empty())
        .filter(|format| seen_ids.insert(format.format_id.as_str()))
        .map(|format| AvailableQuality {
            quality: format.format_id.clone(),
            label: format.format_id.clone(),
            width: format.width,
            height: format.height,
            video_url: format.playable_url().map(ToString::to_string),
        })
        .collect()
}

fn sentinel(info: &YtDlpInfo, preference: QualityPreference, label: &str) -> AvailableQuality {
    let mut option = AvailableQuality::new(preference.as_token(), label);
    option.video_url = resolve_video_url(info, &preference)
        .ok()
        .map(|(url, _)| url.to_string());
    option
}

/// `best` first, per-height options, `worst` last.
fn quality_listing(info: &YtDlpInfo) -> Vec<AvailableQuality> {
    let mut options = vec![sentinel(info, QualityPreference::Best, "Best Available")];
    options.extend(height_options(&info.formats));
    options.push(sentinel(info, QualityPreference::Worst, "Lowest Quality"));
    options
}

fn run_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the request")
        .to_string()
}

/// Extraction through the `yt-dlp` command-line tool for Instagram,
/// Twitter/X and TikTok.
pub struct DelegatedExtractor {
    binary: String,
    timeout: Duration,
    identity: Arc<IdentityRotator>,
}

impl DelegatedExtractor {
    pub fn new(binary: impl Into<String>, timeout: Duration, identity: Arc<IdentityRotator>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            identity,
        }
    }

    /// Policy gate shared by every entry point: YouTube is refused even though
    /// the tool could handle it.
    fn admit(&self, url: &str) -> Result<Platform, ExtractError> {
        match platform::detect(url) {
            Some(Platform::YouTube) => Err(ExtractError::UnsupportedPlatform(
                YOUTUBE_REJECTION.to_string(),
            )),
            Some(platform) => Ok(platform),
            None => Err(ExtractError::InvalidUrl(format!(
                "unsupported URL or platform: {}",
                url.trim()
            ))),
        }
    }

    async fn dump_json(
        &self,
        url: &str,
        preference: Option<&QualityPreference>,
    ) -> Result<YtDlpInfo, ExtractError> {
        let binary = which::which(&self.binary).map_err(|error| {
            ExtractError::ToolUnavailable(format!("{} not found in PATH: {error}", self.binary))
        })?;

        let mut args = vec![
            "--no-check-certificate".to_string(),
            "--no-warnings".to_string(),
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--user-agent".to_string(),
            self.identity.next(),
        ];
        if let Some(preference) = preference {
            args.push("--format".to_string());
            args.push(format_selector(preference));
        }
        args.push(url.to_string());

        debug!(binary = %binary.display(), ?args, "Running yt-dlp");

        let command_future = Command::new(&binary).args(&args).kill_on_drop(true).output();
        let output = timeout(self.timeout, command_future)
            .await
            .map_err(|_| ExtractError::DeadlineExceeded)?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ExtractError::ToolUnavailable(format!("{} is not installed", self.binary))
                } else {
                    ExtractError::Upstream(format!("failed to run yt-dlp: {error}"))
                }
            })?;

        if !output.status.success() {
            let message = run_error_message(&output.stderr);
            warn!(url, status = %output.status, %message, "yt-dlp failed");
            return Err(ExtractError::Upstream(format!("yt-dlp failed: {message}")));
        }

        serde_json::from_slice(&output.stdout).map_err(|error| {
            ExtractError::Parse(format!("failed to parse yt-dlp output: {error}"))
        })
    }
}

#[async_trait]
impl Extractor for DelegatedExtractor {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn validate(&self, url: &str) -> bool {
        self.admit(url).is_ok()
    }

    async fn extract(
        &self,
        url: &str,
        preference: &QualityPreference,
    ) -> Result<VideoDescriptor, ExtractError> {
        let platform = self.admit(url)?;
        let source = url.trim();
        let info = self.dump_json(source, Some(preference)).await?;

        let (video_url, format) = resolve_video_url(&info, preference)?;
        if format.is_none() {
            debug!(url = source, "Using top-level yt-dlp URL");
        }

        let token = preference.as_token();
        let quality_label = format
            .filter(|format| format.height_or_zero() > 0)
            .map(|format| quality::label(format.height_or_zero()))
            .unwrap_or_else(|| token.clone());

        let mut descriptor = VideoDescriptor::new(video_url, platform, token, source)
            .with_title(info.title.clone().unwrap_or_default())
            .with_duration(info.duration.map(|seconds| seconds.round() as u64))
            .with_metadata("description", info.description.clone().unwrap_or_default())
            .with_metadata(
                "duration",
                format!("{:.1}", info.duration.unwrap_or_default()),
            )
            .with_metadata("thumbnail", info.thumbnail.clone().unwrap_or_default())
            .with_metadata("quality_label", quality_label)
            .with_available_qualities(quality::sort_descending(&height_options(&info.formats)));

        if let Some(format) = format {
            descriptor = descriptor.with_metadata("format_id", format.format_id.clone());
        }

        Ok(descriptor)
    }

    async fn list_qualities(&self, url: &str) -> Result<Vec<AvailableQuality>, ExtractError> {
        self.admit(url)?;
        let info = self.dump_json(url.trim(), None).await?;
        Ok(quality_listing(&info))
    }
}
