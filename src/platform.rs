use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    Twitter,
    TikTok,
    YouTube,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Twitter => "twitter",
            Self::TikTok => "tiktok",
            Self::YouTube => "youtube",
        }
    }

    /// YouTube is recognised but refused as a matter of product policy.
    pub fn is_supported(self) -> bool {
        !matches!(self, Self::YouTube)
    }

    pub(crate) fn pattern(self) -> &'static Regex {
        match self {
            Self::YouTube => &YOUTUBE_PATTERN,
            Self::Instagram => &INSTAGRAM_PATTERN,
            Self::Twitter => &TWITTER_PATTERN,
            Self::TikTok => &TIKTOK_PATTERN,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) static YOUTUBE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.|m\.)?(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/shorts/)([A-Za-z0-9_-]+)",
    )
    .expect("youtube pattern compiles")
});

pub(crate) static INSTAGRAM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.)?instagram\.com/(p|reel|reels|tv)/([A-Za-z0-9_-]+)/?")
        .expect("instagram pattern compiles")
});

pub(crate) static TWITTER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.|mobile\.)?(?:twitter\.com|x\.com)/([^/?#]+)/status/(\d+)",
    )
    .expect("twitter pattern compiles")
});

pub(crate) static TIKTOK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:(?:www|vm|vt|m)\.)?tiktok\.com/")
        .expect("tiktok pattern compiles")
});

/// Evaluation order. Host-only rules come last so they never shadow a
/// path-specific one.
const DETECTION_ORDER: [Platform; 4] = [
    Platform::YouTube,
    Platform::Instagram,
    Platform::Twitter,
    Platform::TikTok,
];

/// Trims the input and lower-cases its scheme and host. Paths and query
/// strings keep their casing because post identifiers are case-sensitive.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();

    let (scheme, rest) = match trimmed.find("://") {
        Some(index) => (
            Some(trimmed[..index].to_ascii_lowercase()),
            &trimmed[index + 3..],
        ),
        None => (None, trimmed),
    };

    let host_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (host, tail) = rest.split_at(host_end);

    let mut normalized = String::with_capacity(trimmed.len());
    if let Some(scheme) = scheme {
        normalized.push_str(&scheme);
        normalized.push_str("://");
    }
    normalized.push_str(&host.to_ascii_lowercase());
    normalized.push_str(tail);
    normalized
}

pub fn detect(url: &str) -> Option<Platform> {
    let normalized = normalize(url);
    DETECTION_ORDER
        .into_iter()
        .find(|platform| platform.pattern().is_match(&normalized))
}

pub fn validate(url: &str, platform: Platform) -> bool {
    platform.pattern().is_match(&normalize(url))
}
