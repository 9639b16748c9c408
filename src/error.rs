use thiserror::Error;

use crate::platform::Platform;

/// Failure modes of a single extraction attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("platform not supported: {0}")]
    UnsupportedPlatform(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("unexpected response shape: {0}")]
    Parse(String),

    #[error("extraction tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("no video found: {0}")]
    NoVideoFound(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("payload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },
}

impl ExtractError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "INVALID_URL",
            Self::UnsupportedPlatform(_) => "UNSUPPORTED_PLATFORM",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Parse(_) => "PARSE_ERROR",
            Self::ToolUnavailable(_) => "TOOL_UNAVAILABLE",
            Self::NoVideoFound(_) => "NO_VIDEO_FOUND",
            Self::Cancelled => "CANCELLED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
        }
    }

    /// Errors caused by the caller's input rather than by extraction itself.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidUrl(_) | Self::UnsupportedPlatform(_))
    }

    pub(crate) fn upstream(platform: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Upstream(format!("{platform} request timed out: {error}"))
        } else {
            Self::Upstream(format!("failed to fetch {platform} data: {error}"))
        }
    }
}

/// An extraction failure annotated with the request it belonged to.
#[derive(Debug, Error)]
#[error("{platform} request for {url} failed: {source}")]
pub struct ProcessError {
    pub url: String,
    pub platform: String,
    #[source]
    pub source: ExtractError,
}

impl ProcessError {
    pub fn new(url: &str, platform: Option<Platform>, source: ExtractError) -> Self {
        Self {
            url: url.to_string(),
            platform: platform
                .map(|platform| platform.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            source,
        }
    }

    pub fn kind(&self) -> &ExtractError {
        &self.source
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("failed to serialize cache entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}
