use std::fmt;

use tracing::warn;

use crate::models::AvailableQuality;

/// A caller's quality request, parsed from its wire token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum QualityPreference {
    #[default]
    Best,
    Worst,
    MaxHeight(u32),
    Raw(String),
}

impl QualityPreference {
    /// Unknown tokens pass through as raw selectors; height bounds that do not
    /// carry a valid positive integer fall back to `Best`.
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        match token.to_ascii_lowercase().as_str() {
            "" | "best" | "auto" => return Self::Best,
            "worst" => return Self::Worst,
            _ => {}
        }

        if let Some(height) = parse_height_bound(token) {
            return Self::MaxHeight(height);
        }

        if token.contains("height<=") {
            warn!(token, "Malformed height bound in quality token, using best");
            return Self::Best;
        }

        Self::Raw(token.to_string())
    }

    /// Canonical token, stable across equivalent spellings.
    pub fn as_token(&self) -> String {
        match self {
            Self::Best => "best".to_string(),
            Self::Worst => "worst".to_string(),
            Self::MaxHeight(height) => format!("best[height<={height}]"),
            Self::Raw(token) => token.clone(),
        }
    }
}

impl fmt::Display for QualityPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_token())
    }
}

fn parse_height_bound(token: &str) -> Option<u32> {
    let bound = if let Some(inner) = token
        .strip_prefix("bestvideo[height<=")
        .or_else(|| token.strip_prefix("best[height<="))
    {
        inner.strip_suffix(']')?
    } else if let Some(inner) = token.strip_prefix("height<=") {
        inner
    } else if let Some(inner) = token.strip_prefix("<=") {
        inner
    } else if let Some(inner) = token.strip_suffix('p') {
        inner
    } else {
        return None;
    };

    if bound.is_empty() || !bound.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }

    bound.parse::<u32>().ok().filter(|height| *height > 0)
}

/// Highest pixel count; the first entry wins ties.
pub fn best(qualities: &[AvailableQuality]) -> Option<&AvailableQuality> {
    qualities.iter().fold(None, |selected, candidate| match selected {
        Some(current) if current.pixels() >= candidate.pixels() => Some(current),
        _ => Some(candidate),
    })
}

pub fn by_preference<'a>(
    qualities: &'a [AvailableQuality],
    token: &str,
) -> Option<&'a AvailableQuality> {
    if token.is_empty() || token == "best" {
        return best(qualities);
    }

    qualities
        .iter()
        .find(|quality| quality.quality == token)
        .or_else(|| best(qualities))
}

pub fn sort_descending(qualities: &[AvailableQuality]) -> Vec<AvailableQuality> {
    let mut sorted = qualities.to_vec();
    sorted.sort_by(|a, b| b.pixels().cmp(&a.pixels()));
    sorted
}

pub fn label(height: u32) -> String {
    match height {
        2160.. => "4K".to_string(),
        1440.. => "1440p".to_string(),
        1080.. => "1080p".to_string(),
        720.. => "720p".to_string(),
        480.. => "480p".to_string(),
        360.. => "360p".to_string(),
        _ => format!("{height}p"),
    }
}

/// Parses a `WIDTHxHEIGHT` resolution string.
pub fn parse_dimensions(value: &str) -> Option<(u32, u32)> {
    let (width, height) = value.trim().split_once(['x', 'X'])?;
    Some((width.parse().ok()?, height.parse().ok()?))
}
