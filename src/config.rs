use tracing::warn;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_VIDEO_CACHE_TTL_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_PROXY_CACHE_TTL_SECONDS: u64 = 5 * 60;
const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 5;
const DEFAULT_DOWNLOAD_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_YTDLP_TIMEOUT_SECONDS: u64 = 180;
pub const DEFAULT_MAX_PROXY_BYTES: u64 = 250 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// Every platform goes through `yt-dlp`.
    #[default]
    Delegated,
    /// Instagram and Twitter/X use the built-in scrapers.
    Native,
}

impl ExtractionStrategy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "delegated" | "ytdlp" | "yt-dlp" => Some(Self::Delegated),
            "native" => Some(Self::Native),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheBackend {
    #[default]
    Redis,
    Memory,
    None,
}

impl CacheBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Some(Self::Redis),
            "memory" => Some(Self::Memory),
            "none" | "off" | "disabled" => Some(Self::None),
            _ => None,
        }
    }
}

/// Runtime settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: String,
    pub redis_url: Option<String>,
    pub cache_backend: CacheBackend,
    pub video_cache_ttl_seconds: u64,
    pub proxy_cache_ttl_seconds: u64,
    pub max_concurrent_downloads: usize,
    pub download_timeout_seconds: u64,
    pub ytdlp_path: String,
    pub ytdlp_timeout_seconds: u64,
    pub extraction_strategy: ExtractionStrategy,
    pub rotate_user_agents: bool,
    pub random_user_agent_order: bool,
    pub twitter_bearer_token: Option<String>,
    pub max_proxy_bytes: u64,
    pub allowed_origins: Vec<String>,
    pub environment: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            redis_url: None,
            cache_backend: CacheBackend::default(),
            video_cache_ttl_seconds: DEFAULT_VIDEO_CACHE_TTL_SECONDS,
            proxy_cache_ttl_seconds: DEFAULT_PROXY_CACHE_TTL_SECONDS,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            download_timeout_seconds: DEFAULT_DOWNLOAD_TIMEOUT_SECONDS,
            ytdlp_path: "yt-dlp".to_string(),
            ytdlp_timeout_seconds: DEFAULT_YTDLP_TIMEOUT_SECONDS,
            extraction_strategy: ExtractionStrategy::default(),
            rotate_user_agents: true,
            random_user_agent_order: true,
            twitter_bearer_token: None,
            max_proxy_bytes: DEFAULT_MAX_PROXY_BYTES,
            allowed_origins: Vec::new(),
            environment: "development".to_string(),
        }
    }
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick
    /// up a local `.env` file.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Unparseable values are logged and replaced by their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let env = Env(&lookup);

        let cache_backend = match env.text("CACHE_BACKEND") {
            Some(value) => CacheBackend::parse(&value).unwrap_or_else(|| {
                warn!(%value, "Unknown CACHE_BACKEND, using redis");
                CacheBackend::Redis
            }),
            None => defaults.cache_backend,
        };

        let extraction_strategy = match env.text("EXTRACTION_STRATEGY") {
            Some(value) => ExtractionStrategy::parse(&value).unwrap_or_else(|| {
                warn!(%value, "Unknown EXTRACTION_STRATEGY, using delegated");
                ExtractionStrategy::Delegated
            }),
            None => defaults.extraction_strategy,
        };

        let max_concurrent_downloads = env
            .usize("MAX_CONCURRENT_DOWNLOADS")
            .filter(|value| *value > 0)
            .unwrap_or(defaults.max_concurrent_downloads);

        Self {
            bind_addr: resolve_bind_addr(&env),
            redis_url: env.text("REDIS_URL"),
            cache_backend,
            video_cache_ttl_seconds: env
                .u64("VIDEO_CACHE_TTL")
                .unwrap_or(defaults.video_cache_ttl_seconds),
            proxy_cache_ttl_seconds: env
                .u64("PROXY_CACHE_TTL")
                .unwrap_or(defaults.proxy_cache_ttl_seconds),
            max_concurrent_downloads,
            download_timeout_seconds: env
                .u64("DOWNLOAD_TIMEOUT")
                .filter(|value| *value > 0)
                .unwrap_or(defaults.download_timeout_seconds),
            ytdlp_path: env.text("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            ytdlp_timeout_seconds: env
                .u64("YTDLP_TIMEOUT")
                .filter(|value| *value > 0)
                .unwrap_or(defaults.ytdlp_timeout_seconds),
            extraction_strategy,
            rotate_user_agents: env
                .bool("ROTATE_USER_AGENTS")
                .unwrap_or(defaults.rotate_user_agents),
            random_user_agent_order: env
                .bool("RANDOM_USER_AGENT_ORDER")
                .unwrap_or(defaults.random_user_agent_order),
            twitter_bearer_token: env.text("TWITTER_BEARER_TOKEN"),
            max_proxy_bytes: env
                .u64("MAX_PROXY_BYTES")
                .filter(|value| *value > 0)
                .unwrap_or(defaults.max_proxy_bytes),
            allowed_origins: env
                .text("ALLOWED_ORIGINS")
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            environment: env.text("ENV").unwrap_or(defaults.environment),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn text(&self, name: &str) -> Option<String> {
        (self.0)(name).and_then(|value| non_empty(&value).map(ToString::to_string))
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let value = self.text(name)?;
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                warn!(name, %value, "Ignoring non-boolean value");
                None
            }
        }
    }

    fn usize(&self, name: &str) -> Option<usize> {
        self.text(name).and_then(|value| value.parse().ok())
    }

    fn u64(&self, name: &str) -> Option<u64> {
        self.text(name).and_then(|value| value.parse().ok())
    }
}

fn resolve_bind_addr<F: Fn(&str) -> Option<String>>(env: &Env<'_, F>) -> String {
    if let Some(configured) = env.text("APP_ADDR") {
        return configured;
    }

    let port = env.text("PORT").and_then(|value| value.parse::<u16>().ok());
    match (env.text("HOST"), port) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => format!("{host}:8080"),
        (None, Some(port)) => format!("0.0.0.0:{port}"),
        (None, None) => DEFAULT_BIND_ADDR.to_string(),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(config_from(&[]), Config::default());
        let config = Config::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.max_concurrent_downloads, 5);
        assert_eq!(config.proxy_cache_ttl_seconds, 300);
        assert_eq!(config.video_cache_ttl_seconds, 86_400);
        assert_eq!(config.max_proxy_bytes, 250 * 1024 * 1024);
        assert!(!config.is_production());
    }

    #[test]
    fn reads_every_setting() {
        let config = config_from(&[
            ("APP_ADDR", " 127.0.0.1:9000 "),
            ("REDIS_URL", "redis://cache:6379"),
            ("CACHE_BACKEND", "Memory"),
            ("VIDEO_CACHE_TTL", "60"),
            ("PROXY_CACHE_TTL", "10"),
            ("MAX_CONCURRENT_DOWNLOADS", "2"),
            ("DOWNLOAD_TIMEOUT", "12"),
            ("YTDLP_PATH", "/opt/bin/yt-dlp"),
            ("YTDLP_TIMEOUT", "90"),
            ("EXTRACTION_STRATEGY", "native"),
            ("ROTATE_USER_AGENTS", "off"),
            ("RANDOM_USER_AGENT_ORDER", "0"),
            ("TWITTER_BEARER_TOKEN", "abc"),
            ("MAX_PROXY_BYTES", "1024"),
            ("ALLOWED_ORIGINS", "https://a.example, ,https://b.example"),
            ("ENV", "production"),
        ]);

        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.cache_backend, CacheBackend::Memory);
        assert_eq!(config.video_cache_ttl_seconds, 60);
        assert_eq!(config.proxy_cache_ttl_seconds, 10);
        assert_eq!(config.max_concurrent_downloads, 2);
        assert_eq!(config.download_timeout_seconds, 12);
        assert_eq!(config.ytdlp_path, "/opt/bin/yt-dlp");
        assert_eq!(config.ytdlp_timeout_seconds, 90);
        assert_eq!(config.extraction_strategy, ExtractionStrategy::Native);
        assert!(!config.rotate_user_agents);
        assert!(!config.random_user_agent_order);
        assert_eq!(config.twitter_bearer_token.as_deref(), Some("abc"));
        assert_eq!(config.max_proxy_bytes, 1024);
        assert_eq!(
            config.allowed_origins,
            ["https://a.example", "https://b.example"]
        );
        assert!(config.is_production());
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = config_from(&[
            ("MAX_CONCURRENT_DOWNLOADS", "0"),
            ("CACHE_BACKEND", "memcached"),
            ("EXTRACTION_STRATEGY", "magic"),
            ("ROTATE_USER_AGENTS", "maybe"),
            ("VIDEO_CACHE_TTL", "-1"),
            ("REDIS_URL", "   "),
        ]);

        assert_eq!(config.max_concurrent_downloads, 5);
        assert_eq!(config.cache_backend, CacheBackend::Redis);
        assert_eq!(config.extraction_strategy, ExtractionStrategy::Delegated);
        assert!(config.rotate_user_agents);
        assert_eq!(config.video_cache_ttl_seconds, 86_400);
        assert_eq!(config.redis_url, None);
    }

    #[test]
    fn bind_address_from_host_and_port() {
        assert_eq!(config_from(&[("PORT", "3000")]).bind_addr, "0.0.0.0:3000");
        assert_eq!(
            config_from(&[("HOST", "127.0.0.1"), ("PORT", "3000")]).bind_addr,
            "127.0.0.1:3000"
        );
        assert_eq!(
            config_from(&[("HOST", "localhost")]).bind_addr,
            "localhost:8080"
        );
        assert_eq!(
            config_from(&[("PORT", "not-a-port")]).bind_addr,
            "0.0.0.0:8080"
        );
    }
}
