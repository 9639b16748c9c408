use std::{sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    cache::{self, CacheStore},
    config::Config,
    context::RequestContext,
    error::{ExtractError, ProcessError},
    extractors::{Extractor, ExtractorRegistry},
    models::{QualitiesResponse, VideoDescriptor},
    platform::{self, Platform},
    quality::QualityPreference,
};

/// HTTP client for media proxying. Only connection setup is bounded here; the
/// transfer runs under the request context's deadline.
pub fn proxy_client(config: &Config) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.download_timeout_seconds))
        .build()
}

/// Cache-first extraction behind a bounded admission gate.
///
/// Every outbound unit of work (extraction, quality listing, media proxying)
/// holds one permit of the gate for its duration. Cache hits never touch it.
pub struct Service {
    cache: Arc<dyn CacheStore>,
    registry: ExtractorRegistry,
    gate: Arc<Semaphore>,
    http_client: reqwest::Client,
    video_cache_ttl: Duration,
    proxy_cache_ttl: Duration,
    max_proxy_bytes: u64,
}

impl Service {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        registry: ExtractorRegistry,
        http_client: reqwest::Client,
    ) -> Self {
        Self::from_config(&Config::default(), cache, registry, http_client)
    }

    pub fn from_config(
        config: &Config,
        cache: Arc<dyn CacheStore>,
        registry: ExtractorRegistry,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            cache,
            registry,
            gate: Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1))),
            http_client,
            video_cache_ttl: Duration::from_secs(config.video_cache_ttl_seconds),
            proxy_cache_ttl: Duration::from_secs(config.proxy_cache_ttl_seconds),
            max_proxy_bytes: config.max_proxy_bytes,
        }
    }

    pub fn with_max_concurrent(mut self, permits: usize) -> Self {
        self.gate = Arc::new(Semaphore::new(permits.max(1)));
        self
    }

    pub fn with_max_proxy_bytes(mut self, limit: u64) -> Self {
        self.max_proxy_bytes = limit;
        self
    }

    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }

    pub fn detect_platform(&self, url: &str) -> Option<Platform> {
        platform::detect(url)
    }

    /// Resolves `url` to a playable descriptor at the requested quality.
    pub async fn process(
        &self,
        ctx: &RequestContext,
        url: &str,
        quality: &str,
    ) -> Result<VideoDescriptor, ProcessError> {
        let source = url.trim();
        let normalized = platform::normalize(source);
        let detected = platform::detect(&normalized);
        let fail = |error: ExtractError| ProcessError::new(source, detected, error);

        let preference = QualityPreference::parse(quality);
        let key = cache::descriptor_key(&normalized, &preference.as_token());

        if let Some(descriptor) = self.cache.get(&key).await {
            debug!(url = source, quality = %preference, "Serving descriptor from cache");
            return Ok(descriptor);
        }

        let (_, extractor) = self.dispatch_target(detected).map_err(fail)?;
        let permit = self.admit(ctx).await.map_err(fail)?;

        debug!(url = source, extractor = extractor.name(), quality = %preference, "Extracting");
        let descriptor = ctx
            .run(extractor.extract(source, &preference))
            .await
            .map_err(fail)?;
        drop(permit);

        if let Err(error) = self
            .cache
            .set(&key, &descriptor, self.video_cache_ttl)
            .await
        {
            warn!(url = source, %error, "Failed to cache descriptor");
        }

        info!(
            url = source,
            platform = %descriptor.platform,
            quality = %descriptor.quality,
            "Video resolved"
        );
        Ok(descriptor)
    }

    pub async fn list_qualities(
        &self,
        ctx: &RequestContext,
        url: &str,
    ) -> Result<QualitiesResponse, ProcessError> {
        let source = url.trim();
        let detected = platform::detect(source);
        let fail = |error: ExtractError| ProcessError::new(source, detected, error);

        let (platform, extractor) = self.dispatch_target(detected).map_err(fail)?;
        let _permit = self.admit(ctx).await.map_err(fail)?;

        let available_qualities = ctx
            .run(extractor.list_qualities(source))
            .await
            .map_err(fail)?;

        Ok(QualitiesResponse {
            platform,
            available_qualities,
        })
    }

    /// Downloads media bytes on behalf of a client, with a short-lived cache.
    pub async fn proxy_fetch(
        &self,
        ctx: &RequestContext,
        media_url: &str,
    ) -> Result<Bytes, ProcessError> {
        let media_url = media_url.trim();
        let fail = |error: ExtractError| ProcessError::new(media_url, None, error);

        let parsed = Url::parse(media_url)
            .map_err(|error| ExtractError::InvalidUrl(format!("{media_url}: {error}")))
            .map_err(fail)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(fail(ExtractError::InvalidUrl(format!(
                "unsupported scheme `{}`",
                parsed.scheme()
            ))));
        }

        let key = cache::payload_key(media_url);
        if let Some(payload) = self.cache.get_bytes(&key).await {
            debug!(media_url, bytes = payload.len(), "Serving media from cache");
            return Ok(payload);
        }

        let permit = self.admit(ctx).await.map_err(fail)?;
        let payload = ctx.run(self.download(parsed)).await.map_err(fail)?;
        drop(permit);

        if let Err(error) = self
            .cache
            .set_bytes(&key, &payload, self.proxy_cache_ttl)
            .await
        {
            warn!(media_url, %error, "Failed to cache media payload");
        }

        Ok(payload)
    }

    async fn admit(&self, ctx: &RequestContext) -> Result<OwnedSemaphorePermit, ExtractError> {
        let gate = Arc::clone(&self.gate);
        ctx.run(async move {
            gate.acquire_owned()
                .await
                .map_err(|_| ExtractError::Cancelled)
        })
        .await
    }

    fn dispatch_target(
        &self,
        detected: Option<Platform>,
    ) -> Result<(Platform, &Arc<dyn Extractor>), ExtractError> {
        match detected {
            None => Err(ExtractError::UnsupportedPlatform(
                "unsupported URL or platform".to_string(),
            )),
            Some(platform) if !platform.is_supported() => Err(ExtractError::UnsupportedPlatform(
                format!("{platform} videos are not supported at this time"),
            )),
            Some(platform) => self
                .registry
                .get(platform)
                .map(|extractor| (platform, extractor))
                .ok_or_else(|| {
                    ExtractError::UnsupportedPlatform(format!(
                        "no extractor configured for {platform}"
                    ))
                }),
        }
    }

    async fn download(&self, media_url: Url) -> Result<Bytes, ExtractError> {
        let limit = self.max_proxy_bytes;
        let mut response = self
            .http_client
            .get(media_url)
            .send()
            .await
            .map_err(|error| ExtractError::upstream("media", error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::Upstream(format!(
                "media host returned status {status}"
            )));
        }

        if response.content_length().is_some_and(|length| length > limit) {
            return Err(ExtractError::PayloadTooLarge { limit });
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|error| ExtractError::upstream("media", error))?
        {
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(ExtractError::PayloadTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }
}
