use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use sha2::{Digest, Sha256};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use crate::{error::CacheError, models::VideoDescriptor};

const REDIS_CONNECT_TIMEOUT_SECONDS: u64 = 5;

/// Key for a resolved descriptor. The parts are hashed so URLs containing
/// the separator cannot collide with other `(url, quality)` pairs.
pub fn descriptor_key(normalized_url: &str, quality: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_url.as_bytes());
    hasher.update([0u8]);
    hasher.update(quality.as_bytes());
    format!("video:{:x}", hasher.finalize())
}

pub fn payload_key(media_url: &str) -> String {
    let digest = Sha256::digest(media_url.as_bytes());
    format!("video_file:{digest:x}")
}

/// Ephemeral store for descriptors and proxied media bytes.
///
/// Lookups never fail: backend errors are logged and reported as misses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<VideoDescriptor>;
    async fn set(
        &self,
        key: &str,
        descriptor: &VideoDescriptor,
        ttl: Duration,
    ) -> Result<(), CacheError>;
    async fn get_bytes(&self, key: &str) -> Option<Bytes>;
    async fn set_bytes(&self, key: &str, payload: &Bytes, ttl: Duration)
    -> Result<(), CacheError>;
}

/// Every lookup misses and every write succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl CacheStore for NoopCache {
    async fn get(&self, _key: &str) -> Option<VideoDescriptor> {
        None
    }

    async fn set(
        &self,
        _key: &str,
        _descriptor: &VideoDescriptor,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Ok(())
    }

    async fn get_bytes(&self, _key: &str) -> Option<Bytes> {
        None
    }

    async fn set_bytes(
        &self,
        _key: &str,
        _payload: &Bytes,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum MemoryValue {
    Descriptor(String),
    Payload(Bytes),
}

/// In-process cache with per-entry expiry. Descriptors are stored serialized
/// so callers never share an instance with the cache.
#[derive(Debug, Default, Clone)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, (MemoryValue, Instant)>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lookup(&self, key: &str) -> Option<MemoryValue> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.get(key).map(|(value, _)| value.clone())
    }

    async fn store(&self, key: &str, value: MemoryValue, ttl: Duration) {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value, Instant::now() + ttl));
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<VideoDescriptor> {
        match self.lookup(key).await? {
            MemoryValue::Descriptor(json) => match serde_json::from_str(&json) {
                Ok(descriptor) => Some(descriptor),
                Err(error) => {
                    warn!(key, %error, "Failed to decode cached descriptor");
                    None
                }
            },
            MemoryValue::Payload(_) => None,
        }
    }

    async fn set(
        &self,
        key: &str,
        descriptor: &VideoDescriptor,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(descriptor)?;
        self.store(key, MemoryValue::Descriptor(json), ttl).await;
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> Option<Bytes> {
        match self.lookup(key).await? {
            MemoryValue::Payload(payload) => Some(payload),
            MemoryValue::Descriptor(_) => None,
        }
    }

    async fn set_bytes(
        &self,
        key: &str,
        payload: &Bytes,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.store(key, MemoryValue::Payload(payload.clone()), ttl)
            .await;
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let mut connection = tokio::time::timeout(
            Duration::from_secs(REDIS_CONNECT_TIMEOUT_SECONDS),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CacheError::Unavailable(format!("timed out connecting to {redis_url}")))??;

        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Option<VideoDescriptor> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = match connection.get(key).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(key, %error, "Failed to read from cache");
                return None;
            }
        };

        match serde_json::from_str(&raw?) {
            Ok(descriptor) => {
                debug!(key, "Descriptor found in cache");
                Some(descriptor)
            }
            Err(error) => {
                warn!(key, %error, "Failed to decode cached descriptor");
                None
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        descriptor: &VideoDescriptor,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(descriptor)?;
        let mut connection = self.connection.clone();
        let _: () = connection.set_ex(key, json, ttl.as_secs().max(1)).await?;
        debug!(key, ttl_seconds = ttl.as_secs(), "Descriptor cached");
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> Option<Bytes> {
        let mut connection = self.connection.clone();
        let payload: redis::RedisResult<Option<Vec<u8>>> = connection.get(key).await;
        match payload {
            Ok(payload) => payload.map(Bytes::from),
            Err(error) => {
                warn!(key, %error, "Failed to read payload from cache");
                None
            }
        }
    }

    async fn set_bytes(
        &self,
        key: &str,
        payload: &Bytes,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .set_ex(key, payload.to_vec(), ttl.as_secs().max(1))
            .await?;
        Ok(())
    }
}

/// Connects to Redis, degrading to a no-op cache when no URL is configured or
/// the backend cannot be reached.
pub async fn connect_or_noop(redis_url: Option<&str>) -> Arc<dyn CacheStore> {
    let Some(redis_url) = redis_url else {
        warn!("REDIS_URL not configured, caching disabled");
        return Arc::new(NoopCache);
    };

    match RedisCache::connect(redis_url).await {
        Ok(cache) => {
            info!("Redis connection established");
            Arc::new(cache)
        }
        Err(error) => {
            warn!(%error, "Redis connection failed, caching disabled");
            Arc::new(NoopCache)
        }
    }
}
