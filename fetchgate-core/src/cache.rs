// Response cache keyed by a request fingerprint

use crate::store::KvStore;
use fetchgate_fetcher::{FetchRequest, FetchResult};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, error};

const CACHE_PREFIX: &str = "proxy_cache";

/// Deterministic digest of (method, url, normalized header set).
///
/// Header names are lower-cased and entries sorted, so two requests that differ
/// only in header-name casing or ordering share a fingerprint.
pub fn fingerprint(request: &FetchRequest) -> String {
    let headers_digest = if request.headers.is_empty() {
        String::new()
    } else {
        let mut normalized: Vec<(String, &str)> = request
            .headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.as_str()))
            .collect();
        normalized.sort();

        let mut hasher = Sha256::new();
        for (name, value) in normalized {
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    };

    let material = format!("{}:{}:{}", request.method, request.url, headers_digest);
    hex::encode(Sha256::digest(material.as_bytes()))
}

#[derive(Clone)]
pub struct ResponseCache {
    store: KvStore,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(store: KvStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(fingerprint: &str) -> String {
        format!("{}:{}", CACHE_PREFIX, fingerprint)
    }

    /// Cached result for a fingerprint. Store and decode failures read as a miss.
    pub async fn get(&self, fingerprint: &str) -> Option<FetchResult> {
        let key = Self::key(fingerprint);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<FetchResult>(&raw) {
                Ok(result) => {
                    debug!("Cache HIT for key: {}", key);
                    Some(result)
                }
                Err(e) => {
                    error!("Cache entry for {} could not be decoded: {}", key, e);
                    None
                }
            },
            Ok(None) => {
                debug!("Cache MISS for key: {}", key);
                None
            }
            Err(e) => {
                error!("Cache retrieval failed: {}", e);
                None
            }
        }
    }

    /// Store a result. Failures are logged, never returned.
    pub async fn put(&self, fingerprint: &str, result: &FetchResult) {
        let key = Self::key(fingerprint);
        let encoded = match serde_json::to_string(result) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Cache storage failed: {}", e);
                return;
            }
        };

        if let Err(e) = self.store.set_ex(&key, encoded, self.ttl).await {
            error!("Cache storage failed: {}", e);
        }
    }
}
