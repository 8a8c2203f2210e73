// The fetch pipeline: policy, rate limit, cache, network call, recording

use crate::bulk;
use crate::cache::{ResponseCache, fingerprint};
use crate::config::ProxyConfig;
use crate::error::{ConfigError, Result};
use crate::intelligence::IntelligenceRecorder;
use crate::policy::DomainPolicy;
use crate::ratelimit::{ANONYMOUS_CLIENT, RateLimiter};
use crate::store::KvStore;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use fetchgate_fetcher::{
    BulkFetchRequest, FailureKind, FetchRequest, FetchResult, Fetcher, HttpFetcher,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Everything a config reload replaces
struct Runtime {
    config: ProxyConfig,
    policy: DomainPolicy,
    limiter: RateLimiter,
    cache: ResponseCache,
}

impl Runtime {
    fn build(config: ProxyConfig, store: &KvStore) -> Self {
        Self {
            policy: DomainPolicy::new(
                &config.security.allowed_domains,
                &config.security.blocked_domains,
            ),
            limiter: RateLimiter::new(store.clone(), &config.security.rate_limiting),
            cache: ResponseCache::new(store.clone(), Duration::from_secs(config.caching.ttl)),
            config,
        }
    }
}

pub struct FetchProxy {
    runtime: RwLock<Arc<Runtime>>,
    transport: Arc<dyn Fetcher>,
    store: KvStore,
    recorder: IntelligenceRecorder,
    config_path: Option<PathBuf>,
    ua_cursor: AtomicUsize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthComponents {
    pub cache: bool,
    pub cache_backend: String,
    pub rate_limiting: bool,
    pub intelligence: bool,
    pub store: String,
    pub database: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub timestamp: String,
    pub components: HealthComponents,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HousekeepingReport {
    pub deleted_records: usize,
    pub remaining_records: usize,
    pub expired_cache_entries: usize,
}

/// Show just enough of a key to tell clients apart in logs
pub fn mask_key(key: &str) -> String {
    if key == ANONYMOUS_CLIENT {
        return key.to_string();
    }
    let prefix: String = key.chars().take(4).collect();
    if key.chars().count() > 8 {
        format!("{}...", prefix)
    } else {
        "***".to_string()
    }
}

impl FetchProxy {
    pub fn new(
        config: ProxyConfig,
        transport: Arc<dyn Fetcher>,
        store: KvStore,
        recorder: IntelligenceRecorder,
    ) -> Self {
        Self {
            runtime: RwLock::new(Arc::new(Runtime::build(config, &store))),
            transport,
            store,
            recorder,
            config_path: None,
            ua_cursor: AtomicUsize::new(0),
        }
    }

    /// File that `reload_config` re-reads
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Connect the store, open the intelligence database and build the HTTP transport
    pub async fn start(config: ProxyConfig, config_path: Option<&Path>) -> Result<Arc<Self>> {
        config.validate()?;

        let store = KvStore::connect(&config.caching).await?;
        let recorder = IntelligenceRecorder::open(&config.intelligence)?;
        let transport: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new()?);

        info!(
            "Fetch proxy ready (cache: {}, backend: {}, rate limiting: {}, intelligence: {})",
            config.caching.enabled,
            store.backend_name(),
            config.security.rate_limiting.enabled,
            config.intelligence.enabled
        );

        let mut proxy = Self::new(config, transport, store, recorder);
        if let Some(path) = config_path {
            proxy = proxy.with_config_path(path);
        }
        Ok(Arc::new(proxy))
    }

    async fn snapshot(&self) -> Arc<Runtime> {
        Arc::clone(&*self.runtime.read().await)
    }

    pub async fn config(&self) -> ProxyConfig {
        self.snapshot().await.config.clone()
    }

    pub async fn api_keys(&self) -> Vec<String> {
        self.snapshot().await.config.security.api_keys.clone()
    }

    pub fn recorder(&self) -> &IntelligenceRecorder {
        &self.recorder
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    /// A `Fetcher` that runs every request through this pipeline as `client`
    pub fn for_client(self: &Arc<Self>, client: impl Into<String>) -> ClientFetcher {
        ClientFetcher {
            proxy: Arc::clone(self),
            client: client.into(),
        }
    }

    fn next_user_agent(&self, runtime: &Runtime) -> Option<String> {
        let agents = &runtime.config.user_agents;
        if agents.is_empty() {
            return None;
        }
        let idx = self.ua_cursor.fetch_add(1, Ordering::Relaxed) % agents.len();
        Some(agents[idx].clone())
    }

    /// Run one request through the pipeline. Never fails: refusals and errors
    /// come back as results carrying a failure kind.
    pub async fn fetch(&self, request: FetchRequest, client: &str) -> FetchResult {
        let started = Instant::now();
        let runtime = self.snapshot().await;
        let client = if client.is_empty() {
            ANONYMOUS_CLIENT
        } else {
            client
        };
        let request_id = Uuid::new_v4().to_string();
        let short_id = &request_id[..8];

        if runtime.config.proxy.show_requests {
            info!(
                "[{}] {} {} (client: {})",
                short_id,
                request.method,
                request.url,
                mask_key(client)
            );
        }

        if let Err(e) = request.validate() {
            warn!("[{}] Rejected invalid request: {}", short_id, e);
            self.recorder.log_blocked(&request, FailureKind::Upstream.reason(), &e.to_string()).await;
            return FetchResult::with_error(request.url, FailureKind::Upstream, e.to_string())
                .with_elapsed(started.elapsed());
        }

        let decision = runtime.policy.evaluate(&request.url);
        if !decision.is_allowed() {
            let details = decision.describe();
            warn!("[{}] Blocked {}: {}", short_id, request.url, details);
            self.recorder
                .log_blocked(&request, FailureKind::PolicyViolation.reason(), &details)
                .await;
            return FetchResult::with_error(
                request.url,
                FailureKind::PolicyViolation,
                "Domain blocked by security policy".to_string(),
            )
            .with_elapsed(started.elapsed());
        }

        if !runtime.limiter.allow(client).await {
            warn!("[{}] Rate limit exceeded for {}", short_id, mask_key(client));
            self.recorder
                .log_blocked(
                    &request,
                    FailureKind::RateLimited.reason(),
                    &format!("client {}", mask_key(client)),
                )
                .await;
            return FetchResult::with_error(
                request.url,
                FailureKind::RateLimited,
                "Rate limit exceeded".to_string(),
            )
            .with_elapsed(started.elapsed());
        }

        let cacheable = request.cache_enabled && runtime.config.caching.enabled;
        let cache_key = fingerprint(&request);
        if cacheable && let Some(mut hit) = runtime.cache.get(&cache_key).await {
            hit.cached = true;
            hit.elapsed = started.elapsed();
            if runtime.config.proxy.show_requests {
                info!("[{}] Served {} from cache", short_id, request.url);
            }
            return hit;
        }

        let method = request.method;
        let tags = request.tags.clone();
        let mut outbound = request;
        if outbound.user_agent.is_none() && !outbound.has_header("user-agent") {
            outbound.user_agent = self.next_user_agent(&runtime);
        }
        if outbound.timeout.is_none() {
            outbound.timeout = Some(runtime.config.proxy.timeout);
        }
        if !outbound.has_header(REQUEST_ID_HEADER) {
            outbound
                .headers
                .insert(REQUEST_ID_HEADER.to_string(), request_id.clone());
        }
        let blocked_view = outbound.clone();

        let result = self.transport.fetch(outbound).await;

        match result.failure {
            None => {
                if cacheable && result.succeeded {
                    runtime.cache.put(&cache_key, &result).await;
                }
                if runtime.config.intelligence.enabled {
                    self.recorder.record(&result, method, &tags).await;
                }
            }
            Some(kind) => {
                let details = result.error.clone().unwrap_or_default();
                error!("[{}] Fetch of {} failed: {}", short_id, result.url, details);
                self.recorder.log_blocked(&blocked_view, kind.reason(), &details).await;
            }
        }

        if runtime.config.proxy.show_requests {
            info!(
                "[{}] Completed {} -> {} in {:.3}s ({} bytes)",
                short_id,
                result.url,
                result.status_code,
                result.elapsed.as_secs_f64(),
                result.byte_size
            );
        }

        result
    }

    /// Fetch a batch through the pipeline. Concurrency is capped by
    /// `proxy.max_concurrent`.
    pub async fn bulk_fetch(self: &Arc<Self>, batch: BulkFetchRequest, client: &str) -> Vec<FetchResult> {
        let max_concurrent = self.snapshot().await.config.proxy.max_concurrent;
        let limit = batch.concurrency_limit.clamp(1, max_concurrent.max(1));
        debug!(
            "Bulk request for {} URLs (requested concurrency {}, using {})",
            batch.urls.len(),
            batch.concurrency_limit,
            limit
        );

        let fetcher: Arc<dyn Fetcher> = Arc::new(self.for_client(client));
        bulk::bulk_fetch(fetcher, batch.to_requests(), limit).await
    }

    pub async fn health(&self) -> HealthReport {
        let runtime = self.snapshot().await;

        let store = match self.store.ping().await {
            Ok(()) => "ok".to_string(),
            Err(e) => {
                error!("Store health check failed: {}", e);
                format!("error: {}", e)
            }
        };
        let database = match self.recorder.ping().await {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("error: {}", e),
        };

        let status = if store == "ok" { "healthy" } else { "unhealthy" };

        HealthReport {
            status: status.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            components: HealthComponents {
                cache: runtime.config.caching.enabled,
                cache_backend: self.store.backend_name().to_string(),
                rate_limiting: runtime.limiter.is_enabled(),
                intelligence: runtime.config.intelligence.enabled,
                store,
                database,
            },
        }
    }

    /// Re-read the config file. On any error the current config stays in place.
    ///
    /// The store backend and database path are fixed at startup.
    pub async fn reload_config(&self) -> Result<ProxyConfig> {
        let path = self.config_path.as_deref().ok_or_else(|| {
            ConfigError::Invalid("no configuration file to reload from".to_string())
        })?;
        let config = ProxyConfig::load_existing(path)?;
        self.apply_config(config.clone()).await?;
        info!("Configuration reloaded from {}", path.display());
        Ok(config)
    }

    pub async fn apply_config(&self, config: ProxyConfig) -> Result<()> {
        config.validate()?;
        let current = self.snapshot().await;
        if current.config.caching.backend != config.caching.backend
            || current.config.intelligence.database_path != config.intelligence.database_path
        {
            warn!("Cache backend and database path changes take effect on restart");
        }

        let runtime = Arc::new(Runtime::build(config, &self.store));
        *self.runtime.write().await = runtime;
        Ok(())
    }

    /// Trim intelligence records to `keep` (default `intelligence.max_records`)
    /// and drop expired in-memory store entries
    pub async fn housekeeping(&self, keep: Option<usize>) -> Result<HousekeepingReport> {
        let keep = match keep {
            Some(keep) => keep,
            None => self.snapshot().await.config.intelligence.max_records,
        };

        let deleted_records = self.recorder.trim(keep).await?;
        let remaining_records = self.recorder.count().await?;
        let expired_cache_entries = self.store.purge_expired();

        info!(
            "Housekeeping: deleted {} records, {} remain, purged {} expired entries",
            deleted_records, remaining_records, expired_cache_entries
        );

        Ok(HousekeepingReport {
            deleted_records,
            remaining_records,
            expired_cache_entries,
        })
    }

    pub async fn shutdown(&self) {
        let purged = self.store.purge_expired();
        info!("Fetch proxy shutting down ({} expired entries purged)", purged);
    }
}

/// Runs requests through a `FetchProxy` under a fixed client identity
#[derive(Clone)]
pub struct ClientFetcher {
    proxy: Arc<FetchProxy>,
    client: String,
}

#[async_trait]
impl Fetcher for ClientFetcher {
    async fn fetch(&self, request: FetchRequest) -> FetchResult {
        self.proxy.fetch(request, &self.client).await
    }
}
