use crate::error::{FetchError, Result};
use crate::fetcher::Fetcher;
use crate::request::FetchRequest;
use crate::result::{FailureKind, FetchResult};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Sends fetches to a running fetchgate server instead of upstream hosts
pub struct RemoteFetcher {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    fallback: Option<Arc<dyn Fetcher>>,
}

impl RemoteFetcher {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let client = Client::builder()
            .user_agent(crate::client::DEFAULT_USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: None,
            fallback: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Fetcher used when the proxy does not answer its health check
    pub fn with_fallback(mut self, fallback: Arc<dyn Fetcher>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", path, e)))
    }

    pub async fn is_available(&self) -> bool {
        let Ok(health_url) = self.endpoint("/health") else {
            return false;
        };

        match self
            .client
            .get(health_url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Proxy health check failed: {}", e);
                false
            }
        }
    }

    async fn forward(&self, request: &FetchRequest) -> Result<FetchResult> {
        let mut builder = self
            .client
            .post(self.endpoint("/fetch")?)
            .json(request)
            // leave headroom for the proxy's own round trip
            .timeout(request.timeout_duration() + Duration::from_secs(5));

        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        serde_json::from_str::<FetchResult>(&text).map_err(|_| {
            FetchError::Other(format!("proxy answered {}: {}", status.as_u16(), text))
        })
    }
}

#[async_trait]
impl Fetcher for RemoteFetcher {
    async fn fetch(&self, request: FetchRequest) -> FetchResult {
        let start = Instant::now();

        if let Some(ref fallback) = self.fallback
            && !self.is_available().await
        {
            info!("Proxy unavailable, using direct fetch for {}", request.url);
            return fallback.fetch(request).await;
        }

        match self.forward(&request).await {
            Ok(result) => result,
            Err(FetchError::HttpError(e)) if e.is_timeout() => FetchResult::with_error(
                request.url.clone(),
                FailureKind::Timeout,
                "Request timeout".to_string(),
            )
            .with_elapsed(start.elapsed()),
            Err(e) => {
                warn!("Proxy fetch failed for {}: {}", request.url, e);
                FetchResult::with_error(request.url.clone(), FailureKind::Upstream, e.to_string())
                    .with_elapsed(start.elapsed())
            }
        }
    }
}
