use crate::request::FetchRequest;
use crate::result::FetchResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Anything that can turn a `FetchRequest` into a `FetchResult`.
///
/// Implementations never fail: every error is reported inside the returned
/// result with `succeeded == false`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> FetchResult;
}

/// How a caller routes its fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMode {
    /// Talk to upstream servers directly
    Direct,
    /// Send every fetch through a running fetchgate server
    #[default]
    Proxy,
    /// Use the proxy, fall back to direct fetches when it is down
    ProxyWithFallback,
}

impl IntegrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationMode::Direct => "direct",
            IntegrationMode::Proxy => "proxy",
            IntegrationMode::ProxyWithFallback => "proxy_with_fallback",
        }
    }
}
