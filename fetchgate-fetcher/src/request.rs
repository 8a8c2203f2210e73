use crate::error::{FetchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BULK_CONCURRENCY: usize = 5;

/// HTTP verbs the proxy is willing to forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }
}

impl FromStr for HttpMethod {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(FetchError::InvalidMethod(other.to_string())),
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = FetchError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single fetch to perform on behalf of a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, alias = "data")]
    pub body: Option<String>,
    /// Seconds; `None` leaves the choice to whoever executes the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    #[serde(default = "default_true", alias = "verify_ssl")]
    pub verify_tls: bool,
    #[serde(default, alias = "allow_status_codes")]
    pub allowed_status_codes: Option<Vec<u16>>,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default, alias = "intelligence_tags")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub cookies: Option<BTreeMap<String, String>>,
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    DEFAULT_BULK_CONCURRENCY
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
            follow_redirects: true,
            verify_tls: true,
            allowed_status_codes: None,
            cache_enabled: true,
            tags: Vec::new(),
            user_agent: None,
            cookies: None,
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = Some(timeout_secs);
        self
    }

    pub fn with_allowed_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.allowed_status_codes = Some(codes);
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Parse and check the target URL. Only absolute http(s) URLs with a host pass.
    pub fn validate(&self) -> Result<Url> {
        let parsed = Url::parse(&self.url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", self.url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "{}: unsupported scheme '{}'",
                self.url,
                parsed.scheme()
            )));
        }

        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(FetchError::InvalidUrl(format!("{}: missing host", self.url)));
        }

        Ok(parsed)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS).max(1))
    }

    /// Case-insensitive header presence check
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }

    /// Whether a status code counts as success for this request
    pub fn is_success_status(&self, status_code: u16) -> bool {
        match self.allowed_status_codes.as_deref() {
            Some(codes) if !codes.is_empty() => codes.contains(&status_code),
            _ => (200..400).contains(&status_code),
        }
    }
}

/// A batch of GET fetches sharing headers and tags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkFetchRequest {
    pub urls: Vec<String>,
    #[serde(default = "default_concurrency", alias = "concurrent_limit")]
    pub concurrency_limit: usize,
    #[serde(default, alias = "intelligence_tags")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub common_headers: BTreeMap<String, String>,
}

impl BulkFetchRequest {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            concurrency_limit: DEFAULT_BULK_CONCURRENCY,
            tags: Vec::new(),
            common_headers: BTreeMap::new(),
        }
    }

    /// Expand into one GET request per URL, in input order
    pub fn to_requests(&self) -> Vec<FetchRequest> {
        self.urls
            .iter()
            .map(|url| {
                let mut request = FetchRequest::new(url.clone()).with_tags(self.tags.clone());
                request.headers = self.common_headers.clone();
                request
            })
            .collect()
    }
}
