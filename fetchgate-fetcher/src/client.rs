use crate::error::{FetchError, Result};
use crate::fetcher::Fetcher;
use crate::request::FetchRequest;
use crate::result::{FailureKind, FetchResult};
use async_trait::async_trait;
use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, redirect};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_USER_AGENT: &str = "fetchgate/0.1 (https://github.com/trapdoorsec/fetchgate)";
const MAX_REDIRECTS: usize = 10;

/// Performs the outbound HTTP call for a `FetchRequest`.
///
/// reqwest fixes TLS and redirect behaviour per client, so one client is kept
/// for each combination and chosen per request.
pub struct HttpFetcher {
    verified_follow: Client,
    verified_no_follow: Client,
    unverified_follow: Client,
    unverified_no_follow: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            verified_follow: Self::build_client(true, true)?,
            verified_no_follow: Self::build_client(true, false)?,
            unverified_follow: Self::build_client(false, true)?,
            unverified_no_follow: Self::build_client(false, false)?,
        })
    }

    fn build_client(verify_tls: bool, follow_redirects: bool) -> Result<Client> {
        let policy = if follow_redirects {
            redirect::Policy::limited(MAX_REDIRECTS)
        } else {
            redirect::Policy::none()
        };

        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(30) // Connection pooling
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .danger_accept_invalid_certs(!verify_tls)
            .redirect(policy)
            .build()?;

        Ok(client)
    }

    fn client_for(&self, request: &FetchRequest) -> &Client {
        match (request.verify_tls, request.follow_redirects) {
            (true, true) => &self.verified_follow,
            (true, false) => &self.verified_no_follow,
            (false, true) => &self.unverified_follow,
            (false, false) => &self.unverified_no_follow,
        }
    }

    /// Perform the call and surface transport errors to the caller
    pub async fn execute(&self, request: &FetchRequest) -> Result<FetchResult> {
        let url = request.validate()?;
        let headers = build_headers(request)?;

        debug!("{} {}", request.method, url);

        let start = Instant::now();
        let mut builder = self
            .client_for(request)
            .request(request.method.to_reqwest(), url)
            .headers(headers)
            .timeout(request.timeout_duration());

        if let Some(ref body) = request.body
            && request.method != crate::request::HttpMethod::Get
        {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let response_headers = collect_headers(response.headers());
        let body = response.text().await?;

        let mut result = FetchResult::new(request.url.clone());
        result.status_code = status_code;
        result.final_url = final_url;
        result.headers = response_headers;
        result.byte_size = body.len();
        result.body = body;
        result.elapsed = start.elapsed();
        result.succeeded = request.is_success_status(status_code);

        Ok(result)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> FetchResult {
        let start = Instant::now();
        match self.execute(&request).await {
            Ok(result) => result,
            Err(FetchError::HttpError(e)) if e.is_timeout() => {
                warn!("Request timeout - {}", request.url);
                FetchResult::with_error(
                    request.url.clone(),
                    FailureKind::Timeout,
                    "Request timeout".to_string(),
                )
                .with_elapsed(start.elapsed())
            }
            Err(e) => {
                warn!("Fetch error - {} - {}", request.url, e);
                FetchResult::with_error(request.url.clone(), FailureKind::Upstream, e.to_string())
                    .with_elapsed(start.elapsed())
            }
        }
    }
}

fn build_headers(request: &FetchRequest) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FetchError::InvalidHeader(format!("{}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FetchError::InvalidHeader(format!("{}: {}", name, e)))?;
        headers.insert(name, value);
    }

    if let Some(ref user_agent) = request.user_agent {
        let value = HeaderValue::from_str(user_agent)
            .map_err(|e| FetchError::InvalidHeader(format!("User-Agent: {}", e)))?;
        headers.insert(USER_AGENT, value);
    }

    if let Some(ref cookies) = request.cookies
        && !cookies.is_empty()
    {
        let cookie_line = cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ");
        let value = HeaderValue::from_str(&cookie_line)
            .map_err(|e| FetchError::InvalidHeader(format!("Cookie: {}", e)))?;
        headers.insert(COOKIE, value);
    }

    Ok(headers)
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut collected: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).to_string();
        collected
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    collected
}
