use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Why a fetch did not produce an upstream response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PolicyViolation,
    RateLimited,
    Timeout,
    Upstream,
}

impl FailureKind {
    /// Status marker reported for this failure
    pub fn status_code(&self) -> u16 {
        match self {
            FailureKind::PolicyViolation => 403,
            FailureKind::RateLimited => 429,
            FailureKind::Timeout => 408,
            FailureKind::Upstream => 500,
        }
    }

    /// Reason label used in the blocked-request log
    pub fn reason(&self) -> &'static str {
        match self {
            FailureKind::PolicyViolation => "DOMAIN_BLOCKED",
            FailureKind::RateLimited => "RATE_LIMIT",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::Upstream => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub url: String,
    pub status_code: u16,
    pub body: String,
    pub headers: BTreeMap<String, String>,
    pub final_url: String,
    #[serde(rename = "elapsed_time", with = "duration_secs")]
    pub elapsed: Duration,
    pub byte_size: usize,
    #[serde(rename = "success")]
    pub succeeded: bool,
    #[serde(default)]
    pub cached: bool,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl FetchResult {
    pub fn new(url: String) -> Self {
        Self {
            final_url: url.clone(),
            url,
            status_code: 0,
            body: String::new(),
            headers: BTreeMap::new(),
            elapsed: Duration::from_secs(0),
            byte_size: 0,
            succeeded: false,
            cached: false,
            error: None,
            failure: None,
        }
    }

    pub fn with_error(url: String, kind: FailureKind, error: String) -> Self {
        let mut result = Self::new(url);
        result.status_code = kind.status_code();
        result.body = error.clone();
        result.error = Some(error);
        result.failure = Some(kind);
        result
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Serde adapter for a `Duration` as fractional seconds. Out-of-range
/// input decodes as zero.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::try_from_secs_f64(secs).unwrap_or_default())
    }
}
