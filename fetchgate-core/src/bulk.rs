// Bounded-concurrency fan-out over a Fetcher

use fetchgate_fetcher::{FailureKind, FetchRequest, FetchResult, Fetcher};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error};

/// Called once per finished slot with its input index
pub type ProgressCallback = Arc<dyn Fn(usize, &FetchResult) + Send + Sync>;

/// Fetch every request with at most `concurrency_limit` in flight.
///
/// The output has one result per input, in input order. A slot whose task
/// panics yields an upstream-error result at its index.
pub async fn bulk_fetch(
    fetcher: Arc<dyn Fetcher>,
    requests: Vec<FetchRequest>,
    concurrency_limit: usize,
) -> Vec<FetchResult> {
    bulk_fetch_with_progress(fetcher, requests, concurrency_limit, None).await
}

pub async fn bulk_fetch_with_progress(
    fetcher: Arc<dyn Fetcher>,
    requests: Vec<FetchRequest>,
    concurrency_limit: usize,
    progress: Option<ProgressCallback>,
) -> Vec<FetchResult> {
    let limit = concurrency_limit.max(1);
    debug!("Bulk fetch of {} URLs, concurrency {}", requests.len(), limit);

    let semaphore = Arc::new(Semaphore::new(limit));
    let urls: Vec<String> = requests.iter().map(|r| r.url.clone()).collect();

    let tasks = requests.into_iter().enumerate().map(|(index, request)| {
        let fetcher = Arc::clone(&fetcher);
        let semaphore = Arc::clone(&semaphore);
        let progress = progress.clone();

        tokio::spawn(async move {
            let url = request.url.clone();
            let result = match semaphore.acquire().await {
                Ok(_permit) => fetcher.fetch(request).await,
                Err(e) => FetchResult::with_error(url, FailureKind::Upstream, e.to_string()),
            };
            if let Some(progress) = progress {
                progress(index, &result);
            }
            result
        })
    });

    join_all(tasks)
        .await
        .into_iter()
        .zip(urls)
        .map(|(joined, url)| match joined {
            Ok(result) => result,
            Err(e) => {
                error!("Bulk slot for {} failed: {}", url, e);
                FetchResult::with_error(url, FailureKind::Upstream, format!("Task failed: {}", e))
            }
        })
        .collect()
}

/// Per-item view of a bulk result. Bodies are left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItem {
    pub url: String,
    pub status_code: u16,
    pub success: bool,
    pub final_url: String,
    #[serde(with = "fetchgate_fetcher::result::duration_secs")]
    pub elapsed_time: Duration,
    pub byte_size: usize,
    pub cached: bool,
    pub error: Option<String>,
}

impl From<&FetchResult> for BulkItem {
    fn from(result: &FetchResult) -> Self {
        Self {
            url: result.url.clone(),
            status_code: result.status_code,
            success: result.succeeded,
            final_url: result.final_url.clone(),
            elapsed_time: result.elapsed,
            byte_size: result.byte_size,
            cached: result.cached,
            error: result.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkSummary {
    pub total: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    pub results: Vec<BulkItem>,
}

impl BulkSummary {
    pub fn from_results(results: &[FetchResult]) -> Self {
        let successful_count = results.iter().filter(|r| r.succeeded).count();
        Self {
            total: results.len(),
            successful_count,
            failed_count: results.len() - successful_count,
            results: results.iter().map(BulkItem::from).collect(),
        }
    }
}
