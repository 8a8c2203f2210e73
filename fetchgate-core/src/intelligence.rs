// Append-only log of completed fetches, plus the blocked-request log

use crate::config::IntelligenceSettings;
use crate::data::{BlockedRequest, Database, IntelligenceRecord, RecordMetadata};
use crate::error::{CoreError, Result};
use chrono::{SecondsFormat, Utc};
use fetchgate_fetcher::{FetchRequest, FetchResult, HttpMethod};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct IntelligenceRecorder {
    db: Arc<Mutex<Database>>,
    enabled: bool,
    excerpt_length: usize,
}

/// First `max_chars` characters of a body, never splitting a character
pub fn excerpt(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}

pub fn content_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Build the record for a completed network response
pub fn build_record(
    result: &FetchResult,
    method: HttpMethod,
    tags: &[String],
    excerpt_length: usize,
) -> IntelligenceRecord {
    IntelligenceRecord {
        id: None,
        url: result.url.clone(),
        timestamp: now_rfc3339(),
        content_excerpt: excerpt(&result.body, excerpt_length),
        metadata: RecordMetadata {
            method: method.as_str().to_string(),
            status_code: result.status_code,
            byte_size: result.byte_size,
            elapsed_ms: result.elapsed.as_millis() as u64,
            final_url: result.final_url.clone(),
        },
        tags: tags.to_vec(),
        content_hash: content_hash(&result.body),
    }
}

impl IntelligenceRecorder {
    pub fn open(settings: &IntelligenceSettings) -> Result<Self> {
        let path = shellexpand_path(&settings.database_path);
        info!("Opening intelligence database at {}", path);
        let db = Database::new(Path::new(&path))?;
        Ok(Self::with_database(db, settings))
    }

    pub fn in_memory(settings: &IntelligenceSettings) -> Result<Self> {
        Ok(Self::with_database(Database::in_memory()?, settings))
    }

    pub fn with_database(db: Database, settings: &IntelligenceSettings) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            enabled: settings.enabled,
            excerpt_length: settings.excerpt_length,
        }
    }

    /// Run a query on the blocking pool with the connection locked
    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> rusqlite::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| CoreError::Poisoned(e.to_string()))?;
            f(&guard).map_err(CoreError::from)
        })
        .await?
    }

    /// Append a record for a completed fetch. Failures are logged, never returned.
    pub async fn record(&self, result: &FetchResult, method: HttpMethod, tags: &[String]) {
        if !self.enabled {
            return;
        }

        let record = build_record(result, method, tags, self.excerpt_length);
        let url = record.url.clone();
        match self.with_db(move |db| db.insert_record(&record)).await {
            Ok(id) => debug!("Recorded intelligence #{} for {}", id, url),
            Err(e) => error!("Failed to record intelligence for {}: {}", url, e),
        }
    }

    /// Most recent records first
    pub async fn list(&self, limit: usize) -> Result<Vec<IntelligenceRecord>> {
        self.with_db(move |db| db.list_records(limit)).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.with_db(|db| db.count_records()).await
    }

    /// Keep the `keep` most recent records and return how many were deleted
    pub async fn trim(&self, keep: usize) -> Result<usize> {
        let deleted = self.with_db(move |db| db.trim_records(keep)).await?;
        if deleted > 0 {
            info!("Trimmed {} intelligence records (kept {})", deleted, keep);
        }
        Ok(deleted)
    }

    /// Append to the blocked-request log. Failures are logged, never returned.
    pub async fn log_blocked(&self, request: &FetchRequest, reason: &str, details: &str) {
        let blocked = BlockedRequest {
            id: None,
            timestamp: now_rfc3339(),
            url: request.url.clone(),
            method: request.method.as_str().to_string(),
            reason: reason.to_string(),
            details: details.to_string(),
            headers: request.headers.clone(),
            user_agent: request.user_agent.clone(),
            tags: request.tags.clone(),
        };

        if let Err(e) = self.with_db(move |db| db.insert_blocked(&blocked)).await {
            error!("Failed to log blocked request: {}", e);
        }
    }

    /// Most recent blocked requests first
    pub async fn blocked(&self, limit: usize) -> Result<Vec<BlockedRequest>> {
        self.with_db(move |db| db.list_blocked(limit)).await
    }

    pub async fn blocked_count(&self) -> Result<usize> {
        self.with_db(|db| db.count_blocked()).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.with_db(|db| db.ping()).await
    }
}

fn shellexpand_path(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}
