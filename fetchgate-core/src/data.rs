use rusqlite::types::Type;
use rusqlite::{Connection, Result, Row, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Blocked-request entries kept after each insert
pub const BLOCKED_LOG_CAPACITY: usize = 1000;

pub struct Database {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub method: String,
    pub status_code: u16,
    pub byte_size: usize,
    pub elapsed_ms: u64,
    pub final_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub url: String,
    /// RFC 3339, UTC
    pub timestamp: String,
    pub content_excerpt: String,
    pub metadata: RecordMetadata,
    pub tags: Vec<String>,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub timestamp: String,
    pub url: String,
    pub method: String,
    pub reason: String,
    pub details: String,
    pub headers: BTreeMap<String, String>,
    pub user_agent: Option<String>,
    pub tags: Vec<String>,
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn from_json<T: for<'de> Deserialize<'de>>(row: &Row, idx: usize) -> Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl Database {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            // Let Connection::open report the failure if this did not work
            let _ = fs::create_dir_all(parent);
        }

        let conn = Connection::open(path)?;

        // Optimize for concurrent writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let db = Database {
            conn: Connection::open_in_memory()?,
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
-- One row per completed fetch, append-only
CREATE TABLE IF NOT EXISTS intelligence_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    content_excerpt TEXT NOT NULL,
    method TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    byte_size INTEGER NOT NULL,
    elapsed_ms INTEGER NOT NULL,
    final_url TEXT NOT NULL,
    tags TEXT NOT NULL,            -- JSON array
    content_hash TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_intelligence_url ON intelligence_records(url);

-- Requests refused or failed by the proxy
CREATE TABLE IF NOT EXISTS blocked_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    reason TEXT NOT NULL CHECK(reason IN ('DOMAIN_BLOCKED', 'RATE_LIMIT', 'TIMEOUT', 'ERROR')),
    details TEXT NOT NULL,
    headers TEXT NOT NULL,         -- JSON object
    user_agent TEXT,
    tags TEXT NOT NULL             -- JSON array
);

CREATE INDEX IF NOT EXISTS idx_blocked_reason ON blocked_requests(reason);
            ",
        )?;
        Ok(())
    }

    // Intelligence records
    pub fn insert_record(&self, record: &IntelligenceRecord) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO intelligence_records (
                url, timestamp, content_excerpt, method, status_code, byte_size,
                elapsed_ms, final_url, tags, content_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &record.url,
                &record.timestamp,
                &record.content_excerpt,
                &record.metadata.method,
                record.metadata.status_code,
                record.metadata.byte_size as i64,
                record.metadata.elapsed_ms as i64,
                &record.metadata.final_url,
                to_json(&record.tags)?,
                &record.content_hash,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent records first
    pub fn list_records(&self, limit: usize) -> Result<Vec<IntelligenceRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, url, timestamp, content_excerpt, method, status_code, byte_size,
                    elapsed_ms, final_url, tags, content_hash
             FROM intelligence_records ORDER BY id DESC LIMIT ?1",
        )?;

        let records = stmt
            .query_map(params![limit as i64], |row| {
                Ok(IntelligenceRecord {
                    id: Some(row.get(0)?),
                    url: row.get(1)?,
                    timestamp: row.get(2)?,
                    content_excerpt: row.get(3)?,
                    metadata: RecordMetadata {
                        method: row.get(4)?,
                        status_code: row.get(5)?,
                        byte_size: row.get::<_, i64>(6)? as usize,
                        elapsed_ms: row.get::<_, i64>(7)? as u64,
                        final_url: row.get(8)?,
                    },
                    tags: from_json(row, 9)?,
                    content_hash: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(records)
    }

    pub fn count_records(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM intelligence_records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete all but the `keep` most recent records, returning how many went
    pub fn trim_records(&self, keep: usize) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM intelligence_records WHERE id NOT IN (
                SELECT id FROM intelligence_records ORDER BY id DESC LIMIT ?1
            )",
            params![keep as i64],
        )?;
        Ok(deleted)
    }

    // Blocked request log
    pub fn insert_blocked(&self, blocked: &BlockedRequest) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO blocked_requests (
                timestamp, url, method, reason, details, headers, user_agent, tags
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &blocked.timestamp,
                &blocked.url,
                &blocked.method,
                &blocked.reason,
                &blocked.details,
                to_json(&blocked.headers)?,
                &blocked.user_agent,
                to_json(&blocked.tags)?,
            ],
        )?;
        let id = self.conn.last_insert_rowid();

        self.conn.execute(
            "DELETE FROM blocked_requests WHERE id NOT IN (
                SELECT id FROM blocked_requests ORDER BY id DESC LIMIT ?1
            )",
            params![BLOCKED_LOG_CAPACITY as i64],
        )?;

        Ok(id)
    }

    /// Most recent blocked requests first
    pub fn list_blocked(&self, limit: usize) -> Result<Vec<BlockedRequest>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, url, method, reason, details, headers, user_agent, tags
             FROM blocked_requests ORDER BY id DESC LIMIT ?1",
        )?;

        let blocked = stmt
            .query_map(params![limit as i64], |row| {
                Ok(BlockedRequest {
                    id: Some(row.get(0)?),
                    timestamp: row.get(1)?,
                    url: row.get(2)?,
                    method: row.get(3)?,
                    reason: row.get(4)?,
                    details: row.get(5)?,
                    headers: from_json(row, 6)?,
                    user_agent: row.get(7)?,
                    tags: from_json(row, 8)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(blocked)
    }

    pub fn count_blocked(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM blocked_requests", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn ping(&self) -> Result<()> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))
    }
}
