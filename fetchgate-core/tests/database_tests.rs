// Tests for the intelligence and blocked-request store

use fetchgate_core::data::{
    BLOCKED_LOG_CAPACITY, BlockedRequest, Database, IntelligenceRecord, RecordMetadata,
};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).unwrap();
    (temp_dir, db)
}

fn record(url: &str) -> IntelligenceRecord {
    IntelligenceRecord {
        id: None,
        url: url.to_string(),
        timestamp: "2026-01-15T10:00:00.000Z".to_string(),
        content_excerpt: "<html>".to_string(),
        metadata: RecordMetadata {
            method: "GET".to_string(),
            status_code: 200,
            byte_size: 6,
            elapsed_ms: 12,
            final_url: url.to_string(),
        },
        tags: vec!["recon".to_string()],
        content_hash: "ab".repeat(32),
    }
}

fn blocked(url: &str, reason: &str) -> BlockedRequest {
    BlockedRequest {
        id: None,
        timestamp: "2026-01-15T10:00:00.000Z".to_string(),
        url: url.to_string(),
        method: "GET".to_string(),
        reason: reason.to_string(),
        details: String::new(),
        headers: BTreeMap::new(),
        user_agent: None,
        tags: Vec::new(),
    }
}

// ============================================================================
// Database Creation Tests
// ============================================================================

#[test]
fn test_database_creation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let db = Database::new(&db_path);
    assert!(db.is_ok());
    assert!(db_path.exists());
}

#[test]
fn test_database_creates_parent_directories() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("intelligence").join("nested").join("fetchgate.db");

    assert!(!db_path.exists());
    let _db = Database::new(&db_path).unwrap();
    assert!(db_path.exists());
}

#[test]
fn test_reopen_keeps_data() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    {
        let db = Database::new(&db_path).unwrap();
        db.insert_record(&record("http://example.com/")).unwrap();
    }

    let db = Database::new(&db_path).unwrap();
    assert_eq!(db.count_records().unwrap(), 1);
}

// ============================================================================
// Intelligence Record Tests
// ============================================================================

#[test]
fn test_insert_and_read_back_record() {
    let (_temp_dir, db) = create_test_db();

    let id = db.insert_record(&record("http://example.com/")).unwrap();
    let records = db.list_records(10).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, Some(id));
    assert_eq!(records[0].url, "http://example.com/");
    assert_eq!(records[0].metadata.status_code, 200);
    assert_eq!(records[0].tags, vec!["recon".to_string()]);
}

#[test]
fn test_list_records_newest_first_with_limit() {
    let (_temp_dir, db) = create_test_db();

    for i in 0..5 {
        db.insert_record(&record(&format!("http://example.com/{}", i))).unwrap();
    }

    let records = db.list_records(2).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].url, "http://example.com/4");
    assert_eq!(records[1].url, "http://example.com/3");
}

#[test]
fn test_list_records_empty() {
    let (_temp_dir, db) = create_test_db();
    assert!(db.list_records(50).unwrap().is_empty());
    assert_eq!(db.count_records().unwrap(), 0);
}

#[test]
fn test_trim_records() {
    let (_temp_dir, db) = create_test_db();

    for i in 0..10 {
        db.insert_record(&record(&format!("http://example.com/{}", i))).unwrap();
    }

    assert_eq!(db.trim_records(3).unwrap(), 7);
    assert_eq!(db.count_records().unwrap(), 3);

    let urls: Vec<_> = db.list_records(10).unwrap().into_iter().map(|r| r.url).collect();
    assert_eq!(
        urls,
        vec![
            "http://example.com/9",
            "http://example.com/8",
            "http://example.com/7"
        ]
    );
}

#[test]
fn test_trim_to_zero_empties_table() {
    let (_temp_dir, db) = create_test_db();
    db.insert_record(&record("http://example.com/")).unwrap();

    assert_eq!(db.trim_records(0).unwrap(), 1);
    assert_eq!(db.count_records().unwrap(), 0);
}

// ============================================================================
// Blocked Request Tests
// ============================================================================

#[test]
fn test_insert_and_list_blocked() {
    let (_temp_dir, db) = create_test_db();

    let mut entry = blocked("http://evil.com/", "DOMAIN_BLOCKED");
    entry.headers.insert("Accept".to_string(), "*/*".to_string());
    entry.user_agent = Some("agent".to_string());
    db.insert_blocked(&entry).unwrap();
    db.insert_blocked(&blocked("http://slow.test/", "TIMEOUT")).unwrap();

    let listed = db.list_blocked(10).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].reason, "TIMEOUT");
    assert_eq!(listed[1].reason, "DOMAIN_BLOCKED");
    assert_eq!(listed[1].headers.get("Accept").map(String::as_str), Some("*/*"));
    assert_eq!(listed[1].user_agent.as_deref(), Some("agent"));
}

#[test]
fn test_unknown_blocked_reason_rejected() {
    let (_temp_dir, db) = create_test_db();
    assert!(db.insert_blocked(&blocked("http://x.test/", "SOMETHING_ELSE")).is_err());
}

#[test]
fn test_blocked_log_is_capped() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();

    for i in 0..(BLOCKED_LOG_CAPACITY + 5) {
        db.insert_blocked(&blocked(&format!("http://x.test/{}", i), "RATE_LIMIT"))
            .unwrap();
    }

    assert_eq!(db.count_blocked().unwrap(), BLOCKED_LOG_CAPACITY);
    let newest = db.list_blocked(1).unwrap();
    assert_eq!(
        newest[0].url,
        format!("http://x.test/{}", BLOCKED_LOG_CAPACITY + 4)
    );
}
