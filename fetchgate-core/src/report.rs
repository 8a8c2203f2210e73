// Text and JSON renderings of bulk runs and stored records

use crate::bulk::BulkSummary;
use crate::data::{BlockedRequest, IntelligenceRecord};
use serde::{Deserialize, Serialize};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

fn status_marker(status_code: u16) -> &'static str {
    match status_code {
        100..=199 => "ℹ",
        200..=299 => "✓",
        300..=399 => "↪",
        400..=499 => "⚠",
        500..=599 => "✗",
        _ => "?",
    }
}

fn section(report: &mut String, title: &str) {
    report.push_str(RULE);
    report.push_str(title);
    report.push('\n');
    report.push_str(RULE);
    report.push('\n');
}

pub fn generate_bulk_report(summary: &BulkSummary, format: ReportFormat) -> String {
    match format {
        ReportFormat::Json => serde_json::to_string_pretty(summary).unwrap_or_default(),
        ReportFormat::Text => {
            let mut report = String::new();
            section(&mut report, "BULK FETCH SUMMARY");

            report.push_str(&format!("Total:       {}\n", summary.total));
            report.push_str(&format!("Successful:  {}\n", summary.successful_count));
            report.push_str(&format!("Failed:      {}\n\n", summary.failed_count));

            for item in &summary.results {
                let cached = if item.cached { " (cached)" } else { "" };
                report.push_str(&format!(
                    "  {} {} {} {:.2}s {}B{}\n",
                    status_marker(item.status_code),
                    item.status_code,
                    item.url,
                    item.elapsed_time.as_secs_f64(),
                    item.byte_size,
                    cached
                ));
                if let Some(ref error) = item.error {
                    report.push_str(&format!("      {}\n", error));
                }
            }

            report
        }
    }
}

pub fn generate_intelligence_report(
    records: &[IntelligenceRecord],
    total: usize,
    format: ReportFormat,
) -> String {
    match format {
        ReportFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "total_records": total,
            "records": records,
        }))
        .unwrap_or_default(),
        ReportFormat::Text => {
            let mut report = String::new();
            section(&mut report, "INTELLIGENCE RECORDS");
            report.push_str(&format!(
                "Showing {} of {} records (newest first)\n\n",
                records.len(),
                total
            ));

            for record in records {
                report.push_str(&format!(
                    "  {} {} {} {}\n",
                    status_marker(record.metadata.status_code),
                    record.metadata.status_code,
                    record.metadata.method,
                    record.url
                ));
                report.push_str(&format!(
                    "      {}  {}B  {}ms  sha256:{}\n",
                    record.timestamp,
                    record.metadata.byte_size,
                    record.metadata.elapsed_ms,
                    &record.content_hash[..record.content_hash.len().min(12)]
                ));
                if !record.tags.is_empty() {
                    report.push_str(&format!("      tags: {}\n", record.tags.join(", ")));
                }
            }

            report
        }
    }
}

pub fn generate_blocked_report(
    blocked: &[BlockedRequest],
    total: usize,
    format: ReportFormat,
) -> String {
    match format {
        ReportFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "total": total,
            "recent_count": blocked.len(),
            "recent": blocked,
        }))
        .unwrap_or_default(),
        ReportFormat::Text => {
            let mut report = String::new();
            section(&mut report, "BLOCKED REQUESTS");
            report.push_str(&format!("Showing {} of {} (newest first)\n\n", blocked.len(), total));

            for entry in blocked {
                report.push_str(&format!(
                    "  [{}] {} {} {}\n",
                    entry.reason, entry.timestamp, entry.method, entry.url
                ));
                if !entry.details.is_empty() {
                    report.push_str(&format!("      {}\n", entry.details));
                }
            }

            report
        }
    }
}
