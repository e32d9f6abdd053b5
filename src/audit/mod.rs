//! Execution audit trail: one JSONL line per order lifecycle event. Write
//! failures are logged but never propagate — the order path must not block
//! on disk trouble.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::util::atomic_file::append_jsonl;

const AUDIT_FILENAME: &str = "execution_audit.jsonl";

#[derive(Debug, Clone, Serialize)]
struct AuditRecord {
    ts: chrono::DateTime<Utc>,
    event: String,
    order_id: Option<String>,
    symbol: Option<String>,
    status: Option<String>,
    latency_ms: Option<f64>,
    extra: HashMap<String, Value>,
}

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(base_dir: &Path) -> Self {
        Self { path: base_dir.join(AUDIT_FILENAME) }
    }

    /// Never returns an error: a write failure is logged and swallowed so
    /// the execution path is never blocked by audit trouble.
    pub fn log_event(
        &self,
        event_type: &str,
        order_id: Option<&str>,
        symbol: Option<&str>,
        status: Option<&str>,
        latency_ms: Option<f64>,
        extra: HashMap<String, Value>,
    ) {
        let record = AuditRecord {
            ts: Utc::now(),
            event: event_type.to_uppercase(),
            order_id: order_id.map(str::to_string),
            symbol: symbol.map(str::to_string),
            status: status.map(str::to_string),
            latency_ms: latency_ms.map(|v| (v * 1000.0).round() / 1000.0),
            extra,
        };
        if let Err(e) = append_jsonl(&self.path, &record) {
            warn!(error = %e, "failed to append audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn log_event_appends_uppercased_event_name() {
        let dir = tempdir().unwrap();
        let audit = AuditLog::new(dir.path());
        audit.log_event("order_ok", Some("t-1"), Some("EURUSD"), Some("filled"), Some(12.345678), HashMap::new());
        let content = std::fs::read_to_string(dir.path().join(AUDIT_FILENAME)).unwrap();
        assert!(content.contains("\"event\":\"ORDER_OK\""));
    }

    #[test]
    fn log_event_rounds_latency_to_three_decimals() {
        let dir = tempdir().unwrap();
        let audit = AuditLog::new(dir.path());
        audit.log_event("order_fail", None, None, None, Some(1.0/3.0), HashMap::new());
        let content = std::fs::read_to_string(dir.path().join(AUDIT_FILENAME)).unwrap();
        assert!(content.contains("0.333"));
    }

    #[test]
    fn multiple_events_append_multiple_lines() {
        let dir = tempdir().unwrap();
        let audit = AuditLog::new(dir.path());
        audit.log_event("order_ok", None, None, None, None, HashMap::new());
        audit.log_event("shutdown", None, None, None, None, HashMap::new());
        let content = std::fs::read_to_string(dir.path().join(AUDIT_FILENAME)).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
