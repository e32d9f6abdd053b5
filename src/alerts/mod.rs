//! Operational alert dispatch: JSONL append with size-based rotation, one
//! lock for the whole base directory since alert volume is low relative to
//! the hot order path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::util::atomic_file::{append_jsonl, rotate_if_oversized};

const DEFAULT_MAX_FILE_SIZE: u64 = 512_000;
const ALERTS_FILENAME: &str = "alerts.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Risk,
    Latency,
    Execution,
    System,
}

#[derive(Debug, Clone, Serialize)]
struct AlertRecord {
    timestamp: chrono::DateTime<Utc>,
    severity: Severity,
    category: Category,
    message: String,
    meta: HashMap<String, Value>,
}

pub struct AlertDispatcher {
    path: Mutex<PathBuf>,
    max_file_size: u64,
}

impl AlertDispatcher {
    pub fn new(base_dir: &Path, max_file_size: Option<u64>) -> Self {
        Self {
            path: Mutex::new(base_dir.join(ALERTS_FILENAME)),
            max_file_size: max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE),
        }
    }

    pub fn dispatch(&self, severity: Severity, category: Category, message: &str, meta: HashMap<String, Value>) -> Result<()> {
        let path = self.path.lock();
        rotate_if_oversized(&path, self.max_file_size, &Utc::now().format("%Y%m%dT%H%M%SZ").to_string())?;

        let record = AlertRecord { timestamp: Utc::now(), severity, category, message: message.to_string(), meta };
        append_jsonl(&path, &record)?;

        match severity {
            Severity::Critical => error!(category = ?category, "{message}"),
            Severity::Warning => warn!(category = ?category, "{message}"),
            Severity::Info => info!(category = ?category, "{message}"),
        }
        Ok(())
    }
}
