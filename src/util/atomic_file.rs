//! Durable persistence helpers shared by memory, metrics, session state,
//! alerts and the audit log.
//!
//! Every persisted JSON artifact is written to a temp file in the same
//! directory, then renamed into place, so a reader never observes a torn
//! file and a crash mid-write leaves the previous snapshot intact.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    let json = serde_json::to_vec_pretty(value).context("serializing json")?;
    tmp.write_all(&json).context("writing temp file")?;
    tmp.flush().context("flushing temp file")?;
    tmp.persist(path)
        .with_context(|| format!("renaming temp file into {}", path.display()))?;
    Ok(())
}

/// Load JSON from `path`, or return `T::default()` if the file does not exist.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing json from {}", path.display()))?;
    Ok(value)
}

/// Append a single JSON line to `path`, creating parent directories and the
/// file as needed. Does not rotate; callers that need rotation call
/// `rotate_if_oversized` first.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir.display()))?;
    }
    let mut line = serde_json::to_vec(value).context("serializing jsonl record")?;
    line.push(b'\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {} for append", path.display()))?;
    file.write_all(&line)
        .with_context(|| format!("appending to {}", path.display()))
}

/// Rename `path` aside with a timestamp suffix if it exceeds `max_bytes`.
/// No-op if the file does not exist or is within budget.
pub fn rotate_if_oversized(path: &Path, max_bytes: u64, suffix: &str) -> Result<bool> {
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return Ok(false),
    };
    if meta.len() < max_bytes {
        return Ok(false);
    }
    let rotated = path.with_file_name(format!(
        "{}_{}.{}",
        path.file_stem().and_then(|s| s.to_str()).unwrap_or("log"),
        suffix,
        path.extension().and_then(|s| s.to_str()).unwrap_or("jsonl"),
    ));
    fs::rename(path, &rotated)
        .with_context(|| format!("rotating {} to {}", path.display(), rotated.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
    struct Sample {
        n: u32,
    }

    #[test]
    fn atomic_write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/sample.json");
        atomic_write_json(&path, &Sample { n: 7 }).unwrap();
        let loaded: Sample = read_json_or_default(&path).unwrap();
        assert_eq!(loaded, Sample { n: 7 });
    }

    #[test]
    fn missing_file_reads_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let loaded: Sample = read_json_or_default(&path).unwrap();
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn append_jsonl_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        append_jsonl(&path, &Sample { n: 1 }).unwrap();
        append_jsonl(&path, &Sample { n: 2 }).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn rotate_if_oversized_renames_when_over_budget() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        for _ in 0..50 {
            append_jsonl(&path, &Sample { n: 1 }).unwrap();
        }
        let rotated = rotate_if_oversized(&path, 10, "20260101T000000Z").unwrap();
        assert!(rotated);
        assert!(!path.exists());
    }
}
