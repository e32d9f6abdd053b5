//! Durable record of confirmed orders and recent failures for this session,
//! buffered events flushed to JSONL on a time-or-size trigger.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Action;
use crate::util::atomic_file::{append_jsonl, atomic_write_json, read_json_or_default};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub ticket: u64,
    pub symbol: String,
    pub action: Action,
    pub volume: f64,
    pub placed_at: chrono::DateTime<Utc>,
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedOrder {
    pub symbol: String,
    pub action: Action,
    pub volume: f64,
    pub reason: String,
    pub at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SessionSnapshot {
    generated: Option<chrono::DateTime<Utc>>,
    orders: HashMap<String, OrderRecord>,
    failed_recent: Vec<FailedOrder>,
}

struct Events {
    buffer: Vec<Value>,
    last_flush: Instant,
}

pub struct SessionStateManager {
    snapshot_path: PathBuf,
    events_path: PathBuf,
    max_events_in_memory: usize,
    flush_interval_sec: f64,
    failed_display_limit: usize,
    state: Mutex<SessionSnapshot>,
    events: Mutex<Events>,
}

impl SessionStateManager {
    pub fn load(base_dir: &Path, max_events_in_memory: usize, flush_interval_sec: f64) -> Result<Self> {
        let snapshot_path = base_dir.join("session_snapshot.json");
        let events_path = base_dir.join("session_events.jsonl");
        let snapshot = read_json_or_default(&snapshot_path)?;
        Ok(Self {
            snapshot_path,
            events_path,
            max_events_in_memory,
            flush_interval_sec,
            failed_display_limit: 50,
            state: Mutex::new(snapshot),
            events: Mutex::new(Events { buffer: Vec::new(), last_flush: Instant::now() }),
        })
    }

    pub fn record_success(&self, ticket: u64, symbol: &str, action: Action, volume: f64, extra: HashMap<String, Value>) -> Result<()> {
        let record = OrderRecord { ticket, symbol: symbol.to_string(), action, volume, placed_at: Utc::now(), extra };
        {
            let mut state = self.state.lock();
            state.orders.insert(ticket.to_string(), record);
        }
        self.push_event(serde_json::json!({
            "event": "ORDER_OK",
            "ticket": ticket,
            "symbol": symbol,
            "ts": Utc::now(),
        }))
    }

    pub fn record_failure(&self, symbol: &str, action: Action, volume: f64, reason: &str) -> Result<()> {
        let failure = FailedOrder { symbol: symbol.to_string(), action, volume, reason: reason.to_string(), at: Utc::now() };
        {
            let mut state = self.state.lock();
            state.failed_recent.push(failure);
            if state.failed_recent.len() > self.failed_display_limit {
                state.failed_recent.remove(0);
            }
        }
        self.push_event(serde_json::json!({
            "event": "ORDER_FAIL",
            "symbol": symbol,
            "reason": reason,
            "ts": Utc::now(),
        }))
    }

    fn push_event(&self, event: Value) -> Result<()> {
        let mut events = self.events.lock();
        events.buffer.push(event);
        self.maybe_flush_locked(&mut events)
    }

    fn maybe_flush_locked(&self, events: &mut Events) -> Result<()> {
        let elapsed = events.last_flush.elapsed().as_secs_f64();
        if elapsed < self.flush_interval_sec && events.buffer.len() < self.max_events_in_memory {
            return Ok(());
        }
        for event in events.buffer.drain(..) {
            append_jsonl(&self.events_path, &event)?;
        }
        events.last_flush = Instant::now();
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let mut events = self.events.lock();
        for event in events.buffer.drain(..) {
            append_jsonl(&self.events_path, &event)?;
        }
        events.last_flush = Instant::now();
        Ok(())
    }

    pub fn persist_snapshot(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.generated = Some(Utc::now());
        atomic_write_json(&self.snapshot_path, &*state)
    }
}
