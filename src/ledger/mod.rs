use crate::engine::LedgerEntry;
use crate::models::{ExitReason, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Persisted form of an executed order
///
/// Zero take-profit / stop-loss mean "unset", as in the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    #[serde(default = "Uuid::nil")]
    pub order_id: Uuid,
    pub side: Side,
    pub qty: Decimal,
    pub price: Decimal,
    pub cost: Decimal,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub take_profit: Decimal,
    #[serde(default)]
    pub stop_loss: Decimal,
    #[serde(default = "manual")]
    pub reason: ExitReason,
}

fn manual() -> ExitReason {
    ExitReason::Manual
}

impl From<&LedgerEntry> for LedgerRecord {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            order_id: entry.order_id,
            side: entry.order.side,
            qty: entry.order.quantity,
            price: entry.order.price,
            cost: entry.cost,
            timestamp: entry.order.execution_time,
            take_profit: entry.thresholds.take_profit,
            stop_loss: entry.thresholds.stop_loss,
            reason: entry.reason,
        }
    }
}

/// Append-only destination for executed orders
///
/// Fire-and-forget: implementations log their own failures.
pub trait LedgerSink: Send + Sync {
    fn append(&self, record: &LedgerRecord);
}

/// Writes one JSON object per line
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        tracing::info!(path = %path.display(), "Ledger sink opened");

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerSink for JsonLinesSink {
    fn append(&self, record: &LedgerRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(order_id = %record.order_id, "Failed to encode ledger record: {}", e);
                return;
            }
        };

        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{}", line) {
            tracing::error!(path = %self.path.display(), "Failed to write ledger record: {}", e);
        }
    }
}

/// Keeps records in memory
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<LedgerRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LedgerRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl LedgerSink for MemorySink {
    fn append(&self, record: &LedgerRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
    }
}

/// Logs each record; used when no ledger file is configured
pub struct TracingSink;

impl LedgerSink for TracingSink {
    fn append(&self, record: &LedgerRecord) {
        tracing::info!(
            order_id = %record.order_id,
            side = %record.side,
            qty = %record.qty,
            price = %record.price,
            cost = %record.cost,
            timestamp = %record.timestamp,
            reason = ?record.reason,
            "Ledger record"
        );
    }
}
