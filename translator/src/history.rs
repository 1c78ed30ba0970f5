//! Append-only history of completed translations.
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(thiserror::Error, Debug)]
pub enum HistoryError {
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),
    #[error("table service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{0}")]
    Other(String),
}

/// One translated pair, serialized in the table entity layout.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TranslationRecord {
    pub partition_key: String,
    pub row_key: String,
    pub original_text: String,
    pub translated_text: String,
    #[serde(serialize_with = "serialize_edm_datetime")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Timestamp@odata.type")]
    timestamp_type: &'static str,
}

impl TranslationRecord {
    pub fn new(
        partition_key: impl Into<String>,
        row_key: String,
        original_text: impl Into<String>,
        translated_text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        TranslationRecord {
            partition_key: partition_key.into(),
            row_key,
            original_text: original_text.into(),
            translated_text: translated_text.into(),
            timestamp,
            timestamp_type: "Edm.DateTime",
        }
    }
}

// Edm.DateTime stops at 100ns, so nanosecond timestamps are rejected.
fn serialize_edm_datetime<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Issues row keys from the UTC clock in microseconds.
///
/// Keys handed out by one generator are strictly increasing, so two records
/// created by the same process never share a key even when the clock does
/// not advance between them.
#[derive(Debug, Default)]
pub struct RowKeyGenerator {
    last: AtomicU64,
}

impl RowKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_key(&self, now: DateTime<Utc>) -> String {
        let micros = u64::try_from(now.timestamp_micros()).unwrap_or(0);

        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = micros.max(prev + 1);
            match self.last.compare_exchange_weak(
                prev,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate.to_string(),
                Err(current) => prev = current,
            }
        }
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Creates the backing table if it does not exist yet.
    async fn ensure_table(&self) -> Result<(), HistoryError>;

    async fn insert(&self, record: &TranslationRecord) -> Result<(), HistoryError>;
}

/// Keeps records in process memory.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<TranslationRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TranslationRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn ensure_table(&self) -> Result<(), HistoryError> {
        Ok(())
    }

    async fn insert(&self, record: &TranslationRecord) -> Result<(), HistoryError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
