//! Persistence for cache snapshots.
//!
//! Records are written as JSON lines, one entry per line:
//!
//! ```text
//! {"key":"critical","value":{...},"storedAt":1718000000000,"ttlMs":15000,"namespace":"critical"}
//! ```

use crate::cache::CacheEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

/// One cache entry in its persisted form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord<V> {
    pub key: String,
    pub value: V,
    /// Milliseconds since the Unix epoch.
    pub stored_at: i64,
    pub ttl_ms: u64,
    pub namespace: String,
}

impl<V: Clone> PersistedRecord<V> {
    pub fn from_entry(entry: &CacheEntry<V>) -> Self {
        Self {
            key: entry.key.clone(),
            value: entry.value.clone(),
            stored_at: entry.stored_at.timestamp_millis(),
            ttl_ms: u64::try_from(entry.ttl.as_millis()).unwrap_or(u64::MAX),
            namespace: entry.namespace.clone(),
        }
    }
}

impl<V> PersistedRecord<V> {
    /// Out-of-range timestamps clamp to the epoch, which makes the record
    /// read as expired.
    pub fn into_entry(self) -> CacheEntry<V> {
        CacheEntry {
            key: self.key,
            value: self.value,
            stored_at: DateTime::<Utc>::from_timestamp_millis(self.stored_at)
                .unwrap_or(DateTime::UNIX_EPOCH),
            ttl: Duration::from_millis(self.ttl_ms),
            namespace: self.namespace,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error on line {line}: {source}")]
    Serde {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Write `records` to `path`, replacing any existing file.
pub fn save_records<V: Serialize>(
    path: &Path,
    records: &[PersistedRecord<V>],
) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(std::fs::File::create(path)?);
    for (index, record) in records.iter().enumerate() {
        serde_json::to_writer(&mut writer, record).map_err(|source| PersistenceError::Serde {
            line: index + 1,
            source,
        })?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read records from `path`. A missing file reads as empty; blank lines are
/// ignored.
pub fn load_records<V: for<'de> Deserialize<'de>>(
    path: &Path,
) -> Result<Vec<PersistedRecord<V>>, PersistenceError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| PersistenceError::Serde {
            line: index + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}
