//! Per-participant interaction counters.
//!
//! One record per participant id in the `messages` collection, created on the
//! first read miss and only ever incremented.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StoreError;

const COLLECTION: &str = "messages";

/// Attempts per increment before the outbox gives up on it.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterField {
    Submit,
    Send,
    Select,
    ToggleWeek,
    ToggleDay,
    Inline,
    AdditionalResources,
}

impl CounterField {
    pub const ALL: [CounterField; 7] = [
        CounterField::Submit,
        CounterField::Send,
        CounterField::Select,
        CounterField::ToggleWeek,
        CounterField::ToggleDay,
        CounterField::Inline,
        CounterField::AdditionalResources,
    ];

    /// Field name in the stored document.
    pub fn column(self) -> &'static str {
        match self {
            CounterField::Submit => "submit_count",
            CounterField::Send => "send_count",
            CounterField::Select => "select_count",
            CounterField::ToggleWeek => "toggleWeekCount",
            CounterField::ToggleDay => "toggleDayCount",
            CounterField::Inline => "inline_count",
            CounterField::AdditionalResources => "additional_resources_count",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantCounters {
    pub submit_count: u64,
    pub send_count: u64,
    pub select_count: u64,
    #[serde(rename = "toggleWeekCount")]
    pub toggle_week_count: u64,
    #[serde(rename = "toggleDayCount")]
    pub toggle_day_count: u64,
    pub inline_count: u64,
    pub additional_resources_count: u64,
}

impl ParticipantCounters {
    fn slot(&mut self, field: CounterField) -> &mut u64 {
        match field {
            CounterField::Submit => &mut self.submit_count,
            CounterField::Send => &mut self.send_count,
            CounterField::Select => &mut self.select_count,
            CounterField::ToggleWeek => &mut self.toggle_week_count,
            CounterField::ToggleDay => &mut self.toggle_day_count,
            CounterField::Inline => &mut self.inline_count,
            CounterField::AdditionalResources => &mut self.additional_resources_count,
        }
    }

    pub fn get(&self, field: CounterField) -> u64 {
        match field {
            CounterField::Submit => self.submit_count,
            CounterField::Send => self.send_count,
            CounterField::Select => self.select_count,
            CounterField::ToggleWeek => self.toggle_week_count,
            CounterField::ToggleDay => self.toggle_day_count,
            CounterField::Inline => self.inline_count,
            CounterField::AdditionalResources => self.additional_resources_count,
        }
    }

    pub fn bump(&mut self, field: CounterField) {
        *self.slot(field) += 1;
    }
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Returns the participant's record, creating a zeroed one on a miss.
    async fn read_or_create(&self, participant: &str) -> Result<ParticipantCounters, StoreError>;
    async fn increment(&self, participant: &str, field: CounterField) -> Result<(), StoreError>;
}

pub struct SqliteCounterStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCounterStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {COLLECTION} (
            participant_id TEXT PRIMARY KEY,
            submit_count INTEGER NOT NULL DEFAULT 0,
            send_count INTEGER NOT NULL DEFAULT 0,
            select_count INTEGER NOT NULL DEFAULT 0,
            toggleWeekCount INTEGER NOT NULL DEFAULT 0,
            toggleDayCount INTEGER NOT NULL DEFAULT 0,
            inline_count INTEGER NOT NULL DEFAULT 0,
            additional_resources_count INTEGER NOT NULL DEFAULT 0
        );
        "#
    ))?;
    Ok(())
}

fn row_to_counters(row: &rusqlite::Row<'_>) -> rusqlite::Result<ParticipantCounters> {
    let n = |i: usize| -> rusqlite::Result<u64> { Ok(row.get::<_, i64>(i)?.max(0) as u64) };
    Ok(ParticipantCounters {
        submit_count: n(0)?,
        send_count: n(1)?,
        select_count: n(2)?,
        toggle_week_count: n(3)?,
        toggle_day_count: n(4)?,
        inline_count: n(5)?,
        additional_resources_count: n(6)?,
    })
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn read_or_create(&self, participant: &str) -> Result<ParticipantCounters, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            &format!("INSERT OR IGNORE INTO {COLLECTION} (participant_id) VALUES (?1)"),
            params![participant],
        )?;
        let columns = CounterField::ALL
            .iter()
            .map(|f| f.column())
            .collect::<Vec<_>>()
            .join(", ");
        let found = conn
            .query_row(
                &format!("SELECT {columns} FROM {COLLECTION} WHERE participant_id = ?1"),
                params![participant],
                row_to_counters,
            )
            .optional()?;
        Ok(found.unwrap_or_default())
    }

    async fn increment(&self, participant: &str, field: CounterField) -> Result<(), StoreError> {
        let column = field.column();
        let conn = self.conn.lock().await;
        // Upsert so an increment before the first read still lands.
        conn.execute(
            &format!(
                "INSERT INTO {COLLECTION} (participant_id, {column}) VALUES (?1, 1)
                 ON CONFLICT(participant_id) DO UPDATE SET {column} = {column} + 1"
            ),
            params![participant],
        )?;
        Ok(())
    }
}

/// Keeps counters in process memory. Used when the database cannot be opened.
#[derive(Default)]
pub struct MemoryCounterStore {
    docs: Mutex<HashMap<String, ParticipantCounters>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn read_or_create(&self, participant: &str) -> Result<ParticipantCounters, StoreError> {
        let mut docs = self.docs.lock().await;
        Ok(docs.entry(participant.to_string()).or_default().clone())
    }

    async fn increment(&self, participant: &str, field: CounterField) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().await;
        docs.entry(participant.to_string()).or_default().bump(field);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingIncrement {
    field: CounterField,
    attempts: u32,
}

/// Outbox in front of a [`CounterStore`].
///
/// Increments are queued and flushed in order. A failed increment is kept for
/// the next flush until it has been tried [`MAX_ATTEMPTS`] times, after which
/// it is dropped and the local mirror is allowed to drift from the store.
#[derive(Clone)]
pub struct CounterTracker {
    store: Arc<dyn CounterStore>,
    participant: String,
    outbox: Arc<Mutex<VecDeque<PendingIncrement>>>,
}

impl CounterTracker {
    pub fn new(store: Arc<dyn CounterStore>, participant: impl Into<String>) -> Self {
        Self {
            store,
            participant: participant.into(),
            outbox: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    /// Reads (or creates) the participant record. A store failure yields zeroed
    /// counters so the UI can proceed.
    pub async fn load(&self) -> ParticipantCounters {
        match self.store.read_or_create(&self.participant).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(participant = %self.participant, error = %e, "counter read failed");
                ParticipantCounters::default()
            }
        }
    }

    pub async fn record(&self, field: CounterField) {
        self.outbox.lock().await.push_back(PendingIncrement { field, attempts: 0 });
        self.flush().await;
    }

    /// Sends everything queued. Returns how many increments are still pending.
    pub async fn flush(&self) -> usize {
        let mut retry = Vec::new();
        loop {
            let next = self.outbox.lock().await.pop_front();
            let Some(mut item) = next else {
                break;
            };
            match self.store.increment(&self.participant, item.field).await {
                Ok(()) => {}
                Err(e) => {
                    item.attempts += 1;
                    if item.attempts < MAX_ATTEMPTS {
                        tracing::debug!(field = item.field.column(), attempts = item.attempts, error = %e, "increment deferred");
                        retry.push(item);
                    } else {
                        tracing::warn!(field = item.field.column(), error = %e, "dropping increment after retries");
                    }
                }
            }
        }

        let mut outbox = self.outbox.lock().await;
        outbox.extend(retry);
        outbox.len()
    }

    #[cfg(test)]
    pub async fn pending(&self) -> usize {
        self.outbox.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn sqlite_read_creates_zeroed_record() {
        let store = SqliteCounterStore::open_in_memory().unwrap();
        let c = store.read_or_create("p-1").await.unwrap();
        assert_eq!(c, ParticipantCounters::default());

        store.increment("p-1", CounterField::ToggleWeek).await.unwrap();
        store.increment("p-1", CounterField::ToggleWeek).await.unwrap();
        store.increment("p-1", CounterField::Submit).await.unwrap();

        let c = store.read_or_create("p-1").await.unwrap();
        assert_eq!(c.toggle_week_count, 2);
        assert_eq!(c.submit_count, 1);
        assert_eq!(c.send_count, 0);
    }

    #[tokio::test]
    async fn sqlite_increment_before_read_creates_record() {
        let store = SqliteCounterStore::open_in_memory().unwrap();
        store.increment("fresh", CounterField::Inline).await.unwrap();
        assert_eq!(store.read_or_create("fresh").await.unwrap().inline_count, 1);
    }

    #[tokio::test]
    async fn sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("counters.db");
        {
            let store = SqliteCounterStore::open(&path).unwrap();
            store.increment("p", CounterField::Select).await.unwrap();
        }
        let store = SqliteCounterStore::open(&path).unwrap();
        assert_eq!(store.read_or_create("p").await.unwrap().select_count, 1);
    }

    #[test]
    fn counters_serialize_with_document_field_names() {
        let mut c = ParticipantCounters::default();
        c.bump(CounterField::ToggleDay);
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["toggleDayCount"], 1);
        for field in CounterField::ALL {
            assert!(v.get(field.column()).is_some(), "{}", field.column());
        }
    }

    /// Fails the first `failures` increments.
    struct FlakyStore {
        failures: AtomicUsize,
        inner: MemoryCounterStore,
    }

    #[async_trait]
    impl CounterStore for FlakyStore {
        async fn read_or_create(&self, p: &str) -> Result<ParticipantCounters, StoreError> {
            self.inner.read_or_create(p).await
        }

        async fn increment(&self, p: &str, field: CounterField) -> Result<(), StoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("offline".into()));
            }
            self.inner.increment(p, field).await
        }
    }

    #[tokio::test]
    async fn tracker_retries_failed_increment_on_next_flush() {
        let store = Arc::new(FlakyStore {
            failures: AtomicUsize::new(1),
            inner: MemoryCounterStore::new(),
        });
        let tracker = CounterTracker::new(store.clone(), "p");

        tracker.record(CounterField::Send).await;
        assert_eq!(tracker.pending().await, 1);

        assert_eq!(tracker.flush().await, 0);
        assert_eq!(store.inner.read_or_create("p").await.unwrap().send_count, 1);
    }

    #[tokio::test]
    async fn tracker_drops_increment_after_max_attempts() {
        let store = Arc::new(FlakyStore {
            failures: AtomicUsize::new(10),
            inner: MemoryCounterStore::new(),
        });
        let tracker = CounterTracker::new(store.clone(), "p");

        tracker.record(CounterField::Select).await;
        for _ in 1..MAX_ATTEMPTS {
            tracker.flush().await;
        }
        assert_eq!(tracker.pending().await, 0);
        assert_eq!(store.inner.read_or_create("p").await.unwrap().select_count, 0);
    }
}
