//! Persistance SQLite (une base pour le registre et les grilles)
//!
//! Le journal SQLite est en mode WAL et chaque écriture passe par une
//! transaction : un arrêt brutal laisse soit l'état précédent, soit le
//! nouvel état complet, jamais une écriture partielle.

use super::{JournalEntry, LedgerCommit, LedgerStore, RotationCursor, ScheduleStore};
use crate::error::StoreError;
use crate::schedule::{BroadcastDay, ScheduleEntry, TimeWindow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

fn persistence(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Persistence(format!("{}: {}", context, e))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Persistence(format!("Invalid timestamp: {}", ms)))
}

/// Stockage SQLite du registre de rotation et des grilles publiées
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Ouvre (ou crée) la base et son schéma
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| persistence("Failed to create directory", e))?;
        }

        let conn =
            Connection::open(db_path).map_err(|e| persistence("Failed to open database", e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| persistence("Failed to enable WAL", e))?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(|e| persistence("Failed to set synchronous mode", e))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rotation_cursors (
                category TEXT PRIMARY KEY,
                next_index INTEGER NOT NULL,
                last_aired_ms INTEGER,
                last_item TEXT,
                play_count INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS item_airings (
                item_id TEXT PRIMARY KEY,
                last_aired_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS build_journal (
                window_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                slot_start_ms INTEGER NOT NULL,
                slot_end_ms INTEGER NOT NULL,
                entry_json TEXT NOT NULL,
                PRIMARY KEY (window_id, sequence)
            );
            CREATE TABLE IF NOT EXISTS broadcast_days (
                window_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                window_start_ms INTEGER NOT NULL,
                window_end_ms INTEGER NOT NULL,
                built_at_ms INTEGER NOT NULL,
                rule_set_version TEXT NOT NULL,
                catalog_version TEXT NOT NULL,
                entries_json TEXT NOT NULL,
                PRIMARY KEY (window_id, version)
            );
            CREATE INDEX IF NOT EXISTS idx_days_range
                ON broadcast_days(window_start_ms, window_end_ms);",
        )
        .map_err(|e| persistence("Failed to create schema", e))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Persistence("connection lock poisoned".into()))
    }

    fn upsert_cursor(conn: &Connection, cursor: &RotationCursor) -> Result<(), StoreError> {
        conn.execute(
            "INSERT OR REPLACE INTO rotation_cursors
                (category, next_index, last_aired_ms, last_item, play_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                cursor.category,
                cursor.next_index as i64,
                cursor.last_aired.map(|t| t.timestamp_millis()),
                cursor.last_item,
                cursor.play_count as i64,
            ],
        )
        .map_err(|e| persistence("Failed to save cursor", e))?;
        Ok(())
    }

    fn read_day(row: &rusqlite::Row<'_>) -> rusqlite::Result<DayRow> {
        Ok(DayRow {
            version: row.get(0)?,
            window_start_ms: row.get(1)?,
            window_end_ms: row.get(2)?,
            built_at_ms: row.get(3)?,
            rule_set_version: row.get(4)?,
            catalog_version: row.get(5)?,
            entries_json: row.get(6)?,
        })
    }
}

struct DayRow {
    version: u32,
    window_start_ms: i64,
    window_end_ms: i64,
    built_at_ms: i64,
    rule_set_version: String,
    catalog_version: String,
    entries_json: String,
}

impl DayRow {
    fn into_day(self) -> Result<Arc<BroadcastDay>, StoreError> {
        let window = TimeWindow::new(
            from_millis(self.window_start_ms)?,
            from_millis(self.window_end_ms)?,
        )
        .map_err(|e| persistence("Corrupted window", e))?;
        let entries: Vec<ScheduleEntry> = serde_json::from_str(&self.entries_json)?;
        let day = BroadcastDay::restore(
            window,
            self.version,
            from_millis(self.built_at_ms)?,
            self.rule_set_version,
            self.catalog_version,
            entries,
        );
        day.validate()
            .map_err(|e| persistence(&format!("Corrupted broadcast day {}", window.id()), e))?;
        Ok(Arc::new(day))
    }
}

const DAY_COLUMNS: &str = "version, window_start_ms, window_end_ms, built_at_ms,
     rule_set_version, catalog_version, entries_json";

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn load_cursors(&self) -> Result<Vec<RotationCursor>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT category, next_index, last_aired_ms, last_item, play_count
                 FROM rotation_cursors",
            )
            .map_err(|e| persistence("Failed to prepare statement", e))?;

        let rows = stmt
            .query_map([], |row| {
                let next_index: i64 = row.get(1)?;
                let play_count: i64 = row.get(4)?;
                Ok((
                    row.get::<_, String>(0)?,
                    next_index,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    play_count,
                ))
            })
            .map_err(|e| persistence("Failed to query cursors", e))?;

        let mut cursors = Vec::new();
        for row in rows {
            let (category, next_index, last_aired_ms, last_item, play_count) =
                row.map_err(|e| persistence("Failed to read cursor", e))?;
            cursors.push(RotationCursor {
                category,
                next_index: next_index.max(0) as usize,
                last_aired: last_aired_ms.map(from_millis).transpose()?,
                last_item,
                play_count: play_count.max(0) as u64,
            });
        }
        Ok(cursors)
    }

    async fn load_airings(&self) -> Result<HashMap<String, DateTime<Utc>>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT item_id, last_aired_ms FROM item_airings")
            .map_err(|e| persistence("Failed to prepare statement", e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| persistence("Failed to query airings", e))?;

        let mut airings = HashMap::new();
        for row in rows {
            let (item_id, ms) = row.map_err(|e| persistence("Failed to read airing", e))?;
            airings.insert(item_id, from_millis(ms)?);
        }
        Ok(airings)
    }

    async fn save_cursor(&self, cursor: &RotationCursor) -> Result<(), StoreError> {
        let conn = self.conn()?;
        Self::upsert_cursor(&conn, cursor)
    }

    async fn commit(&self, commit: &LedgerCommit) -> Result<(), StoreError> {
        let journal_json = commit
            .journal
            .as_ref()
            .map(|j| serde_json::to_string(&j.entry))
            .transpose()?;

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| persistence("Failed to begin transaction", e))?;

        Self::upsert_cursor(&tx, &commit.cursor)?;
        tx.execute(
            "INSERT OR REPLACE INTO item_airings (item_id, last_aired_ms) VALUES (?1, ?2)",
            params![commit.item_id, commit.aired_at.timestamp_millis()],
        )
        .map_err(|e| persistence("Failed to record airing", e))?;

        if let (Some(journal), Some(json)) = (&commit.journal, journal_json) {
            tx.execute(
                "INSERT OR REPLACE INTO build_journal
                    (window_id, sequence, slot_start_ms, slot_end_ms, entry_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    journal.window_id,
                    journal.sequence,
                    journal.slot_start.timestamp_millis(),
                    journal.slot_end.timestamp_millis(),
                    json,
                ],
            )
            .map_err(|e| persistence("Failed to append journal", e))?;
        }

        tx.commit()
            .map_err(|e| persistence("Failed to commit ledger", e))
    }

    async fn load_journal(&self, window_id: &str) -> Result<Vec<JournalEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT sequence, slot_start_ms, slot_end_ms, entry_json
                 FROM build_journal WHERE window_id = ?1 ORDER BY sequence ASC",
            )
            .map_err(|e| persistence("Failed to prepare statement", e))?;
        let rows = stmt
            .query_map(params![window_id], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| persistence("Failed to query journal", e))?;

        let mut journal = Vec::new();
        for row in rows {
            let (sequence, slot_start_ms, slot_end_ms, json) =
                row.map_err(|e| persistence("Failed to read journal", e))?;
            journal.push(JournalEntry {
                window_id: window_id.to_string(),
                sequence,
                slot_start: from_millis(slot_start_ms)?,
                slot_end: from_millis(slot_end_ms)?,
                entry: serde_json::from_str(&json)?,
            });
        }
        Ok(journal)
    }

    async fn clear_journal(&self, window_id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM build_journal WHERE window_id = ?1",
            params![window_id],
        )
        .map_err(|e| persistence("Failed to clear journal", e))?;
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn publish(&self, day: BroadcastDay) -> Result<Arc<BroadcastDay>, StoreError> {
        let window_id = day.window().id();
        let entries_json = serde_json::to_string(day.entries())?;

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| persistence("Failed to begin transaction", e))?;

        let previous: u32 = tx
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM broadcast_days WHERE window_id = ?1",
                params![window_id],
                |row| row.get(0),
            )
            .map_err(|e| persistence("Failed to read version", e))?;
        let day = day.with_version(previous + 1);

        tx.execute(
            "INSERT INTO broadcast_days
                (window_id, version, window_start_ms, window_end_ms, built_at_ms,
                 rule_set_version, catalog_version, entries_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                window_id,
                day.version(),
                day.window().start().timestamp_millis(),
                day.window().end().timestamp_millis(),
                day.built_at().timestamp_millis(),
                day.rule_set_version(),
                day.catalog_version(),
                entries_json,
            ],
        )
        .map_err(|e| persistence("Failed to insert broadcast day", e))?;

        tx.commit()
            .map_err(|e| persistence("Failed to publish broadcast day", e))?;
        Ok(Arc::new(day))
    }

    async fn latest(&self, window_id: &str) -> Result<Option<Arc<BroadcastDay>>, StoreError> {
        let row = {
            let conn = self.conn()?;
            conn.query_row(
                &format!(
                    "SELECT {} FROM broadcast_days WHERE window_id = ?1
                     ORDER BY version DESC LIMIT 1",
                    DAY_COLUMNS
                ),
                params![window_id],
                Self::read_day,
            )
            .optional()
            .map_err(|e| persistence("Failed to load broadcast day", e))?
        };
        row.map(DayRow::into_day).transpose()
    }

    async fn load_version(
        &self,
        window_id: &str,
        version: u32,
    ) -> Result<Option<Arc<BroadcastDay>>, StoreError> {
        let row = {
            let conn = self.conn()?;
            conn.query_row(
                &format!(
                    "SELECT {} FROM broadcast_days WHERE window_id = ?1 AND version = ?2",
                    DAY_COLUMNS
                ),
                params![window_id, version],
                Self::read_day,
            )
            .optional()
            .map_err(|e| persistence("Failed to load broadcast day", e))?
        };
        row.map(DayRow::into_day).transpose()
    }

    async fn versions(&self, window_id: &str) -> Result<Vec<u32>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT version FROM broadcast_days WHERE window_id = ?1 ORDER BY version")
            .map_err(|e| persistence("Failed to prepare statement", e))?;
        let rows = stmt
            .query_map(params![window_id], |row| row.get(0))
            .map_err(|e| persistence("Failed to query versions", e))?;

        let mut versions = Vec::new();
        for row in rows {
            versions.push(row.map_err(|e| persistence("Failed to read version", e))?);
        }
        Ok(versions)
    }

    async fn covering(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Arc<BroadcastDay>>, StoreError> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM broadcast_days b
                     WHERE window_start_ms < ?2 AND window_end_ms > ?1
                       AND version = (SELECT MAX(version) FROM broadcast_days
                                      WHERE window_id = b.window_id)
                     ORDER BY window_start_ms ASC",
                    DAY_COLUMNS
                ))
                .map_err(|e| persistence("Failed to prepare statement", e))?;
            let rows = stmt
                .query_map(
                    params![from.timestamp_millis(), to.timestamp_millis()],
                    Self::read_day,
                )
                .map_err(|e| persistence("Failed to query broadcast days", e))?;

            let mut collected = Vec::new();
            for row in rows {
                collected.push(row.map_err(|e| persistence("Failed to read broadcast day", e))?);
            }
            collected
        };
        rows.into_iter().map(DayRow::into_day).collect()
    }
}
