//! Stockage en mémoire (tests, chaînes éphémères)

use super::{JournalEntry, LedgerCommit, LedgerStore, RotationCursor, ScheduleStore};
use crate::error::StoreError;
use crate::schedule::BroadcastDay;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    cursors: HashMap<String, RotationCursor>,
    airings: HashMap<String, DateTime<Utc>>,
    journals: HashMap<String, BTreeMap<u32, JournalEntry>>,
    days: HashMap<String, Vec<Arc<BroadcastDay>>>,
}

/// Implémentation en mémoire des deux interfaces de stockage
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Persistence("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load_cursors(&self) -> Result<Vec<RotationCursor>, StoreError> {
        Ok(self.state()?.cursors.values().cloned().collect())
    }

    async fn load_airings(&self) -> Result<HashMap<String, DateTime<Utc>>, StoreError> {
        Ok(self.state()?.airings.clone())
    }

    async fn save_cursor(&self, cursor: &RotationCursor) -> Result<(), StoreError> {
        self.state()?
            .cursors
            .insert(cursor.category.clone(), cursor.clone());
        Ok(())
    }

    async fn commit(&self, commit: &LedgerCommit) -> Result<(), StoreError> {
        let mut state = self.state()?;
        state
            .cursors
            .insert(commit.cursor.category.clone(), commit.cursor.clone());
        state
            .airings
            .insert(commit.item_id.clone(), commit.aired_at);
        if let Some(journal) = &commit.journal {
            state
                .journals
                .entry(journal.window_id.clone())
                .or_default()
                .insert(journal.sequence, journal.clone());
        }
        Ok(())
    }

    async fn load_journal(&self, window_id: &str) -> Result<Vec<JournalEntry>, StoreError> {
        Ok(self
            .state()?
            .journals
            .get(window_id)
            .map(|j| j.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear_journal(&self, window_id: &str) -> Result<(), StoreError> {
        self.state()?.journals.remove(window_id);
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn publish(&self, day: BroadcastDay) -> Result<Arc<BroadcastDay>, StoreError> {
        let mut state = self.state()?;
        let versions = state.days.entry(day.window().id()).or_default();
        let version = versions.last().map(|d| d.version()).unwrap_or(0) + 1;
        let published = Arc::new(day.with_version(version));
        versions.push(published.clone());
        Ok(published)
    }

    async fn latest(&self, window_id: &str) -> Result<Option<Arc<BroadcastDay>>, StoreError> {
        Ok(self
            .state()?
            .days
            .get(window_id)
            .and_then(|v| v.last().cloned()))
    }

    async fn load_version(
        &self,
        window_id: &str,
        version: u32,
    ) -> Result<Option<Arc<BroadcastDay>>, StoreError> {
        Ok(self.state()?.days.get(window_id).and_then(|v| {
            v.iter().find(|d| d.version() == version).cloned()
        }))
    }

    async fn versions(&self, window_id: &str) -> Result<Vec<u32>, StoreError> {
        Ok(self
            .state()?
            .days
            .get(window_id)
            .map(|v| v.iter().map(|d| d.version()).collect())
            .unwrap_or_default())
    }

    async fn covering(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Arc<BroadcastDay>>, StoreError> {
        let state = self.state()?;
        let mut days: Vec<Arc<BroadcastDay>> = state
            .days
            .values()
            .filter_map(|v| v.last().cloned())
            .filter(|d| d.window().start() < to && from < d.window().end())
            .collect();
        days.sort_by_key(|d| d.window().start());
        Ok(days)
    }
}
