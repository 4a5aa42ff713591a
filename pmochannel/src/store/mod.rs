//! Persistance du registre de rotation et des grilles publiées
//!
//! Deux interfaces abstraites, implémentées par [`MemoryStore`] (tests,
//! chaînes éphémères) et [`SqliteStore`] (une base pour tout l'état).
//! Chaque écriture est atomique : soit elle est entièrement visible, soit
//! l'état précédent est conservé.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::schedule::{BroadcastDay, ScheduleEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Curseur de rotation d'une catégorie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationCursor {
    pub category: String,
    /// Position du prochain élément à diffuser
    pub next_index: usize,
    pub last_aired: Option<DateTime<Utc>>,
    /// Dernier élément validé (rejeu idempotent)
    pub last_item: Option<String>,
    pub play_count: u64,
}

impl RotationCursor {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            next_index: 0,
            last_aired: None,
            last_item: None,
            play_count: 0,
        }
    }
}

/// Entrée du journal de construction d'une fenêtre
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub window_id: String,
    pub sequence: u32,
    pub slot_start: DateTime<Utc>,
    pub slot_end: DateTime<Utc>,
    pub entry: ScheduleEntry,
}

/// Une validation du registre, écrite en une seule transaction
#[derive(Debug, Clone)]
pub struct LedgerCommit {
    pub cursor: RotationCursor,
    pub item_id: String,
    pub aired_at: DateTime<Utc>,
    pub journal: Option<JournalEntry>,
}

/// Stockage durable du registre de rotation
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load_cursors(&self) -> Result<Vec<RotationCursor>, StoreError>;

    /// Dernière diffusion connue de chaque élément
    async fn load_airings(&self) -> Result<HashMap<String, DateTime<Utc>>, StoreError>;

    async fn save_cursor(&self, cursor: &RotationCursor) -> Result<(), StoreError>;

    /// Écrit curseur, diffusion et entrée de journal de façon atomique
    async fn commit(&self, commit: &LedgerCommit) -> Result<(), StoreError>;

    /// Journal d'une construction interrompue, trié par séquence
    async fn load_journal(&self, window_id: &str) -> Result<Vec<JournalEntry>, StoreError>;

    async fn clear_journal(&self, window_id: &str) -> Result<(), StoreError>;
}

/// Stockage append-only des grilles publiées
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Publie une nouvelle version de la fenêtre et la retourne numérotée
    async fn publish(&self, day: BroadcastDay) -> Result<Arc<BroadcastDay>, StoreError>;

    async fn latest(&self, window_id: &str) -> Result<Option<Arc<BroadcastDay>>, StoreError>;

    async fn load_version(
        &self,
        window_id: &str,
        version: u32,
    ) -> Result<Option<Arc<BroadcastDay>>, StoreError>;

    async fn versions(&self, window_id: &str) -> Result<Vec<u32>, StoreError>;

    /// Dernière version de chaque fenêtre intersectant `[from, to)`
    async fn covering(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Arc<BroadcastDay>>, StoreError>;
}
