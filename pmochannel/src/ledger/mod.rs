//! RotationLedger : curseurs de rotation persistés par catégorie
//!
//! Le registre indique quel épisode passe ensuite dans chaque série et quand
//! chaque élément a été diffusé pour la dernière fois. Toute validation est
//! écrite de façon durable avant d'être visible en mémoire : une lecture qui
//! suit une validation voit toujours l'état persisté.
//!
//! L'accès en écriture est exclusif (`&mut self`) : le registre appartient au
//! constructeur de grille pendant toute la durée d'une construction.

use crate::catalog::{CatalogSnapshot, ContentItem};
use crate::error::LedgerError;
use crate::store::{JournalEntry, LedgerCommit, LedgerStore, RotationCursor};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct RotationLedger {
    store: Arc<dyn LedgerStore>,
    catalog: Arc<CatalogSnapshot>,
    cursors: HashMap<String, RotationCursor>,
    airings: HashMap<String, DateTime<Utc>>,
}

impl RotationLedger {
    /// Charge l'état persisté et le rattache à un instantané du catalogue
    pub async fn open(
        store: Arc<dyn LedgerStore>,
        catalog: Arc<CatalogSnapshot>,
    ) -> Result<Self, LedgerError> {
        let cursors = store
            .load_cursors()
            .await?
            .into_iter()
            .map(|c| (c.category.clone(), c))
            .collect::<HashMap<_, _>>();
        let airings = store.load_airings().await?;

        info!(
            catalog_version = catalog.version(),
            cursors = cursors.len(),
            airings = airings.len(),
            "Rotation ledger opened"
        );

        Ok(Self {
            store,
            catalog,
            cursors,
            airings,
        })
    }

    pub fn catalog(&self) -> &Arc<CatalogSnapshot> {
        &self.catalog
    }

    pub(crate) fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    fn items(&self, category: &str) -> Result<&[ContentItem], LedgerError> {
        let items = self
            .catalog
            .items(category)
            .ok_or_else(|| LedgerError::InvalidCategory(category.to_string()))?;
        if items.is_empty() {
            return Err(LedgerError::ExhaustedRotation(category.to_string()));
        }
        Ok(items)
    }

    /// Curseur courant, ramené dans les bornes de la liste actuelle
    pub fn cursor(&self, category: &str) -> Result<RotationCursor, LedgerError> {
        let len = self.items(category)?.len();
        let mut cursor = self
            .cursors
            .get(category)
            .cloned()
            .unwrap_or_else(|| RotationCursor::new(category));
        cursor.next_index %= len;
        Ok(cursor)
    }

    /// Nombre d'éléments en rotation dans une catégorie
    pub fn rotation_len(&self, category: &str) -> Result<usize, LedgerError> {
        Ok(self.items(category)?.len())
    }

    /// Prochain élément à diffuser, sans avancer le curseur
    pub fn peek_next(&self, category: &str) -> Result<&ContentItem, LedgerError> {
        self.peek_ahead(category, 0).map(|(_, item)| item)
    }

    /// Élément situé `offset` positions après le curseur, avec sa position
    pub fn peek_ahead(
        &self,
        category: &str,
        offset: usize,
    ) -> Result<(usize, &ContentItem), LedgerError> {
        let items = self.items(category)?;
        let position = (self.cursor(category)?.next_index + offset) % items.len();
        Ok((position, &items[position]))
    }

    /// Élément à une position absolue de la rotation
    pub fn item_at(&self, category: &str, position: usize) -> Result<&ContentItem, LedgerError> {
        let items = self.items(category)?;
        Ok(&items[position % items.len()])
    }

    pub fn last_aired(&self, item_id: &str) -> Option<DateTime<Utc>> {
        self.airings.get(item_id).copied()
    }

    /// Vrai si l'élément a été diffusé à moins de `cool_down` de `at`
    pub fn is_cooling_down(&self, item_id: &str, at: DateTime<Utc>, cool_down: TimeDelta) -> bool {
        if cool_down <= TimeDelta::zero() {
            return false;
        }
        match self.last_aired(item_id) {
            Some(last) => (at - last).abs() < cool_down,
            None => false,
        }
    }

    /// Valide la diffusion de `item_id` à `timestamp` et avance le curseur
    ///
    /// Rejouer exactement le dernier triplet validé est sans effet.
    pub async fn commit(
        &mut self,
        category: &str,
        item_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<RotationCursor, LedgerError> {
        self.commit_with_journal(category, item_id, timestamp, None)
            .await
    }

    pub(crate) async fn commit_with_journal(
        &mut self,
        category: &str,
        item_id: &str,
        timestamp: DateTime<Utc>,
        journal: Option<JournalEntry>,
    ) -> Result<RotationCursor, LedgerError> {
        let current = self.cursor(category)?;
        if current.last_item.as_deref() == Some(item_id) && current.last_aired == Some(timestamp)
        {
            debug!(category, item_id, "Commit replayed, cursor unchanged");
            return Ok(current);
        }

        let len = self.items(category)?.len();
        let position =
            self.catalog
                .position(category, item_id)
                .ok_or_else(|| LedgerError::UnknownItem {
                    category: category.to_string(),
                    item: item_id.to_string(),
                })?;

        let cursor = RotationCursor {
            category: category.to_string(),
            next_index: (position + 1) % len,
            last_aired: Some(timestamp),
            last_item: Some(item_id.to_string()),
            play_count: current.play_count + 1,
        };

        self.store
            .commit(&LedgerCommit {
                cursor: cursor.clone(),
                item_id: item_id.to_string(),
                aired_at: timestamp,
                journal,
            })
            .await?;

        self.cursors.insert(category.to_string(), cursor.clone());
        self.airings.insert(item_id.to_string(), timestamp);
        debug!(
            category,
            item_id,
            next_index = cursor.next_index,
            "Rotation cursor advanced"
        );
        Ok(cursor)
    }

    /// Ramène le curseur d'une catégorie au premier élément
    pub async fn reset(&mut self, category: &str) -> Result<(), LedgerError> {
        let mut cursor = self.cursor(category)?;
        cursor.next_index = 0;
        cursor.last_item = None;
        self.store.save_cursor(&cursor).await?;
        self.cursors.insert(category.to_string(), cursor);
        info!(category, "Rotation cursor reset");
        Ok(())
    }
}
