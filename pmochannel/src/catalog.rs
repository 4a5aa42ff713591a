//! Catalogue : vue immuable du contenu disponible
//!
//! L'indexation des fichiers (durées, codecs) est faite par un indexeur
//! externe. Le cœur ne fait que consommer un [`CatalogSnapshot`] versionné,
//! ce qui permet de rejouer ou d'auditer une construction contre l'état exact
//! du catalogue qu'elle a utilisé.

use crate::error::CatalogError;
use async_trait::async_trait;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Classe de contenu
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    Program,
    Commercial,
    Bumper,
    Filler,
}

impl ContentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentClass::Program => "program",
            ContentClass::Commercial => "commercial",
            ContentClass::Bumper => "bumper",
            ContentClass::Filler => "filler",
        }
    }
}

/// Un élément du catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Identifiant unique dans le catalogue
    pub id: String,
    pub class: ContentClass,
    /// Série ou catégorie de rotation
    pub category: String,
    /// Durée exacte de lecture en millisecondes
    pub duration_ms: i64,
    /// Numéro d'épisode (clé d'ordre optionnelle)
    #[serde(default)]
    pub episode: Option<u32>,
    /// Référence média transmise au lecteur
    pub media: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl ContentItem {
    pub fn new(
        id: impl Into<String>,
        class: ContentClass,
        category: impl Into<String>,
        duration: TimeDelta,
    ) -> Self {
        let id = id.into();
        Self {
            media: id.clone(),
            id,
            class,
            category: category.into(),
            duration_ms: duration.num_milliseconds(),
            episode: None,
            title: None,
        }
    }

    pub fn with_episode(mut self, episode: u32) -> Self {
        self.episode = Some(episode);
        self
    }

    pub fn with_media(mut self, media: impl Into<String>) -> Self {
        self.media = media.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn duration(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.duration_ms)
    }
}

/// Instantané versionné du catalogue, regroupé par catégorie
///
/// Les éléments d'une catégorie sont triés par numéro d'épisode puis par
/// identifiant, quel que soit l'ordre fourni par l'indexeur : le parcours
/// d'une série est donc déterministe.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    version: String,
    categories: BTreeMap<String, Vec<ContentItem>>,
    index: HashMap<String, (String, usize)>,
}

impl CatalogSnapshot {
    pub fn new(
        version: impl Into<String>,
        items: impl IntoIterator<Item = ContentItem>,
    ) -> Result<Self, CatalogError> {
        let mut categories: BTreeMap<String, Vec<ContentItem>> = BTreeMap::new();
        let mut seen = std::collections::HashSet::new();

        for item in items {
            if item.duration_ms <= 0 {
                return Err(CatalogError::InvalidDuration(item.id));
            }
            if !seen.insert(item.id.clone()) {
                return Err(CatalogError::DuplicateItem(item.id));
            }
            categories
                .entry(item.category.clone())
                .or_default()
                .push(item);
        }

        let mut index = HashMap::new();
        for (category, items) in categories.iter_mut() {
            items.sort_by(|a, b| {
                a.episode
                    .unwrap_or(u32::MAX)
                    .cmp(&b.episode.unwrap_or(u32::MAX))
                    .then_with(|| a.id.cmp(&b.id))
            });
            for (position, item) in items.iter().enumerate() {
                index.insert(item.id.clone(), (category.clone(), position));
            }
        }

        Ok(Self {
            version: version.into(),
            categories,
            index,
        })
    }

    /// Déclare une catégorie connue de l'indexeur mais sans contenu
    pub fn with_empty_category(mut self, category: impl Into<String>) -> Self {
        self.categories.entry(category.into()).or_default();
        self
    }

    /// Version fournie par l'indexeur
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Liste ordonnée d'une catégorie
    pub fn items(&self, category: &str) -> Option<&[ContentItem]> {
        self.categories.get(category).map(Vec::as_slice)
    }

    pub fn get(&self, id: &str) -> Option<&ContentItem> {
        let (category, position) = self.index.get(id)?;
        self.categories.get(category)?.get(*position)
    }

    /// Position d'un élément dans la rotation de sa catégorie
    pub fn position(&self, category: &str, id: &str) -> Option<usize> {
        match self.index.get(id) {
            Some((c, position)) if c == category => Some(*position),
            _ => None,
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Empreinte SHA-256 du contenu (identifiants, classes, durées)
    ///
    /// Permet de vérifier a posteriori qu'une grille a été construite contre
    /// un catalogue donné, indépendamment de la version déclarée.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (category, items) in &self.categories {
            hasher.update(category.as_bytes());
            hasher.update([0u8]);
            for item in items {
                hasher.update(item.id.as_bytes());
                hasher.update([0u8]);
                hasher.update(item.class.as_str().as_bytes());
                hasher.update(item.duration_ms.to_be_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }
}

/// Source externe d'instantanés du catalogue (l'indexeur)
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn snapshot(&self) -> anyhow::Result<Arc<CatalogSnapshot>>;
}

/// Source figée sur un instantané unique
#[derive(Debug, Clone)]
pub struct StaticCatalog(pub Arc<CatalogSnapshot>);

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn snapshot(&self) -> anyhow::Result<Arc<CatalogSnapshot>> {
        Ok(self.0.clone())
    }
}
