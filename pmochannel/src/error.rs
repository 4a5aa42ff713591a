//! Types d'erreurs pour pmochannel

use chrono::{DateTime, Utc};

/// Erreurs de validation d'un instantané du catalogue
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Duplicate content item: {0}")]
    DuplicateItem(String),

    #[error("Content item {0} has a non-positive duration")]
    InvalidDuration(String),
}

/// Violations structurelles d'une grille de diffusion
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid window: start {start} is not before end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Broadcast day has no entries")]
    Empty,

    #[error("Entries do not cover the window {0}")]
    WindowMismatch(String),

    #[error("Gap in schedule at {at}")]
    Gap { at: DateTime<Utc> },

    #[error("Overlapping entries at {at}")]
    Overlap { at: DateTime<Utc> },
}

/// Erreurs de la couche de persistance
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Erreurs du registre de rotation
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Unknown category: {0}")]
    InvalidCategory(String),

    #[error("Category {0} has no item to rotate")]
    ExhaustedRotation(String),

    #[error("Item {item} does not belong to category {category}")]
    UnknownItem { category: String, item: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Erreurs de construction d'une grille
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Cannot fill schedule at {at}: {reason}")]
    Underfill { at: DateTime<Utc>, reason: String },

    #[error("Build cancelled after {committed} committed entries")]
    Cancelled { committed: usize },

    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("A build overlapping window {0} is already running")]
    Busy(String),

    #[error("Invalid rule set: {0}")]
    InvalidRuleSet(String),

    #[error("No day-part covers {at}")]
    NoDayPart { at: DateTime<Utc> },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Erreurs de résolution de l'horloge de diffusion
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    #[error("No schedule covers {instant} yet")]
    NoScheduleYet { instant: DateTime<Utc> },

    #[error("Schedule not built for {instant}")]
    ScheduleNotBuilt { instant: DateTime<Utc> },
}

/// Erreur globale de pmochannel
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Type Result spécialisé pour pmochannel
pub type Result<T> = std::result::Result<T, Error>;
