//! # pmochannel - Cœur d'une chaîne de diffusion linéaire
//!
//! `pmochannel` simule une chaîne qui émet en continu à partir d'une
//! bibliothèque de fichiers locaux (séries, films, publicités, jingles) :
//! à tout instant, le spectateur tombe sur un programme « en direct », y
//! compris au milieu d'une émission déjà commencée.
//!
//! ## Fonctionnalités
//!
//! - **Construction de grilles** : assemblage déterministe d'une journée de
//!   diffusion à partir du catalogue et des règles par tranche horaire
//! - **Registre de rotation** : épisodes diffusés dans l'ordre, sans
//!   répétition avant d'avoir fait le tour, état persisté entre deux lancements
//! - **Remplissage exact** : chaque créneau est comblé à la milliseconde
//! - **Horloge de diffusion** : instant → (entrée, position), sans état
//! - **Reprise** : une construction interrompue repart de son journal
//!
//! ## Démarrage rapide
//!
//! ```no_run
//! use pmochannel::{Channel, CatalogSnapshot, ContentClass, ContentItem, DayPart, MemoryStore, RuleSet, StaticCatalog};
//! use chrono::{NaiveTime, TimeDelta, Utc};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> pmochannel::Result<()> {
//!     let catalog = CatalogSnapshot::new("v1", vec![
//!         ContentItem::new("pilot", ContentClass::Program, "sitcom", TimeDelta::minutes(22)).with_episode(1),
//!         ContentItem::new("spot", ContentClass::Commercial, "ads", TimeDelta::minutes(8)),
//!     ])?;
//!     let rules = RuleSet::new(vec![
//!         DayPart::new("all-day", NaiveTime::MIN, NaiveTime::MIN)
//!             .with_categories(["sitcom"])
//!             .with_filler(["ads"]),
//!     ]);
//!
//!     let store = Arc::new(MemoryStore::new());
//!     let channel = Channel::new("demo", rules, Arc::new(StaticCatalog(Arc::new(catalog))), store.clone(), store)?;
//!
//!     let airing = channel.tune(Utc::now()).await?;
//!     println!("{} (+{}s)", airing.entry.item_id, airing.offset.num_seconds());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`catalog`] : instantané versionné du catalogue
//! - [`rules`] : tranches horaires et politique de repos
//! - [`ledger`] : curseurs de rotation persistés
//! - [`builder`] : constructeur de grilles et planification du remplissage
//! - [`schedule`] : fenêtres, entrées, journées publiées
//! - [`store`] : persistance mémoire et SQLite
//! - [`clock`] : résolution instant → programme
//! - [`channel`] : façade (construction à la demande)

pub mod builder;
pub mod catalog;
pub mod channel;
pub mod clock;
pub mod error;
pub mod ledger;
pub mod rules;
pub mod schedule;
pub mod store;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

pub use builder::{ScheduleBuilder, SlotState};
pub use catalog::{CatalogSnapshot, CatalogSource, ContentClass, ContentItem, StaticCatalog};
pub use channel::Channel;
pub use clock::{Airing, NowNext, PlayoutClock};
pub use error::{
    BuildError, CatalogError, ClockError, Error, LedgerError, Result, ScheduleError, StoreError,
};
pub use ledger::RotationLedger;
pub use rules::{CoolDownPolicy, DayPart, RuleSet};
pub use schedule::{BroadcastDay, PlayerInstruction, ScheduleEntry, SlotRole, TimeWindow};
pub use store::{
    JournalEntry, LedgerCommit, LedgerStore, MemoryStore, RotationCursor, ScheduleStore,
    SqliteStore,
};

#[cfg(feature = "pmoconfig")]
pub use config_ext::ChannelConfigExt;

// Re-export pour les signatures publiques
pub use tokio_util::sync::CancellationToken;
