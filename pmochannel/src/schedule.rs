//! Grille de diffusion : fenêtres, entrées et journées publiées

use crate::catalog::ContentItem;
use crate::error::ScheduleError;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rôle d'une entrée dans son créneau
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotRole {
    Primary,
    Filler,
}

/// Fenêtre temporelle semi-ouverte `[start, end)`, à la milliseconde
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ScheduleError> {
        let start = start.trunc_subsecs(3);
        let end = end.trunc_subsecs(3);
        if start >= end {
            return Err(ScheduleError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Journée de diffusion commençant à `day_start` (heure locale) le jour `date`
    pub fn broadcast_day(date: NaiveDate, day_start: NaiveTime, offset: FixedOffset) -> Self {
        let local = date.and_time(day_start.trunc_subsecs(3));
        let start = DateTime::<Utc>::from_naive_utc_and_offset(
            local - TimeDelta::seconds(offset.local_minus_utc() as i64),
            Utc,
        );
        Self {
            start,
            end: start + TimeDelta::days(1),
        }
    }

    /// Journée de diffusion contenant l'instant
    pub fn containing(instant: DateTime<Utc>, day_start: NaiveTime, offset: FixedOffset) -> Self {
        let local = instant.with_timezone(&offset);
        let mut date = local.date_naive();
        if local.time() < day_start {
            date = date.pred_opt().unwrap_or(date);
        }
        Self::broadcast_day(date, day_start, offset)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Identifiant stable utilisé comme clé de persistance
    pub fn id(&self) -> String {
        format!(
            "{}--{}",
            self.start.format("%Y%m%dT%H%M%S%.3fZ"),
            self.end.format("%Y%m%dT%H%M%S%.3fZ")
        )
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} .. {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Une entrée de la grille
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub item_id: String,
    pub category: String,
    pub media: String,
    #[serde(default)]
    pub title: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub role: SlotRole,
}

impl ScheduleEntry {
    /// Programme `item` à `start` ; la fin est exactement `start + durée`
    pub fn from_item(item: &ContentItem, start: DateTime<Utc>, role: SlotRole) -> Self {
        Self {
            item_id: item.id.clone(),
            category: item.category.clone(),
            media: item.media.clone(),
            title: item.title.clone(),
            start,
            end: start + item.duration(),
            role,
        }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Instruction transmise au lecteur externe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInstruction {
    pub media: String,
    pub seek: Duration,
    pub remaining: Duration,
}

/// Grille immuable d'une fenêtre de diffusion
///
/// Les entrées sont triées, contiguës (`entries[i].end == entries[i+1].start`)
/// et couvrent exactement la fenêtre. Une reconstruction produit une nouvelle
/// version, jamais une modification en place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastDay {
    window: TimeWindow,
    version: u32,
    built_at: DateTime<Utc>,
    rule_set_version: String,
    catalog_version: String,
    entries: Vec<ScheduleEntry>,
}

impl BroadcastDay {
    /// Crée une grille non publiée (version 0) après validation
    pub fn new(
        window: TimeWindow,
        entries: Vec<ScheduleEntry>,
        rule_set_version: impl Into<String>,
        catalog_version: impl Into<String>,
    ) -> Result<Self, ScheduleError> {
        let day = Self {
            window,
            version: 0,
            built_at: Utc::now(),
            rule_set_version: rule_set_version.into(),
            catalog_version: catalog_version.into(),
            entries,
        };
        day.validate()?;
        Ok(day)
    }

    pub(crate) fn restore(
        window: TimeWindow,
        version: u32,
        built_at: DateTime<Utc>,
        rule_set_version: String,
        catalog_version: String,
        entries: Vec<ScheduleEntry>,
    ) -> Self {
        Self {
            window,
            version,
            built_at,
            rule_set_version,
            catalog_version,
            entries,
        }
    }

    pub(crate) fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        let (first, last) = match (self.entries.first(), self.entries.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(ScheduleError::Empty),
        };
        if first.start != self.window.start() || last.end != self.window.end() {
            return Err(ScheduleError::WindowMismatch(self.window.id()));
        }
        for entry in &self.entries {
            if entry.end <= entry.start {
                return Err(ScheduleError::Overlap { at: entry.start });
            }
        }
        for pair in self.entries.windows(2) {
            if pair[0].end < pair[1].start {
                return Err(ScheduleError::Gap { at: pair[0].end });
            }
            if pair[0].end > pair[1].start {
                return Err(ScheduleError::Overlap { at: pair[1].start });
            }
        }
        Ok(())
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn rule_set_version(&self) -> &str {
        &self.rule_set_version
    }

    pub fn catalog_version(&self) -> &str {
        &self.catalog_version
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Index de l'entrée dont `[start, end)` contient l'instant
    ///
    /// Sur une frontière, c'est l'entrée qui commence qui est retenue.
    pub fn entry_index_at(&self, instant: DateTime<Utc>) -> Option<usize> {
        if !self.window.contains(instant) {
            return None;
        }
        let after = self.entries.partition_point(|e| e.start <= instant);
        let index = after.checked_sub(1)?;
        self.entries[index].contains(instant).then_some(index)
    }

    pub fn entry_at(&self, instant: DateTime<Utc>) -> Option<&ScheduleEntry> {
        self.entry_index_at(instant).map(|i| &self.entries[i])
    }

    pub fn primaries(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter().filter(|e| e.role == SlotRole::Primary)
    }
}
