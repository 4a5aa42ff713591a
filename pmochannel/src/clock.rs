//! PlayoutClock : ce qui passe à l'antenne à un instant donné
//!
//! L'horloge est une fonction pure des grilles publiées et de l'instant
//! demandé. Elle n'attend jamais et ne sonde rien : un spectateur qui arrive
//! en cours de programme, ou un processus relancé après un arrêt brutal,
//! retombe exactement à la position atteinte par la diffusion continue.

use crate::error::{ClockError, StoreError};
use crate::schedule::{BroadcastDay, PlayerInstruction, ScheduleEntry, SlotRole};
use crate::store::ScheduleStore;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Entrée à l'antenne et position écoulée dans celle-ci
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Airing {
    pub entry: ScheduleEntry,
    /// Toujours dans `[0, entry.duration())`
    pub offset: TimeDelta,
    pub window_id: String,
    pub day_version: u32,
}

impl Airing {
    pub fn remaining(&self) -> TimeDelta {
        self.entry.duration() - self.offset
    }

    /// Instruction de lecture pour le lecteur externe
    pub fn instruction(&self) -> PlayerInstruction {
        PlayerInstruction {
            media: self.entry.media.clone(),
            seek: self.offset.to_std().unwrap_or_default(),
            remaining: self.remaining().to_std().unwrap_or_default(),
        }
    }
}

/// Programme courant et suivant, tels qu'affichés par un bandeau d'information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowNext {
    pub now: Airing,
    pub next: Option<ScheduleEntry>,
}

/// Portion `[from, to)` de la chronologie gouvernée par une grille
#[derive(Debug, Clone)]
struct Segment {
    day: Arc<BroadcastDay>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl Segment {
    fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from <= instant && instant < self.to
    }

    /// Entrées de la grille qui commencent dans le segment
    fn starting(&self) -> impl Iterator<Item = &ScheduleEntry> {
        let (from, to) = (self.from, self.to);
        self.day
            .entries()
            .iter()
            .skip_while(move |e| e.start < from)
            .take_while(move |e| e.start < to)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlayoutClock {
    days: Vec<Arc<BroadcastDay>>,
    segments: Vec<Segment>,
}

impl PlayoutClock {
    /// Horloge sur un ensemble de grilles publiées
    ///
    /// Quand des fenêtres se chevauchent, la grille construite le plus
    /// récemment l'emporte instant par instant : une grille plus ancienne
    /// reste à l'antenne partout où aucune grille plus récente ne la couvre.
    pub fn new(days: impl IntoIterator<Item = Arc<BroadcastDay>>) -> Self {
        let mut candidates: Vec<Arc<BroadcastDay>> = days.into_iter().collect();
        candidates.sort_by(|a, b| {
            b.built_at()
                .cmp(&a.built_at())
                .then(b.version().cmp(&a.version()))
        });

        let mut kept: Vec<Arc<BroadcastDay>> = Vec::with_capacity(candidates.len());
        let mut segments: Vec<Segment> = Vec::new();
        for day in candidates {
            let pieces = uncovered(day.window().start(), day.window().end(), &segments);
            if pieces.is_empty() {
                debug!(window = %day.window(), version = day.version(), "Superseded day ignored");
                continue;
            }
            if pieces.len() > 1 || pieces[0] != (day.window().start(), day.window().end()) {
                debug!(
                    window = %day.window(),
                    version = day.version(),
                    pieces = pieces.len(),
                    "Day partially superseded"
                );
            }
            for (from, to) in pieces {
                segments.push(Segment {
                    day: day.clone(),
                    from,
                    to,
                });
            }
            segments.sort_by_key(|s| s.from);
            kept.push(day);
        }
        kept.sort_by_key(|d| d.window().start());

        Self {
            days: kept,
            segments,
        }
    }

    /// Charge la dernière version de chaque grille qui intersecte `[from, to)`
    pub async fn load(
        store: &dyn ScheduleStore,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let days = store.covering(from, to).await?;
        let clock = Self::new(days);
        info!(
            days = clock.days.len(),
            earliest = ?clock.earliest(),
            latest = ?clock.latest(),
            "Playout clock loaded"
        );
        Ok(clock)
    }

    /// Nouvelle horloge incluant `day`
    pub fn with_day(&self, day: Arc<BroadcastDay>) -> Self {
        Self::new(self.days.iter().cloned().chain(std::iter::once(day)))
    }

    /// Grilles encore à l'antenne sur au moins un instant, par début de fenêtre
    pub fn days(&self) -> &[Arc<BroadcastDay>] {
        &self.days
    }

    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.segments.first().map(|s| s.from)
    }

    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.segments.last().map(|s| s.to)
    }

    fn segment_index(&self, instant: DateTime<Utc>) -> Result<usize, ClockError> {
        if self.segments.is_empty() {
            return Err(ClockError::ScheduleNotBuilt { instant });
        }
        let after = self.segments.partition_point(|s| s.from <= instant);
        let index = after
            .checked_sub(1)
            .ok_or(ClockError::NoScheduleYet { instant })?;
        if self.segments[index].contains(instant) {
            Ok(index)
        } else {
            Err(ClockError::ScheduleNotBuilt { instant })
        }
    }

    /// Résout l'entrée à l'antenne à `instant` et la position dans celle-ci
    ///
    /// Sur une frontière, c'est l'entrée qui commence à `instant` qui passe.
    pub fn resolve(&self, instant: DateTime<Utc>) -> Result<Airing, ClockError> {
        let day = &self.segments[self.segment_index(instant)?].day;
        let entry = day
            .entry_at(instant)
            .ok_or(ClockError::ScheduleNotBuilt { instant })?;

        Ok(Airing {
            offset: instant - entry.start,
            entry: entry.clone(),
            window_id: day.window().id(),
            day_version: day.version(),
        })
    }

    /// Entrée courante et prochain programme principal, au-delà de la journée
    pub fn now_and_next(&self, instant: DateTime<Utc>) -> Result<NowNext, ClockError> {
        let now = self.resolve(instant)?;
        let index = self.segment_index(instant)?;
        let next = self.segments[index..]
            .iter()
            .flat_map(|s| s.starting())
            .skip_while(|e| e.start <= now.entry.start)
            .find(|e| e.role == SlotRole::Primary)
            .cloned();
        Ok(NowNext { now, next })
    }

    /// Programmes principaux à l'antenne sur `[from, to)`, dans l'ordre
    ///
    /// Une entrée coupée par une grille plus récente apparaît une seule fois,
    /// à sa première reprise.
    pub fn guide(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<ScheduleEntry> {
        let mut guide: Vec<ScheduleEntry> = Vec::new();
        for segment in self.segments.iter().filter(|s| s.from < to && from < s.to) {
            if let Some(head) = segment.day.entry_at(segment.from.max(from)) {
                if head.start < segment.from
                    && head.role == SlotRole::Primary
                    && !guide.contains(head)
                {
                    guide.push(head.clone());
                }
            }
            guide.extend(
                segment
                    .starting()
                    .filter(|e| e.role == SlotRole::Primary && e.start < to && from < e.end)
                    .cloned(),
            );
        }
        guide
    }
}

/// Parties de `[start, end)` qu'aucun segment ne couvre encore
fn uncovered(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    segments: &[Segment],
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut pieces = Vec::new();
    let mut cursor = start;
    for segment in segments {
        if segment.to <= cursor {
            continue;
        }
        if segment.from >= end {
            break;
        }
        if segment.from > cursor {
            pieces.push((cursor, segment.from));
        }
        cursor = cursor.max(segment.to);
    }
    if cursor < end {
        pieces.push((cursor, end));
    }
    pieces
}
