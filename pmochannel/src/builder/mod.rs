//! ScheduleBuilder : assemblage déterministe des grilles de diffusion
//!
//! La fenêtre est parcourue créneau par créneau. Pour chaque créneau :
//!
//! 1. la tranche horaire active au début réel du créneau est déterminée
//!    (après un dépassement, c'est l'horloge décalée qui fait foi) ;
//! 2. le programme principal est tiré de la première catégorie éligible,
//!    en sautant les éléments en période de repos (nombre d'essais borné) ;
//! 3. le reste du créneau est comblé exactement avec du remplissage.
//!
//! Chaque entrée passe par `Selecting → Committing → Committed` : le registre
//! et le journal de construction sont écrits durablement avant de considérer
//! l'entrée suivante. Une construction interrompue reprend depuis son journal.
//! La grille n'est publiée qu'une fois la fenêtre entièrement remplie.

mod filler;

use crate::catalog::{CatalogSource, ContentItem};
use crate::error::{BuildError, LedgerError};
use crate::ledger::RotationLedger;
use crate::rules::{CoolDownPolicy, DayPart, RuleSet};
use crate::schedule::{BroadcastDay, ScheduleEntry, SlotRole, TimeWindow};
use crate::store::{JournalEntry, LedgerStore, ScheduleStore};
use chrono::{DateTime, TimeDelta, Utc};
use filler::{plan_fill, FillRequest};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// État d'une entrée en cours de validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Selecting,
    Committing,
    Committed,
}

/// Fenêtres en cours de construction (une seule construction par fenêtre)
struct InFlightGuard {
    registry: Arc<Mutex<Vec<TimeWindow>>>,
    window: TimeWindow,
}

impl InFlightGuard {
    fn acquire(
        registry: &Arc<Mutex<Vec<TimeWindow>>>,
        window: TimeWindow,
    ) -> Result<Self, BuildError> {
        let mut running = registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(other) = running.iter().find(|w| w.overlaps(&window)) {
            return Err(BuildError::Busy(other.id()));
        }
        running.push(window);
        Ok(Self {
            registry: registry.clone(),
            window,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut running = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        running.retain(|w| *w != self.window);
    }
}

/// Sélection d'un élément dans une rotation
struct Pick {
    category: String,
    item: ContentItem,
}

/// Progression d'une construction (reprise depuis le journal incluse)
struct BuildRun {
    window: TimeWindow,
    window_id: String,
    entries: Vec<ScheduleEntry>,
    cursor: DateTime<Utc>,
    slot: Option<(DateTime<Utc>, DateTime<Utc>)>,
    next_sequence: u32,
    committed: usize,
}

impl BuildRun {
    fn resume(window: TimeWindow, journal: Vec<JournalEntry>) -> Result<Self, BuildError> {
        let mut run = Self {
            window,
            window_id: window.id(),
            entries: Vec::with_capacity(journal.len()),
            cursor: window.start(),
            slot: None,
            next_sequence: 0,
            committed: 0,
        };

        for record in journal {
            if record.entry.start != run.cursor {
                return Err(BuildError::Schedule(crate::error::ScheduleError::Gap {
                    at: run.cursor,
                }));
            }
            run.cursor = record.entry.end;
            run.slot = Some((record.slot_start, record.slot_end));
            run.next_sequence = record.sequence + 1;
            run.entries.push(record.entry);
        }
        Ok(run)
    }

    fn open_slot(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.slot.filter(|&(_, end)| self.cursor < end)
    }
}

/// Constructeur de grilles
#[derive(Clone)]
pub struct ScheduleBuilder {
    rules: Arc<RuleSet>,
    schedules: Arc<dyn ScheduleStore>,
    in_flight: Arc<Mutex<Vec<TimeWindow>>>,
}

impl ScheduleBuilder {
    pub fn new(rules: Arc<RuleSet>, schedules: Arc<dyn ScheduleStore>) -> Self {
        Self {
            rules,
            schedules,
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn rules(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    /// Construit et publie la grille de `window`
    ///
    /// Une construction concurrente sur une fenêtre qui chevauche est refusée
    /// (`Busy`). L'annulation est coopérative : elle est vérifiée avant chaque
    /// validation, le registre reste donc exactement dans l'état de la
    /// dernière entrée validée.
    pub async fn build(
        &self,
        window: TimeWindow,
        ledger: &mut RotationLedger,
        cancel: &CancellationToken,
    ) -> Result<Arc<BroadcastDay>, BuildError> {
        self.rules.validate()?;
        let _guard = InFlightGuard::acquire(&self.in_flight, window)?;

        let journal = ledger.store().load_journal(&window.id()).await?;
        let mut run = BuildRun::resume(window, journal)?;
        let journal_complete = !run.entries.is_empty() && run.cursor >= window.end();
        if run.entries.is_empty() {
            info!(window = %window, "Starting schedule build");
        } else {
            warn!(
                window = %window,
                resumed = run.entries.len(),
                resume_at = %run.cursor,
                "Resuming interrupted schedule build from journal"
            );
        }

        while run.cursor < window.end() {
            if cancel.is_cancelled() {
                return Err(self.cancelled(&run));
            }

            if let Some((slot_start, slot_end)) = run.open_slot() {
                let part = self.day_part(slot_start)?;
                self.fill(ledger, &mut run, part, slot_start, slot_end, cancel)
                    .await?;
                continue;
            }

            let slot_start = run.cursor;
            let part = self.day_part(slot_start)?;
            let mut slot_end = self.nominal_slot_end(&window, slot_start);
            trace!(state = ?SlotState::Selecting, slot_start = %slot_start, day_part = %part.name);

            match self.select_primary(ledger, part, slot_start, window.end())? {
                Some(pick) => {
                    let entry = ScheduleEntry::from_item(&pick.item, slot_start, SlotRole::Primary);
                    if entry.end > slot_end {
                        slot_end = self.overrun_slot_end(&window, entry.end);
                        debug!(
                            item_id = %entry.item_id,
                            nominal_end = %self.nominal_slot_end(&window, slot_start),
                            slot_end = %slot_end,
                            "Primary overruns its slot"
                        );
                    }
                    run.slot = Some((slot_start, slot_end));
                    self.commit(ledger, &mut run, &pick.category, entry).await?;
                }
                None => {
                    debug!(slot_start = %slot_start, "No primary fits, filler-only slot");
                    run.slot = Some((slot_start, slot_end));
                }
            }

            if run.cursor < slot_end {
                if cancel.is_cancelled() {
                    return Err(self.cancelled(&run));
                }
                self.fill(ledger, &mut run, part, slot_start, slot_end, cancel)
                    .await?;
            }
        }

        // Journal complet : la publication a pu réussir avant l'effacement
        if journal_complete {
            if let Some(latest) = self.schedules.latest(&run.window_id).await? {
                if latest.entries() == run.entries.as_slice() {
                    warn!(
                        window = %window,
                        version = latest.version(),
                        "Journal already published, clearing it"
                    );
                    ledger.store().clear_journal(&run.window_id).await?;
                    return Ok(latest);
                }
            }
        }

        let day = BroadcastDay::new(
            window,
            run.entries,
            self.rules.rule_version(),
            ledger.catalog().version(),
        )?;
        let published = self.schedules.publish(day).await?;
        ledger.store().clear_journal(&run.window_id).await?;

        info!(
            window = %window,
            version = published.version(),
            entries = published.entries().len(),
            committed = run.committed,
            "Broadcast day published"
        );
        Ok(published)
    }

    /// Comme [`build`](Self::build), annulée automatiquement après `timeout`
    pub async fn build_with_timeout(
        &self,
        window: TimeWindow,
        ledger: &mut RotationLedger,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<Arc<BroadcastDay>, BuildError> {
        let token = cancel.child_token();
        let timer = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        };
        let result = self.build(window, ledger, &token).await;
        timer.abort();
        result
    }

    /// Récupère un instantané du catalogue, ouvre le registre et construit
    pub async fn build_from_source(
        &self,
        window: TimeWindow,
        source: &dyn CatalogSource,
        ledger_store: Arc<dyn LedgerStore>,
        cancel: &CancellationToken,
    ) -> Result<Arc<BroadcastDay>, BuildError> {
        let catalog = source
            .snapshot()
            .await
            .map_err(|e| BuildError::CatalogUnavailable(e.to_string()))?;
        let mut ledger = RotationLedger::open(ledger_store, catalog).await?;
        self.build(window, &mut ledger, cancel).await
    }

    fn cancelled(&self, run: &BuildRun) -> BuildError {
        warn!(
            window = %run.window,
            committed = run.committed,
            at = %run.cursor,
            "Schedule build cancelled"
        );
        BuildError::Cancelled {
            committed: run.committed,
        }
    }

    fn day_part(&self, at: DateTime<Utc>) -> Result<&DayPart, BuildError> {
        self.rules
            .day_part_at(at)
            .ok_or(BuildError::NoDayPart { at })
    }

    /// Première frontière de grille strictement après `at`
    fn next_boundary(&self, window: &TimeWindow, at: DateTime<Utc>) -> DateTime<Utc> {
        let step = self.rules.granularity().num_milliseconds().max(1);
        let elapsed = (at - window.start()).num_milliseconds();
        window.start() + TimeDelta::milliseconds((elapsed / step + 1) * step)
    }

    fn nominal_slot_end(&self, window: &TimeWindow, start: DateTime<Utc>) -> DateTime<Utc> {
        let end = if self.rules.realign_after_overrun {
            self.next_boundary(window, start)
        } else {
            start + self.rules.granularity()
        };
        end.min(window.end())
    }

    fn overrun_slot_end(&self, window: &TimeWindow, entry_end: DateTime<Utc>) -> DateTime<Utc> {
        let end = if self.rules.realign_after_overrun {
            let step = self.rules.granularity().num_milliseconds().max(1);
            if (entry_end - window.start()).num_milliseconds() % step == 0 {
                entry_end
            } else {
                self.next_boundary(window, entry_end)
            }
        } else {
            entry_end
        };
        end.min(window.end())
    }

    /// Choisit le programme principal d'un créneau
    ///
    /// Retourne `None` si aucun candidat ne tient avant la fin de la fenêtre.
    fn select_primary(
        &self,
        ledger: &RotationLedger,
        part: &DayPart,
        at: DateTime<Utc>,
        limit: DateTime<Utc>,
    ) -> Result<Option<Pick>, BuildError> {
        let cool_down = part.cool_down();
        let mut cooling: Vec<(DateTime<Utc>, Pick)> = Vec::new();
        let mut exhausted = None;
        let mut usable = 0usize;
        let mut fits = false;

        for category in &part.categories {
            let len = match ledger.rotation_len(category) {
                Ok(len) => len,
                Err(err @ LedgerError::ExhaustedRotation(_)) => {
                    warn!(category = %category, "Category has nothing to rotate");
                    exhausted = Some(err);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            usable += 1;

            for lookahead in 0..len.min(self.rules.max_attempts) {
                let (_, item) = ledger.peek_ahead(category, lookahead)?;
                if at + item.duration() > limit {
                    continue;
                }
                fits = true;

                if ledger.is_cooling_down(&item.id, at, cool_down) {
                    let last = ledger.last_aired(&item.id).unwrap_or(at);
                    cooling.push((
                        last,
                        Pick {
                            category: category.clone(),
                            item: item.clone(),
                        },
                    ));
                    continue;
                }

                if lookahead > 0 {
                    warn!(
                        category = %category,
                        skipped = lookahead,
                        item_id = %item.id,
                        "Cool-down forced a rotation skip"
                    );
                }
                return Ok(Some(Pick {
                    category: category.clone(),
                    item: item.clone(),
                }));
            }
        }

        if usable == 0 {
            if let Some(err) = exhausted {
                return Err(err.into());
            }
        }
        if !fits {
            return Ok(None);
        }

        match self.rules.cool_down_policy {
            CoolDownPolicy::Strict => Err(BuildError::Underfill {
                at,
                reason: format!(
                    "every candidate of day-part {} is within its cool-down window",
                    part.name
                ),
            }),
            CoolDownPolicy::LeastRecentlyAired => {
                // min_by_key garde le premier en cas d'égalité : priorité puis rotation
                let (last, pick) = cooling
                    .into_iter()
                    .min_by_key(|(last, _)| *last)
                    .ok_or_else(|| BuildError::Underfill {
                        at,
                        reason: format!("no candidate for day-part {}", part.name),
                    })?;
                warn!(
                    category = %pick.category,
                    item_id = %pick.item.id,
                    last_aired = %last,
                    "All candidates cooling down, airing least recently aired"
                );
                Ok(Some(pick))
            }
        }
    }

    /// Comble exactement `[run.cursor, slot_end)` avec du remplissage
    async fn fill(
        &self,
        ledger: &mut RotationLedger,
        run: &mut BuildRun,
        part: &DayPart,
        slot_start: DateTime<Utc>,
        slot_end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        let length = slot_end - run.cursor;
        let categories = self.rules.filler_for(part);
        let plan = plan_fill(
            ledger,
            &FillRequest {
                start: run.cursor,
                length,
                categories,
                cool_down: part.filler_cool_down(),
                max_attempts: self.rules.max_attempts,
                max_steps: self.rules.max_fill_steps,
            },
        )?
        .ok_or_else(|| BuildError::Underfill {
            at: run.cursor,
            reason: format!(
                "no filler combination from {:?} covers {} ms of slot starting {}",
                categories,
                length.num_milliseconds(),
                slot_start
            ),
        })?;

        for pick in plan {
            if cancel.is_cancelled() {
                return Err(self.cancelled(run));
            }
            let entry = ScheduleEntry::from_item(&pick.item, run.cursor, SlotRole::Filler);
            self.commit(ledger, run, &pick.category, entry).await?;
        }
        Ok(())
    }

    /// Valide durablement une entrée avant de passer à la suivante
    async fn commit(
        &self,
        ledger: &mut RotationLedger,
        run: &mut BuildRun,
        category: &str,
        entry: ScheduleEntry,
    ) -> Result<(), BuildError> {
        let (slot_start, slot_end) = run.slot.unwrap_or((entry.start, entry.end));
        trace!(state = ?SlotState::Committing, item_id = %entry.item_id, start = %entry.start);

        let journal = JournalEntry {
            window_id: run.window_id.clone(),
            sequence: run.next_sequence,
            slot_start,
            slot_end,
            entry: entry.clone(),
        };
        ledger
            .commit_with_journal(category, &entry.item_id, entry.start, Some(journal))
            .await?;

        trace!(state = ?SlotState::Committed, item_id = %entry.item_id);
        debug!(
            item_id = %entry.item_id,
            category,
            role = ?entry.role,
            start = %entry.start,
            end = %entry.end,
            "Schedule entry committed"
        );

        run.next_sequence += 1;
        run.committed += 1;
        run.cursor = entry.end;
        run.entries.push(entry);
        Ok(())
    }
}
