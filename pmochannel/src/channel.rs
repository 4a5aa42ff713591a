//! Channel : façade d'une chaîne linéaire
//!
//! Réunit le catalogue, les règles, le registre, les grilles publiées et
//! l'horloge. Les constructions sont sérialisées par un verrou asynchrone :
//! une demande qui arrive pendant une construction attend son tour au lieu
//! d'être refusée. Quand l'horloge répond `ScheduleNotBuilt`, la journée de
//! diffusion contenant l'instant est construite à la demande.

use crate::catalog::CatalogSource;
use crate::clock::{Airing, NowNext, PlayoutClock};
use crate::error::{BuildError, ClockError, Error, Result, StoreError};
use crate::ledger::RotationLedger;
use crate::rules::RuleSet;
use crate::schedule::{BroadcastDay, TimeWindow};
use crate::store::{LedgerStore, ScheduleStore, SqliteStore};
use crate::builder::ScheduleBuilder;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct Channel {
    name: String,
    rules: Arc<RuleSet>,
    catalog: Arc<dyn CatalogSource>,
    ledger_store: Arc<dyn LedgerStore>,
    schedules: Arc<dyn ScheduleStore>,
    builder: ScheduleBuilder,
    build_lock: Mutex<()>,
    clock: RwLock<Arc<PlayoutClock>>,
    build_timeout: Option<Duration>,
    build_ahead_days: usize,
    shutdown: CancellationToken,
}

impl Channel {
    pub fn new(
        name: impl Into<String>,
        rules: RuleSet,
        catalog: Arc<dyn CatalogSource>,
        ledger_store: Arc<dyn LedgerStore>,
        schedules: Arc<dyn ScheduleStore>,
    ) -> std::result::Result<Self, BuildError> {
        rules.validate()?;
        let rules = Arc::new(rules);
        Ok(Self {
            name: name.into(),
            builder: ScheduleBuilder::new(rules.clone(), schedules.clone()),
            rules,
            catalog,
            ledger_store,
            schedules,
            build_lock: Mutex::new(()),
            clock: RwLock::new(Arc::new(PlayoutClock::default())),
            build_timeout: None,
            build_ahead_days: 1,
            shutdown: CancellationToken::new(),
        })
    }

    /// Chaîne dont le registre et les grilles partagent une base SQLite
    pub fn with_sqlite(
        name: impl Into<String>,
        rules: RuleSet,
        catalog: Arc<dyn CatalogSource>,
        db_path: &Path,
    ) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(db_path)?);
        Ok(Self::new(name, rules, catalog, store.clone(), store)?)
    }

    /// Chaîne configurée par la configuration globale pmoconfig (`channel.*`)
    #[cfg(feature = "pmoconfig")]
    pub fn from_config(catalog: Arc<dyn CatalogSource>) -> Result<Self> {
        Self::with_config(&pmoconfig::get_config(), catalog)
    }

    /// Chaîne décrite par la section `channel` d'une configuration
    #[cfg(feature = "pmoconfig")]
    pub fn with_config(config: &pmoconfig::Config, catalog: Arc<dyn CatalogSource>) -> Result<Self> {
        use crate::config_ext::ChannelConfigExt;

        let name = config.get_channel_name()?;
        let rules = config.channel_rule_set()?;
        let db_path = config.channel_db_path()?;
        let timeout = config.channel_build_timeout()?;
        let ahead = config.get_build_ahead_days()?;
        info!(
            channel = %name,
            db = %db_path.display(),
            build_ahead_days = ahead,
            "Channel configured"
        );

        Ok(Self::with_sqlite(name, rules, catalog, &db_path)?
            .with_build_timeout(timeout)
            .with_build_ahead(ahead))
    }

    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = Some(timeout);
        self
    }

    /// Nombre de journées préparées par [`prepare`](Self::prepare) (au moins une)
    pub fn with_build_ahead(mut self, days: usize) -> Self {
        self.build_ahead_days = days.max(1);
        self
    }

    pub fn build_ahead_days(&self) -> usize {
        self.build_ahead_days
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    pub fn schedules(&self) -> &Arc<dyn ScheduleStore> {
        &self.schedules
    }

    /// Horloge courante (instantané immuable)
    pub fn clock(&self) -> Arc<PlayoutClock> {
        self.clock
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, clock: PlayoutClock) -> Arc<PlayoutClock> {
        let clock = Arc::new(clock);
        *self.clock.write().unwrap_or_else(PoisonError::into_inner) = clock.clone();
        clock
    }

    /// Annule la construction en cours et les suivantes
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Journée de diffusion contenant l'instant
    pub fn day_window(&self, instant: DateTime<Utc>) -> TimeWindow {
        TimeWindow::containing(instant, self.rules.day_start, self.rules.offset())
    }

    /// Recharge l'horloge depuis les grilles publiées
    pub async fn reload(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> std::result::Result<Arc<PlayoutClock>, StoreError> {
        let clock = PlayoutClock::load(self.schedules.as_ref(), from, to).await?;
        Ok(self.install(clock))
    }

    /// Construit (ou reconstruit) une fenêtre et l'ajoute à l'horloge
    ///
    /// Attend la fin de toute autre construction de la chaîne.
    pub async fn build_window(&self, window: TimeWindow) -> Result<Arc<BroadcastDay>> {
        let _lock = self.build_lock.lock().await;
        self.build_locked(window).await
    }

    /// Comme [`build_window`](Self::build_window), sauf si une grille existe déjà
    pub async fn ensure_window(&self, window: TimeWindow) -> Result<Arc<BroadcastDay>> {
        let _lock = self.build_lock.lock().await;
        if let Some(day) = self.schedules.latest(&window.id()).await? {
            debug!(channel = %self.name, window = %window, version = day.version(), "Window already built");
            self.install(self.clock().with_day(day.clone()));
            return Ok(day);
        }
        self.build_locked(window).await
    }

    async fn build_locked(&self, window: TimeWindow) -> Result<Arc<BroadcastDay>> {
        let catalog = self
            .catalog
            .snapshot()
            .await
            .map_err(|e| BuildError::CatalogUnavailable(e.to_string()))?;
        let mut ledger = RotationLedger::open(self.ledger_store.clone(), catalog)
            .await
            .map_err(BuildError::from)?;

        let day = match self.build_timeout {
            Some(timeout) => {
                self.builder
                    .build_with_timeout(window, &mut ledger, &self.shutdown, timeout)
                    .await?
            }
            None => self.builder.build(window, &mut ledger, &self.shutdown).await?,
        };

        self.install(self.clock().with_day(day.clone()));
        Ok(day)
    }

    /// Construit `count` journées consécutives à partir de celle contenant `from`
    pub async fn build_ahead(
        &self,
        from: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<Arc<BroadcastDay>>> {
        let mut days = Vec::with_capacity(count);
        let mut at = from;
        for _ in 0..count {
            let window = self.day_window(at);
            days.push(self.ensure_window(window).await?);
            at = window.end();
        }
        info!(channel = %self.name, days = days.len(), "Build-ahead complete");
        Ok(days)
    }

    /// Prépare la journée contenant `from` et les suivantes selon `build_ahead_days`
    pub async fn prepare(&self, from: DateTime<Utc>) -> Result<Vec<Arc<BroadcastDay>>> {
        self.build_ahead(from, self.build_ahead_days).await
    }

    /// Ce qui passe à l'antenne à `instant`
    ///
    /// Une journée absente de l'horloge est d'abord cherchée dans le stockage,
    /// puis construite si elle n'a jamais été publiée. `NoScheduleYet` n'est
    /// pas rattrapé par une construction : l'instant précède la première
    /// journée diffusée.
    pub async fn tune(&self, instant: DateTime<Utc>) -> Result<Airing> {
        match self.clock().resolve(instant) {
            Ok(airing) => Ok(airing),
            Err(ClockError::ScheduleNotBuilt { .. }) => {
                info!(channel = %self.name, instant = %instant, "No schedule on air, building on demand");
                self.ensure_window(self.day_window(instant)).await?;
                Ok(self.clock().resolve(instant)?)
            }
            Err(err @ ClockError::NoScheduleYet { .. }) => {
                let window = self.day_window(instant);
                match self.schedules.latest(&window.id()).await? {
                    Some(day) => Ok(self.install(self.clock().with_day(day)).resolve(instant)?),
                    None => Err(Error::Clock(err)),
                }
            }
        }
    }

    /// Programme courant et suivant, pour un bandeau d'information
    pub async fn now_and_next(&self, instant: DateTime<Utc>) -> Result<NowNext> {
        self.tune(instant).await?;
        let clock = self.clock();
        match clock.now_and_next(instant) {
            Ok(mut info) if info.next.is_none() => {
                // Le suivant peut se trouver dans la journée d'après
                let after = clock.latest();
                if let Some(next_start) = after {
                    if let Some(day) = self.schedules.latest(&self.day_window(next_start).id()).await? {
                        info.next = day.primaries().next().cloned();
                    }
                }
                Ok(info)
            }
            other => Ok(other?),
        }
    }
}
