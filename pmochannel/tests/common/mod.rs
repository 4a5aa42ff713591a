//! Helpers shared by the pmochannel integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use pmochannel::{
    CancellationToken, CatalogSnapshot, ContentClass, ContentItem, DayPart, JournalEntry,
    LedgerCommit, LedgerStore, MemoryStore, RotationCursor, RuleSet, StoreError, TimeWindow,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
}

pub fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub fn window(from: DateTime<Utc>, to: DateTime<Utc>) -> TimeWindow {
    TimeWindow::new(from, to).unwrap()
}

pub fn item(id: &str, class: ContentClass, category: &str, minutes: i64) -> ContentItem {
    ContentItem::new(id, class, category, TimeDelta::minutes(minutes))
}

/// A, B, C : trois spots de 10 minutes dans `commercial-block`
pub fn commercial_block_catalog() -> Arc<CatalogSnapshot> {
    Arc::new(
        CatalogSnapshot::new(
            "commercials-v1",
            ["A", "B", "C"]
                .into_iter()
                .map(|id| item(id, ContentClass::Commercial, "commercial-block", 10)),
        )
        .unwrap(),
    )
}

pub fn commercial_block_rules() -> RuleSet {
    RuleSet::new(vec![
        DayPart::new("all-day", NaiveTime::MIN, NaiveTime::MIN).with_categories(["commercial-block"])
    ])
}

/// Une série de 22 minutes, des spots de 2 et 3 minutes et des jingles de 30 s
pub fn sitcom_catalog(episodes: u32) -> Arc<CatalogSnapshot> {
    let mut items: Vec<ContentItem> = (1..=episodes)
        .map(|n| {
            item(&format!("sitcom-s01e{n:02}"), ContentClass::Program, "sitcom", 22)
                .with_episode(n)
                .with_title(format!("Episode {n}"))
        })
        .collect();
    items.push(item("spot-soda", ContentClass::Commercial, "ads", 3));
    items.push(item("spot-car", ContentClass::Commercial, "ads", 2));
    items.push(item("spot-bank", ContentClass::Commercial, "ads", 3));
    items.push(ContentItem::new(
        "jingle",
        ContentClass::Bumper,
        "bumpers",
        TimeDelta::seconds(30),
    ));
    Arc::new(CatalogSnapshot::new("sitcom-v1", items).unwrap())
}

pub fn sitcom_rules() -> RuleSet {
    let mut rules = RuleSet::new(vec![
        DayPart::new("all-day", NaiveTime::MIN, NaiveTime::MIN).with_categories(["sitcom"])
    ]);
    rules.filler = vec!["ads".into(), "bumpers".into()];
    rules
}

pub fn ids(entries: &[pmochannel::ScheduleEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.item_id.as_str()).collect()
}

/// Stockage qui échoue (ou annule) après un nombre donné de validations
///
/// Simule un arrêt brutal au milieu d'une construction : les validations
/// précédentes sont durables, la suivante n'est jamais écrite.
pub struct FailingStore {
    inner: MemoryStore,
    commits: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    fail_clear: AtomicBool,
    pub observed: Mutex<HashMap<String, usize>>,
}

impl FailingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            commits: AtomicUsize::new(0),
            fail_after: Mutex::new(None),
            cancel_after: Mutex::new(None),
            fail_clear: AtomicBool::new(false),
            observed: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail_after(&self, commits: usize) {
        *self.fail_after.lock().unwrap() = Some(commits);
    }

    pub fn cancel_after(&self, commits: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((commits, token));
    }

    /// L'effacement du journal échoue, comme un arrêt juste après la publication
    pub fn fail_journal_clear(&self, fail: bool) {
        self.fail_clear.store(fail, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        *self.fail_after.lock().unwrap() = None;
        self.fail_clear.store(false, Ordering::SeqCst);
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerStore for FailingStore {
    async fn load_cursors(&self) -> Result<Vec<RotationCursor>, StoreError> {
        self.inner.load_cursors().await
    }

    async fn load_airings(&self) -> Result<HashMap<String, DateTime<Utc>>, StoreError> {
        self.inner.load_airings().await
    }

    async fn save_cursor(&self, cursor: &RotationCursor) -> Result<(), StoreError> {
        self.inner.save_cursor(cursor).await
    }

    async fn commit(&self, commit: &LedgerCommit) -> Result<(), StoreError> {
        let limit = *self.fail_after.lock().unwrap();
        if let Some(limit) = limit {
            if self.commits() >= limit {
                return Err(StoreError::Persistence("injected crash".into()));
            }
        }

        self.inner.commit(commit).await?;
        let done = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .observed
            .lock()
            .unwrap()
            .entry(commit.item_id.clone())
            .or_default() += 1;

        if let Some((limit, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if done >= *limit {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn load_journal(&self, window_id: &str) -> Result<Vec<JournalEntry>, StoreError> {
        self.inner.load_journal(window_id).await
    }

    async fn clear_journal(&self, window_id: &str) -> Result<(), StoreError> {
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(StoreError::Persistence("injected crash".into()));
        }
        self.inner.clear_journal(window_id).await
    }
}
