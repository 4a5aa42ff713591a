//! Integration tests for the SQLite persistence layer

mod common;

use common::*;
use pmochannel::{
    BroadcastDay, CancellationToken, ContentClass, JournalEntry, LedgerCommit, LedgerStore,
    PlayoutClock, RotationCursor, RotationLedger, ScheduleBuilder, ScheduleEntry, ScheduleStore,
    SlotRole, SqliteStore, StoreError,
};
use std::sync::Arc;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open(&dir.path().join("channel.db")).unwrap())
}

#[tokio::test]
async fn test_ledger_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir);
        let mut ledger = RotationLedger::open(store, commercial_block_catalog())
            .await
            .unwrap();
        ledger.commit("commercial-block", "A", at(6, 0, 0)).await.unwrap();
        ledger.commit("commercial-block", "B", at(6, 10, 0)).await.unwrap();
    }

    let store = open(&dir);
    let ledger = RotationLedger::open(store.clone(), commercial_block_catalog())
        .await
        .unwrap();
    let cursor = ledger.cursor("commercial-block").unwrap();
    assert_eq!(cursor.next_index, 2);
    assert_eq!(cursor.play_count, 2);
    assert_eq!(cursor.last_item.as_deref(), Some("B"));
    assert_eq!(cursor.last_aired, Some(at(6, 10, 0)));
    assert_eq!(ledger.last_aired("A"), Some(at(6, 0, 0)));
}

#[tokio::test]
async fn test_journal_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let window = window(at(6, 0, 0), at(6, 30, 0));
    let spot = item("A", ContentClass::Commercial, "commercial-block", 10);

    store
        .commit(&LedgerCommit {
            cursor: RotationCursor::new("commercial-block"),
            item_id: "A".into(),
            aired_at: at(6, 0, 0),
            journal: Some(JournalEntry {
                window_id: window.id(),
                sequence: 0,
                slot_start: at(6, 0, 0),
                slot_end: at(6, 30, 0),
                entry: ScheduleEntry::from_item(&spot, at(6, 0, 0), SlotRole::Primary),
            }),
        })
        .await
        .unwrap();

    let journal = store.load_journal(&window.id()).await.unwrap();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].entry.end, at(6, 10, 0));
    assert_eq!(journal[0].slot_end, at(6, 30, 0));
    assert!(store.load_journal("other").await.unwrap().is_empty());

    store.clear_journal(&window.id()).await.unwrap();
    assert!(store.load_journal(&window.id()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_published_days_are_append_only() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let window = window(at(6, 0, 0), at(6, 20, 0));
    let day = |first: &str, second: &str| {
        let a = item(first, ContentClass::Program, "x", 10);
        let b = item(second, ContentClass::Program, "x", 10);
        BroadcastDay::new(
            window,
            vec![
                ScheduleEntry::from_item(&a, at(6, 0, 0), SlotRole::Primary),
                ScheduleEntry::from_item(&b, at(6, 10, 0), SlotRole::Primary),
            ],
            "rules-v1",
            "catalog-v1",
        )
        .unwrap()
    };

    let first = store.publish(day("a", "b")).await.unwrap();
    let second = store.publish(day("c", "d")).await.unwrap();
    assert_eq!((first.version(), second.version()), (1, 2));
    assert_eq!(store.versions(&window.id()).await.unwrap(), vec![1, 2]);

    let latest = store.latest(&window.id()).await.unwrap().unwrap();
    assert_eq!(ids(latest.entries()), vec!["c", "d"]);
    assert_eq!(latest.rule_set_version(), "rules-v1");

    let original = store.load_version(&window.id(), 1).await.unwrap().unwrap();
    assert_eq!(ids(original.entries()), vec!["a", "b"]);
    assert!(store.load_version(&window.id(), 3).await.unwrap().is_none());

    let covering = store.covering(at(6, 5, 0), at(7, 0, 0)).await.unwrap();
    assert_eq!(covering.len(), 1);
    assert_eq!(covering[0].version(), 2);
    assert!(store.covering(at(7, 0, 0), at(8, 0, 0)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_restart_resolves_identically() {
    let dir = TempDir::new().unwrap();
    let before = {
        let store = open(&dir);
        let mut ledger = RotationLedger::open(store.clone(), sitcom_catalog(4))
            .await
            .unwrap();
        ScheduleBuilder::new(Arc::new(sitcom_rules()), store.clone())
            .build(
                window(at(0, 0, 0), at(4, 0, 0)),
                &mut ledger,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let clock = PlayoutClock::load(store.as_ref(), at(0, 0, 0), at(4, 0, 0))
            .await
            .unwrap();
        clock.resolve(at(2, 47, 13)).unwrap()
    };

    // Processus relancé : seule la base est conservée
    let store = open(&dir);
    let clock = PlayoutClock::load(store.as_ref(), at(0, 0, 0), at(4, 0, 0))
        .await
        .unwrap();
    assert_eq!(clock.resolve(at(2, 47, 13)).unwrap(), before);
}

#[tokio::test]
async fn test_corrupted_day_is_never_served() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let window = window(at(6, 0, 0), at(6, 10, 0));
    let spot = item("A", ContentClass::Commercial, "commercial-block", 10);
    let day = BroadcastDay::new(
        window,
        vec![ScheduleEntry::from_item(&spot, at(6, 0, 0), SlotRole::Primary)],
        "rules-v1",
        "catalog-v1",
    )
    .unwrap();
    store.publish(day).await.unwrap();

    // Entrée décalée d'une minute : la grille ne couvre plus sa fenêtre
    let shifted = ScheduleEntry::from_item(&spot, at(6, 1, 0), SlotRole::Primary);
    let raw = rusqlite::Connection::open(dir.path().join("channel.db")).unwrap();
    raw.execute(
        "UPDATE broadcast_days SET entries_json = ?1",
        [serde_json::to_string(&vec![shifted]).unwrap()],
    )
    .unwrap();

    assert!(matches!(
        store.latest(&window.id()).await,
        Err(StoreError::Persistence(_))
    ));
    assert!(PlayoutClock::load(store.as_ref(), at(0, 0, 0), at(12, 0, 0))
        .await
        .is_err());
}
