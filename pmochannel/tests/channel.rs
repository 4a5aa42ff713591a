//! Integration tests for the channel facade

mod common;

use chrono::TimeDelta;
use common::*;
use pmochannel::{Channel, ClockError, Error, ScheduleStore, StaticCatalog};
use std::sync::Arc;
use tempfile::TempDir;

fn sqlite_channel(dir: &TempDir) -> Channel {
    let mut rules = sitcom_rules();
    rules.day_start = hm(6, 0);
    Channel::with_sqlite(
        "retro",
        rules,
        Arc::new(StaticCatalog(sitcom_catalog(4))),
        &dir.path().join("channel.db"),
    )
    .unwrap()
}

#[tokio::test]
async fn test_tune_builds_broadcast_day_on_demand() {
    let dir = TempDir::new().unwrap();
    let channel = sqlite_channel(&dir);

    let airing = channel.tune(at(9, 12, 0)).await.unwrap();
    assert_eq!(airing.entry.start, at(9, 0, 0));
    assert_eq!(airing.offset, TimeDelta::minutes(12));

    // La journée de diffusion va de 06:00 à 06:00
    let clock = channel.clock();
    let day = &clock.days()[0];
    assert_eq!(day.window().start(), at(6, 0, 0));
    assert_eq!(day.window().end(), at(6, 0, 0) + TimeDelta::days(1));

    // 05:00 appartient à la journée précédente, qui n'existe pas encore
    let early = channel.clock().resolve(at(5, 0, 0));
    assert_eq!(
        early,
        Err(ClockError::NoScheduleYet {
            instant: at(5, 0, 0)
        })
    );
}

#[tokio::test]
async fn test_restart_reuses_published_day() {
    let dir = TempDir::new().unwrap();
    let first = sqlite_channel(&dir).tune(at(14, 3, 0)).await.unwrap();

    let restarted = sqlite_channel(&dir);
    assert!(restarted.clock().days().is_empty());
    let second = restarted.tune(at(14, 3, 0)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        restarted.schedules().versions(&first.window_id).await.unwrap(),
        vec![1]
    );
}

#[tokio::test]
async fn test_concurrent_tunes_build_once() {
    let dir = TempDir::new().unwrap();
    let channel = Arc::new(sqlite_channel(&dir));

    let (a, b) = tokio::join!(channel.tune(at(10, 0, 0)), channel.tune(at(11, 0, 0)));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.window_id, b.window_id);
    assert_eq!(
        channel.schedules().versions(&a.window_id).await.unwrap(),
        vec![1]
    );
}

#[tokio::test]
async fn test_build_ahead_and_reload() {
    let dir = TempDir::new().unwrap();
    let channel = sqlite_channel(&dir);

    let days = channel.build_ahead(at(12, 0, 0), 3).await.unwrap();
    assert_eq!(days.len(), 3);
    for pair in days.windows(2) {
        assert_eq!(pair[0].window().end(), pair[1].window().start());
    }

    // Rejouer build_ahead ne reconstruit rien
    let again = channel.build_ahead(at(12, 0, 0), 3).await.unwrap();
    assert!(again.iter().all(|d| d.version() == 1));

    let reloaded = sqlite_channel(&dir);
    let clock = reloaded
        .reload(at(0, 0, 0), at(0, 0, 0) + TimeDelta::days(5))
        .await
        .unwrap();
    assert_eq!(clock.days().len(), 3);
    assert_eq!(clock.earliest(), Some(at(6, 0, 0)));

    let info = reloaded.now_and_next(at(6, 0, 0) + TimeDelta::days(1)).await.unwrap();
    assert_eq!(info.now.offset, TimeDelta::zero());
    assert!(info.next.is_some());
}

#[tokio::test]
async fn test_tune_before_first_day_is_not_built_backwards() {
    let dir = TempDir::new().unwrap();
    let channel = sqlite_channel(&dir);
    channel.tune(at(12, 0, 0)).await.unwrap();

    let result = channel.tune(at(5, 0, 0)).await;
    assert!(matches!(
        result,
        Err(Error::Clock(ClockError::NoScheduleYet { .. }))
    ));
}

#[cfg(feature = "pmoconfig")]
#[tokio::test]
async fn test_channel_from_configuration() {
    use pmochannel::ChannelConfigExt;

    let dir = TempDir::new().unwrap();
    let config = pmoconfig::Config::load_config(dir.path().to_str().unwrap()).unwrap();
    let mut rules = sitcom_rules();
    rules.day_start = hm(6, 0);
    config.set_channel_rule_set(&rules).unwrap();
    config.set_channel_name("retro-tv".to_string()).unwrap();
    config.set_build_ahead_days(2).unwrap();

    let channel =
        Channel::with_config(&config, Arc::new(StaticCatalog(sitcom_catalog(4)))).unwrap();
    assert_eq!(channel.name(), "retro-tv");
    assert_eq!(channel.build_ahead_days(), 2);
    assert!(config.channel_db_path().unwrap().exists());

    let days = channel.prepare(at(12, 0, 0)).await.unwrap();
    assert_eq!(days.len(), 2);
    assert_eq!(days[0].window().start(), at(6, 0, 0));
    assert_eq!(days[1].window().start(), at(6, 0, 0) + TimeDelta::days(1));
    assert!(channel.clock().resolve(at(6, 0, 0) + TimeDelta::hours(30)).is_ok());
}
