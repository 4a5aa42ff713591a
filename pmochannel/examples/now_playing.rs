//! Example: Tune into a small demo channel and show what is on air
//!
//! This example demonstrates:
//! - Building a catalog snapshot and a day-part rule set
//! - Opening a channel backed by a SQLite database
//! - Logging configured from pmoconfig (`host.logger.*`, overridable with RUST_LOG)
//! - Preparing `channel.build_ahead_days` broadcast days ahead
//! - Tuning in "live" at the current instant
//! - Displaying the now/next infobar and the player seek instruction
//!
//! Run with: cargo run --example now_playing [database path]

use chrono::{NaiveTime, TimeDelta, Utc};
use pmochannel::{
    CatalogSnapshot, Channel, ContentClass, ContentItem, DayPart, Result, RuleSet, StaticCatalog,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn demo_catalog() -> Result<CatalogSnapshot> {
    let mut items = Vec::new();
    for n in 1..=6 {
        items.push(
            ContentItem::new(
                format!("cartoon-{n:02}"),
                ContentClass::Program,
                "cartoons",
                TimeDelta::minutes(11),
            )
            .with_episode(n)
            .with_title(format!("Cartoon #{n}"))
            .with_media(format!("/media/cartoons/ep{n:02}.mkv")),
        );
        items.push(
            ContentItem::new(
                format!("sitcom-{n:02}"),
                ContentClass::Program,
                "sitcoms",
                TimeDelta::minutes(22),
            )
            .with_episode(n)
            .with_title(format!("Sitcom S01E{n:02}"))
            .with_media(format!("/media/sitcom/s01e{n:02}.mkv")),
        );
    }
    for (id, secs) in [("soda", 30), ("car", 60), ("cereal", 30), ("bank", 45)] {
        items.push(
            ContentItem::new(
                format!("ad-{id}"),
                ContentClass::Commercial,
                "commercials",
                TimeDelta::seconds(secs),
            )
            .with_media(format!("/media/ads/{id}.mp4")),
        );
    }
    items.push(ContentItem::new(
        "bumper-station-id",
        ContentClass::Bumper,
        "bumpers",
        TimeDelta::seconds(15),
    ));

    Ok(CatalogSnapshot::new("demo-1", items)?)
}

fn init_logging() {
    let config = pmoconfig::get_config();
    let level = config
        .get_log_min_level()
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase();
    let enable_console = config.get_log_enable_console().unwrap_or(true);

    if enable_console {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn demo_rules() -> RuleSet {
    let mut rules = RuleSet::new(vec![
        DayPart::new(
            "morning",
            NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN),
            NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN),
        )
        .with_categories(["cartoons", "sitcoms"]),
        DayPart::new("rest-of-day", NaiveTime::MIN, NaiveTime::MIN)
            .with_categories(["sitcoms"])
            .with_cool_down(3600),
    ]);
    rules.version = "demo-rules-1".into();
    rules.filler = vec!["commercials".into(), "bumpers".into()];
    rules
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let db_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("pmochannel-demo.db"));

    println!("PMOChannel - Now Playing");
    println!("========================\n");

    let build_ahead = pmoconfig::get_config().get_build_ahead_days()?;
    let channel = Channel::with_sqlite(
        "demo",
        demo_rules(),
        Arc::new(StaticCatalog(Arc::new(demo_catalog()?))),
        &db_path,
    )?
    .with_build_ahead(build_ahead);

    let now = Utc::now();
    let prepared = channel.prepare(now).await?;
    println!("Prepared {} broadcast day(s)\n", prepared.len());
    let info = channel.now_and_next(now).await?;
    let airing = &info.now;

    println!("Channel: {} (database: {})", channel.name(), db_path.display());
    println!("Now Playing:");
    println!(
        "  {} [{}]",
        airing.entry.title.as_deref().unwrap_or(&airing.entry.item_id),
        airing.entry.category
    );
    println!(
        "  {} -> {}",
        airing.entry.start.format("%H:%M:%S"),
        airing.entry.end.format("%H:%M:%S")
    );

    let instruction = airing.instruction();
    println!("  Media: {}", instruction.media);
    println!(
        "  Seek to {:.1}s, {:.1}s remaining\n",
        instruction.seek.as_secs_f64(),
        instruction.remaining.as_secs_f64()
    );

    if let Some(next) = &info.next {
        println!("Up Next:");
        println!(
            "  {} at {}",
            next.title.as_deref().unwrap_or(&next.item_id),
            next.start.format("%H:%M")
        );
    }

    println!("\nGuide (next 2 hours):");
    for entry in channel.clock().guide(now, now + TimeDelta::hours(2)) {
        println!(
            "  {}  {}",
            entry.start.format("%H:%M"),
            entry.title.as_deref().unwrap_or(&entry.item_id)
        );
    }

    Ok(())
}
