//! Extension pour intégrer la chaîne dans pmoconfig
//!
//! Ce module fournit le trait `ChannelConfigExt` qui ajoute à
//! `pmoconfig::Config` l'accès à la base de la chaîne, à son jeu de règles et
//! au délai maximal de construction.
//!
//! # Exemple
//!
//! ```rust,ignore
//! use pmoconfig::get_config;
//! use pmochannel::ChannelConfigExt;
//!
//! let config = get_config();
//! let db_path = config.channel_db_path()?;
//! let rules = config.channel_rule_set()?;
//! ```

use crate::rules::RuleSet;
use anyhow::{anyhow, Result};
use pmoconfig::Config;
use serde_yaml::{Number, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Répertoire par défaut des données de la chaîne (relatif au config_dir)
const DEFAULT_CHANNEL_DIRECTORY: &str = "channel";

/// Nom par défaut de la base SQLite
const DEFAULT_DATABASE: &str = "channel.db";

/// Délai maximal par défaut d'une construction
const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 120;

/// Trait d'extension pour la configuration de la chaîne
pub trait ChannelConfigExt {
    /// Chemin absolu de la base SQLite (registre et grilles)
    ///
    /// Le répertoire `channel.directory` est géré par `get_managed_dir` : il
    /// peut être relatif au répertoire de configuration et est créé au besoin.
    fn channel_db_path(&self) -> Result<PathBuf>;

    /// Jeu de règles déclaré sous `channel.rules`, validé
    fn channel_rule_set(&self) -> Result<RuleSet>;

    /// Remplace le jeu de règles enregistré
    fn set_channel_rule_set(&self, rules: &RuleSet) -> Result<()>;

    /// Délai après lequel une construction est annulée (default: 120 s)
    fn channel_build_timeout(&self) -> Result<Duration>;

    fn set_channel_build_timeout(&self, timeout: Duration) -> Result<()>;
}

impl ChannelConfigExt for Config {
    fn channel_db_path(&self) -> Result<PathBuf> {
        let directory = self.get_managed_dir(&["channel", "directory"], DEFAULT_CHANNEL_DIRECTORY)?;
        let database = match self.get_value(&["channel", "database"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => DEFAULT_DATABASE.to_string(),
        };
        Ok(PathBuf::from(directory).join(database))
    }

    fn channel_rule_set(&self) -> Result<RuleSet> {
        let value = self.get_value(&["channel", "rules"])?;
        let rules: RuleSet = serde_yaml::from_value(value)
            .map_err(|e| anyhow!("Invalid channel.rules section: {}", e))?;
        rules.validate()?;
        Ok(rules)
    }

    fn set_channel_rule_set(&self, rules: &RuleSet) -> Result<()> {
        rules.validate()?;
        self.set_value(&["channel", "rules"], serde_yaml::to_value(rules)?)
    }

    fn channel_build_timeout(&self) -> Result<Duration> {
        match self.get_value(&["channel", "build_timeout_secs"]) {
            Ok(Value::Number(n)) => Ok(Duration::from_secs(
                n.as_u64().unwrap_or(DEFAULT_BUILD_TIMEOUT_SECS),
            )),
            _ => Ok(Duration::from_secs(DEFAULT_BUILD_TIMEOUT_SECS)),
        }
    }

    fn set_channel_build_timeout(&self, timeout: Duration) -> Result<()> {
        self.set_value(
            &["channel", "build_timeout_secs"],
            Value::Number(Number::from(timeout.as_secs())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{CoolDownPolicy, DayPart};
    use chrono::NaiveTime;

    fn load(dir: &tempfile::TempDir) -> Config {
        Config::load_config(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_embedded_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);

        let db = config.channel_db_path().unwrap();
        assert_eq!(db, dir.path().join("channel").join("channel.db"));
        assert!(dir.path().join("channel").is_dir());

        let rules = config.channel_rule_set().unwrap();
        assert_eq!(rules.slot_granularity_secs, 1800);
        assert_eq!(rules.day_start, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
        assert_eq!(rules.cool_down_policy, CoolDownPolicy::Strict);
        assert_eq!(rules.day_parts.len(), 1);

        assert_eq!(config.channel_build_timeout().unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn test_rule_set_round_trips_through_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);

        let mut rules = RuleSet::new(vec![DayPart::new(
            "prime",
            NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
        )
        .with_categories(["movies"])]);
        rules.version = "prime-v2".into();
        rules.cool_down_policy = CoolDownPolicy::LeastRecentlyAired;
        config.set_channel_rule_set(&rules).unwrap();
        config.set_channel_build_timeout(Duration::from_secs(30)).unwrap();

        let reloaded = load(&dir);
        assert_eq!(reloaded.channel_rule_set().unwrap(), rules);
        assert_eq!(reloaded.channel_build_timeout().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_rules_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir);
        config
            .set_value(&["channel", "rules", "slot_granularity_secs"], Value::Number(Number::from(0u64)))
            .unwrap();
        assert!(config.channel_rule_set().is_err());
    }
}
