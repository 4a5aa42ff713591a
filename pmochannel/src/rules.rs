//! Règles de programmation par tranche horaire (day-parts)
//!
//! Le schéma YAML fait partie du contrat du cœur ; son chargement (fichier,
//! pmoconfig, tests) est laissé à l'appelant. Les tranches sont une table
//! ordonnée d'enregistrements explicites, résolue par inclusion de plage.

use crate::error::BuildError;
use chrono::{DateTime, FixedOffset, NaiveTime, Offset, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Granularité maximale d'un créneau (une semaine)
pub const MAX_SLOT_GRANULARITY_SECS: u64 = 7 * 86_400;

/// Période de repos maximale (dix ans)
pub const MAX_COOL_DOWN_SECS: u64 = 3_650 * 86_400;

/// Durée en secondes, saturée à `TimeDelta::MAX` si elle n'est pas représentable
fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// Politique appliquée quand tous les candidats sont en période de repos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoolDownPolicy {
    /// Refuser la construction (`Underfill`)
    #[default]
    Strict,
    /// Prendre le candidat diffusé le moins récemment
    LeastRecentlyAired,
}

/// Une tranche horaire et ses règles de sélection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPart {
    pub name: String,
    pub start: NaiveTime,
    /// Borne exclusive ; `end <= start` traverse minuit, `end == start` couvre la journée
    pub end: NaiveTime,
    /// Catégories éligibles, par ordre de priorité
    pub categories: Vec<String>,
    /// Catégories de remplissage (surcharge celles du jeu de règles)
    #[serde(default)]
    pub filler: Vec<String>,
    #[serde(default)]
    pub cool_down_secs: u64,
    #[serde(default)]
    pub filler_cool_down_secs: u64,
}

impl DayPart {
    pub fn new(name: impl Into<String>, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            categories: Vec::new(),
            filler: Vec::new(),
            cool_down_secs: 0,
            filler_cool_down_secs: 0,
        }
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filler<I, S>(mut self, filler: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filler = filler.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cool_down(mut self, secs: u64) -> Self {
        self.cool_down_secs = secs;
        self
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start == self.end {
            true
        } else if self.start < self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    pub fn cool_down(&self) -> TimeDelta {
        seconds(self.cool_down_secs)
    }

    pub fn filler_cool_down(&self) -> TimeDelta {
        seconds(self.filler_cool_down_secs)
    }
}

/// Jeu de règles complet d'une chaîne
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub version: String,
    #[serde(default = "RuleSet::default_granularity")]
    pub slot_granularity_secs: u64,
    #[serde(default)]
    pub utc_offset_secs: i32,
    /// Début de la journée de diffusion (heure locale)
    #[serde(default = "RuleSet::default_day_start")]
    pub day_start: NaiveTime,
    #[serde(default = "RuleSet::default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "RuleSet::default_max_fill_steps")]
    pub max_fill_steps: usize,
    #[serde(default)]
    pub cool_down_policy: CoolDownPolicy,
    #[serde(default)]
    pub realign_after_overrun: bool,
    /// Catégories de remplissage par défaut
    #[serde(default)]
    pub filler: Vec<String>,
    pub day_parts: Vec<DayPart>,
}

impl RuleSet {
    const fn default_granularity() -> u64 {
        1800
    }

    fn default_day_start() -> NaiveTime {
        NaiveTime::MIN
    }

    const fn default_max_attempts() -> usize {
        16
    }

    const fn default_max_fill_steps() -> usize {
        10_000
    }

    pub fn new(day_parts: Vec<DayPart>) -> Self {
        Self {
            version: String::new(),
            slot_granularity_secs: Self::default_granularity(),
            utc_offset_secs: 0,
            day_start: Self::default_day_start(),
            max_attempts: Self::default_max_attempts(),
            max_fill_steps: Self::default_max_fill_steps(),
            cool_down_policy: CoolDownPolicy::default(),
            realign_after_overrun: false,
            filler: Vec::new(),
            day_parts,
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, BuildError> {
        let rules: RuleSet =
            serde_yaml::from_str(yaml).map_err(|e| BuildError::InvalidRuleSet(e.to_string()))?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.slot_granularity_secs == 0 {
            return Err(BuildError::InvalidRuleSet(
                "slot granularity must be positive".into(),
            ));
        }
        if self.slot_granularity_secs > MAX_SLOT_GRANULARITY_SECS {
            return Err(BuildError::InvalidRuleSet(format!(
                "slot granularity {}s exceeds {}s",
                self.slot_granularity_secs, MAX_SLOT_GRANULARITY_SECS
            )));
        }
        if self.day_parts.is_empty() {
            return Err(BuildError::InvalidRuleSet("no day-part defined".into()));
        }
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidRuleSet(
                "max_attempts must be positive".into(),
            ));
        }
        if FixedOffset::east_opt(self.utc_offset_secs).is_none() {
            return Err(BuildError::InvalidRuleSet(format!(
                "UTC offset {}s out of range",
                self.utc_offset_secs
            )));
        }
        for part in &self.day_parts {
            if part.categories.is_empty() {
                return Err(BuildError::InvalidRuleSet(format!(
                    "day-part {} has no category",
                    part.name
                )));
            }
            for (field, secs) in [
                ("cool_down_secs", part.cool_down_secs),
                ("filler_cool_down_secs", part.filler_cool_down_secs),
            ] {
                if secs > MAX_COOL_DOWN_SECS {
                    return Err(BuildError::InvalidRuleSet(format!(
                        "day-part {}: {} {}s exceeds {}s",
                        part.name, field, secs, MAX_COOL_DOWN_SECS
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn granularity(&self) -> TimeDelta {
        seconds(self.slot_granularity_secs.min(MAX_SLOT_GRANULARITY_SECS))
    }

    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_secs).unwrap_or_else(|| Utc.fix())
    }

    /// Heure locale d'un instant selon le décalage configuré
    pub fn local_time(&self, instant: DateTime<Utc>) -> NaiveTime {
        instant.with_timezone(&self.offset()).time()
    }

    /// Première tranche (dans l'ordre de la table) couvrant l'instant
    pub fn day_part_at(&self, instant: DateTime<Utc>) -> Option<&DayPart> {
        let time = self.local_time(instant);
        self.day_parts.iter().find(|part| part.contains(time))
    }

    /// Catégories de remplissage effectives d'une tranche
    pub fn filler_for<'a>(&'a self, part: &'a DayPart) -> &'a [String] {
        if !part.filler.is_empty() {
            &part.filler
        } else if !self.filler.is_empty() {
            &self.filler
        } else {
            &part.categories
        }
    }

    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Version estampillée sur chaque grille construite
    pub fn rule_version(&self) -> String {
        if self.version.is_empty() {
            format!("sha256:{}", &self.fingerprint()[..16])
        } else {
            self.version.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_day_part_ranges() {
        let morning = DayPart::new("morning", hm(6, 0), hm(12, 0));
        assert!(morning.contains(hm(6, 0)));
        assert!(morning.contains(hm(11, 59)));
        assert!(!morning.contains(hm(12, 0)));

        let night = DayPart::new("night", hm(22, 0), hm(6, 0));
        assert!(night.contains(hm(23, 0)));
        assert!(night.contains(hm(0, 0)));
        assert!(night.contains(hm(5, 59)));
        assert!(!night.contains(hm(6, 0)));

        let all = DayPart::new("all", hm(0, 0), hm(0, 0));
        assert!(all.contains(hm(13, 37)));
    }

    #[test]
    fn test_day_part_lookup_uses_offset_and_table_order() {
        let mut rules = RuleSet::new(vec![
            DayPart::new("prime", hm(20, 0), hm(23, 0)).with_categories(["movies"]),
            DayPart::new("all", hm(0, 0), hm(0, 0)).with_categories(["reruns"]),
        ]);
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 19, 30, 0).unwrap();
        assert_eq!(rules.day_part_at(instant).unwrap().name, "all");

        rules.utc_offset_secs = 3600;
        assert_eq!(rules.day_part_at(instant).unwrap().name, "prime");
    }

    #[test]
    fn test_yaml_schema() {
        let yaml = r#"
version: "weekday-v1"
slot_granularity_secs: 1800
day_start: "06:00:00"
cool_down_policy: least_recently_aired
filler: [commercials]
day_parts:
  - name: morning
    start: "06:00:00"
    end: "12:00:00"
    categories: [cartoons, sitcoms]
    cool_down_secs: 86400
"#;
        let rules = RuleSet::from_yaml_str(yaml).unwrap();
        assert_eq!(rules.rule_version(), "weekday-v1");
        assert_eq!(rules.cool_down_policy, CoolDownPolicy::LeastRecentlyAired);
        assert_eq!(rules.day_start, hm(6, 0));
        assert_eq!(rules.max_attempts, 16);
        let part = &rules.day_parts[0];
        assert_eq!(rules.filler_for(part), &["commercials".to_string()]);
        assert_eq!(part.cool_down(), TimeDelta::days(1));
    }

    #[test]
    fn test_validation() {
        let rules = RuleSet::new(vec![DayPart::new("empty", hm(0, 0), hm(0, 0))]);
        assert!(matches!(rules.validate(), Err(BuildError::InvalidRuleSet(_))));

        assert!(RuleSet::new(Vec::new()).validate().is_err());

        let unversioned =
            RuleSet::new(vec![DayPart::new("all", hm(0, 0), hm(0, 0)).with_categories(["a"])]);
        assert!(unversioned.validate().is_ok());
        assert!(unversioned.rule_version().starts_with("sha256:"));
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        let huge = "10000000000000000";
        let granularity = format!(
            "slot_granularity_secs: {huge}\nday_parts:\n  - {{name: all, start: \"00:00:00\", end: \"00:00:00\", categories: [a]}}\n"
        );
        assert!(matches!(
            RuleSet::from_yaml_str(&granularity),
            Err(BuildError::InvalidRuleSet(_))
        ));

        let cool_down = format!(
            "day_parts:\n  - {{name: all, start: \"00:00:00\", end: \"00:00:00\", categories: [a], cool_down_secs: {huge}}}\n"
        );
        assert!(matches!(
            RuleSet::from_yaml_str(&cool_down),
            Err(BuildError::InvalidRuleSet(_))
        ));

        // Les accesseurs ne paniquent pas, même sur des règles non validées
        let mut rules =
            RuleSet::new(vec![DayPart::new("all", hm(0, 0), hm(0, 0)).with_categories(["a"])]);
        rules.slot_granularity_secs = u64::MAX;
        rules.day_parts[0].cool_down_secs = u64::MAX;
        assert_eq!(rules.granularity(), TimeDelta::days(7));
        assert_eq!(rules.day_parts[0].cool_down(), TimeDelta::MAX);
        assert!(rules.validate().is_err());
    }
}
