//! Planification du remplissage exact d'un créneau
//!
//! Recherche en profondeur bornée sur les rotations des catégories de
//! remplissage : on préfère l'élément qui termine exactement le créneau, puis
//! le plus long qui rentre (moins de reste), puis l'ordre de rotation. Le plan
//! est calculé avant toute validation ; chaque élément retenu est ensuite
//! validé un par un dans le registre.

use crate::catalog::ContentItem;
use crate::error::LedgerError;
use crate::ledger::RotationLedger;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashSet;
use tracing::warn;

#[derive(Debug, Clone)]
pub(crate) struct FillPick {
    pub category: String,
    pub item: ContentItem,
}

pub(crate) struct FillRequest<'a> {
    pub start: DateTime<Utc>,
    pub length: TimeDelta,
    pub categories: &'a [String],
    pub cool_down: TimeDelta,
    pub max_attempts: usize,
    pub max_steps: usize,
}

struct Lane<'a> {
    category: &'a str,
    items: Vec<&'a ContentItem>,
    offset: usize,
}

struct Candidate {
    lane: usize,
    lookahead: usize,
    position: usize,
    duration_ms: i64,
}

struct Planner<'a> {
    ledger: &'a RotationLedger,
    request: &'a FillRequest<'a>,
    lanes: Vec<Lane<'a>>,
    picks: Vec<(usize, usize)>,
    steps: usize,
    failed: HashSet<(i64, Vec<usize>)>,
}

/// Calcule une suite d'éléments couvrant exactement `request.length`
///
/// Retourne `Ok(None)` si aucune combinaison n'a été trouvée dans le budget.
pub(crate) fn plan_fill(
    ledger: &RotationLedger,
    request: &FillRequest<'_>,
) -> Result<Option<Vec<FillPick>>, LedgerError> {
    if request.length <= TimeDelta::zero() {
        return Ok(Some(Vec::new()));
    }

    let mut lanes = Vec::with_capacity(request.categories.len());
    let mut exhausted = None;
    for category in request.categories {
        let len = match ledger.rotation_len(category) {
            Ok(len) => len,
            Err(err @ LedgerError::ExhaustedRotation(_)) => {
                warn!(category = %category, "Filler category has nothing to rotate");
                exhausted = Some(err);
                continue;
            }
            Err(err) => return Err(err),
        };
        let offset = ledger.cursor(category)?.next_index;
        let items = (0..len)
            .map(|position| ledger.item_at(category, position))
            .collect::<Result<Vec<_>, _>>()?;
        lanes.push(Lane {
            category: category.as_str(),
            items,
            offset,
        });
    }
    if lanes.is_empty() {
        if let Some(err) = exhausted {
            return Err(err);
        }
    }

    let mut planner = Planner {
        ledger,
        request,
        lanes,
        picks: Vec::new(),
        steps: 0,
        failed: HashSet::new(),
    };

    if !planner.search(request.length.num_milliseconds()) {
        return Ok(None);
    }

    Ok(Some(
        planner
            .picks
            .iter()
            .map(|&(lane, position)| FillPick {
                category: planner.lanes[lane].category.to_string(),
                item: planner.lanes[lane].items[position].clone(),
            })
            .collect(),
    ))
}

impl<'a> Planner<'a> {
    fn elapsed_ms(&self) -> i64 {
        self.picks
            .iter()
            .map(|&(lane, position)| self.lanes[lane].items[position].duration_ms)
            .sum()
    }

    fn is_cooling(&self, item: &ContentItem, at: DateTime<Utc>) -> bool {
        let cool_down = self.request.cool_down;
        if cool_down <= TimeDelta::zero() {
            return false;
        }
        if self.ledger.is_cooling_down(&item.id, at, cool_down) {
            return true;
        }
        let mut cursor = self.request.start;
        for &(lane, position) in &self.picks {
            let picked = self.lanes[lane].items[position];
            if picked.id == item.id && (at - cursor).abs() < cool_down {
                return true;
            }
            cursor += picked.duration();
        }
        false
    }

    fn state_key(&self, remaining_ms: i64) -> (i64, Vec<usize>) {
        (remaining_ms, self.lanes.iter().map(|l| l.offset).collect())
    }

    fn search(&mut self, remaining_ms: i64) -> bool {
        if remaining_ms == 0 {
            return true;
        }
        self.steps += 1;
        if self.steps > self.request.max_steps {
            return false;
        }

        // Sans période de repos, l'état se résume au reste et aux curseurs
        let memoize = self.request.cool_down <= TimeDelta::zero();
        if memoize && self.failed.contains(&self.state_key(remaining_ms)) {
            return false;
        }

        let at = self.request.start + TimeDelta::milliseconds(self.elapsed_ms());
        let mut candidates = Vec::new();
        for (index, lane) in self.lanes.iter().enumerate() {
            let len = lane.items.len();
            for lookahead in 0..len.min(self.request.max_attempts) {
                let position = (lane.offset + lookahead) % len;
                let item = lane.items[position];
                if item.duration_ms <= remaining_ms && !self.is_cooling(item, at) {
                    candidates.push(Candidate {
                        lane: index,
                        lookahead,
                        position,
                        duration_ms: item.duration_ms,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| {
            (b.duration_ms == remaining_ms)
                .cmp(&(a.duration_ms == remaining_ms))
                .then(b.duration_ms.cmp(&a.duration_ms))
                .then(a.lookahead.cmp(&b.lookahead))
                .then(a.lane.cmp(&b.lane))
        });

        let mut tried = HashSet::new();
        for candidate in candidates {
            if !tried.insert((candidate.lane, candidate.duration_ms)) {
                continue;
            }

            let saved = self.lanes[candidate.lane].offset;
            self.lanes[candidate.lane].offset = candidate.position + 1;
            self.picks.push((candidate.lane, candidate.position));

            if self.search(remaining_ms - candidate.duration_ms) {
                return true;
            }

            self.picks.pop();
            self.lanes[candidate.lane].offset = saved;
            if self.steps > self.request.max_steps {
                return false;
            }
        }

        if memoize {
            let key = self.state_key(remaining_ms);
            self.failed.insert(key);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogSnapshot, ContentClass};
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use std::sync::Arc;

    async fn ledger(items: Vec<ContentItem>) -> RotationLedger {
        let catalog = Arc::new(CatalogSnapshot::new("v1", items).unwrap());
        RotationLedger::open(Arc::new(MemoryStore::new()), catalog)
            .await
            .unwrap()
    }

    fn spot(id: &str, category: &str, secs: i64) -> ContentItem {
        ContentItem::new(id, ContentClass::Commercial, category, TimeDelta::seconds(secs))
    }

    fn request<'a>(categories: &'a [String], secs: i64) -> FillRequest<'a> {
        FillRequest {
            start: Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap(),
            length: TimeDelta::seconds(secs),
            categories,
            cool_down: TimeDelta::zero(),
            max_attempts: 16,
            max_steps: 10_000,
        }
    }

    fn ids(plan: &[FillPick]) -> Vec<&str> {
        plan.iter().map(|p| p.item.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_exact_fit_preferred() {
        let ledger = ledger(vec![
            spot("a", "ads", 30),
            spot("b", "ads", 60),
            spot("c", "ads", 45),
        ])
        .await;
        let categories = vec!["ads".to_string()];
        let plan = plan_fill(&ledger, &request(&categories, 45)).unwrap().unwrap();
        assert_eq!(ids(&plan), vec!["c"]);
    }

    #[tokio::test]
    async fn test_backtracks_when_greedy_fails() {
        // 60 s en premier laisse 30 s impossibles à combler ; 50 + 40 convient
        let ledger = ledger(vec![
            spot("a", "ads", 60),
            spot("b", "ads", 50),
            spot("c", "ads", 40),
        ])
        .await;
        let categories = vec!["ads".to_string()];
        let plan = plan_fill(&ledger, &request(&categories, 90)).unwrap().unwrap();
        assert_eq!(ids(&plan), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_impossible_fill() {
        let ledger = ledger(vec![spot("a", "ads", 20), spot("b", "ads", 40)]).await;
        let categories = vec!["ads".to_string()];
        assert!(plan_fill(&ledger, &request(&categories, 30)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cool_down_prevents_repeats() {
        let ledger = ledger(vec![spot("jingle", "bumpers", 10)]).await;
        let categories = vec!["bumpers".to_string()];

        let free = plan_fill(&ledger, &request(&categories, 30)).unwrap().unwrap();
        assert_eq!(ids(&free), vec!["jingle", "jingle", "jingle"]);

        let mut strict = request(&categories, 30);
        strict.cool_down = TimeDelta::minutes(5);
        assert!(plan_fill(&ledger, &strict).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_filler_category_is_skipped() {
        let catalog = Arc::new(
            CatalogSnapshot::new("v1", vec![spot("jingle", "bumpers", 15)])
                .unwrap()
                .with_empty_category("ads"),
        );
        let ledger = RotationLedger::open(Arc::new(MemoryStore::new()), catalog)
            .await
            .unwrap();

        let categories = vec!["ads".to_string(), "bumpers".to_string()];
        let plan = plan_fill(&ledger, &request(&categories, 30)).unwrap().unwrap();
        assert_eq!(ids(&plan), vec!["jingle", "jingle"]);
        assert!(plan.iter().all(|p| p.category == "bumpers"));

        let only_empty = vec!["ads".to_string()];
        assert!(matches!(
            plan_fill(&ledger, &request(&only_empty, 30)),
            Err(LedgerError::ExhaustedRotation(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_filler_category() {
        let ledger = ledger(vec![spot("a", "ads", 20)]).await;
        let categories = vec!["promos".to_string()];
        assert!(matches!(
            plan_fill(&ledger, &request(&categories, 20)),
            Err(LedgerError::InvalidCategory(_))
        ));
    }
}
