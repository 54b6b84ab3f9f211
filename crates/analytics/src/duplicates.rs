//! Duplicate keyword detection across an account.

use std::collections::BTreeMap;

use campaign_core::types::{
    Keyword, KeywordStatus, MatchType, Priority, ProposedChange, Recommendation,
    RecommendationStatus, RecommendationType,
};
use campaign_core::{CampaignError, CampaignResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Case-fold keyword text and strip match-type syntax (`"..."`, `[...]`, `+word`).
pub fn normalize_keyword(text: &str) -> String {
    text.to_lowercase()
        .replace(['"', '[', ']', '+'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keywords that share the same normalized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub normalized_text: String,
    /// Distinct match types present, narrowest last.
    pub match_types: Vec<MatchType>,
    pub campaign_ids: Vec<Uuid>,
    pub instances: Vec<Keyword>,
}

impl DuplicateGroup {
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn total_cost(&self) -> f64 {
        self.instances.iter().map(|k| k.cost).sum()
    }

    pub fn average_cost(&self) -> f64 {
        if self.instances.is_empty() {
            0.0
        } else {
            self.total_cost() / self.instances.len() as f64
        }
    }

    pub fn is_cross_campaign(&self) -> bool {
        self.campaign_ids.len() > 1
    }

    pub fn has_match_type_conflict(&self) -> bool {
        self.match_types.len() > 1
    }

    /// Spend attributable to redundant instances: every instance but one.
    pub fn potential_savings(&self) -> f64 {
        self.instance_count().saturating_sub(1) as f64 * self.average_cost().max(0.0)
    }
}

/// The instance a duplicate group should keep and pause recommendations for the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionPlan {
    pub normalized_text: String,
    pub keep: Uuid,
    pub pause: Vec<Recommendation>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateDetector;

impl DuplicateDetector {
    pub fn new() -> Self {
        Self
    }

    /// Group active keywords by normalized text regardless of match type or campaign.
    pub fn find_duplicates(&self, keywords: &[Keyword]) -> Vec<DuplicateGroup> {
        let mut grouped: BTreeMap<String, Vec<Keyword>> = BTreeMap::new();
        for keyword in keywords {
            if keyword.status == KeywordStatus::Removed {
                continue;
            }
            let text = normalize_keyword(&keyword.text);
            if text.is_empty() {
                continue;
            }
            grouped.entry(text).or_default().push(keyword.clone());
        }

        let groups: Vec<DuplicateGroup> = grouped
            .into_iter()
            .filter(|(_, instances)| instances.len() > 1)
            .map(|(normalized_text, mut instances)| {
                instances.sort_by_key(|k| (k.campaign_id, k.id));
                let mut match_types: Vec<MatchType> = instances.iter().map(|k| k.match_type).collect();
                match_types.sort();
                match_types.dedup();
                let mut campaign_ids: Vec<Uuid> = instances.iter().map(|k| k.campaign_id).collect();
                campaign_ids.sort();
                campaign_ids.dedup();
                DuplicateGroup {
                    normalized_text,
                    match_types,
                    campaign_ids,
                    instances,
                }
            })
            .collect();

        metrics::counter!("duplicates.groups_found").increment(groups.len() as u64);
        debug!(keywords = keywords.len(), groups = groups.len(), "Duplicate scan completed");
        groups
    }

    /// Groups whose text appears in more than one campaign.
    pub fn find_cross_campaign_duplicates(&self, keywords: &[Keyword]) -> Vec<DuplicateGroup> {
        self.find_duplicates(keywords)
            .into_iter()
            .filter(DuplicateGroup::is_cross_campaign)
            .collect()
    }

    /// Groups whose text exists under several match types, even within one campaign.
    pub fn find_match_type_conflicts(&self, keywords: &[Keyword]) -> Vec<DuplicateGroup> {
        self.find_duplicates(keywords)
            .into_iter()
            .filter(DuplicateGroup::has_match_type_conflict)
            .collect()
    }

    pub fn calculate_potential_savings(&self, groups: &[DuplicateGroup]) -> f64 {
        groups.iter().map(DuplicateGroup::potential_savings).sum()
    }

    /// Keep the instance with the most conversions (then lowest cost, then id)
    /// and propose pausing every other one.
    pub fn resolution_plan(&self, group: &DuplicateGroup) -> CampaignResult<ResolutionPlan> {
        let keep = group
            .instances
            .iter()
            .max_by(|a, b| {
                a.conversions
                    .total_cmp(&b.conversions)
                    .then_with(|| b.cost.total_cmp(&a.cost))
                    .then_with(|| b.id.cmp(&a.id))
            })
            .ok_or_else(|| {
                CampaignError::Validation(format!("duplicate group '{}' is empty", group.normalized_text))
            })?;

        let pause = group
            .instances
            .iter()
            .filter(|k| k.id != keep.id)
            .map(|k| Recommendation {
                id: Uuid::new_v4(),
                recommendation_type: RecommendationType::PauseKeyword,
                campaign_id: k.campaign_id,
                proposed_change: ProposedChange::PauseKeyword {
                    keyword_id: k.id,
                    keyword_text: k.text.clone(),
                },
                status: RecommendationStatus::Pending,
                priority: Priority::Medium,
                estimated_impact: Some(k.cost),
                created_at: Utc::now(),
            })
            .collect();

        Ok(ResolutionPlan {
            normalized_text: group.normalized_text.clone(),
            keep: keep.id,
            pause,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT: u128 = 1;

    fn make_keyword(id: u128, campaign: u128, text: &str, match_type: MatchType, cost: f64) -> Keyword {
        Keyword {
            id: Uuid::from_u128(id),
            account_id: Uuid::from_u128(ACCOUNT),
            campaign_id: Uuid::from_u128(campaign),
            ad_group_id: None,
            text: text.into(),
            match_type,
            status: KeywordStatus::Enabled,
            cost,
            clicks: 10,
            conversions: 1.0,
        }
    }

    #[test]
    fn test_normalize_strips_match_syntax() {
        assert_eq!(normalize_keyword("  Running   Shoes "), "running shoes");
        assert_eq!(normalize_keyword("\"running shoes\""), "running shoes");
        assert_eq!(normalize_keyword("[Running Shoes]"), "running shoes");
        assert_eq!(normalize_keyword("+running +shoes"), "running shoes");
    }

    #[test]
    fn test_running_shoes_across_campaigns_and_match_types() {
        let detector = DuplicateDetector::new();
        let keywords = vec![
            make_keyword(10, 100, "running shoes", MatchType::Broad, 40.0),
            make_keyword(11, 200, "\"Running Shoes\"", MatchType::Phrase, 60.0),
            make_keyword(12, 100, "trail shoes", MatchType::Exact, 15.0),
        ];

        let cross = detector.find_cross_campaign_duplicates(&keywords);
        assert_eq!(cross.len(), 1);
        assert_eq!(cross[0].normalized_text, "running shoes");
        assert_eq!(cross[0].campaign_ids, vec![Uuid::from_u128(100), Uuid::from_u128(200)]);

        let conflicts = detector.find_match_type_conflicts(&keywords);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].match_types, vec![MatchType::Broad, MatchType::Phrase]);
    }

    #[test]
    fn test_match_type_conflict_within_one_campaign() {
        let detector = DuplicateDetector::new();
        let keywords = vec![
            make_keyword(10, 100, "running shoes", MatchType::Broad, 40.0),
            make_keyword(11, 100, "[running shoes]", MatchType::Exact, 60.0),
        ];
        assert!(detector.find_cross_campaign_duplicates(&keywords).is_empty());
        assert_eq!(detector.find_match_type_conflicts(&keywords).len(), 1);
    }

    #[test]
    fn test_removed_keywords_are_ignored() {
        let detector = DuplicateDetector::new();
        let mut removed = make_keyword(11, 200, "running shoes", MatchType::Phrase, 60.0);
        removed.status = KeywordStatus::Removed;
        let keywords = vec![make_keyword(10, 100, "running shoes", MatchType::Broad, 40.0), removed];
        assert!(detector.find_duplicates(&keywords).is_empty());
    }

    #[test]
    fn test_potential_savings_scales_with_instances() {
        let detector = DuplicateDetector::new();
        let mut previous = -1.0;
        for n in 1..=5u128 {
            let keywords: Vec<Keyword> = (0..n)
                .map(|i| make_keyword(i, 100 + i, "running shoes", MatchType::Broad, 50.0))
                .collect();
            let groups = detector.find_duplicates(&keywords);
            let savings = detector.calculate_potential_savings(&groups);
            assert_eq!(savings, (n as f64 - 1.0) * 50.0);
            assert!(savings >= 0.0);
            assert!(savings > previous);
            previous = savings;
        }
    }

    #[test]
    fn test_resolution_plan_keeps_best_instance() {
        let detector = DuplicateDetector::new();
        let mut best = make_keyword(11, 200, "running shoes", MatchType::Phrase, 60.0);
        best.conversions = 4.0;
        let keywords = vec![
            make_keyword(10, 100, "running shoes", MatchType::Broad, 40.0),
            best,
            make_keyword(12, 300, "running shoes", MatchType::Exact, 20.0),
        ];
        let group = detector.find_duplicates(&keywords).remove(0);
        let plan = detector.resolution_plan(&group).unwrap();

        assert_eq!(plan.keep, Uuid::from_u128(11));
        assert_eq!(plan.pause.len(), 2);
        for rec in &plan.pause {
            assert_eq!(rec.recommendation_type, RecommendationType::PauseKeyword);
            assert_eq!(rec.status, RecommendationStatus::Pending);
            assert!(rec.validate().is_ok());
        }
    }

    #[test]
    fn test_resolution_plan_breaks_ties_on_cost() {
        let detector = DuplicateDetector::new();
        let keywords = vec![
            make_keyword(10, 100, "running shoes", MatchType::Broad, 40.0),
            make_keyword(11, 200, "running shoes", MatchType::Broad, 25.0),
        ];
        let group = detector.find_duplicates(&keywords).remove(0);
        assert_eq!(detector.resolution_plan(&group).unwrap().keep, Uuid::from_u128(11));
    }
}
