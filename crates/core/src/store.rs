//! In-memory persistence backed by DashMap.
//!
//! Production deployments plug a real data store in behind the same
//! capability traits. This one serves development, the CLI and tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::capabilities::{PerformanceStore, RecommendationStore};
use crate::error::{CampaignError, CampaignResult};
use crate::types::{
    DailyKeywordPerformance, DailySearchTerm, Keyword, MetricSample, PerformanceWindow,
    Recommendation,
};
use crate::updates::RecommendationUpdate;

/// Thread-safe in-memory store for metric history, keywords and recommendations.
pub struct InMemoryStore {
    /// campaign_id -> samples sorted by date
    samples: DashMap<Uuid, Vec<MetricSample>>,
    /// campaign_id -> daily search-term rows
    search_terms: DashMap<Uuid, Vec<DailySearchTerm>>,
    /// campaign_id -> daily keyword rows
    keyword_stats: DashMap<Uuid, Vec<DailyKeywordPerformance>>,
    /// keyword_id -> keyword
    keywords: DashMap<Uuid, Keyword>,
    /// recommendation_id -> recommendation
    recommendations: DashMap<Uuid, Recommendation>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        info!("Optimizer store initialized (in-memory, development mode)");
        Self {
            samples: DashMap::new(),
            search_terms: DashMap::new(),
            keyword_stats: DashMap::new(),
            keywords: DashMap::new(),
            recommendations: DashMap::new(),
        }
    }

    // ─── Metric history ────────────────────────────────────────────────────

    /// Record one day of performance. Samples are immutable once recorded.
    pub fn record_sample(&self, campaign_id: Uuid, sample: MetricSample) -> CampaignResult<()> {
        let mut entry = self.samples.entry(campaign_id).or_default();
        match entry.binary_search_by_key(&sample.date, |s| s.date) {
            Ok(_) => Err(CampaignError::Validation(format!(
                "sample for {} already recorded for campaign {campaign_id}",
                sample.date
            ))),
            Err(pos) => {
                entry.insert(pos, sample);
                Ok(())
            }
        }
    }

    pub fn record_samples(
        &self,
        campaign_id: Uuid,
        samples: impl IntoIterator<Item = MetricSample>,
    ) -> CampaignResult<()> {
        for sample in samples {
            self.record_sample(campaign_id, sample)?;
        }
        Ok(())
    }

    pub fn record_search_terms(
        &self,
        campaign_id: Uuid,
        rows: impl IntoIterator<Item = DailySearchTerm>,
    ) {
        self.search_terms.entry(campaign_id).or_default().extend(rows);
    }

    pub fn record_keyword_performance(
        &self,
        campaign_id: Uuid,
        rows: impl IntoIterator<Item = DailyKeywordPerformance>,
    ) {
        self.keyword_stats.entry(campaign_id).or_default().extend(rows);
    }

    pub fn campaign_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.samples.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    // ─── Keywords ──────────────────────────────────────────────────────────

    pub fn upsert_keyword(&self, keyword: Keyword) {
        self.keywords.insert(keyword.id, keyword);
    }

    // ─── Recommendations ───────────────────────────────────────────────────

    pub fn insert_recommendation(&self, recommendation: Recommendation) -> CampaignResult<()> {
        recommendation.validate()?;
        debug!(id = %recommendation.id, kind = ?recommendation.recommendation_type, "Recommendation stored");
        self.recommendations.insert(recommendation.id, recommendation);
        Ok(())
    }

    pub fn list_recommendations(&self, campaign_id: Option<Uuid>) -> Vec<Recommendation> {
        let mut recs: Vec<Recommendation> = self
            .recommendations
            .iter()
            .filter(|r| campaign_id.map_or(true, |c| r.campaign_id == c))
            .map(|r| r.value().clone())
            .collect();
        recs.sort_by_key(|r| r.id);
        recs
    }
}

#[async_trait]
impl PerformanceStore for InMemoryStore {
    async fn performance_window(
        &self,
        campaign_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CampaignResult<PerformanceWindow> {
        let samples = self
            .samples
            .get(&campaign_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| CampaignError::not_found("campaign", campaign_id))?;

        let mut window = PerformanceWindow::new(campaign_id, start, end, samples)?;
        if let Some(rows) = self.search_terms.get(&campaign_id) {
            window = window.with_daily_search_terms(rows.value());
        }
        if let Some(rows) = self.keyword_stats.get(&campaign_id) {
            window = window.with_daily_keywords(rows.value());
        }
        Ok(window)
    }

    async fn account_keywords(&self, account_id: Uuid) -> CampaignResult<Vec<Keyword>> {
        let mut keywords: Vec<Keyword> = self
            .keywords
            .iter()
            .filter(|k| k.account_id == account_id)
            .map(|k| k.value().clone())
            .collect();
        keywords.sort_by_key(|k| k.id);
        Ok(keywords)
    }
}

#[async_trait]
impl RecommendationStore for InMemoryStore {
    async fn get_recommendation(&self, id: Uuid) -> CampaignResult<Recommendation> {
        self.recommendations
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| CampaignError::not_found("recommendation", id))
    }

    async fn update_recommendation(
        &self,
        id: Uuid,
        update: RecommendationUpdate,
    ) -> CampaignResult<Recommendation> {
        let mut entry = self
            .recommendations
            .get_mut(&id)
            .ok_or_else(|| CampaignError::not_found("recommendation", id))?;
        update.apply_to(entry.value_mut())?;
        Ok(entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, ProposedChange, RecommendationStatus, RecommendationType};
    use chrono::Utc;

    fn make_sample(day: u32, cost: f64) -> MetricSample {
        MetricSample {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            impressions: 1000,
            clicks: 50,
            cost,
            conversions: 2.0,
            conversion_value: 120.0,
        }
    }

    #[tokio::test]
    async fn test_window_filters_range_and_orders_by_date() {
        let store = InMemoryStore::new();
        let campaign = Uuid::new_v4();
        store
            .record_samples(campaign, vec![make_sample(5, 50.0), make_sample(1, 10.0), make_sample(3, 30.0)])
            .unwrap();

        let window = store
            .performance_window(
                campaign,
                NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            )
            .await
            .unwrap();
        let costs: Vec<f64> = window.samples.iter().map(|s| s.cost).collect();
        assert_eq!(costs, vec![30.0, 50.0]);
    }

    #[tokio::test]
    async fn test_unknown_campaign_is_not_found() {
        let store = InMemoryStore::new();
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let err = store.performance_window(Uuid::new_v4(), day, day).await.unwrap_err();
        assert!(matches!(err, CampaignError::NotFound { .. }));
    }

    #[test]
    fn test_samples_are_immutable_once_recorded() {
        let store = InMemoryStore::new();
        let campaign = Uuid::new_v4();
        store.record_sample(campaign, make_sample(1, 10.0)).unwrap();
        assert!(store.record_sample(campaign, make_sample(1, 99.0)).is_err());
    }

    #[tokio::test]
    async fn test_update_recommendation_compare_and_set() {
        let store = InMemoryStore::new();
        let rec = Recommendation {
            id: Uuid::new_v4(),
            recommendation_type: RecommendationType::PauseKeyword,
            campaign_id: Uuid::new_v4(),
            proposed_change: ProposedChange::PauseKeyword {
                keyword_id: Uuid::new_v4(),
                keyword_text: "free shoes".into(),
            },
            status: RecommendationStatus::Accepted,
            priority: Priority::Medium,
            estimated_impact: None,
            created_at: Utc::now(),
        };
        store.insert_recommendation(rec.clone()).unwrap();

        let claim = RecommendationUpdate::transition(
            RecommendationStatus::Accepted,
            RecommendationStatus::Implementing,
        );
        assert!(store.update_recommendation(rec.id, claim.clone()).await.is_ok());
        // Second claim loses the race.
        assert!(store.update_recommendation(rec.id, claim).await.is_err());
        let stored = store.get_recommendation(rec.id).await.unwrap();
        assert_eq!(stored.status, RecommendationStatus::Implementing);
    }
}
