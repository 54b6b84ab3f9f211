//! Analytics facade: reads windows and keywords through the persistence
//! capability and runs the pure engines over them.

use std::collections::BTreeMap;
use std::sync::Arc;

use campaign_core::capabilities::{PerformanceStore, RecommendationStore};
use campaign_core::types::{PerformanceWindow, Recommendation};
use campaign_core::{AppConfig, CampaignError, CampaignResult, RecommendationUpdate};
use chrono::{Duration, NaiveDate, Utc};
use tracing::info;
use uuid::Uuid;

use crate::duplicates::{DuplicateDetector, DuplicateGroup};
use crate::forecast::{ForecastModel, Prediction};
use crate::impact::{ImpactProjection, ImpactSimulator, Scenario, SimulationResult};
use crate::statistics::{AnalysisResult, StatisticsEngine};

pub struct AnalyticsService {
    performance: Arc<dyn PerformanceStore>,
    recommendations: Arc<dyn RecommendationStore>,
    statistics: StatisticsEngine,
    forecast: ForecastModel,
    simulator: ImpactSimulator,
    duplicates: DuplicateDetector,
    history_days: u32,
    lookback_days: u32,
    /// Pinned "today"; the current UTC date when unset.
    as_of: Option<NaiveDate>,
}

impl AnalyticsService {
    pub fn new(
        config: &AppConfig,
        performance: Arc<dyn PerformanceStore>,
        recommendations: Arc<dyn RecommendationStore>,
    ) -> Self {
        let statistics = StatisticsEngine::new(config.analysis.clone());
        let forecast = ForecastModel::for_engine(config.forecast.clone(), &statistics);
        Self {
            performance,
            recommendations,
            statistics,
            forecast,
            simulator: ImpactSimulator::new(config.simulation.clone()),
            duplicates: DuplicateDetector::new(),
            history_days: config.forecast.history_days,
            lookback_days: config.simulation.lookback_days,
            as_of: None,
        }
    }

    /// Evaluate windows as if `date` were today.
    pub fn with_as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date);
        self
    }

    pub fn statistics(&self) -> &StatisticsEngine {
        &self.statistics
    }

    pub fn detector(&self) -> &DuplicateDetector {
        &self.duplicates
    }

    fn today(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// The last `days` calendar days, today included.
    async fn window(&self, campaign_id: Uuid, days: u32) -> CampaignResult<PerformanceWindow> {
        if days == 0 {
            return Err(CampaignError::Validation("window must cover at least one day".into()));
        }
        let end = self.today();
        let start = end - Duration::days(i64::from(days) - 1);
        self.performance.performance_window(campaign_id, start, end).await
    }

    // ─── Analysis and forecasting ──────────────────────────────────────────

    pub async fn analyze_performance(&self, campaign_id: Uuid, days: u32) -> CampaignResult<AnalysisResult> {
        let window = self.window(campaign_id, days).await?;
        self.statistics.analyze(&window)
    }

    /// CPA forecast `horizon_days` ahead from the configured history window.
    pub async fn predict_cpa(&self, campaign_id: Uuid, horizon_days: u32) -> CampaignResult<Prediction> {
        if horizon_days == 0 {
            return Err(CampaignError::Validation("forecast horizon must be positive".into()));
        }
        let window = self.window(campaign_id, self.history_days).await?;
        Ok(self.forecast.predict_cpa(&window, horizon_days))
    }

    // ─── Impact ────────────────────────────────────────────────────────────

    pub fn estimate_impact(
        &self,
        recommendation: &Recommendation,
        analysis: &AnalysisResult,
    ) -> CampaignResult<ImpactProjection> {
        self.simulator.estimate_impact(recommendation, analysis)
    }

    /// Analyze every campaign the recommendations touch, simulate their combined
    /// effect and attach the CPA forecast of `campaign_id` at the scenario horizon.
    pub async fn simulate_impact(
        &self,
        campaign_id: Uuid,
        recommendations: &[Recommendation],
        scenario: &Scenario,
    ) -> CampaignResult<SimulationResult> {
        let mut analyses = BTreeMap::new();
        for rec in recommendations {
            if !analyses.contains_key(&rec.campaign_id) {
                let analysis = self.analyze_performance(rec.campaign_id, self.lookback_days).await?;
                analyses.insert(rec.campaign_id, analysis);
            }
        }

        let result = self
            .simulator
            .simulate(campaign_id, recommendations, &analyses, scenario)?;
        let horizon = scenario.horizon_days.max(1);
        let forecast = self.predict_cpa(campaign_id, horizon).await?;
        Ok(result.with_forecast(forecast))
    }

    /// Estimate a stored recommendation and persist the estimate on its record.
    pub async fn record_estimated_impact(&self, recommendation_id: Uuid) -> CampaignResult<Recommendation> {
        let recommendation = self.recommendations.get_recommendation(recommendation_id).await?;
        let analysis = self
            .analyze_performance(recommendation.campaign_id, self.lookback_days)
            .await?;
        let projection = self.simulator.estimate_impact(&recommendation, &analysis)?;

        let updated = self
            .recommendations
            .update_recommendation(
                recommendation_id,
                RecommendationUpdate::estimated_impact(projection.estimated_impact),
            )
            .await?;
        info!(
            recommendation_id = %recommendation_id,
            estimated_impact = projection.estimated_impact,
            "Estimated impact recorded"
        );
        Ok(updated)
    }

    // ─── Duplicates ────────────────────────────────────────────────────────

    pub async fn find_duplicates(&self, account_id: Uuid) -> CampaignResult<Vec<DuplicateGroup>> {
        let keywords = self.performance.account_keywords(account_id).await?;
        Ok(self.duplicates.find_duplicates(&keywords))
    }

    pub async fn find_cross_campaign_duplicates(&self, account_id: Uuid) -> CampaignResult<Vec<DuplicateGroup>> {
        let keywords = self.performance.account_keywords(account_id).await?;
        Ok(self.duplicates.find_cross_campaign_duplicates(&keywords))
    }

    pub async fn find_match_type_conflicts(&self, account_id: Uuid) -> CampaignResult<Vec<DuplicateGroup>> {
        let keywords = self.performance.account_keywords(account_id).await?;
        Ok(self.duplicates.find_match_type_conflicts(&keywords))
    }

    pub fn calculate_potential_savings(&self, groups: &[DuplicateGroup]) -> f64 {
        self.duplicates.calculate_potential_savings(groups)
    }
}
