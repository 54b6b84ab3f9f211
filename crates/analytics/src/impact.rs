//! Impact simulation — deterministic per-type effect models for a single
//! recommendation and ordered, sequential combination of many.
//!
//! Combination is not additive: recommendations are ordered by
//! descending standalone impact (ties by id) and each one is applied to the
//! running baseline left by the previous ones.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use campaign_core::config::SimulationConfig;
use campaign_core::types::{MatchType, ProposedChange, Recommendation, RecommendationType};
use campaign_core::{CampaignError, CampaignResult, RecommendationConflict};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::duplicates::normalize_keyword;
use crate::forecast::Prediction;
use crate::statistics::AnalysisResult;

// ─── Scenario ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    Conservative,
    #[default]
    Expected,
    Optimistic,
}

impl ScenarioKind {
    /// Scale applied to every modelled effect.
    pub fn effect_multiplier(self) -> f64 {
        match self {
            Self::Conservative => 0.5,
            Self::Expected => 1.0,
            Self::Optimistic => 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub kind: ScenarioKind,
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
    /// Apply contradicting recommendations instead of rejecting them.
    #[serde(default)]
    pub allow_conflicts: bool,
}

fn default_horizon_days() -> u32 {
    30
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            kind: ScenarioKind::Expected,
            horizon_days: default_horizon_days(),
            allow_conflicts: false,
        }
    }
}

// ─── Projections ────────────────────────────────────────────────────────────

/// Daily economics of a campaign (or a sum of campaigns).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignBaseline {
    pub daily_cost: f64,
    pub daily_clicks: f64,
    pub daily_conversions: f64,
    pub daily_conversion_value: f64,
}

impl CampaignBaseline {
    pub fn from_analysis(analysis: &AnalysisResult) -> Self {
        let avg = &analysis.daily_averages;
        Self {
            daily_cost: avg.cost,
            daily_clicks: avg.clicks,
            daily_conversions: avg.conversions,
            daily_conversion_value: avg.conversion_value,
        }
    }

    pub fn cpa(&self) -> f64 {
        if self.daily_conversions > 0.0 {
            self.daily_cost / self.daily_conversions
        } else {
            0.0
        }
    }

    pub fn roas(&self) -> f64 {
        if self.daily_cost > 0.0 {
            self.daily_conversion_value / self.daily_cost
        } else {
            0.0
        }
    }

    fn add(&self, other: &CampaignBaseline) -> CampaignBaseline {
        CampaignBaseline {
            daily_cost: self.daily_cost + other.daily_cost,
            daily_clicks: self.daily_clicks + other.daily_clicks,
            daily_conversions: self.daily_conversions + other.daily_conversions,
            daily_conversion_value: self.daily_conversion_value + other.daily_conversion_value,
        }
    }

    fn clamp_non_negative(&mut self) {
        self.daily_cost = self.daily_cost.max(0.0);
        self.daily_clicks = self.daily_clicks.max(0.0);
        self.daily_conversions = self.daily_conversions.max(0.0);
        self.daily_conversion_value = self.daily_conversion_value.max(0.0);
    }
}

/// Change between two baselines, per day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactDeltas {
    pub cost: f64,
    pub conversions: f64,
    pub conversion_value: f64,
    pub cpa: f64,
    pub roas: f64,
}

impl ImpactDeltas {
    pub fn between(before: &CampaignBaseline, after: &CampaignBaseline) -> Self {
        Self {
            cost: after.daily_cost - before.daily_cost,
            conversions: after.daily_conversions - before.daily_conversions,
            conversion_value: after.daily_conversion_value - before.daily_conversion_value,
            cpa: after.cpa() - before.cpa(),
            roas: after.roas() - before.roas(),
        }
    }
}

/// Projected effect of one recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactProjection {
    pub recommendation_id: Uuid,
    pub campaign_id: Uuid,
    pub recommendation_type: RecommendationType,
    pub baseline: CampaignBaseline,
    pub projected: CampaignBaseline,
    pub deltas: ImpactDeltas,
    /// 0.0–1.0, derived from the confidence of the underlying analysis.
    pub confidence: f64,
    /// Magnitude used to order recommendations: cost moved plus conversions moved, in currency.
    pub estimated_impact: f64,
}

/// Combined projection across every campaign touched by a simulation.
///
/// `baseline` and `projected` sum the per-campaign daily figures, so for
/// recommendations on independent campaigns the cost, conversions and
/// conversion_value deltas equal the sum of the per-step deltas. The cpa and
/// roas deltas are ratios of those summed figures and do not add across
/// campaigns; `naive_sum` on the result is the plain per-step sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateProjection {
    pub baseline: CampaignBaseline,
    pub projected: CampaignBaseline,
    pub deltas: ImpactDeltas,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonTotals {
    pub days: u32,
    pub cost: f64,
    pub conversions: f64,
    pub conversion_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub campaign_id: Uuid,
    pub scenario: Scenario,
    /// Recommendation ids in the order they were applied.
    pub application_order: Vec<Uuid>,
    /// Per-step projections, each relative to the running baseline before that step.
    pub applied: Vec<ImpactProjection>,
    pub aggregate: AggregateProjection,
    /// Sum of standalone estimates, for comparison with the aggregate.
    pub naive_sum: ImpactDeltas,
    pub horizon_totals: HorizonTotals,
    /// Contradictions that were applied anyway because the scenario allowed it.
    pub conflicts_overridden: Vec<RecommendationConflict>,
    pub baseline_forecast: Option<Prediction>,
    /// Forecast CPA at the horizon shifted by the aggregate CPA delta.
    pub projected_cpa_at_horizon: Option<f64>,
}

impl SimulationResult {
    pub fn with_forecast(mut self, forecast: Prediction) -> Self {
        self.projected_cpa_at_horizon =
            Some((forecast.point_estimate + self.aggregate.deltas.cpa).max(0.0));
        self.baseline_forecast = Some(forecast);
        self
    }
}

// ─── Conflicts ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Lever {
    Budget,
    Bid(Option<Uuid>),
    Keyword(Uuid),
}

fn lever_of(rec: &Recommendation) -> Option<(Lever, i8)> {
    match &rec.proposed_change {
        ProposedChange::Budget {
            current_daily_budget,
            proposed_daily_budget,
        } => Some((Lever::Budget, sign(proposed_daily_budget - current_daily_budget))),
        ProposedChange::Bid {
            keyword_id,
            current_bid,
            proposed_bid,
        } => Some((Lever::Bid(*keyword_id), sign(proposed_bid - current_bid))),
        ProposedChange::PauseKeyword { keyword_id, .. } => Some((Lever::Keyword(*keyword_id), 0)),
        ProposedChange::MatchType { keyword_id, to, .. } => {
            Some((Lever::Keyword(*keyword_id), to.specificity() as i8 + 1))
        }
        ProposedChange::NegativeKeywords { .. } => None,
    }
}

fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

/// Pairs of recommendations that pull the same lever of the same campaign in
/// incompatible directions. Pairs are reported with the lower id first.
pub fn find_conflicts(recommendations: &[Recommendation]) -> Vec<RecommendationConflict> {
    let mut sorted: Vec<&Recommendation> = recommendations.iter().collect();
    sorted.sort_by_key(|r| r.id);

    let mut conflicts = Vec::new();
    for (i, a) in sorted.iter().enumerate() {
        for b in &sorted[i + 1..] {
            if a.campaign_id != b.campaign_id || a.id == b.id {
                continue;
            }
            let (Some((lever_a, dir_a)), Some((lever_b, dir_b))) = (lever_of(a), lever_of(b)) else {
                continue;
            };
            if lever_a != lever_b {
                continue;
            }
            let reason = match lever_a {
                Lever::Budget if dir_a != dir_b => Some("daily budget raised and lowered"),
                Lever::Bid(_) if dir_a != dir_b => Some("bid raised and lowered"),
                Lever::Keyword(_) if dir_a == 0 || dir_b == 0 => {
                    if dir_a == dir_b {
                        None
                    } else {
                        Some("keyword paused and its match type changed")
                    }
                }
                Lever::Keyword(_) if dir_a != dir_b => Some("keyword moved to different match types"),
                _ => None,
            };
            if let Some(reason) = reason {
                conflicts.push(RecommendationConflict {
                    first: a.id,
                    second: b.id,
                    campaign_id: a.campaign_id,
                    reason: reason.to_string(),
                });
            }
        }
    }
    conflicts
}

/// Conflicts between `candidate` and any of `others`.
pub fn conflicts_with(candidate: &Recommendation, others: &[Recommendation]) -> Vec<RecommendationConflict> {
    let mut all: Vec<Recommendation> = others
        .iter()
        .filter(|r| r.id != candidate.id)
        .cloned()
        .collect();
    all.push(candidate.clone());
    find_conflicts(&all)
        .into_iter()
        .filter(|c| c.first == candidate.id || c.second == candidate.id)
        .collect()
}

// ─── Running campaign state ─────────────────────────────────────────────────

/// Mutable simulation state for one campaign.
#[derive(Debug, Clone)]
struct CampaignState {
    current: CampaignBaseline,
    /// Bid target -> running bid multiplier.
    bid_factors: BTreeMap<Option<Uuid>, f64>,
    excluded_terms: BTreeSet<String>,
    paused_keywords: BTreeSet<Uuid>,
    /// keyword -> (traffic factor, conversion factor) after match-type changes.
    keyword_factors: BTreeMap<Uuid, (f64, f64)>,
}

impl CampaignState {
    fn new(analysis: &AnalysisResult) -> Self {
        Self {
            current: CampaignBaseline::from_analysis(analysis),
            bid_factors: BTreeMap::new(),
            excluded_terms: BTreeSet::new(),
            paused_keywords: BTreeSet::new(),
            keyword_factors: BTreeMap::new(),
        }
    }
}

/// Whether a negative keyword would block a search term.
pub fn negative_matches(negative: &str, match_type: MatchType, term: &str) -> bool {
    let negative = normalize_keyword(negative);
    let term = normalize_keyword(term);
    if negative.is_empty() {
        return false;
    }
    let neg_tokens: Vec<&str> = negative.split(' ').collect();
    let term_tokens: Vec<&str> = term.split(' ').collect();
    match match_type {
        MatchType::Exact => negative == term,
        MatchType::Phrase => term_tokens
            .windows(neg_tokens.len())
            .any(|w| w == neg_tokens.as_slice()),
        MatchType::Broad => {
            let terms: HashSet<&str> = term_tokens.iter().copied().collect();
            neg_tokens.iter().all(|t| terms.contains(t))
        }
    }
}

// ─── Simulator ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ImpactSimulator {
    config: SimulationConfig,
}

impl ImpactSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Standalone effect of one recommendation under the expected scenario.
    pub fn estimate_impact(
        &self,
        recommendation: &Recommendation,
        analysis: &AnalysisResult,
    ) -> CampaignResult<ImpactProjection> {
        self.estimate_with(recommendation, analysis, ScenarioKind::Expected)
    }

    fn estimate_with(
        &self,
        recommendation: &Recommendation,
        analysis: &AnalysisResult,
        kind: ScenarioKind,
    ) -> CampaignResult<ImpactProjection> {
        recommendation.validate()?;
        if recommendation.campaign_id != analysis.campaign_id {
            return Err(CampaignError::Validation(format!(
                "recommendation {} targets campaign {}, analysis covers {}",
                recommendation.id, recommendation.campaign_id, analysis.campaign_id
            )));
        }
        let mut state = CampaignState::new(analysis);
        Ok(self.apply(&mut state, recommendation, analysis, kind))
    }

    /// Combine recommendations sequentially in descending standalone impact, ties by id.
    ///
    /// `analyses` must contain an analysis for every campaign a recommendation targets.
    pub fn simulate(
        &self,
        campaign_id: Uuid,
        recommendations: &[Recommendation],
        analyses: &BTreeMap<Uuid, AnalysisResult>,
        scenario: &Scenario,
    ) -> CampaignResult<SimulationResult> {
        if recommendations.is_empty() {
            return Err(CampaignError::Validation(
                "simulation needs at least one recommendation".into(),
            ));
        }
        let mut seen = HashSet::new();
        for rec in recommendations {
            if !seen.insert(rec.id) {
                return Err(CampaignError::Validation(format!(
                    "recommendation {} listed twice",
                    rec.id
                )));
            }
        }

        let conflicts = find_conflicts(recommendations);
        if !conflicts.is_empty() && !scenario.allow_conflicts {
            metrics::counter!("simulation.conflicts_rejected").increment(1);
            return Err(CampaignError::Conflict(conflicts));
        }

        // Standalone estimates decide the application order.
        let mut standalone = Vec::with_capacity(recommendations.len());
        for rec in recommendations {
            let analysis = analyses
                .get(&rec.campaign_id)
                .ok_or_else(|| CampaignError::not_found("analysis for campaign", rec.campaign_id))?;
            let projection = self.estimate_with(rec, analysis, scenario.kind)?;
            standalone.push((rec, projection));
        }
        standalone.sort_by(|(a, pa), (b, pb)| {
            pb.estimated_impact
                .total_cmp(&pa.estimated_impact)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut naive_sum = ImpactDeltas::default();
        for (_, p) in &standalone {
            naive_sum.cost += p.deltas.cost;
            naive_sum.conversions += p.deltas.conversions;
            naive_sum.conversion_value += p.deltas.conversion_value;
            naive_sum.cpa += p.deltas.cpa;
            naive_sum.roas += p.deltas.roas;
        }

        let mut states: BTreeMap<Uuid, CampaignState> = BTreeMap::new();
        let mut applied = Vec::with_capacity(standalone.len());
        for (rec, _) in &standalone {
            let analysis = &analyses[&rec.campaign_id];
            let state = states
                .entry(rec.campaign_id)
                .or_insert_with(|| CampaignState::new(analysis));
            applied.push(self.apply(state, rec, analysis, scenario.kind));
        }

        let mut baseline = CampaignBaseline::default();
        let mut projected = CampaignBaseline::default();
        for (id, state) in &states {
            baseline = baseline.add(&CampaignBaseline::from_analysis(&analyses[id]));
            projected = projected.add(&state.current);
        }
        let deltas = ImpactDeltas::between(&baseline, &projected);
        let confidence = applied
            .iter()
            .map(|p| p.confidence)
            .fold(1.0_f64, f64::min);

        let days = scenario.horizon_days;
        let horizon_totals = HorizonTotals {
            days,
            cost: deltas.cost * days as f64,
            conversions: deltas.conversions * days as f64,
            conversion_value: deltas.conversion_value * days as f64,
        };

        metrics::counter!("simulation.completed").increment(1);
        info!(
            campaign_id = %campaign_id,
            recommendations = applied.len(),
            cost_delta = deltas.cost,
            conversions_delta = deltas.conversions,
            overridden = conflicts.len(),
            "Impact simulation completed"
        );

        Ok(SimulationResult {
            campaign_id,
            scenario: *scenario,
            application_order: applied.iter().map(|p| p.recommendation_id).collect(),
            applied,
            aggregate: AggregateProjection {
                baseline,
                projected,
                deltas,
                confidence,
            },
            naive_sum,
            horizon_totals,
            conflicts_overridden: conflicts,
            baseline_forecast: None,
            projected_cpa_at_horizon: None,
        })
    }

    /// Apply one recommendation to the running state and describe the step.
    fn apply(
        &self,
        state: &mut CampaignState,
        rec: &Recommendation,
        analysis: &AnalysisResult,
        kind: ScenarioKind,
    ) -> ImpactProjection {
        let before = state.current;
        let m = kind.effect_multiplier();
        let days = analysis.sample_count.max(1) as f64;

        let type_confidence = match rec.recommendation_type {
            RecommendationType::BudgetIncrease | RecommendationType::BudgetDecrease => 0.8,
            RecommendationType::BidAdjustment => 0.75,
            RecommendationType::NegativeKeyword => 0.9,
            RecommendationType::PauseKeyword => 0.85,
            RecommendationType::MatchTypeChange => 0.6,
        };
        let mut confidence = analysis.confidence.score * type_confidence;

        match &rec.proposed_change {
            ProposedChange::Budget {
                current_daily_budget,
                proposed_daily_budget,
            } => {
                let utilization = (analysis.daily_averages.cost / current_daily_budget).min(1.0);
                let spend_delta = (proposed_daily_budget - current_daily_budget) * utilization * m;
                let old_spend = state.current.daily_cost;
                let new_spend = (old_spend + spend_delta).max(0.0);

                let scale = self.saturation_scale(analysis);
                let productive = |s: f64| scale * (1.0 - (-s / scale).exp());
                let conv_ratio = if scale > 0.0 && productive(old_spend) > 0.0 {
                    productive(new_spend) / productive(old_spend)
                } else {
                    1.0
                };
                let click_ratio = if old_spend > 0.0 { new_spend / old_spend } else { 1.0 };

                state.current.daily_cost = new_spend;
                state.current.daily_clicks *= click_ratio;
                state.current.daily_conversions *= conv_ratio;
                state.current.daily_conversion_value *= conv_ratio;
            }
            ProposedChange::Bid {
                keyword_id,
                current_bid,
                proposed_bid,
            } => {
                let share = match keyword_id {
                    None => Some(1.0),
                    Some(id) => keyword_cost_share(analysis, *id),
                };
                match share {
                    Some(share) if !keyword_id.is_some_and(|id| state.paused_keywords.contains(&id)) => {
                        let elasticity = analysis.bid_elasticity.value;
                        if !analysis.bid_elasticity.estimated {
                            confidence *= 0.8;
                        }
                        let relative = (proposed_bid - current_bid) / current_bid * m;
                        let factor = state.bid_factors.entry(*keyword_id).or_insert(1.0);
                        let old_factor = *factor;
                        let new_factor = (old_factor + relative).max(0.05);
                        *factor = new_factor;

                        let click_ratio = (new_factor / old_factor).powf(elasticity);
                        let cost_ratio = click_ratio * new_factor / old_factor;
                        let cur = &mut state.current;
                        cur.daily_clicks += share * cur.daily_clicks * (click_ratio - 1.0);
                        cur.daily_cost += share * cur.daily_cost * (cost_ratio - 1.0);
                        cur.daily_conversions += share * cur.daily_conversions * (click_ratio - 1.0);
                        cur.daily_conversion_value +=
                            share * cur.daily_conversion_value * (click_ratio - 1.0);
                    }
                    _ => confidence *= 0.25,
                }
            }
            ProposedChange::NegativeKeywords {
                keywords,
                match_type,
            } => {
                let mut wasted_cost = 0.0;
                let mut wasted_clicks = 0.0;
                for term in &analysis.wasted_search_terms {
                    let key = normalize_keyword(&term.term);
                    if state.excluded_terms.contains(&key) {
                        continue;
                    }
                    if keywords.iter().any(|k| negative_matches(k, *match_type, &term.term)) {
                        wasted_cost += term.cost;
                        wasted_clicks += term.clicks as f64;
                        state.excluded_terms.insert(key);
                    }
                }
                let cur = &mut state.current;
                cur.daily_cost -= (wasted_cost / days * m).min(cur.daily_cost);
                cur.daily_clicks -= (wasted_clicks / days * m).min(cur.daily_clicks);
            }
            ProposedChange::PauseKeyword { keyword_id, .. } => {
                match analysis
                    .keyword_performance
                    .iter()
                    .find(|k| k.keyword_id == *keyword_id)
                {
                    Some(kw) if !state.paused_keywords.contains(keyword_id) => {
                        let (traffic, conv) = state
                            .keyword_factors
                            .get(keyword_id)
                            .copied()
                            .unwrap_or((1.0, 1.0));
                        let cur = &mut state.current;
                        cur.daily_cost -= kw.cost * traffic / days * m;
                        cur.daily_clicks -= kw.clicks as f64 * traffic / days * m;
                        cur.daily_conversions -= kw.conversions * conv / days * m;
                        cur.daily_conversion_value -= kw.conversion_value * conv / days * m;
                        state.paused_keywords.insert(*keyword_id);
                    }
                    Some(_) => {}
                    None => confidence *= 0.25,
                }
            }
            ProposedChange::MatchType {
                keyword_id,
                from,
                to,
                ..
            } => {
                match analysis
                    .keyword_performance
                    .iter()
                    .find(|k| k.keyword_id == *keyword_id)
                {
                    Some(kw) if !state.paused_keywords.contains(keyword_id) => {
                        let steps = to.specificity() - from.specificity();
                        let target_traffic = self.config.match_type_narrowing_retention.powi(steps);
                        let target_conv = target_traffic.sqrt();

                        let (old_traffic, old_conv) = state
                            .keyword_factors
                            .get(keyword_id)
                            .copied()
                            .unwrap_or((1.0, 1.0));
                        let new_traffic = old_traffic + (target_traffic - 1.0) * m * old_traffic;
                        let new_conv = old_conv + (target_conv - 1.0) * m * old_conv;
                        state
                            .keyword_factors
                            .insert(*keyword_id, (new_traffic.max(0.0), new_conv.max(0.0)));

                        let cur = &mut state.current;
                        cur.daily_cost += kw.cost / days * (new_traffic - old_traffic);
                        cur.daily_clicks += kw.clicks as f64 / days * (new_traffic - old_traffic);
                        cur.daily_conversions += kw.conversions / days * (new_conv - old_conv);
                        cur.daily_conversion_value +=
                            kw.conversion_value / days * (new_conv - old_conv);
                    }
                    Some(_) => {}
                    None => confidence *= 0.25,
                }
            }
        }
        state.current.clamp_non_negative();

        let after = state.current;
        let deltas = ImpactDeltas::between(&before, &after);
        let estimated_impact = deltas.cost.abs() + (deltas.conversions * before.cpa()).abs();

        debug!(
            recommendation_id = %rec.id,
            kind = ?rec.recommendation_type,
            cost_delta = deltas.cost,
            conversions_delta = deltas.conversions,
            "Recommendation effect modelled"
        );

        ImpactProjection {
            recommendation_id: rec.id,
            campaign_id: rec.campaign_id,
            recommendation_type: rec.recommendation_type,
            baseline: before,
            projected: after,
            deltas,
            confidence: confidence.clamp(0.0, 1.0),
            estimated_impact,
        }
    }

    /// Saturation scale of the spend curve, anchored on the demonstrated ceiling.
    fn saturation_scale(&self, analysis: &AnalysisResult) -> f64 {
        let ceiling = if analysis.spend_ceiling > 0.0 {
            analysis.spend_ceiling
        } else {
            analysis.daily_averages.cost
        };
        ceiling * self.config.saturation_headroom
    }
}

fn keyword_cost_share(analysis: &AnalysisResult, keyword_id: Uuid) -> Option<f64> {
    let kw = analysis
        .keyword_performance
        .iter()
        .find(|k| k.keyword_id == keyword_id)?;
    if analysis.aggregates.cost > 0.0 {
        Some((kw.cost / analysis.aggregates.cost).min(1.0))
    } else {
        Some(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::StatisticsEngine;
    use campaign_core::types::{
        KeywordPerformance, MetricSample, PerformanceWindow, Priority, RecommendationStatus,
        SearchTermStat,
    };
    use chrono::{Duration, NaiveDate, Utc};

    const KEYWORD: u128 = 900;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap() + Duration::days(offset)
    }

    fn make_analysis(campaign: u128) -> AnalysisResult {
        make_analysis_over(campaign, 28)
    }

    /// Uniform traffic over `days` days.
    fn make_analysis_over(campaign: u128, days: i64) -> AnalysisResult {
        let n = days as f64;
        let samples = (0..days)
            .map(|i| MetricSample {
                date: day(i),
                impressions: 10_000,
                clicks: 400,
                cost: 100.0,
                conversions: 5.0,
                conversion_value: 400.0,
            })
            .collect();
        let window = PerformanceWindow::new(Uuid::from_u128(campaign), day(0), day(days - 1), samples)
            .unwrap()
            .with_search_terms(vec![SearchTermStat {
                term: "free running shoes".into(),
                clicks: 2 * days as u64,
                cost: n,
                conversions: 0.0,
            }])
            .with_keywords(vec![KeywordPerformance {
                keyword_id: Uuid::from_u128(KEYWORD),
                text: "running shoes".into(),
                match_type: MatchType::Broad,
                clicks: 100 * days as u64,
                cost: 25.0 * n,
                conversions: n,
                conversion_value: 80.0 * n,
            }]);
        StatisticsEngine::default().analyze(&window).unwrap()
    }

    fn make_rec(id: u128, campaign: u128, kind: RecommendationType, change: ProposedChange) -> Recommendation {
        Recommendation {
            id: Uuid::from_u128(id),
            recommendation_type: kind,
            campaign_id: Uuid::from_u128(campaign),
            proposed_change: change,
            status: RecommendationStatus::Accepted,
            priority: Priority::Medium,
            estimated_impact: None,
            created_at: Utc::now(),
        }
    }

    fn budget(id: u128, campaign: u128, current: f64, proposed: f64) -> Recommendation {
        let kind = if proposed > current {
            RecommendationType::BudgetIncrease
        } else {
            RecommendationType::BudgetDecrease
        };
        make_rec(
            id,
            campaign,
            kind,
            ProposedChange::Budget {
                current_daily_budget: current,
                proposed_daily_budget: proposed,
            },
        )
    }

    fn negative(id: u128, campaign: u128, keyword: &str) -> Recommendation {
        make_rec(
            id,
            campaign,
            RecommendationType::NegativeKeyword,
            ProposedChange::NegativeKeywords {
                keywords: vec![keyword.into()],
                match_type: MatchType::Broad,
            },
        )
    }

    fn analyses(campaigns: &[u128]) -> BTreeMap<Uuid, AnalysisResult> {
        campaigns
            .iter()
            .map(|c| (Uuid::from_u128(*c), make_analysis(*c)))
            .collect()
    }

    #[test]
    fn test_budget_increase_has_diminishing_returns() {
        let sim = ImpactSimulator::default();
        let projection = sim
            .estimate_impact(&budget(1, 10, 100.0, 150.0), &make_analysis(10))
            .unwrap();

        assert!((projection.deltas.cost - 50.0).abs() < 1e-9);
        assert!(projection.deltas.conversions > 0.0);
        // Conversions grow slower than spend.
        assert!(projection.deltas.conversions / 5.0 < 0.5);
        assert!(projection.deltas.cpa > 0.0);
        assert!(projection.confidence > 0.0 && projection.confidence <= 1.0);
    }

    #[test]
    fn test_confidence_drops_with_shorter_history() {
        let sim = ImpactSimulator::default();
        let rec = budget(1, 10, 100.0, 150.0);
        let short = sim.estimate_impact(&rec, &make_analysis_over(10, 7)).unwrap();
        let long = sim.estimate_impact(&rec, &make_analysis_over(10, 28)).unwrap();
        assert!(short.confidence < long.confidence);
        assert!(short.confidence > 0.0);
    }

    #[test]
    fn test_scenario_scales_effect() {
        let sim = ImpactSimulator::default();
        let rec = budget(1, 10, 100.0, 150.0);
        let analysis = make_analysis(10);
        let expected = sim.estimate_with(&rec, &analysis, ScenarioKind::Expected).unwrap();
        let conservative = sim
            .estimate_with(&rec, &analysis, ScenarioKind::Conservative)
            .unwrap();
        assert!((conservative.deltas.cost - expected.deltas.cost * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_same_campaign_budget_increases_are_sub_additive() {
        let sim = ImpactSimulator::default();
        let recs = vec![budget(1, 10, 100.0, 150.0), budget(2, 10, 100.0, 130.0)];
        let result = sim
            .simulate(Uuid::from_u128(10), &recs, &analyses(&[10]), &Scenario::default())
            .unwrap();

        assert!(result.aggregate.deltas.conversions > 0.0);
        assert!(result.aggregate.deltas.conversions < result.naive_sum.conversions);
    }

    #[test]
    fn test_independent_campaigns_sum_exactly() {
        let sim = ImpactSimulator::default();
        let recs = vec![budget(1, 10, 100.0, 150.0), negative(2, 20, "free")];
        let result = sim
            .simulate(Uuid::from_u128(10), &recs, &analyses(&[10, 20]), &Scenario::default())
            .unwrap();

        let cost: f64 = result.applied.iter().map(|p| p.deltas.cost).sum();
        let conversions: f64 = result.applied.iter().map(|p| p.deltas.conversions).sum();
        assert!((result.aggregate.deltas.cost - cost).abs() < 1e-9);
        assert!((result.aggregate.deltas.conversions - conversions).abs() < 1e-9);
        let value: f64 = result.applied.iter().map(|p| p.deltas.conversion_value).sum();
        assert!((result.aggregate.deltas.conversion_value - value).abs() < 1e-9);
        let cpa_sum: f64 = result.applied.iter().map(|p| p.deltas.cpa).sum();
        let (before, after) = (&result.aggregate.baseline, &result.aggregate.projected);
        assert!((result.aggregate.deltas.cpa - (after.cpa() - before.cpa())).abs() < 1e-9);
        assert!((result.naive_sum.cpa - cpa_sum).abs() < 1e-9);
        assert!((result.naive_sum.cost - cost).abs() < 1e-9);
        assert_eq!(result.horizon_totals.days, 30);
        assert!((result.horizon_totals.cost - cost * 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_order_is_descending_impact_then_id() {
        let sim = ImpactSimulator::default();
        let recs = vec![
            budget(5, 20, 100.0, 120.0),
            budget(3, 30, 100.0, 120.0),
            budget(9, 10, 100.0, 200.0),
        ];
        let result = sim
            .simulate(Uuid::from_u128(10), &recs, &analyses(&[10, 20, 30]), &Scenario::default())
            .unwrap();
        assert_eq!(
            result.application_order,
            vec![Uuid::from_u128(9), Uuid::from_u128(3), Uuid::from_u128(5)]
        );

        let again = sim
            .simulate(Uuid::from_u128(10), &recs, &analyses(&[10, 20, 30]), &Scenario::default())
            .unwrap();
        assert_eq!(result.aggregate, again.aggregate);
    }

    #[test]
    fn test_contradicting_budgets_are_rejected_unless_allowed() {
        let sim = ImpactSimulator::default();
        let recs = vec![budget(1, 10, 100.0, 150.0), budget(2, 10, 100.0, 60.0)];
        let err = sim
            .simulate(Uuid::from_u128(10), &recs, &analyses(&[10]), &Scenario::default())
            .unwrap_err();
        match err {
            CampaignError::Conflict(conflicts) => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].first, Uuid::from_u128(1));
                assert_eq!(conflicts[0].second, Uuid::from_u128(2));
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        let scenario = Scenario {
            allow_conflicts: true,
            ..Scenario::default()
        };
        let result = sim
            .simulate(Uuid::from_u128(10), &recs, &analyses(&[10]), &scenario)
            .unwrap();
        assert_eq!(result.conflicts_overridden.len(), 1);
        assert_eq!(result.applied.len(), 2);
    }

    #[test]
    fn test_negative_keyword_removes_wasted_spend_once() {
        let sim = ImpactSimulator::default();
        let single = sim
            .estimate_impact(&negative(1, 10, "free"), &make_analysis(10))
            .unwrap();
        assert!((single.deltas.cost + 1.0).abs() < 1e-9);
        assert_eq!(single.deltas.conversions, 0.0);

        let recs = vec![negative(1, 10, "free"), negative(2, 10, "free running")];
        let result = sim
            .simulate(Uuid::from_u128(10), &recs, &analyses(&[10]), &Scenario::default())
            .unwrap();
        assert!((result.aggregate.deltas.cost + 1.0).abs() < 1e-9);
        assert!((result.naive_sum.cost + 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_pause_unknown_keyword_lowers_confidence() {
        let sim = ImpactSimulator::default();
        let analysis = make_analysis(10);
        let known = make_rec(
            1,
            10,
            RecommendationType::PauseKeyword,
            ProposedChange::PauseKeyword {
                keyword_id: Uuid::from_u128(KEYWORD),
                keyword_text: "running shoes".into(),
            },
        );
        let unknown = make_rec(
            2,
            10,
            RecommendationType::PauseKeyword,
            ProposedChange::PauseKeyword {
                keyword_id: Uuid::from_u128(1234),
                keyword_text: "mystery".into(),
            },
        );

        let known = sim.estimate_impact(&known, &analysis).unwrap();
        let unknown = sim.estimate_impact(&unknown, &analysis).unwrap();
        assert!((known.deltas.cost + 25.0).abs() < 1e-9);
        assert!((known.deltas.conversions + 1.0).abs() < 1e-9);
        assert_eq!(unknown.deltas.cost, 0.0);
        assert!(unknown.confidence < known.confidence);
    }

    #[test]
    fn test_missing_analysis_is_not_found() {
        let sim = ImpactSimulator::default();
        let err = sim
            .simulate(
                Uuid::from_u128(10),
                &[budget(1, 99, 100.0, 150.0)],
                &analyses(&[10]),
                &Scenario::default(),
            )
            .unwrap_err();
        assert!(matches!(err, CampaignError::NotFound { .. }));
    }

    #[test]
    fn test_find_conflicts_on_keyword_levers() {
        let pause = make_rec(
            1,
            10,
            RecommendationType::PauseKeyword,
            ProposedChange::PauseKeyword {
                keyword_id: Uuid::from_u128(KEYWORD),
                keyword_text: "running shoes".into(),
            },
        );
        let narrow = make_rec(
            2,
            10,
            RecommendationType::MatchTypeChange,
            ProposedChange::MatchType {
                keyword_id: Uuid::from_u128(KEYWORD),
                keyword_text: "running shoes".into(),
                from: MatchType::Broad,
                to: MatchType::Exact,
            },
        );
        let other_campaign = budget(3, 20, 100.0, 150.0);

        let conflicts = find_conflicts(&[narrow.clone(), pause.clone(), other_campaign]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].first, pause.id);
        assert_eq!(conflicts_with(&narrow, &[pause]).len(), 1);
    }

    #[test]
    fn test_negative_match_semantics() {
        assert!(negative_matches("free", MatchType::Broad, "Free Running Shoes"));
        assert!(negative_matches("shoes free", MatchType::Broad, "free running shoes"));
        assert!(negative_matches("running shoes", MatchType::Phrase, "free running shoes"));
        assert!(!negative_matches("shoes running", MatchType::Phrase, "free running shoes"));
        assert!(negative_matches("free running shoes", MatchType::Exact, "free  running shoes"));
        assert!(!negative_matches("running shoes", MatchType::Exact, "free running shoes"));
    }
}
