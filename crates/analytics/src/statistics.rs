//! Statistics engine — per-metric linear trends, rolling z-score anomaly
//! detection and variance statistics over a campaign performance window.

use std::collections::BTreeMap;

use campaign_core::config::AnalysisConfig;
use campaign_core::types::{KeywordPerformance, MetricSample, PerformanceWindow, SearchTermStat};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Elasticity estimates are bounded below unity: clicks respond sub-linearly to bids.
pub const MIN_BID_ELASTICITY: f64 = 0.05;
pub const MAX_BID_ELASTICITY: f64 = 0.95;
/// |t| reported for a noiseless fit, keeping every statistic finite.
pub const MAX_T_STATISTIC: f64 = 1e6;

// ─── Types ──────────────────────────────────────────────────────────────────

/// Daily metrics tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMetric {
    Ctr,
    Cpc,
    Cpa,
    Roas,
    Cost,
    Conversions,
}

impl PerformanceMetric {
    pub const ALL: [PerformanceMetric; 6] = [
        Self::Ctr,
        Self::Cpc,
        Self::Cpa,
        Self::Roas,
        Self::Cost,
        Self::Conversions,
    ];

    /// +1 when a rising value is good for the advertiser, -1 when it is bad.
    pub fn polarity(self) -> f64 {
        match self {
            Self::Ctr | Self::Roas | Self::Conversions => 1.0,
            Self::Cpc | Self::Cpa | Self::Cost => -1.0,
        }
    }

    pub fn value(self, sample: &MetricSample) -> Option<f64> {
        match self {
            Self::Ctr => sample.ctr(),
            Self::Cpc => sample.cpc(),
            Self::Cpa => sample.cpa(),
            Self::Roas => sample.roas(),
            Self::Cost => Some(sample.cost),
            Self::Conversions => Some(sample.conversions),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

/// Ordinary least squares fit of `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    /// Slope divided by its standard error.
    pub t_statistic: f64,
    /// Residual variance with `n - 2` degrees of freedom.
    pub residual_variance: f64,
    pub n: usize,
    pub x_mean: f64,
    pub sxx: f64,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }

    /// Standard error of a new observation at `x`.
    pub fn prediction_std_error(&self, x: f64) -> f64 {
        let n = self.n as f64;
        let leverage = if self.sxx > 0.0 {
            (x - self.x_mean).powi(2) / self.sxx
        } else {
            0.0
        };
        (self.residual_variance * (1.0 + 1.0 / n + leverage)).sqrt()
    }
}

/// Trend and dispersion of one metric over the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTrend {
    pub metric: PerformanceMetric,
    pub samples: usize,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub t_statistic: f64,
    pub direction: TrendDirection,
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
}

/// A day whose metric deviates from its trailing baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub date: NaiveDate,
    pub metric: PerformanceMetric,
    pub value: f64,
    pub z_score: f64,
    pub expected_range: (f64, f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    /// 0.0 (no trust) to 1.0 (full window, stable, anomaly free).
    pub score: f64,
    pub level: ConfidenceLevel,
}

impl Confidence {
    pub fn from_score(score: f64) -> Self {
        let score = score.clamp(0.0, 1.0);
        let level = if score >= 0.75 {
            ConfidenceLevel::High
        } else if score >= 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        };
        Self { score, level }
    }
}

/// Window totals and the ratios derived from them. Ratios are 0.0 when undefined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub impressions: u64,
    pub clicks: u64,
    pub cost: f64,
    pub conversions: f64,
    pub conversion_value: f64,
    pub ctr: f64,
    pub cpc: f64,
    pub cpa: f64,
    pub roas: f64,
}

/// Per-day averages over the days present in the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyAverages {
    pub impressions: f64,
    pub clicks: f64,
    pub cost: f64,
    pub conversions: f64,
    pub conversion_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub date: NaiveDate,
    pub ctr: Option<f64>,
    pub cpc: Option<f64>,
    pub cpa: Option<f64>,
    pub roas: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BidElasticity {
    pub value: f64,
    /// False when the configured default was used instead of an estimate.
    pub estimated: bool,
}

/// Output of [`StatisticsEngine::analyze`]. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub campaign_id: Uuid,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub sample_count: usize,
    pub aggregates: AggregateMetrics,
    pub daily_averages: DailyAverages,
    pub daily: Vec<DailyMetrics>,
    pub trends: BTreeMap<PerformanceMetric, MetricTrend>,
    pub anomalies: Vec<AnomalyFlag>,
    pub anomaly_dates: Vec<NaiveDate>,
    pub confidence: Confidence,
    pub bid_elasticity: BidElasticity,
    /// Highest daily spend observed in the window.
    pub spend_ceiling: f64,
    /// Search terms that spent without converting, highest spend first.
    pub wasted_search_terms: Vec<SearchTermStat>,
    pub keyword_performance: Vec<KeywordPerformance>,
}

impl AnalysisResult {
    pub fn trend(&self, metric: PerformanceMetric) -> Option<&MetricTrend> {
        self.trends.get(&metric)
    }
}

// ─── Regression helpers ─────────────────────────────────────────────────────

/// Simple linear regression over `(x, y)` points.
///
/// Returns `None` with fewer than two points or when every `x` is equal.
/// A constant `y` yields a zero slope, zero R² and zero t-statistic.
pub fn fit_linear(points: &[(f64, f64)]) -> Option<LinearFit> {
    let n = points.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let x_mean = points.iter().map(|(x, _)| x).sum::<f64>() / nf;
    let y_mean = points.iter().map(|(_, y)| y).sum::<f64>() / nf;

    let sxx: f64 = points.iter().map(|(x, _)| (x - x_mean).powi(2)).sum();
    let syy: f64 = points.iter().map(|(_, y)| (y - y_mean).powi(2)).sum();
    let sxy: f64 = points
        .iter()
        .map(|(x, y)| (x - x_mean) * (y - y_mean))
        .sum();

    if sxx <= f64::EPSILON {
        return None;
    }

    // Treat rounding noise around a constant series as no variation at all.
    if syy <= 1e-12 * nf * (1.0 + y_mean * y_mean) {
        return Some(LinearFit {
            slope: 0.0,
            intercept: y_mean,
            r_squared: 0.0,
            t_statistic: 0.0,
            residual_variance: 0.0,
            n,
            x_mean,
            sxx,
        });
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let ssr: f64 = points
        .iter()
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    let r_squared = (1.0 - ssr / syy).clamp(0.0, 1.0);
    let residual_variance = if n > 2 { ssr / (nf - 2.0) } else { 0.0 };

    let se_slope = (residual_variance / sxx).sqrt();
    let t_statistic = if se_slope > 0.0 {
        (slope / se_slope).clamp(-MAX_T_STATISTIC, MAX_T_STATISTIC)
    } else if slope != 0.0 {
        slope.signum() * MAX_T_STATISTIC
    } else {
        0.0
    };

    Some(LinearFit {
        slope,
        intercept,
        r_squared,
        t_statistic,
        residual_variance,
        n,
        x_mean,
        sxx,
    })
}

/// Sample mean and variance (`n - 1` denominator).
pub fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance)
}

// ─── Engine ─────────────────────────────────────────────────────────────────

/// Pure analysis over a [`PerformanceWindow`]. Holds only configuration.
#[derive(Debug, Clone, Default)]
pub struct StatisticsEngine {
    config: AnalysisConfig,
}

impl StatisticsEngine {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn min_samples(&self) -> usize {
        self.config.min_samples
    }

    /// Analyze a window. Fails with `InsufficientData` below the minimum sample count.
    pub fn analyze(&self, window: &PerformanceWindow) -> CampaignResult<AnalysisResult> {
        let sample_count = window.len();
        if sample_count < self.config.min_samples {
            return Err(CampaignError::InsufficientData {
                required: self.config.min_samples,
                actual: sample_count,
            });
        }

        let aggregates = Self::aggregate(&window.samples);
        let n = sample_count as f64;
        let daily_averages = DailyAverages {
            impressions: aggregates.impressions as f64 / n,
            clicks: aggregates.clicks as f64 / n,
            cost: aggregates.cost / n,
            conversions: aggregates.conversions / n,
            conversion_value: aggregates.conversion_value / n,
        };

        let daily = window
            .samples
            .iter()
            .map(|s| DailyMetrics {
                date: s.date,
                ctr: s.ctr(),
                cpc: s.cpc(),
                cpa: s.cpa(),
                roas: s.roas(),
            })
            .collect();

        let mut trends = BTreeMap::new();
        let mut anomalies = Vec::new();
        for metric in PerformanceMetric::ALL {
            let series = Self::series(window, metric);
            trends.insert(metric, self.trend(metric, &series));
            anomalies.extend(self.detect_anomalies(metric, window.start, &series));
        }

        let mut anomaly_dates: Vec<NaiveDate> = anomalies.iter().map(|a| a.date).collect();
        anomaly_dates.sort();
        anomaly_dates.dedup();

        let costs: Vec<f64> = window.samples.iter().map(|s| s.cost).collect();
        let spend_ceiling = costs.iter().cloned().fold(0.0, f64::max);
        let confidence = self.confidence(sample_count, anomaly_dates.len(), &costs);
        let bid_elasticity = self.bid_elasticity(&window.samples);

        let mut wasted_search_terms: Vec<SearchTermStat> = window
            .search_terms
            .iter()
            .filter(|t| t.conversions <= 0.0 && t.cost > 0.0)
            .cloned()
            .collect();
        wasted_search_terms.sort_by(|a, b| b.cost.total_cmp(&a.cost).then_with(|| a.term.cmp(&b.term)));

        metrics::counter!("analysis.completed").increment(1);
        debug!(
            campaign_id = %window.campaign_id,
            samples = sample_count,
            anomalies = anomaly_dates.len(),
            confidence = confidence.score,
            "Performance analysis completed"
        );

        Ok(AnalysisResult {
            campaign_id: window.campaign_id,
            window_start: window.start,
            window_end: window.end,
            sample_count,
            aggregates,
            daily_averages,
            daily,
            trends,
            anomalies,
            anomaly_dates,
            confidence,
            bid_elasticity,
            spend_ceiling,
            wasted_search_terms,
            keyword_performance: window.keywords.clone(),
        })
    }

    /// `(day offset, value)` points for a metric, skipping days where it is undefined.
    pub fn series(window: &PerformanceWindow, metric: PerformanceMetric) -> Vec<(f64, f64)> {
        window
            .samples
            .iter()
            .filter_map(|s| metric.value(s).map(|v| (window.day_offset(s.date), v)))
            .collect()
    }

    fn aggregate(samples: &[MetricSample]) -> AggregateMetrics {
        let mut agg = AggregateMetrics::default();
        for s in samples {
            agg.impressions += s.impressions;
            agg.clicks += s.clicks;
            agg.cost += s.cost;
            agg.conversions += s.conversions;
            agg.conversion_value += s.conversion_value;
        }
        agg.ctr = ratio(agg.clicks as f64, agg.impressions as f64);
        agg.cpc = ratio(agg.cost, agg.clicks as f64);
        agg.cpa = ratio(agg.cost, agg.conversions);
        agg.roas = ratio(agg.conversion_value, agg.cost);
        agg
    }

    fn trend(&self, metric: PerformanceMetric, series: &[(f64, f64)]) -> MetricTrend {
        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        let (mean, variance) = mean_and_variance(&values);

        let fit = if series.len() >= 3 { fit_linear(series) } else { None };
        let (slope, intercept, r_squared, t_statistic) = fit
            .map(|f| (f.slope, f.intercept, f.r_squared, f.t_statistic))
            .unwrap_or((0.0, mean, 0.0, 0.0));

        let direction = if slope != 0.0 && t_statistic.abs() >= self.config.trend_t_threshold {
            if slope * metric.polarity() > 0.0 {
                TrendDirection::Improving
            } else {
                TrendDirection::Declining
            }
        } else {
            TrendDirection::Stable
        };

        MetricTrend {
            metric,
            samples: series.len(),
            slope,
            intercept,
            r_squared,
            t_statistic,
            direction,
            mean,
            variance,
            std_dev: variance.sqrt(),
        }
    }

    /// Flag points whose z-score against the trailing rolling window exceeds the threshold.
    fn detect_anomalies(
        &self,
        metric: PerformanceMetric,
        start: NaiveDate,
        series: &[(f64, f64)],
    ) -> Vec<AnomalyFlag> {
        let window = self.config.rolling_window.max(3);
        let mut flags = Vec::new();

        for i in 0..series.len() {
            let baseline: Vec<f64> = series[i.saturating_sub(window)..i]
                .iter()
                .map(|(_, v)| *v)
                .collect();
            if baseline.len() < 3 {
                continue;
            }
            let (mean, variance) = mean_and_variance(&baseline);
            let std_dev = variance.sqrt();
            if std_dev <= 1e-9 * mean.abs().max(1.0) {
                continue;
            }

            let (x, value) = series[i];
            let z_score = (value - mean) / std_dev;
            if z_score.abs() > self.config.anomaly_z_threshold {
                flags.push(AnomalyFlag {
                    date: start + Duration::days(x.round() as i64),
                    metric,
                    value,
                    z_score,
                    expected_range: (
                        mean - self.config.anomaly_z_threshold * std_dev,
                        mean + self.config.anomaly_z_threshold * std_dev,
                    ),
                });
            }
        }
        flags
    }

    fn confidence(&self, samples: usize, anomaly_days: usize, costs: &[f64]) -> Confidence {
        let full = self.config.full_confidence_samples.max(1) as f64;
        let coverage = (samples as f64 / full).min(1.0);
        let anomaly_ratio = anomaly_days as f64 / samples.max(1) as f64;
        let (mean_cost, cost_variance) = mean_and_variance(costs);
        let cv = if mean_cost > 0.0 {
            cost_variance.sqrt() / mean_cost
        } else {
            1.0
        };
        let stability = 1.0 / (1.0 + cv);

        Confidence::from_score(0.6 * coverage + 0.2 * (1.0 - anomaly_ratio) + 0.2 * stability)
    }

    /// Log-log slope of daily clicks against daily CPC.
    fn bid_elasticity(&self, samples: &[MetricSample]) -> BidElasticity {
        let fallback = BidElasticity {
            value: self
                .config
                .default_bid_elasticity
                .clamp(MIN_BID_ELASTICITY, MAX_BID_ELASTICITY),
            estimated: false,
        };

        let points: Vec<(f64, f64)> = samples
            .iter()
            .filter_map(|s| s.cpc().map(|cpc| (cpc.ln(), (s.clicks as f64).ln())))
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect();
        if points.len() < self.config.min_samples {
            return fallback;
        }

        match fit_linear(&points) {
            Some(fit) if fit.slope > 0.0 && fit.t_statistic.abs() >= self.config.trend_t_threshold => {
                BidElasticity {
                    value: fit.slope.clamp(MIN_BID_ELASTICITY, MAX_BID_ELASTICITY),
                    estimated: true,
                }
            }
            _ => fallback,
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
    }

    fn make_sample(offset: i64, cost: f64, conversions: f64) -> MetricSample {
        MetricSample {
            date: day(offset),
            impressions: 10_000,
            clicks: 400,
            cost,
            conversions,
            conversion_value: conversions * 80.0,
        }
    }

    fn make_window(samples: Vec<MetricSample>) -> PerformanceWindow {
        let end = samples.iter().map(|s| s.date).max().unwrap_or(day(0));
        PerformanceWindow::new(Uuid::from_u128(1), day(0), end, samples).unwrap()
    }

    /// Deterministic pseudo-noise in [-1, 1].
    fn noise(i: i64, seed: u64) -> f64 {
        let mut x = (i as u64).wrapping_add(seed).wrapping_mul(6364136223846793005);
        x ^= x >> 33;
        x = x.wrapping_mul(0xff51afd7ed558ccd);
        x ^= x >> 33;
        (x % 2001) as f64 / 1000.0 - 1.0
    }

    #[test]
    fn test_insufficient_data() {
        let engine = StatisticsEngine::default();
        let window = make_window((0..5).map(|i| make_sample(i, 100.0, 5.0)).collect());
        let err = engine.analyze(&window).unwrap_err();
        assert!(matches!(
            err,
            CampaignError::InsufficientData {
                required: 7,
                actual: 5
            }
        ));
    }

    #[test]
    fn test_rising_cpa_is_declining() {
        let engine = StatisticsEngine::default();
        let window = make_window((0..30).map(|i| make_sample(i, 100.0 + 5.0 * i as f64, 5.0)).collect());
        let result = engine.analyze(&window).unwrap();

        let cpa = result.trend(PerformanceMetric::Cpa).unwrap();
        assert!(cpa.slope > 0.0);
        assert!(cpa.r_squared > 0.99);
        assert_eq!(cpa.direction, TrendDirection::Declining);
        assert_eq!(
            result.trend(PerformanceMetric::Conversions).unwrap().direction,
            TrendDirection::Stable
        );
        assert_eq!(
            result.trend(PerformanceMetric::Roas).unwrap().direction,
            TrendDirection::Declining
        );
    }

    #[test]
    fn test_flat_window_is_stable_and_anomaly_free() {
        let engine = StatisticsEngine::default();
        let window = make_window((0..14).map(|i| make_sample(i, 100.0, 4.0)).collect());
        let result = engine.analyze(&window).unwrap();

        for trend in result.trends.values() {
            assert_eq!(trend.direction, TrendDirection::Stable, "{:?}", trend.metric);
            assert!(trend.variance < 1e-18);
        }
        assert!(result.anomaly_dates.is_empty());
        assert_eq!(result.aggregates.cpa, 25.0);
        assert_eq!(result.spend_ceiling, 100.0);
    }

    #[test]
    fn test_spike_is_flagged() {
        let engine = StatisticsEngine::default();
        let samples = (0..21)
            .map(|i| {
                let cost = if i == 15 { 400.0 } else { 100.0 + (i % 3) as f64 };
                make_sample(i, cost, 5.0)
            })
            .collect();
        let result = engine.analyze(&make_window(samples)).unwrap();

        assert!(result.anomaly_dates.contains(&day(15)));
        let flag = result
            .anomalies
            .iter()
            .find(|a| a.metric == PerformanceMetric::Cost && a.date == day(15))
            .unwrap();
        assert!(flag.z_score > 2.0);
        assert_eq!(result.spend_ceiling, 400.0);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let engine = StatisticsEngine::default();
        let samples: Vec<MetricSample> = (0..28)
            .map(|i| make_sample(i, 100.0 + 20.0 * noise(i, 7), 5.0 + noise(i, 11)))
            .collect();
        let window = make_window(samples);
        assert_eq!(engine.analyze(&window).unwrap(), engine.analyze(&window).unwrap());
    }

    #[test]
    fn test_direction_matches_slope_sign_when_significant() {
        let engine = StatisticsEngine::default();
        let threshold = engine.config().trend_t_threshold;

        for seed in 0..20u64 {
            let drift = (seed as f64 - 10.0) * 0.4;
            let samples = (0..21)
                .map(|i| make_sample(i, 100.0 + drift * i as f64 + 8.0 * noise(i, seed), 5.0))
                .collect();
            let result = engine.analyze(&make_window(samples)).unwrap();

            for trend in result.trends.values() {
                if trend.slope != 0.0 && trend.t_statistic.abs() >= threshold {
                    let expected = if trend.slope * trend.metric.polarity() > 0.0 {
                        TrendDirection::Improving
                    } else {
                        TrendDirection::Declining
                    };
                    assert_eq!(trend.direction, expected);
                } else {
                    assert_eq!(trend.direction, TrendDirection::Stable);
                }
            }
        }
    }

    #[test]
    fn test_trend_uses_calendar_offsets_across_gaps() {
        let engine = StatisticsEngine::default();
        let samples = [0, 1, 2, 5, 9, 10, 14]
            .iter()
            .map(|&d| make_sample(d, 100.0 + 10.0 * d as f64, 5.0))
            .collect();
        let result = engine.analyze(&make_window(samples)).unwrap();
        let cost = result.trend(PerformanceMetric::Cost).unwrap();
        assert!((cost.slope - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_linear_exact_line() {
        let points: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 3.0 + 2.0 * i as f64)).collect();
        let fit = fit_linear(&points).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.intercept - 3.0).abs() < 1e-12);
        assert!((fit.r_squared - 1.0).abs() < 1e-12);
        assert!((fit.predict(20.0) - 43.0).abs() < 1e-9);
        assert!(fit.t_statistic.is_finite());
        assert!(fit.t_statistic > 0.0 && fit.t_statistic <= MAX_T_STATISTIC);
    }

    #[test]
    fn test_exact_trend_survives_json() {
        let engine = StatisticsEngine::default();
        let window = make_window((0..14).map(|i| make_sample(i, 100.0 + 5.0 * i as f64, 5.0)).collect());
        let result = engine.analyze(&window).unwrap();

        let json = serde_json::to_string(&result).unwrap();
        let parsed: AnalysisResult = serde_json::from_str(&json).unwrap();
        let cost = parsed.trend(PerformanceMetric::Cost).unwrap();
        assert!(cost.t_statistic.is_finite());
        assert_eq!(cost.direction, TrendDirection::Declining);
    }

    #[test]
    fn test_fit_linear_degenerate_inputs() {
        assert!(fit_linear(&[(1.0, 2.0)]).is_none());
        assert!(fit_linear(&[(1.0, 2.0), (1.0, 3.0)]).is_none());
        let flat = fit_linear(&[(0.0, 5.0), (1.0, 5.0), (2.0, 5.0)]).unwrap();
        assert_eq!(flat.slope, 0.0);
        assert_eq!(flat.r_squared, 0.0);
    }

    #[test]
    fn test_wasted_search_terms_only_zero_conversion_spend() {
        let engine = StatisticsEngine::default();
        let window = make_window((0..10).map(|i| make_sample(i, 100.0, 5.0)).collect())
            .with_search_terms(vec![
                SearchTermStat {
                    term: "free running shoes".into(),
                    clicks: 40,
                    cost: 30.0,
                    conversions: 0.0,
                },
                SearchTermStat {
                    term: "running shoes sale".into(),
                    clicks: 90,
                    cost: 120.0,
                    conversions: 6.0,
                },
                SearchTermStat {
                    term: "running shoes repair".into(),
                    clicks: 50,
                    cost: 45.0,
                    conversions: 0.0,
                },
            ]);
        let result = engine.analyze(&window).unwrap();
        let terms: Vec<&str> = result
            .wasted_search_terms
            .iter()
            .map(|t| t.term.as_str())
            .collect();
        assert_eq!(terms, vec!["running shoes repair", "free running shoes"]);
    }

    #[test]
    fn test_bid_elasticity_defaults_without_bid_variation() {
        let engine = StatisticsEngine::default();
        let window = make_window((0..14).map(|i| make_sample(i, 100.0, 5.0)).collect());
        let result = engine.analyze(&window).unwrap();
        assert!(!result.bid_elasticity.estimated);
        assert_eq!(result.bid_elasticity.value, 0.5);
    }

    #[test]
    fn test_confidence_grows_with_samples() {
        let engine = StatisticsEngine::default();
        let short = make_window((0..7).map(|i| make_sample(i, 100.0, 5.0)).collect());
        let long = make_window((0..28).map(|i| make_sample(i, 100.0, 5.0)).collect());
        let short = engine.analyze(&short).unwrap().confidence;
        let long = engine.analyze(&long).unwrap().confidence;
        assert!(long.score > short.score);
        assert_eq!(long.level, ConfidenceLevel::High);
    }
}
