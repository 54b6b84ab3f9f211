//! CPA forecasting — linear regression over the daily CPA series with an
//! explicit carry-forward fallback when the history is short or the fit poor.

use campaign_core::config::ForecastConfig;
use campaign_core::types::PerformanceWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::statistics::{fit_linear, mean_and_variance, PerformanceMetric, StatisticsEngine};

/// Which policy produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelUsed {
    Regression,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Fewer CPA observations than the statistics minimum.
    InsufficientSamples,
    /// The regression's R² was below the configured floor.
    PoorFit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    /// Two-sided z-value the interval was built with.
    pub z: f64,
}

impl ConfidenceInterval {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub campaign_id: Uuid,
    pub horizon_days: u32,
    pub point_estimate: f64,
    pub confidence_interval: ConfidenceInterval,
    pub model_used: ModelUsed,
    pub fallback_reason: Option<FallbackReason>,
    /// R² of the fitted regression, when one could be fitted.
    pub r_squared: Option<f64>,
    pub slope_per_day: Option<f64>,
    pub sample_count: usize,
    pub generated_at: DateTime<Utc>,
}

/// Single-model CPA forecaster.
#[derive(Debug, Clone)]
pub struct ForecastModel {
    config: ForecastConfig,
    min_samples: usize,
}

impl ForecastModel {
    /// `min_samples` is shared with the statistics engine.
    pub fn new(config: ForecastConfig, min_samples: usize) -> Self {
        Self {
            config,
            min_samples,
        }
    }

    pub fn for_engine(config: ForecastConfig, engine: &StatisticsEngine) -> Self {
        Self::new(config, engine.min_samples())
    }

    /// Project CPA `horizon_days` past the last observation. Never fails:
    /// short or poorly fitting histories produce a flagged carry-forward estimate.
    pub fn predict_cpa(&self, window: &PerformanceWindow, horizon_days: u32) -> Prediction {
        let series = StatisticsEngine::series(window, PerformanceMetric::Cpa);
        let sample_count = series.len();
        let z = self.config.interval_z;

        if sample_count < self.min_samples {
            return self.fallback(window.campaign_id, &series, horizon_days, FallbackReason::InsufficientSamples, None);
        }

        let fit = match fit_linear(&series) {
            Some(fit) if fit.r_squared >= self.config.min_r_squared => fit,
            fit => {
                return self.fallback(
                    window.campaign_id,
                    &series,
                    horizon_days,
                    FallbackReason::PoorFit,
                    fit.map(|f| f.r_squared),
                )
            }
        };

        let last_x = series.last().map(|(x, _)| *x).unwrap_or(0.0);
        let target_x = last_x + horizon_days as f64;
        let point_estimate = fit.predict(target_x).max(0.0);
        let half_width = z * fit.prediction_std_error(target_x);

        metrics::counter!("forecast.regression").increment(1);
        debug!(
            campaign_id = %window.campaign_id,
            r_squared = fit.r_squared,
            slope = fit.slope,
            point = point_estimate,
            "CPA forecast from regression"
        );

        Prediction {
            campaign_id: window.campaign_id,
            horizon_days,
            point_estimate,
            confidence_interval: ConfidenceInterval {
                lower: (point_estimate - half_width).max(0.0),
                upper: point_estimate + half_width,
                z,
            },
            model_used: ModelUsed::Regression,
            fallback_reason: None,
            r_squared: Some(fit.r_squared),
            slope_per_day: Some(fit.slope),
            sample_count,
            generated_at: Utc::now(),
        }
    }

    /// Last value carried forward with a widened interval.
    fn fallback(
        &self,
        campaign_id: Uuid,
        series: &[(f64, f64)],
        horizon_days: u32,
        reason: FallbackReason,
        r_squared: Option<f64>,
    ) -> Prediction {
        let last = series.last().map(|(_, v)| *v).unwrap_or(0.0);
        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        let (_, variance) = mean_and_variance(&values);
        let z = self.config.interval_z;

        let half_width = self.config.fallback_widening
            * (z * variance.sqrt()).max(last * self.config.fallback_min_relative_width);

        let reason_label = match reason {
            FallbackReason::InsufficientSamples => "insufficient_samples",
            FallbackReason::PoorFit => "poor_fit",
        };
        metrics::counter!("forecast.fallback", "reason" => reason_label).increment(1);
        debug!(
            campaign_id = %campaign_id,
            reason = reason_label,
            samples = series.len(),
            "CPA forecast fell back to carry-forward"
        );

        Prediction {
            campaign_id,
            horizon_days,
            point_estimate: last,
            confidence_interval: ConfidenceInterval {
                lower: (last - half_width).max(0.0),
                upper: last + half_width,
                z,
            },
            model_used: ModelUsed::Fallback,
            fallback_reason: Some(reason),
            r_squared,
            slope_per_day: None,
            sample_count: series.len(),
            generated_at: Utc::now(),
        }
    }
}
