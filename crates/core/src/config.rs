use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CAMPAIGN_OPTIMIZER__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Thresholds used by the statistics engine.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Minimum number of daily samples before any analysis is attempted.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_anomaly_z_threshold")]
    pub anomaly_z_threshold: f64,
    /// Number of trailing days forming the rolling baseline for z-scores.
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,
    /// Minimum |t| of the slope for a trend to count as improving/declining.
    #[serde(default = "default_trend_t_threshold")]
    pub trend_t_threshold: f64,
    #[serde(default = "default_full_confidence_samples")]
    pub full_confidence_samples: usize,
    #[serde(default = "default_bid_elasticity")]
    pub default_bid_elasticity: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastConfig {
    /// Fits below this R² are discarded in favour of carry-forward.
    #[serde(default = "default_min_r_squared")]
    pub min_r_squared: f64,
    #[serde(default = "default_interval_z")]
    pub interval_z: f64,
    #[serde(default = "default_fallback_widening")]
    pub fallback_widening: f64,
    /// Fallback half-width never drops below this fraction of the estimate.
    #[serde(default = "default_fallback_min_relative_width")]
    pub fallback_min_relative_width: f64,
    /// Days of CPA history fed to the regression.
    #[serde(default = "default_history_days")]
    pub history_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Saturation scale of the spend curve relative to the demonstrated daily ceiling.
    #[serde(default = "default_saturation_headroom")]
    pub saturation_headroom: f64,
    /// Share of a keyword's traffic retained per step of match-type narrowing.
    #[serde(default = "default_narrowing_retention")]
    pub match_type_narrowing_retention: f64,
    /// Analysis window backing impact estimates.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Identity used by the background service when it drains the queue.
    #[serde(default = "default_service_user")]
    pub service_user: String,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_min_samples() -> usize {
    7
}
fn default_anomaly_z_threshold() -> f64 {
    2.0
}
fn default_rolling_window() -> usize {
    7
}
fn default_trend_t_threshold() -> f64 {
    2.0
}
fn default_full_confidence_samples() -> usize {
    28
}
fn default_bid_elasticity() -> f64 {
    0.5
}
fn default_min_r_squared() -> f64 {
    0.5
}
fn default_interval_z() -> f64 {
    1.96
}
fn default_fallback_widening() -> f64 {
    2.0
}
fn default_fallback_min_relative_width() -> f64 {
    0.25
}
fn default_history_days() -> u32 {
    90
}
fn default_saturation_headroom() -> f64 {
    1.5
}
fn default_narrowing_retention() -> f64 {
    0.6
}
fn default_lookback_days() -> u32 {
    30
}
fn default_max_concurrent() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    200
}
fn default_backoff_max_ms() -> u64 {
    5000
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_service_user() -> String {
    "optimizer-service".to_string()
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            anomaly_z_threshold: default_anomaly_z_threshold(),
            rolling_window: default_rolling_window(),
            trend_t_threshold: default_trend_t_threshold(),
            full_confidence_samples: default_full_confidence_samples(),
            default_bid_elasticity: default_bid_elasticity(),
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            min_r_squared: default_min_r_squared(),
            interval_z: default_interval_z(),
            fallback_widening: default_fallback_widening(),
            fallback_min_relative_width: default_fallback_min_relative_width(),
            history_days: default_history_days(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            saturation_headroom: default_saturation_headroom(),
            match_type_narrowing_retention: default_narrowing_retention(),
            lookback_days: default_lookback_days(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            service_user: default_service_user(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            analysis: AnalysisConfig::default(),
            forecast: ForecastConfig::default(),
            simulation: SimulationConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CAMPAIGN_OPTIMIZER")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.analysis.min_samples < 3 {
            return Err(config::ConfigError::Message(
                "analysis.min_samples must be at least 3".into(),
            ));
        }
        if self.queue.max_concurrent == 0 {
            return Err(config::ConfigError::Message(
                "queue.max_concurrent must be positive".into(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(config::ConfigError::Message(
                "queue.max_attempts must be positive".into(),
            ));
        }
        if self.forecast.history_days == 0 {
            return Err(config::ConfigError::Message(
                "forecast.history_days must be positive".into(),
            ));
        }
        if self.simulation.lookback_days == 0 {
            return Err(config::ConfigError::Message(
                "simulation.lookback_days must be positive".into(),
            ));
        }
        let retention = self.simulation.match_type_narrowing_retention;
        if retention <= 0.0 || retention >= 1.0 {
            return Err(config::ConfigError::Message(
                "simulation.match_type_narrowing_retention must be in (0, 1)".into(),
            ));
        }
        Ok(())
    }
}
