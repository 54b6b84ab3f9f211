//! Campaign analytics — statistics, forecasting, impact simulation and
//! duplicate keyword detection.
//!
//! # Modules
//!
//! - [`statistics`] — Per-metric trends, anomaly flags, variance and confidence
//! - [`forecast`] — CPA regression with explicit carry-forward fallback
//! - [`impact`] — Per-type effect models and ordered non-additive simulation
//! - [`duplicates`] — Keyword normalization, grouping and savings
//! - [`service`] — Facade over the persistence capability

pub mod duplicates;
pub mod forecast;
pub mod impact;
pub mod service;
pub mod statistics;

pub use duplicates::{DuplicateDetector, DuplicateGroup, ResolutionPlan};
pub use forecast::{ForecastModel, ModelUsed, Prediction};
pub use impact::{find_conflicts, ImpactProjection, ImpactSimulator, Scenario, ScenarioKind, SimulationResult};
pub use service::AnalyticsService;
pub use statistics::{AnalysisResult, StatisticsEngine, TrendDirection};
