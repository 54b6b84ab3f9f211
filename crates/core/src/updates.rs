//! Validated updates to recommendation records.
//!
//! The core only ever writes status, priority and estimated impact. Updates
//! arriving as loose JSON are parsed into [`RecommendationUpdate`], which
//! rejects unknown fields and values outside the enumerations.

use serde::{Deserialize, Serialize};

use crate::error::{CampaignError, CampaignResult};
use crate::types::{Priority, Recommendation, RecommendationStatus};

/// A status change, optionally guarded by the status the writer expects to replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusChange {
    #[serde(default)]
    pub expected: Option<RecommendationStatus>,
    pub to: RecommendationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecommendationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_impact: Option<f64>,
}

impl RecommendationUpdate {
    /// Compare-and-set status change: fails unless the record is currently `expected`.
    pub fn transition(expected: RecommendationStatus, to: RecommendationStatus) -> Self {
        Self {
            status: Some(StatusChange {
                expected: Some(expected),
                to,
            }),
            ..Self::default()
        }
    }

    pub fn status(to: RecommendationStatus) -> Self {
        Self {
            status: Some(StatusChange { expected: None, to }),
            ..Self::default()
        }
    }

    pub fn priority(priority: Priority) -> Self {
        Self {
            priority: Some(priority),
            ..Self::default()
        }
    }

    pub fn estimated_impact(impact: f64) -> Self {
        Self {
            estimated_impact: Some(impact),
            ..Self::default()
        }
    }

    /// Parse an update from an untyped payload.
    pub fn from_json(value: serde_json::Value) -> CampaignResult<Self> {
        let update: Self = serde_json::from_value(value)
            .map_err(|e| CampaignError::Validation(format!("invalid recommendation update: {e}")))?;
        update.validate()?;
        Ok(update)
    }

    pub fn validate(&self) -> CampaignResult<()> {
        if self.status.is_none() && self.priority.is_none() && self.estimated_impact.is_none() {
            return Err(CampaignError::Validation(
                "recommendation update changes nothing".into(),
            ));
        }
        if let Some(impact) = self.estimated_impact {
            if !impact.is_finite() {
                return Err(CampaignError::Validation(format!(
                    "estimated impact must be finite, got {impact}"
                )));
            }
        }
        Ok(())
    }

    /// Apply to a record. Either every field is applied or none is.
    pub fn apply_to(&self, recommendation: &mut Recommendation) -> CampaignResult<()> {
        self.validate()?;

        if let Some(change) = self.status {
            let current = recommendation.status;
            if let Some(expected) = change.expected {
                if current != expected {
                    return Err(CampaignError::Validation(format!(
                        "recommendation {} is {current:?}, expected {expected:?}",
                        recommendation.id
                    )));
                }
            }
            if !current.can_transition_to(change.to) {
                return Err(CampaignError::Validation(format!(
                    "recommendation {} cannot move from {current:?} to {:?}",
                    recommendation.id, change.to
                )));
            }
        }

        if let Some(change) = self.status {
            recommendation.status = change.to;
        }
        if let Some(priority) = self.priority {
            recommendation.priority = priority;
        }
        if let Some(impact) = self.estimated_impact {
            recommendation.estimated_impact = Some(impact);
        }
        Ok(())
    }
}
