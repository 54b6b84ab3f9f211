use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Insufficient data: {actual} samples, at least {required} required")]
    InsufficientData { required: usize, actual: usize },

    #[error("Conflicting recommendations: {}", describe_conflicts(.0))]
    Conflict(Vec<RecommendationConflict>),

    #[error("External apply error: {0}")]
    ExternalApply(#[from] ApplyError),

    #[error("Rollback error: {0}")]
    Rollback(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CampaignError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Two recommendations that pull the same lever in opposite directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationConflict {
    pub first: Uuid,
    pub second: Uuid,
    pub campaign_id: Uuid,
    pub reason: String,
}

fn describe_conflicts(conflicts: &[RecommendationConflict]) -> String {
    conflicts
        .iter()
        .map(|c| format!("{} vs {} ({})", c.first, c.second, c.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Whether an external failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyErrorKind {
    /// Timeouts, throttling, 5xx responses.
    Transient,
    /// Rejected changes, revoked access, unknown entities.
    Permanent,
}

/// Failure reported by the advertising platform for an apply or rollback call.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct ApplyError {
    pub kind: ApplyErrorKind,
    pub message: String,
}

impl ApplyError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ApplyErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ApplyErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ApplyErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_lists_pairs() {
        let err = CampaignError::Conflict(vec![RecommendationConflict {
            first: Uuid::from_u128(1),
            second: Uuid::from_u128(2),
            campaign_id: Uuid::from_u128(3),
            reason: "budget raised and lowered".into(),
        }]);
        let msg = err.to_string();
        assert!(msg.contains("budget raised and lowered"));
        assert!(msg.contains(&Uuid::from_u128(2).to_string()));
    }

    #[test]
    fn test_apply_error_retryability() {
        assert!(ApplyError::transient("throttled").is_retryable());
        assert!(!ApplyError::permanent("rejected").is_retryable());
    }
}
