//! Collaborator interfaces consumed by the optimizer core.
//!
//! Persistence, the advertising platform and identity are owned elsewhere;
//! the core only sees these traits.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::{ApplyError, CampaignResult};
use crate::types::{ChangeSnapshot, Credentials, Keyword, PerformanceWindow, Recommendation};
use crate::updates::RecommendationUpdate;

/// Read access to campaign performance history and keyword configuration.
#[async_trait]
pub trait PerformanceStore: Send + Sync + 'static {
    /// Samples for `campaign_id` within `[start, end]`. Unknown campaigns are `NotFound`.
    async fn performance_window(
        &self,
        campaign_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CampaignResult<PerformanceWindow>;

    /// Every keyword configured across the account's campaigns.
    async fn account_keywords(&self, account_id: Uuid) -> CampaignResult<Vec<Keyword>>;
}

/// Read/write access to recommendation records.
#[async_trait]
pub trait RecommendationStore: Send + Sync + 'static {
    async fn get_recommendation(&self, id: Uuid) -> CampaignResult<Recommendation>;

    /// Apply a validated update atomically and return the updated record.
    async fn update_recommendation(
        &self,
        id: Uuid,
        update: RecommendationUpdate,
    ) -> CampaignResult<Recommendation>;
}

/// The external advertising platform.
#[async_trait]
pub trait AdPlatform: Send + Sync + 'static {
    /// Apply the recommendation's change, returning the state it replaced.
    async fn apply(
        &self,
        recommendation: &Recommendation,
        credentials: &Credentials,
    ) -> Result<ChangeSnapshot, ApplyError>;

    /// Restore the state captured in `snapshot`.
    async fn rollback(
        &self,
        snapshot: &ChangeSnapshot,
        credentials: &Credentials,
    ) -> Result<(), ApplyError>;
}

/// Resolves a caller to platform credentials. Failures surface as `Unauthorized`.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    async fn credentials_for(&self, user_id: &str) -> CampaignResult<Credentials>;
}
