//! Sandbox advertising platform and static identity provider.
//!
//! Keeps campaign settings in memory so changes, snapshots and rollbacks can
//! be exercised end to end without a real platform account.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use campaign_core::capabilities::{AdPlatform, IdentityProvider};
use campaign_core::types::{
    ChangeSnapshot, Credentials, KeywordStatus, MatchType, ProposedChange, Recommendation,
};
use campaign_core::{ApplyError, CampaignError, CampaignResult};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NegativeKeyword {
    pub text: String,
    pub match_type: MatchType,
}

/// Everything the sandbox lets a recommendation change on one campaign.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignSettings {
    pub daily_budget: f64,
    pub default_bid: f64,
    #[serde(default)]
    pub keyword_bids: BTreeMap<Uuid, f64>,
    #[serde(default)]
    pub negative_keywords: BTreeSet<NegativeKeyword>,
    #[serde(default)]
    pub keyword_status: BTreeMap<Uuid, KeywordStatus>,
    #[serde(default)]
    pub keyword_match_types: BTreeMap<Uuid, MatchType>,
}

impl CampaignSettings {
    fn apply_change(&mut self, change: &ProposedChange) {
        match change {
            ProposedChange::Budget {
                proposed_daily_budget,
                ..
            } => self.daily_budget = *proposed_daily_budget,
            ProposedChange::Bid {
                keyword_id: None,
                proposed_bid,
                ..
            } => self.default_bid = *proposed_bid,
            ProposedChange::Bid {
                keyword_id: Some(id),
                proposed_bid,
                ..
            } => {
                self.keyword_bids.insert(*id, *proposed_bid);
            }
            ProposedChange::NegativeKeywords {
                keywords,
                match_type,
            } => {
                for text in keywords.iter().filter(|k| !k.trim().is_empty()) {
                    self.negative_keywords.insert(NegativeKeyword {
                        text: text.trim().to_string(),
                        match_type: *match_type,
                    });
                }
            }
            ProposedChange::PauseKeyword { keyword_id, .. } => {
                self.keyword_status.insert(*keyword_id, KeywordStatus::Paused);
            }
            ProposedChange::MatchType { keyword_id, to, .. } => {
                self.keyword_match_types.insert(*keyword_id, *to);
            }
        }
    }
}

/// Decrements the in-flight counter when a platform call ends.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct SandboxPlatform {
    campaigns: DashMap<Uuid, CampaignSettings>,
    /// recommendation_id -> errors returned by the next apply calls, in order
    apply_failures: DashMap<Uuid, VecDeque<ApplyError>>,
    /// recommendation_id -> error returned by its rollback
    rollback_failures: DashMap<Uuid, ApplyError>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    apply_calls: AtomicUsize,
}

impl SandboxPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated network time per platform call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_campaign(&self, campaign_id: Uuid, settings: CampaignSettings) {
        self.campaigns.insert(campaign_id, settings);
    }

    pub fn campaign(&self, campaign_id: Uuid) -> Option<CampaignSettings> {
        self.campaigns.get(&campaign_id).map(|c| c.value().clone())
    }

    /// Queue errors for the next apply calls of a recommendation.
    pub fn inject_apply_failures(&self, recommendation_id: Uuid, errors: Vec<ApplyError>) {
        self.apply_failures
            .entry(recommendation_id)
            .or_default()
            .extend(errors);
    }

    pub fn inject_rollback_failure(&self, recommendation_id: Uuid, error: ApplyError) {
        self.rollback_failures.insert(recommendation_id, error);
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    fn check_credentials(credentials: &Credentials) -> Result<(), ApplyError> {
        if credentials.access_token.is_empty() {
            return Err(ApplyError::permanent("missing access token"));
        }
        if credentials.expires_at.is_some_and(|at| at <= Utc::now()) {
            return Err(ApplyError::permanent("access token expired"));
        }
        Ok(())
    }
}

#[async_trait]
impl AdPlatform for SandboxPlatform {
    async fn apply(
        &self,
        recommendation: &Recommendation,
        credentials: &Credentials,
    ) -> Result<ChangeSnapshot, ApplyError> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Self::check_credentials(credentials)?;

        let injected = self
            .apply_failures
            .get_mut(&recommendation.id)
            .and_then(|mut queue| queue.pop_front());
        if let Some(error) = injected {
            debug!(recommendation_id = %recommendation.id, error = %error, "Injected apply failure");
            return Err(error);
        }

        let mut settings = self.campaigns.get_mut(&recommendation.campaign_id).ok_or_else(|| {
            ApplyError::permanent(format!("campaign {} not found", recommendation.campaign_id))
        })?;
        let state = serde_json::to_value(settings.value())
            .map_err(|e| ApplyError::permanent(format!("snapshot encoding failed: {e}")))?;
        settings.apply_change(&recommendation.proposed_change);

        info!(
            recommendation_id = %recommendation.id,
            campaign_id = %recommendation.campaign_id,
            "Sandbox change applied"
        );
        Ok(ChangeSnapshot {
            id: Uuid::new_v4(),
            recommendation_id: recommendation.id,
            campaign_id: recommendation.campaign_id,
            captured_at: Utc::now(),
            state,
        })
    }

    async fn rollback(
        &self,
        snapshot: &ChangeSnapshot,
        credentials: &Credentials,
    ) -> Result<(), ApplyError> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Self::check_credentials(credentials)?;

        if let Some((_, error)) = self.rollback_failures.remove(&snapshot.recommendation_id) {
            return Err(error);
        }

        let settings: CampaignSettings = serde_json::from_value(snapshot.state.clone())
            .map_err(|e| ApplyError::permanent(format!("unreadable snapshot {}: {e}", snapshot.id)))?;
        self.campaigns.insert(snapshot.campaign_id, settings);
        info!(
            snapshot_id = %snapshot.id,
            campaign_id = %snapshot.campaign_id,
            "Sandbox change rolled back"
        );
        Ok(())
    }
}

/// Identity provider with a fixed set of known users.
#[derive(Default)]
pub struct StaticIdentityProvider {
    users: DashMap<String, Credentials>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user_id: &str) -> Self {
        self.add_user(user_id);
        self
    }

    pub fn add_user(&self, user_id: &str) {
        self.users.insert(
            user_id.to_string(),
            Credentials {
                user_id: user_id.to_string(),
                access_token: format!("sandbox-{}", Uuid::new_v4()),
                scopes: vec!["campaigns:write".to_string()],
                expires_at: None,
            },
        );
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn credentials_for(&self, user_id: &str) -> CampaignResult<Credentials> {
        self.users
            .get(user_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| CampaignError::Unauthorized(format!("unknown user '{user_id}'")))
    }
}
