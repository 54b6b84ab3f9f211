//! JSON fixture describing campaigns, keywords and recommendations, loaded
//! into the in-memory store and the sandbox platform.

use std::path::Path;

use anyhow::Context;
use campaign_core::types::{
    DailyKeywordPerformance, DailySearchTerm, Keyword, MetricSample, Recommendation,
};
use campaign_core::InMemoryStore;
use campaign_management::{CampaignSettings, SandboxPlatform};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct Fixture {
    /// Date treated as "today" when building analysis windows.
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
    #[serde(default)]
    pub campaigns: Vec<CampaignFixture>,
    #[serde(default)]
    pub keywords: Vec<Keyword>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Deserialize)]
pub struct CampaignFixture {
    pub id: Uuid,
    #[serde(default)]
    pub settings: CampaignSettings,
    #[serde(default)]
    pub samples: Vec<MetricSample>,
    #[serde(default)]
    pub search_terms: Vec<DailySearchTerm>,
    #[serde(default)]
    pub keyword_performance: Vec<DailyKeywordPerformance>,
}

impl Fixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing fixture {}", path.display()))
    }

    pub fn populate(&self, store: &InMemoryStore, platform: &SandboxPlatform) -> anyhow::Result<()> {
        for campaign in &self.campaigns {
            store.record_samples(campaign.id, campaign.samples.iter().cloned())?;
            store.record_search_terms(campaign.id, campaign.search_terms.iter().cloned());
            store.record_keyword_performance(campaign.id, campaign.keyword_performance.iter().cloned());
            platform.set_campaign(campaign.id, campaign.settings.clone());
        }
        for keyword in &self.keywords {
            store.upsert_keyword(keyword.clone());
        }
        for recommendation in &self.recommendations {
            store.insert_recommendation(recommendation.clone())?;
        }
        info!(
            campaigns = self.campaigns.len(),
            keywords = self.keywords.len(),
            recommendations = self.recommendations.len(),
            "Fixture loaded"
        );
        Ok(())
    }
}
