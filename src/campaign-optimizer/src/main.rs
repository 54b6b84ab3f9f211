//! Campaign Optimizer — analytics-to-action pipeline for search campaigns.
//!
//! Loads a JSON fixture into the in-memory store and sandbox platform, runs
//! one operation and prints the result as JSON.

mod fixture;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use campaign_analytics::{AnalyticsService, Scenario, ScenarioKind};
use campaign_core::capabilities::RecommendationStore;
use campaign_core::config::AppConfig;
use campaign_core::types::Priority;
use campaign_core::InMemoryStore;
use campaign_management::{
    ImplementationQueue, QueueOptions, QueueState, SandboxPlatform, StaticIdentityProvider,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::fixture::Fixture;

#[derive(Parser, Debug)]
#[command(name = "campaign-optimizer")]
#[command(about = "Campaign performance analysis, impact simulation and recommendation rollout")]
#[command(version)]
struct Cli {
    /// Optional TOML config file (environment: CAMPAIGN_OPTIMIZER__*)
    #[arg(long, env = "CAMPAIGN_OPTIMIZER_CONFIG")]
    config: Option<String>,

    /// JSON fixture with campaigns, keywords and recommendations
    #[arg(long, env = "CAMPAIGN_OPTIMIZER_FIXTURE")]
    fixture: PathBuf,

    /// Evaluate windows as of this date (default: fixture as_of, then today)
    #[arg(long)]
    as_of: Option<NaiveDate>,

    /// Queue worker limit (overrides config)
    #[arg(long, env = "CAMPAIGN_OPTIMIZER__QUEUE__MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trends, anomalies and confidence for one campaign
    Analyze {
        campaign: Uuid,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },

    /// CPA forecast
    Forecast {
        campaign: Uuid,
        /// Days ahead of the last observation
        #[arg(long, default_value_t = 14)]
        days: u32,
    },

    /// Estimate one stored recommendation and record the estimate
    Estimate { recommendation: Uuid },

    /// Simulate the combined effect of several recommendations
    Simulate {
        campaign: Uuid,
        /// Comma-separated recommendation ids
        #[arg(long, value_delimiter = ',', required = true)]
        recommendations: Vec<Uuid>,
        #[arg(long, value_enum, default_value_t = ScenarioArg::Expected)]
        scenario: ScenarioArg,
        #[arg(long, default_value_t = 30)]
        horizon: u32,
        /// Apply contradicting recommendations instead of failing
        #[arg(long, default_value_t = false)]
        allow_conflicts: bool,
    },

    /// Duplicate and conflicting keywords across an account
    Duplicates {
        account: Uuid,
        #[arg(long, value_enum, default_value_t = DuplicateScope::All)]
        scope: DuplicateScope,
        /// Include keep/pause resolution plans
        #[arg(long, default_value_t = false)]
        plan: bool,
    },

    /// Queue accepted recommendations and run them against the sandbox platform
    Implement {
        /// Comma-separated recommendation ids (default: every accepted recommendation)
        #[arg(long, value_delimiter = ',')]
        recommendations: Vec<Uuid>,
        #[arg(long, default_value = "analyst")]
        user: String,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Roll back every succeeded item afterwards
        #[arg(long, default_value_t = false)]
        rollback: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ScenarioArg {
    Conservative,
    Expected,
    Optimistic,
}

impl From<ScenarioArg> for ScenarioKind {
    fn from(arg: ScenarioArg) -> Self {
        match arg {
            ScenarioArg::Conservative => ScenarioKind::Conservative,
            ScenarioArg::Expected => ScenarioKind::Expected,
            ScenarioArg::Optimistic => ScenarioKind::Optimistic,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DuplicateScope {
    All,
    CrossCampaign,
    MatchType,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "campaign_optimizer=info,campaign_management=info,campaign_analytics=info".into()
            }),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(max_concurrent) = cli.max_concurrent {
        config.queue.max_concurrent = max_concurrent;
    }
    info!(
        node_id = %config.node_id,
        max_concurrent = config.queue.max_concurrent,
        "Configuration loaded"
    );

    let fixture = Fixture::load(&cli.fixture)?;
    let store = Arc::new(InMemoryStore::new());
    let platform = Arc::new(SandboxPlatform::new());
    fixture.populate(&store, &platform)?;

    let mut analytics = AnalyticsService::new(&config, store.clone(), store.clone());
    if let Some(as_of) = cli.as_of.or(fixture.as_of) {
        analytics = analytics.with_as_of(as_of);
    }

    match cli.command {
        Commands::Analyze { campaign, days } => {
            print_json(&analytics.analyze_performance(campaign, days).await?)?;
        }
        Commands::Forecast { campaign, days } => {
            print_json(&analytics.predict_cpa(campaign, days).await?)?;
        }
        Commands::Estimate { recommendation } => {
            print_json(&analytics.record_estimated_impact(recommendation).await?)?;
        }
        Commands::Simulate {
            campaign,
            recommendations,
            scenario,
            horizon,
            allow_conflicts,
        } => {
            let mut recs = Vec::with_capacity(recommendations.len());
            for id in recommendations {
                recs.push(store.get_recommendation(id).await?);
            }
            let scenario = Scenario {
                kind: scenario.into(),
                horizon_days: horizon,
                allow_conflicts,
            };
            print_json(&analytics.simulate_impact(campaign, &recs, &scenario).await?)?;
        }
        Commands::Duplicates {
            account,
            scope,
            plan,
        } => {
            let groups = match scope {
                DuplicateScope::All => analytics.find_duplicates(account).await?,
                DuplicateScope::CrossCampaign => analytics.find_cross_campaign_duplicates(account).await?,
                DuplicateScope::MatchType => analytics.find_match_type_conflicts(account).await?,
            };
            let plans = if plan {
                groups
                    .iter()
                    .map(|g| analytics.detector().resolution_plan(g))
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                Vec::new()
            };
            print_json(&serde_json::json!({
                "groups": groups,
                "potential_savings": analytics.calculate_potential_savings(&groups),
                "resolution_plans": plans,
            }))?;
        }
        Commands::Implement {
            recommendations,
            user,
            dry_run,
            force,
            rollback,
        } => {
            let identity = Arc::new(StaticIdentityProvider::new().with_user(&user));
            let queue = Arc::new(ImplementationQueue::new(
                config.queue.clone(),
                store.clone(),
                platform.clone(),
                identity,
            ));

            let ids = if recommendations.is_empty() {
                store
                    .list_recommendations(None)
                    .into_iter()
                    .filter(|r| r.status.is_actionable())
                    .map(|r| r.id)
                    .collect()
            } else {
                recommendations
            };
            for id in ids {
                let priority = store
                    .get_recommendation(id)
                    .await
                    .map(|r| r.priority)
                    .unwrap_or(Priority::Medium);
                queue
                    .queue_implementation_with(id, priority, QueueOptions { dry_run, force })
                    .await
                    .with_context(|| format!("queueing recommendation {id}"))?;
            }

            let results = queue
                .process_queue(&user, config.queue.max_concurrent)
                .await?;

            let mut rollbacks = Vec::new();
            if rollback {
                for result in results.iter().filter(|r| r.state == QueueState::Succeeded && !r.dry_run) {
                    match queue.rollback(&user, result.item_id).await {
                        Ok(item) => rollbacks.push(item),
                        Err(e) => warn!(item_id = %result.item_id, error = %e, "Rollback failed"),
                    }
                }
            }

            print_json(&serde_json::json!({
                "results": results,
                "rollbacks": rollbacks,
                "status": queue.get_queue_status(),
            }))?;
        }
    }

    Ok(())
}
