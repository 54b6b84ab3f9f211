//! Background service that drains the implementation queue on an interval.

use std::sync::Arc;
use std::time::Duration;

use campaign_core::config::QueueConfig;
use campaign_core::{CampaignError, CampaignResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::queue::ImplementationQueue;

/// Owns the polling loop around an [`ImplementationQueue`].
///
/// Constructed explicitly and passed to whoever needs it; there is no global instance.
pub struct ImplementationService {
    queue: Arc<ImplementationQueue>,
    config: QueueConfig,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl ImplementationService {
    pub fn new(queue: Arc<ImplementationQueue>, config: QueueConfig) -> Self {
        Self {
            queue,
            config,
            shutdown: None,
            handle: None,
        }
    }

    pub fn queue(&self) -> Arc<ImplementationQueue> {
        self.queue.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the polling loop. Processes pending items every `poll_interval_ms`
    /// as the configured service user.
    pub fn start(&mut self) -> CampaignResult<()> {
        if self.handle.is_some() {
            return Err(CampaignError::Validation(
                "implementation service already started".into(),
            ));
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cancel = shutdown_rx.clone();
        let queue = self.queue.clone();
        let user = self.config.service_user.clone();
        let max_concurrent = self.config.max_concurrent;
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if queue.pending_count() == 0 {
                            continue;
                        }
                        match queue.process_queue_until(&user, max_concurrent, cancel.clone()).await {
                            Ok(results) => debug!(processed = results.len(), "Queue poll completed"),
                            Err(e) => warn!(error = %e, "Queue poll failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }
            info!("Implementation service loop stopped");
        });

        self.shutdown = Some(shutdown_tx);
        self.handle = Some(handle);
        info!(
            user = %self.config.service_user,
            max_concurrent,
            poll_interval_ms = self.config.poll_interval_ms,
            "Implementation service started"
        );
        Ok(())
    }

    /// Signal the loop and wait for it. In-flight items finish; nothing new is dispatched.
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Implementation service task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{CampaignSettings, SandboxPlatform, StaticIdentityProvider};
    use campaign_core::capabilities::RecommendationStore;
    use campaign_core::types::{
        Priority, ProposedChange, Recommendation, RecommendationStatus, RecommendationType,
    };
    use campaign_core::InMemoryStore;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_service_drains_queue_and_stops() {
        let store = Arc::new(InMemoryStore::new());
        let platform = Arc::new(SandboxPlatform::new());
        let config = QueueConfig {
            poll_interval_ms: 10,
            ..QueueConfig::default()
        };
        let identity = Arc::new(StaticIdentityProvider::new().with_user(&config.service_user));

        let campaign = Uuid::new_v4();
        platform.set_campaign(
            campaign,
            CampaignSettings {
                daily_budget: 100.0,
                ..Default::default()
            },
        );
        let rec = Recommendation {
            id: Uuid::new_v4(),
            recommendation_type: RecommendationType::BudgetIncrease,
            campaign_id: campaign,
            proposed_change: ProposedChange::Budget {
                current_daily_budget: 100.0,
                proposed_daily_budget: 125.0,
            },
            status: RecommendationStatus::Accepted,
            priority: Priority::High,
            estimated_impact: None,
            created_at: Utc::now(),
        };
        store.insert_recommendation(rec.clone()).unwrap();

        let queue = Arc::new(ImplementationQueue::new(
            config.clone(),
            store.clone(),
            platform.clone(),
            identity,
        ));
        queue.queue_implementation(rec.id, Priority::High).await.unwrap();

        let mut service = ImplementationService::new(queue.clone(), config);
        service.start().unwrap();
        assert!(service.start().is_err());

        for _ in 0..200 {
            if queue.pending_count() == 0
                && store.get_recommendation(rec.id).await.unwrap().status == RecommendationStatus::Implemented
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        service.stop().await;

        assert!(!service.is_running());
        assert_eq!(platform.campaign(campaign).unwrap().daily_budget, 125.0);
        assert_eq!(
            store.get_recommendation(rec.id).await.unwrap().status,
            RecommendationStatus::Implemented
        );
    }
}
