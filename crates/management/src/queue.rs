//! Implementation queue — executes accepted recommendations against the ad
//! platform through a bounded worker pool, with per-item failure isolation
//! and snapshot-based rollback.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use campaign_analytics::impact::conflicts_with;
use campaign_core::capabilities::{AdPlatform, IdentityProvider, RecommendationStore};
use campaign_core::config::QueueConfig;
use campaign_core::types::{
    ChangeSnapshot, Credentials, Priority, ProposedChange, Recommendation, RecommendationStatus,
    RecommendationType,
};
use campaign_core::{ApplyError, CampaignError, CampaignResult, RecommendationUpdate};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ─── Queue items ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    Pending,
    Running,
    Succeeded,
    Failed,
    RolledBack,
    RollbackFailed,
}

impl QueueState {
    pub const ALL: [QueueState; 6] = [
        Self::Pending,
        Self::Running,
        Self::Succeeded,
        Self::Failed,
        Self::RolledBack,
        Self::RollbackFailed,
    ];

    /// Terminal for normal processing. `Succeeded` may still be rolled back.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::RolledBack | Self::RollbackFailed
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Compute the planned platform call without executing it.
    #[serde(default)]
    pub dry_run: bool,
    /// Skip conflict checks against other active items.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub recommendation_id: Uuid,
    pub priority: Priority,
    pub state: QueueState,
    pub attempt_count: u32,
    /// Present if and only if the platform apply succeeded.
    pub pre_change_snapshot: Option<ChangeSnapshot>,
    pub last_error: Option<String>,
    pub options: QueueOptions,
    pub sequence: u64,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Record as read by the worker, used for conflict checks.
    #[serde(skip)]
    recommendation: Option<Recommendation>,
    #[serde(skip)]
    rollback_in_progress: bool,
}

/// The platform call a dry run would have made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePreview {
    pub campaign_id: Uuid,
    pub recommendation_type: RecommendationType,
    pub change: ProposedChange,
}

/// Outcome of one dispatched item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementationResult {
    pub item_id: Uuid,
    pub recommendation_id: Uuid,
    pub state: QueueState,
    pub attempts: u32,
    pub dry_run: bool,
    pub preview: Option<ChangePreview>,
    pub snapshot_id: Option<Uuid>,
    pub error: Option<String>,
}

impl ImplementationResult {
    fn from_item(item: &QueueItem, preview: Option<ChangePreview>) -> Self {
        Self {
            item_id: item.id,
            recommendation_id: item.recommendation_id,
            state: item.state,
            attempts: item.attempt_count,
            dry_run: item.options.dry_run,
            preview,
            snapshot_id: item.pre_change_snapshot.as_ref().map(|s| s.id),
            error: item.last_error.clone(),
        }
    }
}

/// Max-heap entry: higher priority first, then lower sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingEntry {
    priority: Priority,
    sequence: u64,
    item_id: Uuid,
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// ─── Queue ──────────────────────────────────────────────────────────────────

pub struct ImplementationQueue {
    items: DashMap<Uuid, QueueItem>,
    pending: Mutex<BinaryHeap<PendingEntry>>,
    sequence: AtomicU64,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    /// Queue-wide bound on running items, shared by every concurrent run.
    workers: Arc<Semaphore>,
    recommendations: Arc<dyn RecommendationStore>,
    platform: Arc<dyn AdPlatform>,
    identity: Arc<dyn IdentityProvider>,
    config: QueueConfig,
}

impl ImplementationQueue {
    pub fn new(
        config: QueueConfig,
        recommendations: Arc<dyn RecommendationStore>,
        platform: Arc<dyn AdPlatform>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        info!(
            max_concurrent = config.max_concurrent,
            max_attempts = config.max_attempts,
            "Implementation queue initialized"
        );
        Self {
            items: DashMap::new(),
            pending: Mutex::new(BinaryHeap::new()),
            sequence: AtomicU64::new(0),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            workers: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            recommendations,
            platform,
            identity,
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    // ─── Enqueue ───────────────────────────────────────────────────────────

    pub async fn queue_implementation(
        &self,
        recommendation_id: Uuid,
        priority: Priority,
    ) -> CampaignResult<QueueItem> {
        self.queue_implementation_with(recommendation_id, priority, QueueOptions::default())
            .await
    }

    /// Enqueue a recommendation. A recommendation may have at most one non-terminal item.
    pub async fn queue_implementation_with(
        &self,
        recommendation_id: Uuid,
        priority: Priority,
        options: QueueOptions,
    ) -> CampaignResult<QueueItem> {
        // Existence check only; workers re-read the record before acting.
        self.recommendations.get_recommendation(recommendation_id).await?;

        let mut pending = self.pending.lock();
        if let Some(existing) = self
            .items
            .iter()
            .find(|i| i.recommendation_id == recommendation_id && !i.state.is_terminal())
        {
            return Err(CampaignError::Validation(format!(
                "recommendation {recommendation_id} already queued as item {} ({:?})",
                existing.id, existing.state
            )));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let item = QueueItem {
            id: Uuid::new_v4(),
            recommendation_id,
            priority,
            state: QueueState::Pending,
            attempt_count: 0,
            pre_change_snapshot: None,
            last_error: None,
            options,
            sequence,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            recommendation: None,
            rollback_in_progress: false,
        };
        self.items.insert(item.id, item.clone());
        pending.push(PendingEntry {
            priority,
            sequence,
            item_id: item.id,
        });
        drop(pending);

        metrics::counter!("queue.enqueued").increment(1);
        info!(
            item_id = %item.id,
            recommendation_id = %recommendation_id,
            priority = ?priority,
            dry_run = options.dry_run,
            force = options.force,
            "Recommendation queued for implementation"
        );
        Ok(item)
    }

    // ─── Processing ────────────────────────────────────────────────────────

    /// Drain the pending items with at most `max_concurrent` of this run's items
    /// running at once, and never more than `QueueConfig::max_concurrent` across
    /// all runs. Returns once every dispatched item has reached a terminal state.
    pub async fn process_queue(
        self: &Arc<Self>,
        user_id: &str,
        max_concurrent: usize,
    ) -> CampaignResult<Vec<ImplementationResult>> {
        let (_keep_open, cancel) = watch::channel(false);
        self.process_queue_until(user_id, max_concurrent, cancel).await
    }

    /// Like [`process_queue`](Self::process_queue), but stops dispatching new
    /// items once `cancel` reads `true`. In-flight items always finish.
    pub async fn process_queue_until(
        self: &Arc<Self>,
        user_id: &str,
        max_concurrent: usize,
        cancel: watch::Receiver<bool>,
    ) -> CampaignResult<Vec<ImplementationResult>> {
        if max_concurrent == 0 {
            return Err(CampaignError::Validation("max_concurrent must be positive".into()));
        }
        let credentials = self.identity.credentials_for(user_id).await?;

        // This run's own cap; the queue-wide bound still applies across runs.
        let run_limit = max_concurrent.min(self.config.max_concurrent.max(1));
        let semaphore = Arc::new(Semaphore::new(run_limit));
        let mut tasks = JoinSet::new();
        let mut dispatched = Vec::new();

        loop {
            if *cancel.borrow() {
                info!(dispatched = dispatched.len(), "Queue processing cancelled");
                break;
            }
            let run_permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| CampaignError::Internal(e.into()))?;
            let queue_permit = self
                .workers
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| CampaignError::Internal(e.into()))?;
            if *cancel.borrow() {
                info!(dispatched = dispatched.len(), "Queue processing cancelled");
                break;
            }
            let Some(item_id) = self.dispatch_next() else {
                break;
            };
            dispatched.push(item_id);

            let queue = Arc::clone(self);
            let credentials = credentials.clone();
            tasks.spawn(async move {
                let _permits = (run_permit, queue_permit);
                queue.run_item(item_id, &credentials).await
            });
        }

        let mut finished: HashMap<Uuid, ImplementationResult> = HashMap::with_capacity(dispatched.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    finished.insert(result.item_id, result);
                }
                Err(e) => error!(error = %e, "Queue worker panicked"),
            }
        }

        let mut results = Vec::with_capacity(dispatched.len());
        for item_id in dispatched {
            let result = match finished.remove(&item_id) {
                Some(result) => result,
                // Worker died without finishing: never leave the item running.
                None => self.finish(item_id, QueueState::Failed, None, Some("worker aborted".into())),
            };
            results.push(result);
        }

        metrics::counter!("queue.runs").increment(1);
        info!(
            user_id = %user_id,
            processed = results.len(),
            succeeded = results.iter().filter(|r| r.state == QueueState::Succeeded).count(),
            failed = results.iter().filter(|r| r.state == QueueState::Failed).count(),
            "Queue processing completed"
        );
        Ok(results)
    }

    /// Pop the next pending item and mark it running.
    fn dispatch_next(&self) -> Option<Uuid> {
        let mut pending = self.pending.lock();
        while let Some(entry) = pending.pop() {
            let Some(mut item) = self.items.get_mut(&entry.item_id) else {
                continue;
            };
            if item.state != QueueState::Pending {
                continue;
            }
            item.state = QueueState::Running;
            item.started_at = Some(Utc::now());
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_running.fetch_max(running, Ordering::SeqCst);
            metrics::counter!("queue.dispatched").increment(1);
            debug!(item_id = %entry.item_id, running, "Queue item dispatched");
            return Some(entry.item_id);
        }
        None
    }

    async fn run_item(&self, item_id: Uuid, credentials: &Credentials) -> ImplementationResult {
        let Some((options, recommendation_id)) = self
            .items
            .get(&item_id)
            .map(|i| (i.options, i.recommendation_id))
        else {
            return self.finish(item_id, QueueState::Failed, None, Some("queue item vanished".into()));
        };

        // Re-read: the record may have changed since it was queued.
        let recommendation = match self.recommendations.get_recommendation(recommendation_id).await {
            Ok(rec) => rec,
            Err(e) => return self.fail(item_id, e.to_string()),
        };
        if !recommendation.status.is_actionable() {
            return self.fail(
                item_id,
                format!("recommendation is {:?}, only accepted recommendations are implemented", recommendation.status),
            );
        }
        if let Some(mut item) = self.items.get_mut(&item_id) {
            item.recommendation = Some(recommendation.clone());
        }

        if !options.force {
            let active = self.active_recommendations(item_id);
            let conflicts = conflicts_with(&recommendation, &active);
            if !conflicts.is_empty() {
                metrics::counter!("queue.conflicts").increment(1);
                return self.fail(item_id, CampaignError::Conflict(conflicts).to_string());
            }
        }

        if options.dry_run {
            let preview = ChangePreview {
                campaign_id: recommendation.campaign_id,
                recommendation_type: recommendation.recommendation_type,
                change: recommendation.proposed_change.clone(),
            };
            metrics::counter!("queue.dry_runs").increment(1);
            info!(item_id = %item_id, recommendation_id = %recommendation_id, "Dry run completed");
            return self.finish(item_id, QueueState::Succeeded, Some(preview), None);
        }

        let claim = RecommendationUpdate::transition(
            RecommendationStatus::Accepted,
            RecommendationStatus::Implementing,
        );
        if let Err(e) = self.recommendations.update_recommendation(recommendation_id, claim).await {
            return self.fail(item_id, format!("could not claim recommendation: {e}"));
        }

        match self.apply_with_retry(item_id, &recommendation, credentials).await {
            Ok(snapshot) => {
                if let Some(mut item) = self.items.get_mut(&item_id) {
                    item.pre_change_snapshot = Some(snapshot);
                }
                self.set_recommendation_status(
                    recommendation_id,
                    RecommendationStatus::Implementing,
                    RecommendationStatus::Implemented,
                )
                .await;
                metrics::counter!("queue.succeeded").increment(1);
                info!(item_id = %item_id, recommendation_id = %recommendation_id, "Recommendation implemented");
                self.finish(item_id, QueueState::Succeeded, None, None)
            }
            Err(e) => {
                self.set_recommendation_status(
                    recommendation_id,
                    RecommendationStatus::Implementing,
                    RecommendationStatus::Failed,
                )
                .await;
                self.fail(item_id, CampaignError::ExternalApply(e).to_string())
            }
        }
    }

    /// Call the platform, retrying transient errors with capped exponential backoff.
    async fn apply_with_retry(
        &self,
        item_id: Uuid,
        recommendation: &Recommendation,
        credentials: &Credentials,
    ) -> Result<ChangeSnapshot, ApplyError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(mut item) = self.items.get_mut(&item_id) {
                item.attempt_count = attempt;
            }

            let started = Instant::now();
            let outcome = self.platform.apply(recommendation, credentials).await;
            metrics::histogram!("queue.apply_seconds").record(started.elapsed().as_secs_f64());

            match outcome {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    metrics::counter!("queue.retries").increment(1);
                    warn!(
                        item_id = %item_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient apply failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `base * 2^(attempt-1)` plus up to 25% jitter, capped at the configured maximum.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.backoff_max_ms);
        let jitter = if delay >= 4 {
            rand::thread_rng().gen_range(0..=delay / 4)
        } else {
            0
        };
        Duration::from_millis((delay + jitter).min(self.config.backoff_max_ms))
    }

    /// Recommendations of other items that are running or applied.
    fn active_recommendations(&self, except: Uuid) -> Vec<Recommendation> {
        self.items
            .iter()
            .filter(|i| i.id != except)
            .filter(|i| matches!(i.state, QueueState::Running | QueueState::Succeeded))
            .filter(|i| !i.options.dry_run)
            .filter_map(|i| i.recommendation.clone())
            .collect()
    }

    async fn set_recommendation_status(
        &self,
        recommendation_id: Uuid,
        expected: RecommendationStatus,
        to: RecommendationStatus,
    ) {
        let update = RecommendationUpdate::transition(expected, to);
        if let Err(e) = self.recommendations.update_recommendation(recommendation_id, update).await {
            error!(
                recommendation_id = %recommendation_id,
                to = ?to,
                error = %e,
                "Failed to record recommendation status"
            );
        }
    }

    fn fail(&self, item_id: Uuid, message: String) -> ImplementationResult {
        metrics::counter!("queue.failed").increment(1);
        error!(item_id = %item_id, error = %message, "Queue item failed");
        self.finish(item_id, QueueState::Failed, None, Some(message))
    }

    fn finish(
        &self,
        item_id: Uuid,
        state: QueueState,
        preview: Option<ChangePreview>,
        error: Option<String>,
    ) -> ImplementationResult {
        match self.items.get_mut(&item_id) {
            Some(mut item) => {
                if item.state == QueueState::Running {
                    self.running.fetch_sub(1, Ordering::SeqCst);
                }
                item.state = state;
                item.finished_at = Some(Utc::now());
                if error.is_some() {
                    item.last_error = error;
                }
                ImplementationResult::from_item(&item, preview)
            }
            None => ImplementationResult {
                item_id,
                recommendation_id: Uuid::nil(),
                state,
                attempts: 0,
                dry_run: false,
                preview,
                snapshot_id: None,
                error,
            },
        }
    }

    // ─── Rollback ──────────────────────────────────────────────────────────

    /// Restore the pre-change snapshot of a succeeded item. A failed rollback
    /// leaves the item in `RollbackFailed` and is never retried automatically.
    pub async fn rollback(&self, user_id: &str, item_id: Uuid) -> CampaignResult<QueueItem> {
        let credentials = self.identity.credentials_for(user_id).await?;

        let (snapshot, recommendation_id) = {
            let mut item = self
                .items
                .get_mut(&item_id)
                .ok_or_else(|| CampaignError::not_found("queue item", item_id))?;
            if item.state != QueueState::Succeeded {
                return Err(CampaignError::Validation(format!(
                    "queue item {item_id} is {:?}, only succeeded items can be rolled back",
                    item.state
                )));
            }
            if item.rollback_in_progress {
                return Err(CampaignError::Validation(format!(
                    "rollback of queue item {item_id} already in progress"
                )));
            }
            let snapshot = item.pre_change_snapshot.clone().ok_or_else(|| {
                CampaignError::Validation(format!("queue item {item_id} has no pre-change snapshot"))
            })?;
            item.rollback_in_progress = true;
            (snapshot, item.recommendation_id)
        };

        let outcome = self.platform.rollback(&snapshot, &credentials).await;

        let updated = {
            let mut item = self
                .items
                .get_mut(&item_id)
                .ok_or_else(|| CampaignError::not_found("queue item", item_id))?;
            item.rollback_in_progress = false;
            item.finished_at = Some(Utc::now());
            match &outcome {
                Ok(()) => item.state = QueueState::RolledBack,
                Err(e) => {
                    item.state = QueueState::RollbackFailed;
                    item.last_error = Some(e.to_string());
                }
            }
            item.clone()
        };

        match outcome {
            Ok(()) => {
                self.set_recommendation_status(
                    recommendation_id,
                    RecommendationStatus::Implemented,
                    RecommendationStatus::RolledBack,
                )
                .await;
                metrics::counter!("queue.rolled_back").increment(1);
                info!(item_id = %item_id, recommendation_id = %recommendation_id, "Change rolled back");
                Ok(updated)
            }
            Err(e) => {
                metrics::counter!("queue.rollback_failed").increment(1);
                error!(
                    item_id = %item_id,
                    recommendation_id = %recommendation_id,
                    error = %e,
                    "Rollback failed, manual intervention required"
                );
                Err(CampaignError::Rollback(format!("queue item {item_id}: {e}")))
            }
        }
    }

    // ─── Inspection ────────────────────────────────────────────────────────

    /// Item count per state, every state included.
    pub fn get_queue_status(&self) -> BTreeMap<QueueState, usize> {
        let mut counts: BTreeMap<QueueState, usize> = QueueState::ALL.iter().map(|s| (*s, 0)).collect();
        for item in self.items.iter() {
            *counts.entry(item.state).or_insert(0) += 1;
        }
        counts
    }

    /// Evict terminal items. Items with a rollback in flight are kept.
    pub fn clear_completed(&self) -> usize {
        let mut removed = 0;
        self.items.retain(|_, item| {
            let evict = item.state.is_terminal() && !item.rollback_in_progress;
            if evict {
                removed += 1;
            }
            !evict
        });
        info!(removed, "Completed queue items cleared");
        removed
    }

    pub fn get_item(&self, item_id: Uuid) -> Option<QueueItem> {
        self.items.get(&item_id).map(|i| i.value().clone())
    }

    /// All items in enqueue order.
    pub fn items(&self) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self.items.iter().map(|i| i.value().clone()).collect();
        items.sort_by_key(|i| i.sequence);
        items
    }

    pub fn pending_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.state == QueueState::Pending)
            .count()
    }

    /// Highest number of items observed running at the same time.
    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }
}
