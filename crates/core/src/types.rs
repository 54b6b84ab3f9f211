use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CampaignError, CampaignResult};

// ─── Performance history ────────────────────────────────────────────────────

/// One day of recorded performance for a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub date: NaiveDate,
    pub impressions: u64,
    pub clicks: u64,
    pub cost: f64,
    pub conversions: f64,
    pub conversion_value: f64,
}

impl MetricSample {
    /// Click-through rate, `None` when there were no impressions.
    pub fn ctr(&self) -> Option<f64> {
        (self.impressions > 0).then(|| self.clicks as f64 / self.impressions as f64)
    }

    /// Cost per click, `None` when there were no clicks.
    pub fn cpc(&self) -> Option<f64> {
        (self.clicks > 0).then(|| self.cost / self.clicks as f64)
    }

    /// Cost per acquisition, `None` when nothing converted.
    pub fn cpa(&self) -> Option<f64> {
        (self.conversions > 0.0).then(|| self.cost / self.conversions)
    }

    /// Return on ad spend, `None` when nothing was spent.
    pub fn roas(&self) -> Option<f64> {
        (self.cost > 0.0).then(|| self.conversion_value / self.cost)
    }
}

/// Aggregated spend for a single search query over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTermStat {
    pub term: String,
    pub clicks: u64,
    pub cost: f64,
    pub conversions: f64,
}

/// Aggregated performance of one keyword over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordPerformance {
    pub keyword_id: Uuid,
    pub text: String,
    pub match_type: MatchType,
    pub clicks: u64,
    pub cost: f64,
    pub conversions: f64,
    pub conversion_value: f64,
}

/// One day of traffic for a search term, as recorded by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySearchTerm {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub stat: SearchTermStat,
}

/// One day of performance for a keyword, as recorded by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyKeywordPerformance {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub stat: KeywordPerformance,
}

/// Ordered daily samples for one campaign over `[start, end]`.
///
/// Missing days are absent rather than zero-filled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceWindow {
    pub campaign_id: Uuid,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub samples: Vec<MetricSample>,
    #[serde(default)]
    pub search_terms: Vec<SearchTermStat>,
    #[serde(default)]
    pub keywords: Vec<KeywordPerformance>,
}

impl PerformanceWindow {
    /// Build a window, sorting samples by date and rejecting duplicate days.
    pub fn new(
        campaign_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        mut samples: Vec<MetricSample>,
    ) -> CampaignResult<Self> {
        if end < start {
            return Err(CampaignError::Validation(format!(
                "window end {end} precedes start {start}"
            )));
        }
        samples.sort_by_key(|s| s.date);
        if let Some(pair) = samples.windows(2).find(|w| w[0].date == w[1].date) {
            return Err(CampaignError::Validation(format!(
                "duplicate sample for {} in campaign {campaign_id}",
                pair[0].date
            )));
        }
        samples.retain(|s| s.date >= start && s.date <= end);
        Ok(Self {
            campaign_id,
            start,
            end,
            samples,
            search_terms: Vec::new(),
            keywords: Vec::new(),
        })
    }

    pub fn with_search_terms(mut self, search_terms: Vec<SearchTermStat>) -> Self {
        self.search_terms = search_terms;
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<KeywordPerformance>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Sum the daily search-term rows dated inside the window, one entry per term.
    pub fn with_daily_search_terms<'a>(
        mut self,
        rows: impl IntoIterator<Item = &'a DailySearchTerm>,
    ) -> Self {
        let mut totals: BTreeMap<&str, SearchTermStat> = BTreeMap::new();
        for row in rows.into_iter().filter(|r| self.covers(r.date)) {
            let total = totals.entry(row.stat.term.as_str()).or_insert_with(|| SearchTermStat {
                term: row.stat.term.clone(),
                clicks: 0,
                cost: 0.0,
                conversions: 0.0,
            });
            total.clicks += row.stat.clicks;
            total.cost += row.stat.cost;
            total.conversions += row.stat.conversions;
        }
        self.search_terms = totals.into_values().collect();
        self
    }

    /// Sum the daily keyword rows dated inside the window, one entry per keyword.
    /// Text and match type come from the latest row.
    pub fn with_daily_keywords<'a>(
        mut self,
        rows: impl IntoIterator<Item = &'a DailyKeywordPerformance>,
    ) -> Self {
        let mut totals: BTreeMap<Uuid, (NaiveDate, KeywordPerformance)> = BTreeMap::new();
        for row in rows.into_iter().filter(|r| self.covers(r.date)) {
            let (latest, total) = totals.entry(row.stat.keyword_id).or_insert_with(|| {
                (
                    row.date,
                    KeywordPerformance {
                        clicks: 0,
                        cost: 0.0,
                        conversions: 0.0,
                        conversion_value: 0.0,
                        ..row.stat.clone()
                    },
                )
            });
            if row.date > *latest {
                *latest = row.date;
                total.text = row.stat.text.clone();
                total.match_type = row.stat.match_type;
            }
            total.clicks += row.stat.clicks;
            total.cost += row.stat.cost;
            total.conversions += row.stat.conversions;
            total.conversion_value += row.stat.conversion_value;
        }
        self.keywords = totals.into_values().map(|(_, k)| k).collect();
        self
    }

    /// Whether `date` falls inside `[start, end]`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Inclusive number of calendar days covered by the window.
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Day offset of a date from the window start, used as the regression axis.
    pub fn day_offset(&self, date: NaiveDate) -> f64 {
        (date - self.start).num_days() as f64
    }
}

// ─── Keywords ───────────────────────────────────────────────────────────────

/// Keyword matching mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Broad,
    Phrase,
    Exact,
}

impl MatchType {
    /// 0 for broad, 2 for exact; higher is narrower.
    pub fn specificity(self) -> i32 {
        match self {
            Self::Broad => 0,
            Self::Phrase => 1,
            Self::Exact => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordStatus {
    #[default]
    Enabled,
    Paused,
    Removed,
}

/// A keyword as configured on the advertising platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub id: Uuid,
    pub account_id: Uuid,
    pub campaign_id: Uuid,
    #[serde(default)]
    pub ad_group_id: Option<Uuid>,
    pub text: String,
    pub match_type: MatchType,
    #[serde(default)]
    pub status: KeywordStatus,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub clicks: u64,
    #[serde(default)]
    pub conversions: f64,
}

// ─── Recommendations ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationType {
    BudgetIncrease,
    BudgetDecrease,
    BidAdjustment,
    NegativeKeyword,
    PauseKeyword,
    MatchTypeChange,
}

/// The concrete change a recommendation proposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposedChange {
    Budget {
        current_daily_budget: f64,
        proposed_daily_budget: f64,
    },
    Bid {
        /// `None` adjusts the campaign-level default bid.
        #[serde(default)]
        keyword_id: Option<Uuid>,
        current_bid: f64,
        proposed_bid: f64,
    },
    NegativeKeywords {
        keywords: Vec<String>,
        match_type: MatchType,
    },
    PauseKeyword {
        keyword_id: Uuid,
        keyword_text: String,
    },
    MatchType {
        keyword_id: Uuid,
        keyword_text: String,
        from: MatchType,
        to: MatchType,
    },
}

/// Lifecycle status of a recommendation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Pending,
    Accepted,
    Rejected,
    Implementing,
    Implemented,
    Failed,
    RolledBack,
    Expired,
}

impl RecommendationStatus {
    pub fn can_transition_to(self, next: RecommendationStatus) -> bool {
        use RecommendationStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, Rejected)
                | (Pending, Expired)
                | (Accepted, Implementing)
                | (Accepted, Rejected)
                | (Implementing, Implemented)
                | (Implementing, Failed)
                | (Failed, Accepted)
                | (Implemented, RolledBack)
        )
    }

    /// Only accepted recommendations may be picked up by the implementation queue.
    pub fn is_actionable(self) -> bool {
        self == RecommendationStatus::Accepted
    }
}

/// Recommendation priority. Ordering is `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// An optimization action proposed for a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub recommendation_type: RecommendationType,
    pub campaign_id: Uuid,
    pub proposed_change: ProposedChange,
    pub status: RecommendationStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub estimated_impact: Option<f64>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Recommendation {
    /// Check that the proposed change is well formed and agrees with the type.
    pub fn validate(&self) -> CampaignResult<()> {
        let invalid = |msg: String| Err(CampaignError::Validation(format!("{}: {msg}", self.id)));

        match (&self.recommendation_type, &self.proposed_change) {
            (
                RecommendationType::BudgetIncrease | RecommendationType::BudgetDecrease,
                ProposedChange::Budget {
                    current_daily_budget,
                    proposed_daily_budget,
                },
            ) => {
                if *current_daily_budget <= 0.0 || *proposed_daily_budget <= 0.0 {
                    return invalid("budgets must be positive".into());
                }
                let increase = proposed_daily_budget > current_daily_budget;
                let decrease = proposed_daily_budget < current_daily_budget;
                match self.recommendation_type {
                    RecommendationType::BudgetIncrease if !increase => {
                        invalid("budget increase must raise the daily budget".into())
                    }
                    RecommendationType::BudgetDecrease if !decrease => {
                        invalid("budget decrease must lower the daily budget".into())
                    }
                    _ => Ok(()),
                }
            }
            (
                RecommendationType::BidAdjustment,
                ProposedChange::Bid {
                    current_bid,
                    proposed_bid,
                    ..
                },
            ) => {
                if *current_bid <= 0.0 || *proposed_bid <= 0.0 {
                    invalid("bids must be positive".into())
                } else if (proposed_bid - current_bid).abs() < f64::EPSILON {
                    invalid("bid adjustment does not change the bid".into())
                } else {
                    Ok(())
                }
            }
            (RecommendationType::NegativeKeyword, ProposedChange::NegativeKeywords { keywords, .. }) => {
                if keywords.iter().all(|k| k.trim().is_empty()) {
                    invalid("negative keyword list is empty".into())
                } else {
                    Ok(())
                }
            }
            (RecommendationType::PauseKeyword, ProposedChange::PauseKeyword { .. }) => Ok(()),
            (RecommendationType::MatchTypeChange, ProposedChange::MatchType { from, to, .. }) => {
                if from == to {
                    invalid("match type change must change the match type".into())
                } else {
                    Ok(())
                }
            }
            (t, c) => invalid(format!("change {c:?} does not fit recommendation type {t:?}")),
        }
    }
}

// ─── Platform and identity ──────────────────────────────────────────────────

/// Pre-change state captured by the advertising platform when a change is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSnapshot {
    pub id: Uuid,
    pub recommendation_id: Uuid,
    pub campaign_id: Uuid,
    pub captured_at: DateTime<Utc>,
    /// Platform-defined payload, handed back verbatim on rollback.
    pub state: serde_json::Value,
}

/// Access credentials issued by the identity collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: String,
    pub access_token: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget_rec(kind: RecommendationType, current: f64, proposed: f64) -> Recommendation {
        Recommendation {
            id: Uuid::from_u128(1),
            recommendation_type: kind,
            campaign_id: Uuid::from_u128(10),
            proposed_change: ProposedChange::Budget {
                current_daily_budget: current,
                proposed_daily_budget: proposed,
            },
            status: RecommendationStatus::Pending,
            priority: Priority::Medium,
            estimated_impact: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_sample_ratios_guard_zero_denominators() {
        let sample = MetricSample {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            impressions: 0,
            clicks: 0,
            cost: 0.0,
            conversions: 0.0,
            conversion_value: 0.0,
        };
        assert!(sample.ctr().is_none());
        assert!(sample.cpc().is_none());
        assert!(sample.cpa().is_none());
        assert!(sample.roas().is_none());
    }

    #[test]
    fn test_window_rejects_duplicate_days() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let sample = MetricSample {
            date: day,
            impressions: 100,
            clicks: 10,
            cost: 5.0,
            conversions: 1.0,
            conversion_value: 20.0,
        };
        let result = PerformanceWindow::new(Uuid::nil(), day, day, vec![sample.clone(), sample]);
        assert!(matches!(result, Err(CampaignError::Validation(_))));
    }

    #[test]
    fn test_daily_rows_outside_window_are_excluded() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let term_row = |offset: i64, term: &str| DailySearchTerm {
            date: start + chrono::Duration::days(offset),
            stat: SearchTermStat {
                term: term.into(),
                clicks: 2,
                cost: 1.5,
                conversions: 0.0,
            },
        };
        let terms = vec![
            term_row(-1, "free shoes"),
            term_row(0, "free shoes"),
            term_row(6, "free shoes"),
            term_row(3, "shoe repair"),
            term_row(7, "free shoes"),
        ];
        let keyword_id = Uuid::from_u128(5);
        let keyword_row = |offset: i64, match_type: MatchType| DailyKeywordPerformance {
            date: start + chrono::Duration::days(offset),
            stat: KeywordPerformance {
                keyword_id,
                text: "running shoes".into(),
                match_type,
                clicks: 10,
                cost: 4.0,
                conversions: 1.0,
                conversion_value: 30.0,
            },
        };
        let keywords = vec![
            keyword_row(1, MatchType::Broad),
            keyword_row(5, MatchType::Phrase),
            keyword_row(30, MatchType::Exact),
        ];

        let window = PerformanceWindow::new(
            Uuid::nil(),
            start,
            start + chrono::Duration::days(6),
            Vec::new(),
        )
        .unwrap()
        .with_daily_search_terms(&terms)
        .with_daily_keywords(&keywords);

        assert_eq!(window.search_terms.len(), 2);
        let free = &window.search_terms[0];
        assert_eq!(free.term, "free shoes");
        assert_eq!(free.clicks, 4);
        assert_eq!(free.cost, 3.0);

        assert_eq!(window.keywords.len(), 1);
        assert_eq!(window.keywords[0].cost, 8.0);
        assert_eq!(window.keywords[0].match_type, MatchType::Phrase);
    }

    #[test]
    fn test_status_transitions() {
        use RecommendationStatus::*;
        assert!(Pending.can_transition_to(Accepted));
        assert!(Accepted.can_transition_to(Implementing));
        assert!(Implemented.can_transition_to(RolledBack));
        assert!(!Pending.can_transition_to(Implemented));
        assert!(!RolledBack.can_transition_to(Implemented));
        assert!(!Rejected.can_transition_to(Accepted));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_validate_budget_direction() {
        assert!(budget_rec(RecommendationType::BudgetIncrease, 100.0, 150.0)
            .validate()
            .is_ok());
        assert!(budget_rec(RecommendationType::BudgetIncrease, 100.0, 80.0)
            .validate()
            .is_err());
        assert!(budget_rec(RecommendationType::BudgetDecrease, 100.0, 80.0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_mismatched_change() {
        let mut rec = budget_rec(RecommendationType::BudgetIncrease, 100.0, 150.0);
        rec.recommendation_type = RecommendationType::PauseKeyword;
        assert!(rec.validate().is_err());
    }

    #[test]
    fn test_recommendation_type_wire_format() {
        let json = serde_json::to_string(&RecommendationType::MatchTypeChange).unwrap();
        assert_eq!(json, "\"MATCH_TYPE_CHANGE\"");
    }
}
