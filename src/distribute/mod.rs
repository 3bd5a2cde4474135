//! # Distribution
//! Batch selection, one-line rendering and the hand-off contract.
//!
//! A `Distributor` reports a result per item. The orchestrator marks only
//! delivered items as distributed; failed ones stay eligible next run.

pub mod logger;
pub mod webhook;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::item::{Identity, ImpactScore, NewsItem, VerificationStatus};
use crate::retry::RetryPolicy;

pub use logger::LogDistributor;
pub use webhook::{WebhookDistributor, WebhookFlavor};

/// Per-item hand-off result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub identity: Identity,
    pub outcome: Result<(), String>,
}

impl Delivery {
    pub fn ok(identity: &Identity) -> Self {
        Self {
            identity: identity.clone(),
            outcome: Ok(()),
        }
    }

    pub fn failed(identity: &Identity, reason: impl Into<String>) -> Self {
        Self {
            identity: identity.clone(),
            outcome: Err(reason.into()),
        }
    }

    pub fn delivered(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[async_trait]
pub trait Distributor: Send + Sync {
    /// Deliver `batch` in order. Must return one `Delivery` per item; items
    /// missing from the result are treated as failed.
    async fn distribute(&self, batch: &[NewsItem]) -> Vec<Delivery>;
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    pub threshold: u8,
    pub max_batch: usize,
    /// Also send items whose verification was inconclusive.
    pub distribute_inconclusive: bool,
    pub title: String,
    /// "ENV" reads `webhook_url_env`; empty means log-only distribution.
    pub webhook_url: String,
    pub webhook_url_env: String,
    pub flavor: WebhookFlavor,
    pub retry: RetryPolicy,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            threshold: 7,
            max_batch: 10,
            distribute_inconclusive: false,
            title: "Stock News Summary".into(),
            webhook_url: "ENV".into(),
            webhook_url_env: "DISTRIBUTION_WEBHOOK_URL".into(),
            flavor: WebhookFlavor::default(),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 500,
                max_delay_ms: 4_000,
                attempt_timeout_ms: 5_000,
                deadline_ms: 20_000,
            },
        }
    }
}

impl DistributionConfig {
    pub(crate) fn sanitize(&mut self) {
        self.threshold = self.threshold.min(ImpactScore::MAX);
        self.max_batch = self.max_batch.clamp(1, 100);
    }
}

/// Whether an item may be handed to the distributor at all.
pub fn qualifies(item: &NewsItem, threshold: u8, allow_inconclusive: bool) -> bool {
    if item.distributed_at.is_some() {
        return false;
    }
    let Some(score) = item.score() else {
        return false;
    };
    if score < threshold {
        return false;
    }
    match item.verification_status {
        VerificationStatus::NotRequired | VerificationStatus::Corroborated => true,
        // a failed search is no evidence against the item
        VerificationStatus::Inconclusive => allow_inconclusive || item.verification_error.is_some(),
        VerificationStatus::Pending | VerificationStatus::Contradicted => false,
    }
}

/// Score descending, then `published_at` descending, then identity.
pub fn distribution_order(a: &NewsItem, b: &NewsItem) -> Ordering {
    b.score()
        .cmp(&a.score())
        .then_with(|| b.published_at.cmp(&a.published_at))
        .then_with(|| a.identity.cmp(&b.identity))
}

/// Filter, order and cap the candidates for one hand-off.
pub fn select_batch(items: Vec<NewsItem>, cfg: &DistributionConfig) -> Vec<NewsItem> {
    let mut batch: Vec<NewsItem> = items
        .into_iter()
        .filter(|it| qualifies(it, cfg.threshold, cfg.distribute_inconclusive))
        .collect();
    batch.sort_by(distribution_order);
    batch.truncate(cfg.max_batch);
    batch
}

/// `[1.] | "Headline" | Summary | AAPL, MSFT | Source | Positive price impact | 8/10`
pub fn format_line(rank: usize, item: &NewsItem) -> String {
    let summary: String = item.summary.chars().take(200).collect();
    let summary = if summary.is_empty() { "-".to_string() } else { summary };
    let tickers = if item.tickers.is_empty() {
        "-".to_string()
    } else {
        item.tickers.join(", ")
    };
    let score = item
        .score()
        .map(|s| format!("{s}/10"))
        .unwrap_or_else(|| "?/10".into());
    format!(
        "[{rank}.] | \"{}\" | {} | {} | {} | {} price impact | {}",
        item.title,
        summary,
        tickers,
        item.source_name,
        item.direction.label(),
        score
    )
}

/// Message limits of chat webhooks sit around 2-5k chars.
const SUMMARY_MAX_CHARS: usize = 4_900;

/// Whole batch as one text block under a title.
pub fn format_summary(title: &str, batch: &[NewsItem]) -> String {
    let lines: Vec<String> = batch
        .iter()
        .enumerate()
        .map(|(i, it)| format_line(i + 1, it))
        .collect();
    let full = format!("{title}\n\n{}", lines.join("\n"));
    if full.chars().count() > SUMMARY_MAX_CHARS {
        let mut cut: String = full.chars().take(SUMMARY_MAX_CHARS).collect();
        cut.push_str("\n...");
        cut
    } else {
        full
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Direction;
    use chrono::{TimeZone, Utc};

    fn scored(title: &str, score: u8, minute: u32, status: VerificationStatus) -> NewsItem {
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 9, minute, 0).unwrap();
        let mut it = NewsItem::candidate("Src", title, "", None, at, at);
        it.impact_score = Some(ImpactScore::Scored(score));
        it.verification_status = status;
        it
    }

    #[test]
    fn selection_filters_and_orders() {
        let nr = VerificationStatus::NotRequired;
        let items = vec![
            scored("a nine early", 9, 1, VerificationStatus::Corroborated),
            scored("an eight", 8, 2, nr),
            scored("another eight", 8, 3, nr),
            scored("a seven", 7, 4, nr),
            scored("a nine late", 9, 5, VerificationStatus::Corroborated),
            scored("a six", 6, 6, nr),
            scored("contradicted", 10, 7, VerificationStatus::Contradicted),
            scored("inconclusive", 10, 8, VerificationStatus::Inconclusive),
        ];
        let batch = select_batch(items, &DistributionConfig::default());
        let scores: Vec<u8> = batch.iter().filter_map(NewsItem::score).collect();
        assert_eq!(scores, vec![9, 9, 8, 8, 7]);
        assert_eq!(batch[0].title, "a nine late");
        assert_eq!(batch[2].title, "another eight");
    }

    #[test]
    fn inconclusive_can_be_allowed_and_distributed_items_never_return() {
        let cfg = DistributionConfig {
            distribute_inconclusive: true,
            ..DistributionConfig::default()
        };
        let mut sent = scored("already sent", 9, 1, VerificationStatus::NotRequired);
        sent.distributed_at = Some(Utc::now());
        let batch = select_batch(
            vec![sent, scored("inconclusive", 9, 2, VerificationStatus::Inconclusive)],
            &cfg,
        );
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].title, "inconclusive");
    }

    #[test]
    fn failed_search_does_not_hold_an_item_back() {
        let mut it = scored("search was down", 9, 1, VerificationStatus::Pending);
        assert!(it.mark_verification_failed("search returned status 503"));
        assert_eq!(it.verification_status, VerificationStatus::Inconclusive);
        assert!(qualifies(&it, 7, false));

        let plain = scored("nothing found", 9, 2, VerificationStatus::Inconclusive);
        assert!(!qualifies(&plain, 7, false));
    }

    #[test]
    fn unknown_scores_never_qualify() {
        let mut it = scored("unknown", 9, 1, VerificationStatus::NotRequired);
        it.impact_score = Some(ImpactScore::Unknown);
        assert!(!qualifies(&it, 0, true));
    }

    #[test]
    fn line_format() {
        let mut it = scored("Tech rally lifts Nasdaq", 8, 0, VerificationStatus::NotRequired)
            .with_tickers(["AAPL", "MSFT"]);
        it.direction = Direction::Up;
        it.summary = "Chipmakers led gains".into();
        assert_eq!(
            format_line(1, &it),
            "[1.] | \"Tech rally lifts Nasdaq\" | Chipmakers led gains | AAPL, MSFT | Src | Positive price impact | 8/10"
        );
        assert!(format_summary("Stock News Summary", &[it]).starts_with("Stock News Summary\n\n[1.]"));
    }
}
