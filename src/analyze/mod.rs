// src/analyze/mod.rs
//! Impact analysis stage: score one item, or degrade it to `Unknown`.

pub mod ai_adapter;

pub use ai_adapter::{
    build_analyzer, parse_analysis, Analysis, AnalysisError, DailyBudget, ImpactAnalyzer,
    MockProvider, ScoringProvider,
};

use metrics::counter;

use crate::error::PipelineError;
use crate::item::NewsItem;
use crate::retry::Cancel;

/// Analyze `item` in place. On exhaustion the item is marked `Unknown` and
/// the typed failure is returned for the run record; the item itself is
/// never dropped.
pub async fn score_item(
    analyzer: &ImpactAnalyzer,
    item: &mut NewsItem,
    cancel: &Cancel,
) -> Result<(), PipelineError> {
    match analyzer.analyze(item, cancel).await {
        Ok(a) => {
            item.apply_analysis(a.score, a.direction, a.rationale, &a.tickers);
            tracing::debug!(
                target: "analyze",
                identity = %item.identity,
                score = ?item.score(),
                direction = item.direction.label(),
                "item scored"
            );
            Ok(())
        }
        Err(ex) => {
            item.mark_unknown();
            counter!("news_analysis_failures_total").increment(1);
            let err = PipelineError::AnalysisFailure {
                identity: item.identity.clone(),
                attempts: ex.attempts,
                reason: ex.last.to_string(),
            };
            tracing::warn!(target: "analyze", error = %err, "analysis failed, keeping item as unknown");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ImpactScore;
    use crate::retry::RetryPolicy;
    use chrono::Utc;
    use std::sync::Arc;

    #[tokio::test]
    async fn malformed_replies_degrade_to_unknown() {
        let analyzer = ImpactAnalyzer::new(
            Arc::new(MockProvider::Fixed(r#"{"impact_score": 42, "direction": "up"}"#.into())),
            RetryPolicy::immediate(3),
            DailyBudget::unlimited(),
        );
        let mut item = NewsItem::candidate("T", "Apple stock rises", "", None, Utc::now(), Utc::now());
        let err = score_item(&analyzer, &mut item, &Cancel::never()).await.unwrap_err();
        assert!(matches!(err, PipelineError::AnalysisFailure { attempts: 3, .. }));
        assert_eq!(item.impact_score, Some(ImpactScore::Unknown));
    }
}
