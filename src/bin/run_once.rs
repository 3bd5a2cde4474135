//! One pipeline run over a canned RSS feed: heuristic mock scorer, an echoing
//! search provider, in-memory store and log distribution. No network.
//!
//! ```text
//! cargo run --bin run_once [path/to/feed.xml]
//! ```

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;

use stock_news_pipeline::analyze::{DailyBudget, ImpactAnalyzer, MockProvider};
use stock_news_pipeline::distribute::{distribution_order, format_summary, DistributionConfig, LogDistributor};
use stock_news_pipeline::ingest::providers::rss::{stamp_relative_dates, RssSource};
use stock_news_pipeline::ingest::tickers::default_watchlist;
use stock_news_pipeline::pipeline::{Components, PipelineSettings};
use stock_news_pipeline::retry::{Cancel, RetryPolicy};
use stock_news_pipeline::store::{memory::MemoryStore, NewsQuery, Store};
use stock_news_pipeline::verify::{SearchError, SearchHit, SearchProvider, Verifier, VerifierConfig};
use stock_news_pipeline::{init_tracing, Pipeline, TriggerKind};

const DEFAULT_FEED: &str = "tests/fixtures/markets_rss.xml";

/// Two outlets repeating the query back, enough to corroborate anything.
struct EchoSearch;

#[async_trait]
impl SearchProvider for EchoSearch {
    async fn search(&self, query: &str, _days: u32, _max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        Ok(["https://wire-one.test/story", "https://wire-two.test/story"]
            .iter()
            .map(|url| SearchHit {
                title: query.to_string(),
                url: url.to_string(),
                snippet: String::new(),
                published_at: None,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "echo"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_FEED.to_string());
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let xml = stamp_relative_dates(&raw, Utc::now());

    let store = Arc::new(MemoryStore::new());
    let parts = Components {
        sources: vec![Arc::new(RssSource::from_fixture("Markets Wire", &xml, default_watchlist()))],
        analyzer: ImpactAnalyzer::new(
            Arc::new(MockProvider::Heuristic),
            RetryPolicy::immediate(2),
            DailyBudget::unlimited(),
        ),
        verifier: Verifier::new(Arc::new(EchoSearch), VerifierConfig::default()),
        store: store.clone(),
        distributor: Arc::new(LogDistributor),
    };
    let distribution = DistributionConfig::default();
    let pipeline = Pipeline::new(parts, PipelineSettings::default(), distribution.clone());

    let record = pipeline.run(TriggerKind::Manual, &Cancel::never()).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);

    let mut sent: Vec<_> = store
        .query(&NewsQuery::default())
        .await?
        .into_iter()
        .filter(|it| it.distributed_at.is_some())
        .collect();
    sent.sort_by(distribution_order);
    println!("\n{}", format_summary(&distribution.title, &sent));
    Ok(())
}
