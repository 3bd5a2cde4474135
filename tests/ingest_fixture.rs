// tests/ingest_fixture.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use stock_news_pipeline::dedup::Deduplicator;
use stock_news_pipeline::ingest::providers::rss::{stamp_relative_dates, RssSource};
use stock_news_pipeline::ingest::tickers::default_watchlist;
use stock_news_pipeline::ingest::types::{FetchQuery, SourceAdapter};
use stock_news_pipeline::ingest::collect;

fn fixture_source() -> Arc<dyn SourceAdapter> {
    let xml = stamp_relative_dates(include_str!("fixtures/markets_rss.xml"), Utc::now());
    Arc::new(RssSource::from_fixture("Markets Wire", &xml, default_watchlist()))
}

#[tokio::test]
async fn fixture_feed_keeps_recent_market_news_only() {
    let collected = collect(&[fixture_source()], &FetchQuery::recent(3, 20), Duration::from_secs(5)).await;
    assert!(collected.degraded.is_empty());

    let titles: Vec<&str> = collected.items.iter().map(|i| i.title.as_str()).collect();
    // bakery (off-topic), "Stocks" (too short) and the 10h-old oil story are gone
    assert_eq!(titles.len(), 5, "{titles:?}");
    assert!(!titles.iter().any(|t| t.contains("bakery")));
    assert!(!titles.iter().any(|t| t.contains("Oil prices")));

    let nvda = collected.items.iter().find(|i| i.title.starts_with("Nvidia")).unwrap();
    assert_eq!(nvda.tickers, vec!["NVDA".to_string()]);
    assert_eq!(nvda.source_name, "Markets Wire");
}

#[tokio::test]
async fn syndicated_copy_collapses_into_one_story() {
    let collected = collect(&[fixture_source()], &FetchQuery::recent(3, 20), Duration::from_secs(5)).await;
    let batch = Deduplicator::default().collapse_batch(collected.items, &[]);

    assert_eq!(batch.kept.len(), 4);
    assert_eq!(batch.dropped.len(), 1);
    let (dropped, winner) = &batch.dropped[0];
    assert!(dropped.title.starts_with("Apple announces"));
    let kept = batch.kept.iter().find(|k| &k.identity == winner).unwrap();
    assert!(kept.tickers.contains(&"AAPL".to_string()));
}

#[tokio::test]
async fn per_call_cap_applies() {
    let collected = collect(&[fixture_source()], &FetchQuery::recent(3, 2), Duration::from_secs(5)).await;
    assert_eq!(collected.items.len(), 2);
}
