// src/ingest/mod.rs
pub mod providers;
pub mod tickers;
pub mod types;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, histogram};

use crate::error::PipelineError;
use crate::ingest::types::{FetchQuery, SourceAdapter, SourceError};
use crate::item::NewsItem;

/// Titles shorter than this are noise (section headers, tickers only).
pub const MIN_TITLE_CHARS: usize = 10;

const FINANCIAL_KEYWORDS: &[&str] = &[
    "stock", "earnings", "market", "shares", "price", "trading", "investment", "nasdaq", "nyse",
    "dow", "s&p", "sp500", "wall street", "dividend", "etf", "portfolio", "revenue", "profit",
    "merger", "acquisition", "ipo", "fed", "rate",
];

/// Normalize text: collapse whitespace, trim, strip stray punctuation.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Strip trailing sentence punctuation (keep quotes)
    while let Some(last) = out.chars().last() {
        if matches!(last, '!' | '?' | '.' | ',') {
            out.pop();
        } else {
            break;
        }
    }

    // 6) Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

/// Financial keyword or watchlist ticker present in title/summary.
pub fn is_market_relevant(title: &str, summary: &str, watchlist: &[String]) -> bool {
    let text = format!("{title} {summary}");
    let lower = text.to_lowercase();
    FINANCIAL_KEYWORDS.iter().any(|k| lower.contains(k))
        || !tickers::extract_tickers(&text, watchlist).is_empty()
}

/// Shared adapter tail: normalize, drop noise, extract tickers, build the
/// typed candidate. `None` means the raw entry is not worth keeping.
#[allow(clippy::too_many_arguments)]
pub fn build_candidate(
    source_name: &str,
    raw_title: &str,
    raw_summary: &str,
    url: Option<String>,
    published_at: DateTime<Utc>,
    collected_at: DateTime<Utc>,
    provider_tickers: &[String],
    watchlist: &[String],
) -> Option<NewsItem> {
    let title = normalize_text(raw_title);
    if title.chars().count() < MIN_TITLE_CHARS {
        return None;
    }
    let summary = normalize_text(raw_summary);
    if provider_tickers.is_empty() && !is_market_relevant(&title, &summary, watchlist) {
        return None;
    }
    let extracted = tickers::extract_tickers(&format!("{title} {summary}"), watchlist);
    let item = NewsItem::candidate(source_name, title, summary, url, published_at, collected_at)
        .with_tickers(provider_tickers)
        .with_tickers(extracted);
    Some(item)
}

/// Result of one collection stage.
#[derive(Debug, Default)]
pub struct Collected {
    pub items: Vec<NewsItem>,
    /// Adapters that failed this run, with the reason.
    pub degraded: Vec<(String, String)>,
}

/// Fetch from every adapter concurrently. A failing or slow adapter is logged
/// as degraded and contributes nothing; it never aborts collection.
pub async fn collect(
    adapters: &[Arc<dyn SourceAdapter>],
    query: &FetchQuery,
    per_source_timeout: Duration,
) -> Collected {
    crate::metrics::ensure_described();

    let fetches = adapters.iter().map(|a| async move {
        let t0 = Instant::now();
        let res = match tokio::time::timeout(per_source_timeout, a.fetch(query)).await {
            Ok(r) => r,
            Err(_) => Err(SourceError::Timeout(per_source_timeout)),
        };
        histogram!("news_source_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        (a.name().to_string(), res)
    });

    let mut out = Collected::default();
    let mut seen = HashSet::new();
    for (name, res) in join_all(fetches).await {
        match res {
            Ok(items) => {
                let mut kept = 0usize;
                for it in items {
                    if kept >= query.max_items {
                        break;
                    }
                    if !query.in_window(it.published_at) {
                        continue;
                    }
                    if seen.insert(it.identity.clone()) {
                        out.items.push(it);
                        kept += 1;
                    }
                }
                counter!("news_collected_total", "source" => name.clone()).increment(kept as u64);
                tracing::debug!(target: "ingest", source = %name, kept, "source fetched");
            }
            Err(e) => {
                let err = PipelineError::SourceUnavailable {
                    source_name: name.clone(),
                    reason: e.to_string(),
                };
                tracing::warn!(target: "ingest", source = %name, error = %err, "degraded source");
                counter!("news_source_errors_total", "source" => name.clone()).increment(1);
                out.degraded.push((name, e.to_string()));
            }
        }
    }

    tracing::info!(
        target: "ingest",
        collected = out.items.len(),
        degraded = out.degraded.len(),
        "collection finished"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Fixed(Vec<NewsItem>);
    struct Broken;

    #[async_trait::async_trait]
    impl SourceAdapter for Fixed {
        async fn fetch(&self, _q: &FetchQuery) -> Result<Vec<NewsItem>, SourceError> {
            Ok(self.0.clone())
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[async_trait::async_trait]
    impl SourceAdapter for Broken {
        async fn fetch(&self, _q: &FetchQuery) -> Result<Vec<NewsItem>, SourceError> {
            Err(SourceError::Status(503))
        }
        fn name(&self) -> &str {
            "broken"
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
    }

    fn query() -> FetchQuery {
        FetchQuery {
            now: now(),
            ..FetchQuery::recent(3, 20)
        }
    }

    #[test]
    fn normalize_text_collapses_ws_and_punct() {
        let s = "  Hello,&nbsp;&nbsp; world!!!  ";
        let out = normalize_text(s);
        assert_eq!(out, "Hello, world");
    }

    #[test]
    fn build_candidate_drops_short_and_irrelevant() {
        let wl = tickers::default_watchlist();
        assert!(build_candidate("X", "Too short", "stock", None, now(), now(), &[], &wl).is_none());
        assert!(build_candidate("X", "Local bakery wins award", "Cakes", None, now(), now(), &[], &wl).is_none());
        let it = build_candidate(
            "X",
            "<b>NVDA</b> shares surge after earnings",
            "Data center revenue beat",
            Some("https://x.test/1".into()),
            now(),
            now(),
            &[],
            &wl,
        )
        .unwrap();
        assert_eq!(it.title, "NVDA shares surge after earnings");
        assert_eq!(it.tickers, vec!["NVDA".to_string()]);
    }

    #[tokio::test]
    async fn one_failing_adapter_does_not_abort_collection() {
        let wl = tickers::default_watchlist();
        let fresh = build_candidate("A", "Apple stock climbs on iPhone demand", "", None, now(), now(), &[], &wl).unwrap();
        let stale = build_candidate(
            "A",
            "Old market news from last week",
            "",
            None,
            now() - chrono::Duration::days(7),
            now(),
            &[],
            &wl,
        )
        .unwrap();
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(Broken),
            Arc::new(Fixed(vec![fresh.clone(), fresh.clone(), stale])),
        ];
        let out = collect(&adapters, &query(), Duration::from_secs(1)).await;
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.degraded.len(), 1);
        assert_eq!(out.degraded[0].0, "broken");
    }
}
