use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::ingest::build_candidate;
use crate::ingest::types::{FetchQuery, SourceAdapter, SourceError};
use crate::item::NewsItem;

pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";

/// Below this absolute relevance a ticker mention is incidental.
const MIN_TICKER_RELEVANCE: f64 = 0.1;

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(default)]
    feed: Option<Vec<FeedItem>>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    title: Option<String>,
    url: Option<String>,
    time_published: Option<String>,
    summary: Option<String>,
    source: Option<String>,
    #[serde(default)]
    ticker_sentiment: Vec<TickerSentiment>,
}

#[derive(Debug, Deserialize)]
struct TickerSentiment {
    ticker: String,
    // numbers arrive as strings
    #[serde(default)]
    relevance_score: Option<String>,
}

fn parse_time_published(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), "%Y%m%dT%H%M%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s.trim(), "%Y%m%dT%H%M"))
        .ok()
        .map(|n| n.and_utc())
}

/// Parse a `NEWS_SENTIMENT` body. Rate-limit and error notices become
/// `SourceError::Provider`.
pub fn parse_feed(
    body: &str,
    now: DateTime<Utc>,
    watchlist: &[String],
) -> Result<Vec<NewsItem>, SourceError> {
    let feed: Feed = serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;
    if let Some(msg) = feed.error_message.or(feed.note).or(feed.information) {
        return Err(SourceError::Provider(msg));
    }
    let Some(entries) = feed.feed else {
        return Err(SourceError::Malformed("missing 'feed' array".into()));
    };

    let out = entries
        .into_iter()
        .filter_map(|f| {
            let published_at = f
                .time_published
                .as_deref()
                .and_then(parse_time_published)
                .unwrap_or(now);
            // crypto/forex symbols look like CRYPTO:BTC
            let tickers: Vec<String> = f
                .ticker_sentiment
                .iter()
                .filter(|t| !t.ticker.contains(':'))
                .filter(|t| {
                    t.relevance_score
                        .as_deref()
                        .and_then(|r| r.trim().parse::<f64>().ok())
                        .map(|r| r.abs() >= MIN_TICKER_RELEVANCE)
                        .unwrap_or(true)
                })
                .map(|t| t.ticker.clone())
                .collect();
            let source_name = match f.source.as_deref().map(str::trim) {
                Some(s) if !s.is_empty() => format!("Alpha Vantage - {s}"),
                _ => "Alpha Vantage".to_string(),
            };
            build_candidate(
                &source_name,
                f.title.as_deref().unwrap_or_default(),
                f.summary.as_deref().unwrap_or_default(),
                f.url,
                published_at,
                now,
                &tickers,
                watchlist,
            )
        })
        .collect();
    Ok(out)
}

pub struct AlphaVantageSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    watchlist: Vec<String>,
}

impl AlphaVantageSource {
    pub fn new(
        base_url: Option<&str>,
        api_key: String,
        timeout: Duration,
        watchlist: Vec<String>,
    ) -> Result<Self, SourceError> {
        if api_key.trim().is_empty() {
            return Err(SourceError::NotConfigured("Alpha Vantage key missing".into()));
        }
        Ok(Self {
            client: super::http_client(timeout)?,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).to_string(),
            api_key,
            watchlist,
        })
    }
}

#[async_trait]
impl SourceAdapter for AlphaVantageSource {
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<NewsItem>, SourceError> {
        let time_from = query.cutoff().format("%Y%m%dT%H%M").to_string();
        let mut params: Vec<(&str, String)> = vec![
            ("function", "NEWS_SENTIMENT".into()),
            ("limit", "50".into()),
            ("sort", "LATEST".into()),
            ("time_from", time_from),
            ("apikey", self.api_key.clone()),
        ];
        if let Some(t) = &query.ticker {
            params.push(("tickers", t.to_ascii_uppercase()));
        }
        if let Some(k) = &query.keyword {
            params.push(("topics", k.to_ascii_lowercase()));
        }

        let body = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_feed(&body, query.now, &self.watchlist)
    }

    fn name(&self) -> &str {
        "Alpha Vantage"
    }
}
