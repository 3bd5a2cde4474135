use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::ingest::build_candidate;
use crate::ingest::types::{FetchQuery, SourceAdapter, SourceError};
use crate::item::NewsItem;

pub const DEFAULT_BASE_URL: &str = "https://newsapi.org/v2";

/// Broad market queries used when the fetch is not narrowed.
pub const DEFAULT_QUERIES: &[&str] = &[
    "stock market",
    "earnings report",
    "Federal Reserve interest rates",
    "NYSE NASDAQ",
];

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
struct Article {
    #[serde(default)]
    source: Option<ArticleSource>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArticleSource {
    name: Option<String>,
}

/// Parse one `/everything` response body into candidates.
pub fn parse_articles(
    body: &str,
    now: DateTime<Utc>,
    watchlist: &[String],
) -> Result<Vec<NewsItem>, SourceError> {
    let env: Envelope =
        serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;
    if env.status != "ok" {
        return Err(SourceError::Provider(
            env.message.unwrap_or_else(|| format!("status {}", env.status)),
        ));
    }

    let out = env
        .articles
        .into_iter()
        .filter_map(|a| {
            let published_at = a
                .published_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or(now);
            // NewsAPI reports the outlet; keep the aggregator visible in the name
            let outlet = a.source.and_then(|s| s.name).unwrap_or_default();
            let source_name = if outlet.trim().is_empty() {
                "NewsAPI".to_string()
            } else {
                format!("NewsAPI - {}", outlet.trim())
            };
            build_candidate(
                &source_name,
                a.title.as_deref().unwrap_or_default(),
                a.description.as_deref().unwrap_or_default(),
                a.url,
                published_at,
                now,
                &[],
                watchlist,
            )
        })
        .collect();
    Ok(out)
}

pub struct NewsApiSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    queries: Vec<String>,
    watchlist: Vec<String>,
}

impl NewsApiSource {
    pub fn new(
        base_url: Option<&str>,
        api_key: String,
        queries: Vec<String>,
        timeout: Duration,
        watchlist: Vec<String>,
    ) -> Result<Self, SourceError> {
        if api_key.trim().is_empty() {
            return Err(SourceError::NotConfigured("NewsAPI key missing".into()));
        }
        let queries = if queries.is_empty() {
            DEFAULT_QUERIES.iter().map(|s| s.to_string()).collect()
        } else {
            queries
        };
        Ok(Self {
            client: super::http_client(timeout)?,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            queries,
            watchlist,
        })
    }

    fn queries_for(&self, query: &FetchQuery) -> Vec<String> {
        match (&query.ticker, &query.keyword) {
            (Some(t), Some(k)) => vec![format!("{t} {k}")],
            (Some(t), None) => vec![format!("{t} stock")],
            (None, Some(k)) => vec![k.clone()],
            (None, None) => self.queries.clone(),
        }
    }
}

#[async_trait]
impl SourceAdapter for NewsApiSource {
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<NewsItem>, SourceError> {
        let from = query.cutoff().format("%Y-%m-%dT%H:%M:%S").to_string();
        let page_size = query.max_items.min(100).to_string();
        let url = format!("{}/everything", self.base_url);

        let mut out: Vec<NewsItem> = Vec::new();
        let mut last_err = None;
        for q in self.queries_for(query) {
            let resp = self
                .client
                .get(&url)
                .header("X-Api-Key", &self.api_key)
                .query(&[
                    ("q", q.as_str()),
                    ("language", "en"),
                    ("sortBy", "publishedAt"),
                    ("from", from.as_str()),
                    ("pageSize", page_size.as_str()),
                ])
                .send()
                .await;
            let body = match resp {
                Ok(r) if r.status().is_success() => r.text().await?,
                // 4xx bodies still carry the provider's error message
                Ok(r) if r.status().is_client_error() => r.text().await?,
                Ok(r) => {
                    last_err = Some(SourceError::Status(r.status().as_u16()));
                    continue;
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            };
            match parse_articles(&body, query.now, &self.watchlist) {
                Ok(items) => {
                    for it in items {
                        if !out.iter().any(|o| o.identity == it.identity) {
                            out.push(it);
                        }
                    }
                }
                Err(e) => last_err = Some(e),
            }
        }

        match (out.is_empty(), last_err) {
            (true, Some(e)) => Err(e),
            _ => Ok(out),
        }
    }

    fn name(&self) -> &str {
        "NewsAPI"
    }
}
