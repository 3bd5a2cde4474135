use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SearchError, SearchHit, SearchProvider};

pub const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    topic: &'a str,
    search_depth: &'a str,
    max_results: usize,
    days: u32,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    published_date: Option<String>,
}

fn parse_published(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Tavily news search.
pub struct TavilySearch {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TavilySearch {
    pub fn new(base_url: Option<&str>, api_key: String, timeout: Duration) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .user_agent(crate::ingest::providers::USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }
}

/// Map a Tavily body to hits; exposed for tests.
pub fn parse_results(body: &str) -> Result<Vec<SearchHit>, SearchError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| SearchError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(SearchError::Malformed("expected a JSON object".into()));
    }
    let resp: TavilyResponse =
        serde_json::from_value(value).map_err(|e| SearchError::Malformed(e.to_string()))?;
    Ok(resp
        .results
        .into_iter()
        .map(|r| SearchHit {
            title: r.title,
            url: r.url,
            snippet: r.content,
            published_at: r.published_date.as_deref().and_then(parse_published),
        })
        .collect())
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str, days: u32, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let request = TavilyRequest {
            api_key: &self.api_key,
            query,
            topic: "news",
            search_depth: "basic",
            max_results,
            days: days.max(1),
        };
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SearchError::Status(response.status().as_u16()));
        }
        let body = response.text().await?;
        parse_results(&body)
    }

    fn name(&self) -> &str {
        "tavily"
    }
}

/// No-op search used when no key is configured.
pub struct NoopSearch;

#[async_trait]
impl SearchProvider for NoopSearch {
    async fn search(&self, _query: &str, _days: u32, _max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        tracing::warn!(target: "verify", "NoopSearch: search called but no search API key configured");
        Ok(vec![])
    }

    fn name(&self) -> &str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_results_and_dates() {
        let body = r#"{"query":"NVDA","results":[
            {"title":"Nvidia launches chip","url":"https://www.cnbc.com/a","content":"Nvidia said...","score":0.9,
             "published_date":"Mon, 02 Jun 2025 10:00:00 GMT"},
            {"title":"Other","url":"https://x.test/b","content":"", "score":0.2}]}"#;
        let hits = parse_results(body).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].published_at, Some(Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap()));
        assert_eq!(hits[1].published_at, None);
        assert!(matches!(parse_results("[]"), Err(SearchError::Malformed(_))));
    }

    #[test]
    fn payload_without_results_is_malformed() {
        assert!(matches!(parse_results("{}"), Err(SearchError::Malformed(_))));
        assert!(matches!(parse_results(r#"{"detail":"rate limited"}"#), Err(SearchError::Malformed(_))));
        assert!(matches!(parse_results("[[]]"), Err(SearchError::Malformed(_))));
        assert_eq!(parse_results(r#"{"results":[]}"#).unwrap(), Vec::<SearchHit>::new());
    }
}
