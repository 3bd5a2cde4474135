// src/ingest/types.rs
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::item::NewsItem;

/// What to fetch: optional ticker/keyword narrowing plus a lookback window
/// ending at `now`.
#[derive(Debug, Clone)]
pub struct FetchQuery {
    pub keyword: Option<String>,
    pub ticker: Option<String>,
    pub lookback: chrono::Duration,
    pub max_items: usize,
    pub now: DateTime<Utc>,
}

impl FetchQuery {
    pub fn recent(lookback_hours: i64, max_items: usize) -> Self {
        Self {
            keyword: None,
            ticker: None,
            lookback: chrono::Duration::hours(lookback_hours.max(1)),
            max_items: max_items.max(1),
            now: Utc::now(),
        }
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.now - self.lookback
    }

    pub fn in_window(&self, published_at: DateTime<Utc>) -> bool {
        // small allowance for provider clock skew
        published_at >= self.cutoff() && published_at <= self.now + chrono::Duration::minutes(10)
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(String),
    #[error("provider returned HTTP {0}")]
    Status(u16),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            SourceError::Status(status.as_u16())
        } else if e.is_timeout() {
            SourceError::Timeout(Duration::ZERO)
        } else if e.is_decode() {
            SourceError::Malformed(e.to_string())
        } else {
            SourceError::Http(e.to_string())
        }
    }
}

/// A news provider. Implementations parse provider payloads into typed
/// candidates at this boundary; malformed payloads are a `SourceError`.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<NewsItem>, SourceError>;
    fn name(&self) -> &str;
}
