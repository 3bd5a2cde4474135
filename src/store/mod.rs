//! # Store
//! Keyed, query-capable record of processed items.
//!
//! `upsert` is the single write path and enforces identity uniqueness
//! atomically: concurrent upserts for the same identity serialize on the
//! implementation's lock and merge via [`NewsItem::merge_from`].

pub mod json_file;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::{Identity, ImpactScore, NewsItem};

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store data corrupt: {0}")]
    Corrupt(String),
    #[error("unsupported store url: {0}")]
    UnsupportedUrl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Query filters; every `Some`/`true` field narrows the result.
/// Results are ordered by `published_at` descending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsQuery {
    pub ticker: Option<String>,
    pub keyword: Option<String>,
    pub min_impact: Option<u8>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unscored_only: bool,
    #[serde(default)]
    pub undistributed_only: bool,
    pub limit: Option<usize>,
}

impl NewsQuery {
    pub fn matches(&self, item: &NewsItem) -> bool {
        if let Some(t) = &self.ticker {
            let t = t.trim().trim_start_matches('$');
            if !item.tickers.iter().any(|x| x.eq_ignore_ascii_case(t)) {
                return false;
            }
        }
        if let Some(k) = &self.keyword {
            let k = k.trim().to_lowercase();
            if !k.is_empty() {
                let hay = format!("{} {} {}", item.title, item.summary, item.tickers.join(" "))
                    .to_lowercase();
                if !hay.contains(&k) {
                    return false;
                }
            }
        }
        if let Some(min) = self.min_impact {
            match item.score() {
                Some(s) if s >= min => {}
                _ => return false,
            }
        }
        if let Some(since) = self.since {
            if item.published_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if item.published_at > until {
                return false;
            }
        }
        if self.unscored_only && item.impact_score != Some(ImpactScore::Unknown) {
            return false;
        }
        if self.undistributed_only && item.distributed_at.is_some() {
            return false;
        }
        true
    }

    /// Sort newest first and apply `limit`.
    pub fn finish(&self, mut items: Vec<NewsItem>) -> Vec<NewsItem> {
        items.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        if let Some(limit) = self.limit {
            items.truncate(limit);
        }
        items
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, identity: &Identity) -> Result<Option<NewsItem>, StoreError>;

    async fn upsert(&self, item: NewsItem) -> Result<UpsertOutcome, StoreError>;

    async fn query(&self, query: &NewsQuery) -> Result<Vec<NewsItem>, StoreError>;

    /// Set `distributed_at` if unset. Returns `true` when this call set it.
    async fn mark_distributed(&self, identity: &Identity, at: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}

pub type DynStore = Arc<dyn Store>;

/// Open a store from a connection string: `memory://` or `file://<path>`.
pub async fn open_store(url: &str) -> Result<DynStore, StoreError> {
    let url = url.trim();
    if url.is_empty() || url == "memory://" || url == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    if let Some(path) = url.strip_prefix("file://") {
        let store = JsonFileStore::open(path).await?;
        return Ok(Arc::new(store));
    }
    Err(StoreError::UnsupportedUrl(url.to_string()))
}
